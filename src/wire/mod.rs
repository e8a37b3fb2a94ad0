//! Structured JSON wire format.
//!
//! Documents carry a handful of reserved keys: `_type` narrows the declared
//! type of a value, `_uri` names a resource instance and `_ref` stands in for
//! a resource that was not expanded. Collection and dictionary members may be
//! prefixed with `*@` (patch), `-@` (delete), `!` (force creation) or `^`
//! (escape a literal leading character).

/// Hooks consulted while deserializing.
pub mod context;
/// JSON to object model.
pub mod deserializer;
/// Per-value state of a deserialization walk.
pub mod node;
/// Object model to JSON.
pub mod serializer;

pub use context::{Access, DefaultContext, DeserializationContext, PolicyContext, UncheckedContext};
pub use deserializer::JsonDeserializer;
pub use node::{DeserializerNode, NodeOperation, NodeOwner};
pub use serializer::{ExpandSet, JsonSerializer};

/// `_type` tag of a listing envelope.
pub const RESULT_TYPE: &str = "__result__";
