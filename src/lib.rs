//! Object-to-REST mapping core.
//!
//! Domain types are registered once in a [`types::TypeRegistry`] and resolved
//! into a shared [`types::TypeGraph`]. From there:
//!
//! - the client builds query chains ([`query::RestQuery`]), normalizes them and
//!   renders request URIs ([`query::UriQueryBuilder`]);
//! - the server parses those URIs and executes them against a data source
//!   ([`query::Interpreter`], [`store::Repository`]);
//! - both sides exchange JSON documents through [`wire::JsonSerializer`] and
//!   [`wire::JsonDeserializer`], which understand `_type`, `_uri`, `_ref` and
//!   the collection delta markers.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod store;
pub mod types;
pub mod wire;

pub use config::Config;
pub use error::{MappingError, Result};
