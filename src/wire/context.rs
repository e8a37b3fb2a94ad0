use tracing::debug;

use crate::error::{MappingError, Result};
use crate::model::{Entity, LazyRef, Value};
use crate::types::{HttpMethod, MappedType, PropertySpec};
use crate::wire::node::DeserializerNode;

/// Hooks consulted while a document is materialized.
///
/// The default methods enforce the property access masks declared in the
/// type registry.
pub trait DeserializationContext {
    /// Checks that `method` may be applied to `property` of `owner`.
    fn check_access(&self, owner: &MappedType, property: &PropertySpec, method: HttpMethod) -> Result<()> {
        if property.access.contains(method) {
            Ok(())
        } else {
            Err(denied(owner, property, method))
        }
    }

    /// Checks that `method` may be applied to items of the collection `property`.
    fn check_item_access(
        &self,
        owner: &MappedType,
        property: &PropertySpec,
        method: HttpMethod,
    ) -> Result<()> {
        if property.item_access.contains(method) {
            Ok(())
        } else {
            Err(denied(owner, property, method))
        }
    }

    /// Builds the value standing in for a `_ref` payload.
    fn create_reference(&self, node: &DeserializerNode) -> Result<Value> {
        let uri = node
            .uri
            .as_deref()
            .ok_or_else(|| MappingError::format("reference node without a URI"))?;
        Ok(Value::Reference(LazyRef::new(uri, node.value_type)))
    }

    /// Writes a property value into an instance.
    fn set_property(&self, target: &Entity, property: &PropertySpec, value: Value) -> Result<()> {
        property.set_on(target, value);
        Ok(())
    }
}

fn denied(owner: &MappedType, property: &PropertySpec, method: HttpMethod) -> MappingError {
    debug!(type_name = %owner.name, property = %property.name, method = method.as_str(), "wire.access.denied");
    MappingError::AccessDenied {
        type_name: owner.name.clone(),
        property: property.name.clone(),
        method,
    }
}

/// Context that only applies the declared access masks.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultContext;

impl DeserializationContext for DefaultContext {}

/// Context that skips access checks, for documents produced by a trusted
/// server rather than submitted by a caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct UncheckedContext;

impl DeserializationContext for UncheckedContext {
    fn check_access(&self, _owner: &MappedType, _property: &PropertySpec, _method: HttpMethod) -> Result<()> {
        Ok(())
    }

    fn check_item_access(
        &self,
        _owner: &MappedType,
        _property: &PropertySpec,
        _method: HttpMethod,
    ) -> Result<()> {
        Ok(())
    }
}

/// Verdict of an access hook.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    /// Let the operation through.
    Allow,
    /// Reject with [`MappingError::AccessDenied`].
    Deny,
}

/// Context consulting a caller-supplied hook after the declared masks.
pub struct PolicyContext<F> {
    hook: F,
}

impl<F> PolicyContext<F>
where
    F: Fn(&PropertySpec, HttpMethod) -> Access,
{
    /// Wraps `hook`.
    pub fn new(hook: F) -> Self {
        Self { hook }
    }

    fn consult(&self, owner: &MappedType, property: &PropertySpec, method: HttpMethod) -> Result<()> {
        match (self.hook)(property, method) {
            Access::Allow => Ok(()),
            Access::Deny => Err(denied(owner, property, method)),
        }
    }
}

impl<F> DeserializationContext for PolicyContext<F>
where
    F: Fn(&PropertySpec, HttpMethod) -> Access,
{
    fn check_access(&self, owner: &MappedType, property: &PropertySpec, method: HttpMethod) -> Result<()> {
        DefaultContext.check_access(owner, property, method)?;
        self.consult(owner, property, method)
    }

    fn check_item_access(
        &self,
        owner: &MappedType,
        property: &PropertySpec,
        method: HttpMethod,
    ) -> Result<()> {
        DefaultContext.check_item_access(owner, property, method)?;
        self.consult(owner, property, method)
    }
}
