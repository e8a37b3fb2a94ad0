use crate::model::{Entity, Value};
use crate::types::{MappedTypeId, PropertySpec};

/// What a node does with the value it deserializes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum NodeOperation {
    /// Not decided yet; becomes `Post` without an existing value and `Patch` with one.
    #[default]
    Default,
    /// Create a new value.
    Post,
    /// Update the existing value in place.
    Patch,
    /// Remove the existing value from its collection.
    Delete,
}

/// Property that owns a node, used for access checks.
#[derive(Clone, Debug)]
pub struct NodeOwner {
    /// Type declaring or inheriting the property.
    pub owner_type: MappedTypeId,
    /// The property itself.
    pub property: PropertySpec,
}

/// One step of a deserialization walk.
#[derive(Clone, Debug)]
pub struct DeserializerNode {
    /// Type the surrounding slot declares.
    pub expected_type: MappedTypeId,
    /// Concrete type, narrowed by a `_type` tag.
    pub value_type: MappedTypeId,
    /// Operation applied at this node.
    pub operation: NodeOperation,
    /// Existing or produced value.
    pub value: Option<Value>,
    /// Value of a `_uri` or `_ref` property.
    pub uri: Option<String>,
    /// Dot-joined lower case property path from the document root.
    pub expand_path: String,
    /// Property this node is the value of, if any.
    pub owner: Option<NodeOwner>,
    dirty: bool,
    /// Patched copies of existing instances, paired with the originals they
    /// replace once the whole document is accepted.
    staged: Vec<(Entity, Entity)>,
}

impl DeserializerNode {
    /// Root node for a document expected to be of type `expected`.
    pub fn root(expected: MappedTypeId, existing: Option<Value>) -> Self {
        let operation = if existing.is_some() {
            NodeOperation::Patch
        } else {
            NodeOperation::Post
        };
        Self {
            expected_type: expected,
            value_type: expected,
            operation,
            value: existing,
            uri: None,
            expand_path: String::new(),
            owner: None,
            dirty: false,
            staged: Vec::new(),
        }
    }

    /// Node for an element of a collection or dictionary at `expand_path`.
    pub fn item(expected: MappedTypeId, expand_path: impl Into<String>) -> Self {
        Self {
            expected_type: expected,
            value_type: expected,
            operation: NodeOperation::Default,
            value: None,
            uri: None,
            expand_path: expand_path.into(),
            owner: None,
            dirty: false,
            staged: Vec::new(),
        }
    }

    /// Node for `property` of an instance of `owner_type` at `parent_path`,
    /// starting from the property's current value.
    pub fn property(
        owner_type: MappedTypeId,
        property: &PropertySpec,
        parent_path: &str,
        current: Option<Value>,
    ) -> Self {
        let segment = property.name.to_ascii_lowercase();
        let expand_path = if parent_path.is_empty() {
            segment
        } else {
            format!("{parent_path}.{segment}")
        };
        Self {
            expected_type: property.property_type,
            value_type: property.property_type,
            operation: NodeOperation::Default,
            value: current,
            uri: None,
            expand_path,
            owner: Some(NodeOwner {
                owner_type,
                property: property.clone(),
            }),
            dirty: false,
            staged: Vec::new(),
        }
    }

    /// Replaces the value; the node becomes dirty when it actually changed.
    pub fn set_value(&mut self, value: Value) {
        if self.value.as_ref() != Some(&value) {
            self.dirty = true;
        }
        self.value = Some(value);
    }

    /// Whether [`DeserializerNode::set_value`] changed the value.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records that `copy` holds the patched state of `original`.
    pub fn stage(&mut self, original: Entity, copy: Entity) {
        self.staged.push((original, copy));
    }

    /// Takes over the staged patches of a finished child node.
    pub fn absorb(&mut self, child: &mut DeserializerNode) {
        self.staged.append(&mut child.staged);
    }

    /// Writes every staged copy back into its original instance.
    pub fn commit(&mut self) {
        for (original, copy) in self.staged.drain(..) {
            original.overwrite_from(&copy);
        }
    }

    /// The value, `Null` when none was produced.
    pub fn into_value(self) -> Value {
        self.value.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_values_stay_clean() {
        let mut node = DeserializerNode::item(MappedTypeId(1), "hat");
        node.value = Some(Value::Int(3));
        node.set_value(Value::Int(3));
        assert!(!node.is_dirty());
        node.set_value(Value::Int(4));
        assert!(node.is_dirty());
        assert_eq!(node.into_value(), Value::Int(4));
    }

    #[test]
    fn root_operation_follows_existing_value() {
        assert_eq!(DeserializerNode::root(MappedTypeId(0), None).operation, NodeOperation::Post);
        assert_eq!(
            DeserializerNode::root(MappedTypeId(0), Some(Value::Null)).operation,
            NodeOperation::Patch
        );
    }
}
