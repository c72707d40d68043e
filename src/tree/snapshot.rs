use std::collections::BTreeMap;

use crate::protocol::{ComponentId, PropertyValue};

/// Structural and property state of one node, comparable across the
/// server tree and a client shadow tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub class: String,
    pub parent: Option<ComponentId>,
    pub owner: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    pub decorators: Vec<ComponentId>,
    /// Null, opaque and empty subscription values are left out.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl NodeSnapshot {
    pub fn keep_property(value: &PropertyValue) -> bool {
        match value {
            PropertyValue::Null | PropertyValue::Opaque => false,
            PropertyValue::Events(kinds) => !kinds.is_empty(),
            _ => true,
        }
    }
}

pub type TreeSnapshot = BTreeMap<ComponentId, NodeSnapshot>;
