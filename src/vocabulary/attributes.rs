//! Attribute dictionary for `@attr{uuid} = value` arguments.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::ArgType;

/// A dictionary entry: the argument an attribute id stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: Uuid,
    /// Argument name the attribute binds to
    pub name: String,
    pub arg_type: ArgType,
    pub description: String,
}

impl AttributeDefinition {
    pub fn new(id: Uuid, name: &str, arg_type: ArgType) -> Self {
        Self {
            id,
            name: name.to_string(),
            arg_type,
            description: String::new(),
        }
    }
}

/// Resolves attribute ids found in DSL text
pub trait AttributeDictionary: Send + Sync {
    fn resolve(&self, id: &Uuid) -> Option<AttributeDefinition>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryAttributeDictionary {
    attributes: HashMap<Uuid, AttributeDefinition>,
}

impl InMemoryAttributeDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, attribute: AttributeDefinition) {
        self.attributes.insert(attribute.id, attribute);
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl AttributeDictionary for InMemoryAttributeDictionary {
    fn resolve(&self, id: &Uuid) -> Option<AttributeDefinition> {
        self.attributes.get(id).cloned()
    }
}
