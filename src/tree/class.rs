use std::collections::HashMap;

use crate::protocol::{PropertyValue, ValueShape, EVENTS_PROPERTY, ROOT_CLASS};

/// A property a component class exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub shape: ValueShape,
    pub default: PropertyValue,
}

/// Static description of a component class: its tag and its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    tag: String,
    properties: Vec<PropertyDecl>,
}

impl ClassSpec {
    /// Every class starts out with the `events` subscription property.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            properties: vec![PropertyDecl {
                name: EVENTS_PROPERTY.to_string(),
                shape: ValueShape::Events,
                default: PropertyValue::Null,
            }],
        }
    }

    pub fn property(self, name: impl Into<String>, shape: ValueShape) -> Self {
        self.declare(name.into(), shape, PropertyValue::Null)
    }

    /// Declare a property whose shape is taken from its default value.
    pub fn property_with_default(self, name: impl Into<String>, default: PropertyValue) -> Self {
        let shape = default.shape().unwrap_or(ValueShape::Opaque);
        self.declare(name.into(), shape, default)
    }

    fn declare(mut self, name: String, shape: ValueShape, default: PropertyValue) -> Self {
        self.properties.retain(|decl| decl.name != name);
        self.properties.push(PropertyDecl {
            name,
            shape,
            default,
        });
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn properties(&self) -> &[PropertyDecl] {
        &self.properties
    }

    pub fn lookup(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|decl| decl.name == name)
    }
}

/// Class tag -> class description. Built once, then shared read-only.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassSpec>,
}

impl ClassRegistry {
    /// A registry holding only the root class.
    pub fn new() -> Self {
        let mut classes = HashMap::new();
        let root = ClassSpec::new(ROOT_CLASS)
            .property("title", ValueShape::String)
            .property("size", ValueShape::Size);
        classes.insert(ROOT_CLASS.to_string(), root);
        Self { classes }
    }

    pub fn with_class(mut self, spec: ClassSpec) -> Self {
        self.register(spec);
        self
    }

    pub fn register(&mut self, spec: ClassSpec) {
        if self.classes.contains_key(spec.tag()) {
            tracing::debug!(class = %spec.tag(), "Replacing registered component class");
        }
        self.classes.insert(spec.tag().to_string(), spec);
    }

    pub fn get(&self, tag: &str) -> Option<&ClassSpec> {
        self.classes.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.classes.contains_key(tag)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
