//! Client-side stand-ins for server components.
//!
//! A placeholder is where a concrete widget would live. The shadow tree
//! only needs to hand it decoded property values and to release it on
//! disposal; what it draws is up to the widget set.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::protocol::{PropertyValue, ValueShape, EVENTS_PROPERTY};
use crate::tree::{ClassRegistry, ClassSpec};

/// A client-side widget instance.
pub trait Placeholder: Send {
    fn class(&self) -> &str;

    /// Apply a decoded value; `PropertyValue::Null` clears the property.
    /// The error string is reported as a protocol error by the caller.
    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<(), String>;

    fn value(&self, name: &str) -> Option<&PropertyValue>;

    /// Every property currently holding a value, by name.
    fn values(&self) -> BTreeMap<String, PropertyValue>;

    /// Free whatever the widget holds. Called once, on disposal.
    fn release(&mut self) {}
}

/// Instantiates a placeholder for a class tag.
pub trait WidgetFactory: Send + Sync {
    fn instantiate(&self, class: &str) -> Option<Box<dyn Placeholder>>;
}

/// One typed property accessor, built when the placeholder is created.
#[derive(Debug, Clone)]
struct Slot {
    shape: Option<ValueShape>,
    value: PropertyValue,
}

/// Placeholder storing properties in typed slots.
///
/// With declared slots, unknown names and values of the wrong shape are
/// rejected. An open placeholder grows a slot for any name it is given.
#[derive(Debug, Clone)]
pub struct SlotPlaceholder {
    class: String,
    slots: BTreeMap<String, Slot>,
    open: bool,
    released: bool,
}

impl SlotPlaceholder {
    /// Slots for every property `spec` declares, except the subscription
    /// property, which the shadow tree consumes itself.
    pub fn declared(spec: &ClassSpec) -> Self {
        let slots = spec
            .properties()
            .iter()
            .filter(|decl| decl.name != EVENTS_PROPERTY)
            .map(|decl| {
                (
                    decl.name.clone(),
                    Slot {
                        shape: Some(decl.shape),
                        value: PropertyValue::Null,
                    },
                )
            })
            .collect();
        Self {
            class: spec.tag().to_string(),
            slots,
            open: false,
            released: false,
        }
    }

    pub fn open(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            slots: BTreeMap::new(),
            open: true,
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Placeholder for SlotPlaceholder {
    fn class(&self) -> &str {
        &self.class
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<(), String> {
        if self.released {
            return Err("placeholder already released".to_string());
        }
        if !self.slots.contains_key(name) {
            if !self.open {
                return Err(format!("class {} has no property '{}'", self.class, name));
            }
            self.slots.insert(
                name.to_string(),
                Slot {
                    shape: None,
                    value: PropertyValue::Null,
                },
            );
        }
        let Some(slot) = self.slots.get_mut(name) else {
            return Err(format!("class {} has no property '{}'", self.class, name));
        };
        if let Some(shape) = slot.shape {
            if !value.fits(shape) {
                return Err(format!("expected a {} value", shape));
            }
        }
        slot.value = value;
        Ok(())
    }

    fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.slots
            .get(name)
            .map(|slot| &slot.value)
            .filter(|value| **value != PropertyValue::Null)
    }

    fn values(&self) -> BTreeMap<String, PropertyValue> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.value != PropertyValue::Null)
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }

    fn release(&mut self) {
        self.released = true;
        self.slots.clear();
    }
}

/// Builds typed placeholders from the same class registry the server uses.
/// Unknown class tags cannot be instantiated.
#[derive(Clone)]
pub struct RegistryWidgetFactory {
    classes: Arc<ClassRegistry>,
}

impl RegistryWidgetFactory {
    pub fn new(classes: Arc<ClassRegistry>) -> Self {
        Self { classes }
    }
}

impl WidgetFactory for RegistryWidgetFactory {
    fn instantiate(&self, class: &str) -> Option<Box<dyn Placeholder>> {
        let spec = self.classes.get(class)?;
        Some(Box::new(SlotPlaceholder::declared(spec)))
    }
}

/// Accepts any class tag; for headless clients that do not share the
/// server's class declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicWidgetFactory;

impl WidgetFactory for DynamicWidgetFactory {
    fn instantiate(&self, class: &str) -> Option<Box<dyn Placeholder>> {
        Some(Box::new(SlotPlaceholder::open(class)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_spec() -> ClassSpec {
        ClassSpec::new("Label")
            .property("text", ValueShape::String)
            .property("visible", ValueShape::Boolean)
    }

    #[test]
    fn declared_slots_reject_unknown_names() {
        let mut label = SlotPlaceholder::declared(&label_spec());
        assert!(label.apply("text", PropertyValue::text("hi")).is_ok());
        assert!(label.apply("colour", PropertyValue::text("red")).is_err());
        assert_eq!(label.value("text"), Some(&PropertyValue::text("hi")));
    }

    #[test]
    fn declared_slots_check_shape() {
        let mut label = SlotPlaceholder::declared(&label_spec());
        let err = label.apply("visible", PropertyValue::Int(1)).unwrap_err();
        assert!(err.contains("boolean"));
    }

    #[test]
    fn null_clears_a_slot() {
        let mut label = SlotPlaceholder::declared(&label_spec());
        label.apply("text", PropertyValue::text("hi")).unwrap();
        label.apply("text", PropertyValue::Null).unwrap();
        assert_eq!(label.value("text"), None);
        assert!(label.values().is_empty());
    }

    #[test]
    fn open_placeholder_accepts_anything() {
        let mut widget = SlotPlaceholder::open("Mystery");
        widget.apply("x", PropertyValue::Int(3)).unwrap();
        widget.apply("x", PropertyValue::text("now text")).unwrap();
        assert_eq!(widget.values().len(), 1);
    }

    #[test]
    fn released_placeholder_refuses_updates() {
        let mut widget = SlotPlaceholder::open("Gone");
        widget.release();
        assert!(widget.is_released());
        assert!(widget.apply("x", PropertyValue::Int(1)).is_err());
    }

    #[test]
    fn registry_factory_knows_only_registered_classes() {
        let classes = Arc::new(ClassRegistry::new().with_class(label_spec()));
        let factory = RegistryWidgetFactory::new(classes);
        assert!(factory.instantiate("Label").is_some());
        assert!(factory.instantiate("Button").is_none());
        assert_eq!(
            DynamicWidgetFactory.instantiate("Button").map(|p| p.class().to_string()),
            Some("Button".to_string())
        );
    }
}
