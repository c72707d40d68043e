//! Server-side component tree.
//!
//! Every structural or property mutation is announced to the subscribed
//! [`MutationListener`]s before it is applied, in the exact order the
//! mutations happen. A listener error rejects the mutation.

mod class;
mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

pub use class::{ClassRegistry, ClassSpec, PropertyDecl};
pub use snapshot::{NodeSnapshot, TreeSnapshot};

use crate::collector::InvariantViolation;
use crate::protocol::{ComponentId, PropertyValue, ValueShape, ROOT_CLASS};
use crate::scheduler::TaskError;

/// One tree mutation as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Constructing {
        id: ComponentId,
        class: String,
    },
    Attached {
        id: ComponentId,
        parent: ComponentId,
    },
    Detached {
        id: ComponentId,
        parent: ComponentId,
    },
    Disposed {
        id: ComponentId,
    },
    DecoratorAttached {
        id: ComponentId,
        owner: ComponentId,
    },
    DecoratorDetached {
        id: ComponentId,
        owner: ComponentId,
    },
    PropertyChanged {
        id: ComponentId,
        name: String,
        shape: ValueShape,
        old: PropertyValue,
        new: PropertyValue,
    },
}

pub trait MutationListener: Send + Sync {
    fn on_mutation(&self, mutation: &Mutation) -> Result<(), InvariantViolation>;
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    #[error("component {0} is already disposed")]
    AlreadyDisposed(ComponentId),

    #[error("component class '{0}' is not registered")]
    UnknownClass(String),

    #[error("tree already has a root")]
    RootExists,

    #[error("component {0} is already attached")]
    AlreadyAttached(ComponentId),

    #[error("component {0} is not attached")]
    NotAttached(ComponentId),

    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle {
        parent: ComponentId,
        child: ComponentId,
    },

    #[error("class '{class}' has no property '{name}'")]
    UndeclaredProperty { class: String, name: String },

    #[error("property '{name}' expects a {expected} value")]
    ShapeMismatch { name: String, expected: ValueShape },

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl From<TreeError> for TaskError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Invariant(violation) => TaskError::Invariant(violation),
            other => TaskError::Application(anyhow::Error::new(other)),
        }
    }
}

#[derive(Debug)]
struct Node {
    class: String,
    parent: Option<ComponentId>,
    owner: Option<ComponentId>,
    children: Vec<ComponentId>,
    decorators: Vec<ComponentId>,
    properties: BTreeMap<String, PropertyValue>,
}

pub struct Tree {
    classes: Arc<ClassRegistry>,
    nodes: HashMap<ComponentId, Node>,
    next_id: u64,
    root: Option<ComponentId>,
    listeners: Vec<Arc<dyn MutationListener>>,
}

impl Tree {
    pub fn new(classes: Arc<ClassRegistry>) -> Self {
        Self {
            classes,
            nodes: HashMap::new(),
            next_id: 0,
            root: None,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Arc<dyn MutationListener>) {
        self.listeners.push(listener);
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    fn emit(&self, mutation: Mutation) -> Result<(), TreeError> {
        for listener in &self.listeners {
            listener.on_mutation(&mutation)?;
        }
        Ok(())
    }

    fn node(&self, id: ComponentId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or_else(|| self.missing(id))
    }

    fn node_mut(&mut self, id: ComponentId) -> Result<&mut Node, TreeError> {
        let missing = self.missing(id);
        self.nodes.get_mut(&id).ok_or(missing)
    }

    /// Ids are handed out in increasing order, so an id below `next_id`
    /// that is not live has been disposed.
    fn missing(&self, id: ComponentId) -> TreeError {
        if id.0 < self.next_id {
            TreeError::AlreadyDisposed(id)
        } else {
            TreeError::UnknownComponent(id)
        }
    }

    /// Construct a detached component of `class` with its declared defaults.
    pub fn create(&mut self, class: &str) -> Result<ComponentId, TreeError> {
        let spec = self
            .classes
            .get(class)
            .ok_or_else(|| TreeError::UnknownClass(class.to_string()))?
            .clone();
        let id = ComponentId(self.next_id);

        self.emit(Mutation::Constructing {
            id,
            class: class.to_string(),
        })?;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                class: class.to_string(),
                parent: None,
                owner: None,
                children: Vec::new(),
                decorators: Vec::new(),
                properties: BTreeMap::new(),
            },
        );

        for decl in spec.properties() {
            if decl.default != PropertyValue::Null {
                self.set_property(id, &decl.name, decl.default.clone())?;
            }
        }
        Ok(id)
    }

    pub fn create_root(&mut self) -> Result<ComponentId, TreeError> {
        if self.root.is_some() {
            return Err(TreeError::RootExists);
        }
        let id = self.create(ROOT_CLASS)?;
        self.root = Some(id);
        Ok(id)
    }

    pub fn root(&self) -> Option<ComponentId> {
        self.root
    }

    fn is_ancestor(&self, candidate: ComponentId, of: ComponentId) -> bool {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self
                .nodes
                .get(&id)
                .and_then(|node| node.parent.or(node.owner));
        }
        false
    }

    fn ensure_free(&self, id: ComponentId) -> Result<(), TreeError> {
        let node = self.node(id)?;
        if node.parent.is_some() || node.owner.is_some() || Some(id) == self.root {
            return Err(TreeError::AlreadyAttached(id));
        }
        Ok(())
    }

    pub fn attach(&mut self, parent: ComponentId, child: ComponentId) -> Result<(), TreeError> {
        self.node(parent)?;
        self.ensure_free(child)?;
        if self.is_ancestor(child, parent) {
            return Err(TreeError::Cycle { parent, child });
        }

        self.emit(Mutation::Attached { id: child, parent })?;
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn detach(&mut self, child: ComponentId) -> Result<(), TreeError> {
        let parent = self.node(child)?.parent.ok_or(TreeError::NotAttached(child))?;

        self.emit(Mutation::Detached { id: child, parent })?;
        self.node_mut(parent)?.children.retain(|id| *id != child);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    pub fn attach_decorator(
        &mut self,
        owner: ComponentId,
        decorator: ComponentId,
    ) -> Result<(), TreeError> {
        self.node(owner)?;
        self.ensure_free(decorator)?;
        if self.is_ancestor(decorator, owner) {
            return Err(TreeError::Cycle {
                parent: owner,
                child: decorator,
            });
        }

        self.emit(Mutation::DecoratorAttached {
            id: decorator,
            owner,
        })?;
        self.node_mut(owner)?.decorators.push(decorator);
        self.node_mut(decorator)?.owner = Some(owner);
        Ok(())
    }

    pub fn detach_decorator(&mut self, decorator: ComponentId) -> Result<(), TreeError> {
        let owner = self
            .node(decorator)?
            .owner
            .ok_or(TreeError::NotAttached(decorator))?;

        self.emit(Mutation::DecoratorDetached {
            id: decorator,
            owner,
        })?;
        self.node_mut(owner)?.decorators.retain(|id| *id != decorator);
        self.node_mut(decorator)?.owner = None;
        Ok(())
    }

    /// Detach `id`, dispose its decorators and children depth-first, then
    /// dispose `id` itself. Disposing twice is rejected.
    pub fn dispose(&mut self, id: ComponentId) -> Result<(), TreeError> {
        let node = self.node(id)?;
        let (parent, owner) = (node.parent, node.owner);
        if parent.is_some() {
            self.detach(id)?;
        }
        if owner.is_some() {
            self.detach_decorator(id)?;
        }

        let node = self.node(id)?;
        let decorators = node.decorators.clone();
        let children = node.children.clone();
        for decorator in decorators {
            self.dispose(decorator)?;
        }
        for child in children {
            self.dispose(child)?;
        }

        self.emit(Mutation::Disposed { id })?;
        self.nodes.remove(&id);
        if self.root == Some(id) {
            self.root = None;
        }
        Ok(())
    }

    /// Returns `false` when the value was already current.
    pub fn set_property(
        &mut self,
        id: ComponentId,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool, TreeError> {
        let node = self.node(id)?;
        let decl = self
            .classes
            .get(&node.class)
            .and_then(|spec| spec.lookup(name))
            .ok_or_else(|| TreeError::UndeclaredProperty {
                class: node.class.clone(),
                name: name.to_string(),
            })?;
        if !value.fits(decl.shape) {
            return Err(TreeError::ShapeMismatch {
                name: name.to_string(),
                expected: decl.shape,
            });
        }
        let shape = decl.shape;

        let old = node
            .properties
            .get(name)
            .cloned()
            .unwrap_or(PropertyValue::Null);
        if old == value {
            return Ok(false);
        }

        self.emit(Mutation::PropertyChanged {
            id,
            name: name.to_string(),
            shape,
            old,
            new: value.clone(),
        })?;
        let node = self.node_mut(id)?;
        if value == PropertyValue::Null {
            node.properties.remove(name);
        } else {
            node.properties.insert(name.to_string(), value);
        }
        Ok(true)
    }

    pub fn property(&self, id: ComponentId, name: &str) -> Option<&PropertyValue> {
        self.nodes.get(&id)?.properties.get(name)
    }

    pub fn class_of(&self, id: ComponentId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.class.as_str())
    }

    pub fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.nodes.get(&id)?.parent
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn decorators(&self, id: ComponentId) -> &[ComponentId] {
        self.nodes
            .get(&id)
            .map(|node| node.decorators.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.nodes
            .iter()
            .map(|(id, node)| {
                let properties = node
                    .properties
                    .iter()
                    .filter(|(_, value)| NodeSnapshot::keep_property(value))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                (
                    *id,
                    NodeSnapshot {
                        class: node.class.clone(),
                        parent: node.parent,
                        owner: node.owner,
                        children: node.children.clone(),
                        decorators: node.decorators.clone(),
                        properties,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Mutation>>);

    impl MutationListener for Recorder {
        fn on_mutation(&self, mutation: &Mutation) -> Result<(), InvariantViolation> {
            self.0.lock().push(mutation.clone());
            Ok(())
        }
    }

    fn tree() -> (Tree, Arc<Recorder>) {
        let classes = ClassRegistry::new()
            .with_class(ClassSpec::new("Button").property("label", ValueShape::String))
            .with_class(
                ClassSpec::new("Panel")
                    .property_with_default("visible", PropertyValue::Bool(true)),
            )
            .with_class(ClassSpec::new("Tooltip").property("text", ValueShape::String));
        let mut tree = Tree::new(Arc::new(classes));
        let recorder = Arc::new(Recorder::default());
        tree.subscribe(recorder.clone());
        (tree, recorder)
    }

    #[test]
    fn ids_are_sequential_from_zero() {
        let (mut tree, _) = tree();
        assert_eq!(tree.create_root().unwrap(), ComponentId(0));
        assert_eq!(tree.create("Button").unwrap(), ComponentId(1));
        assert!(matches!(tree.create_root(), Err(TreeError::RootExists)));
    }

    #[test]
    fn defaults_are_announced_after_construction() {
        let (mut tree, recorder) = tree();
        let panel = tree.create("Panel").unwrap();
        let log = recorder.0.lock();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], Mutation::Constructing { .. }));
        assert_eq!(
            log[1],
            Mutation::PropertyChanged {
                id: panel,
                name: "visible".to_string(),
                shape: ValueShape::Boolean,
                old: PropertyValue::Null,
                new: PropertyValue::Bool(true),
            }
        );
    }

    #[test]
    fn unchanged_property_emits_nothing() {
        let (mut tree, recorder) = tree();
        let button = tree.create("Button").unwrap();
        assert!(tree
            .set_property(button, "label", PropertyValue::text("Go"))
            .unwrap());
        assert!(!tree
            .set_property(button, "label", PropertyValue::text("Go"))
            .unwrap());
        assert_eq!(recorder.0.lock().len(), 2);
    }

    #[test]
    fn property_shape_is_enforced() {
        let (mut tree, _) = tree();
        let button = tree.create("Button").unwrap();
        assert!(matches!(
            tree.set_property(button, "label", PropertyValue::Bool(true)),
            Err(TreeError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            tree.set_property(button, "color", PropertyValue::text("red")),
            Err(TreeError::UndeclaredProperty { .. })
        ));
        tree.set_property(button, "label", PropertyValue::Null).unwrap();
    }

    #[test]
    fn attach_rejects_cycles_and_double_parents() {
        let (mut tree, _) = tree();
        let a = tree.create("Panel").unwrap();
        let b = tree.create("Panel").unwrap();
        tree.attach(a, b).unwrap();
        assert!(matches!(tree.attach(b, a), Err(TreeError::Cycle { .. })));
        let c = tree.create("Panel").unwrap();
        assert!(matches!(tree.attach(c, b), Err(TreeError::AlreadyAttached(_))));
    }

    #[test]
    fn dispose_cascades_depth_first() {
        let (mut tree, recorder) = tree();
        let root = tree.create_root().unwrap();
        let panel = tree.create("Panel").unwrap();
        let button = tree.create("Button").unwrap();
        let tip = tree.create("Tooltip").unwrap();
        tree.attach(root, panel).unwrap();
        tree.attach(panel, button).unwrap();
        tree.attach_decorator(button, tip).unwrap();
        recorder.0.lock().clear();

        tree.dispose(panel).unwrap();

        let log = recorder.0.lock().clone();
        assert_eq!(
            log,
            vec![
                Mutation::Detached {
                    id: panel,
                    parent: root
                },
                Mutation::Detached {
                    id: button,
                    parent: panel
                },
                Mutation::DecoratorDetached {
                    id: tip,
                    owner: button
                },
                Mutation::Disposed { id: tip },
                Mutation::Disposed { id: button },
                Mutation::Disposed { id: panel },
            ]
        );
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn double_dispose_is_rejected_without_events() {
        let (mut tree, recorder) = tree();
        let button = tree.create("Button").unwrap();
        tree.dispose(button).unwrap();
        let before = recorder.0.lock().len();
        assert!(matches!(
            tree.dispose(button),
            Err(TreeError::AlreadyDisposed(id)) if id == button
        ));
        assert_eq!(recorder.0.lock().len(), before);
    }

    #[test]
    fn ids_beyond_the_last_construct_are_unknown() {
        let (mut tree, _recorder) = tree();
        let button = tree.create("Button").unwrap();
        tree.dispose(button).unwrap();
        assert!(matches!(
            tree.detach(ComponentId(button.0 + 1)),
            Err(TreeError::UnknownComponent(_))
        ));
        assert!(matches!(
            tree.detach(button),
            Err(TreeError::AlreadyDisposed(_))
        ));
    }

    #[test]
    fn listener_failure_rejects_mutation() {
        struct Refuse;
        impl MutationListener for Refuse {
            fn on_mutation(&self, _: &Mutation) -> Result<(), InvariantViolation> {
                Err(InvariantViolation::MutationOutsideExchange)
            }
        }

        let mut tree = Tree::new(Arc::new(ClassRegistry::new()));
        tree.subscribe(Arc::new(Refuse));
        let err = tree.create_root().unwrap_err();
        assert!(matches!(err, TreeError::Invariant(_)));
        assert!(tree.is_empty());
        assert!(matches!(TaskError::from(err), TaskError::Invariant(_)));
    }
}
