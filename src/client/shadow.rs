//! The client's mirror of the server tree, rebuilt purely from render events.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::protocol::{
    ComponentId, EventKind, PropertyChange, PropertyValue, ProtocolError, RenderEvent,
    EVENTS_PROPERTY, ROOT_CLASS,
};
use crate::tree::{NodeSnapshot, TreeSnapshot};

use super::placeholder::{Placeholder, SlotPlaceholder, WidgetFactory};

struct ShadowNode {
    placeholder: Box<dyn Placeholder>,
    parent: Option<ComponentId>,
    owner: Option<ComponentId>,
    children: Vec<ComponentId>,
    decorators: Vec<ComponentId>,
    subscriptions: BTreeSet<EventKind>,
}

impl ShadowNode {
    fn new(placeholder: Box<dyn Placeholder>) -> Self {
        Self {
            placeholder,
            parent: None,
            owner: None,
            children: Vec::new(),
            decorators: Vec::new(),
            subscriptions: BTreeSet::new(),
        }
    }
}

/// Which relation an attach/detach event acts on.
#[derive(Debug, Clone, Copy)]
enum Relation {
    Child,
    Decorator,
}

pub struct ShadowTree {
    factory: Arc<dyn WidgetFactory>,
    nodes: HashMap<ComponentId, ShadowNode>,
    /// The root placeholder exists before the server names its id.
    unbound_root: Option<Box<dyn Placeholder>>,
    root: Option<ComponentId>,
}

impl ShadowTree {
    pub fn new(factory: Arc<dyn WidgetFactory>) -> Self {
        let unbound_root = Some(Self::root_placeholder(factory.as_ref()));
        Self {
            factory,
            nodes: HashMap::new(),
            unbound_root,
            root: None,
        }
    }

    fn root_placeholder(factory: &dyn WidgetFactory) -> Box<dyn Placeholder> {
        factory
            .instantiate(ROOT_CLASS)
            .unwrap_or_else(|| Box::new(SlotPlaceholder::open(ROOT_CLASS)))
    }

    /// Drop everything but a fresh, unbound root.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.placeholder.release();
        }
        self.nodes.clear();
        self.root = None;
        self.unbound_root = Some(Self::root_placeholder(self.factory.as_ref()));
    }

    /// Replay `events` in order. Stops at the first event that does not
    /// fit the current shadow state.
    pub fn apply(&mut self, events: &[RenderEvent]) -> Result<(), ProtocolError> {
        for event in events {
            tracing::trace!(event = event.event_type(), id = %event.component_id(), "Replaying render event");
            self.apply_one(event)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, event: &RenderEvent) -> Result<(), ProtocolError> {
        match event {
            RenderEvent::ComponentConstructing { id, class } => self.construct(*id, class),
            RenderEvent::ComponentAttached { id, parent } => {
                self.link(*id, *parent, Relation::Child)
            }
            RenderEvent::ComponentDetached { id, parent } => {
                self.unlink(*id, *parent, Relation::Child)
            }
            RenderEvent::DecoratorAttached { id, owner } => {
                self.link(*id, *owner, Relation::Decorator)
            }
            RenderEvent::DecoratorDetached { id, owner } => {
                self.unlink(*id, *owner, Relation::Decorator)
            }
            RenderEvent::ComponentDisposed { id } => self.dispose(*id),
            RenderEvent::PropertyChanged { id, change } => self.change_property(*id, change),
        }
    }

    fn construct(&mut self, id: ComponentId, class: &str) -> Result<(), ProtocolError> {
        if self.nodes.contains_key(&id) {
            return Err(ProtocolError::DuplicateComponent(id));
        }
        let placeholder = if class == ROOT_CLASS {
            let root = self
                .unbound_root
                .take()
                .ok_or(ProtocolError::DuplicateComponent(id))?;
            self.root = Some(id);
            root
        } else {
            self.factory
                .instantiate(class)
                .ok_or_else(|| ProtocolError::UnknownClass(class.to_string()))?
        };
        self.nodes.insert(id, ShadowNode::new(placeholder));
        Ok(())
    }

    fn node_mut(&mut self, id: ComponentId) -> Result<&mut ShadowNode, ProtocolError> {
        self.nodes
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownComponent(id))
    }

    fn link(
        &mut self,
        id: ComponentId,
        target: ComponentId,
        relation: Relation,
    ) -> Result<(), ProtocolError> {
        if !self.nodes.contains_key(&target) {
            return Err(ProtocolError::UnknownComponent(target));
        }
        let node = self.node_mut(id)?;
        let previous = match relation {
            Relation::Child => node.parent.replace(target),
            Relation::Decorator => node.owner.replace(target),
        };
        if let Some(previous) = previous.filter(|previous| *previous != target) {
            tracing::debug!(%id, from = %previous, to = %target, "Re-linking component");
            self.remove_link(previous, id, relation);
        }
        let target = self.node_mut(target)?;
        let list = match relation {
            Relation::Child => &mut target.children,
            Relation::Decorator => &mut target.decorators,
        };
        if !list.contains(&id) {
            list.push(id);
        }
        Ok(())
    }

    fn unlink(
        &mut self,
        id: ComponentId,
        target: ComponentId,
        relation: Relation,
    ) -> Result<(), ProtocolError> {
        if !self.nodes.contains_key(&target) {
            return Err(ProtocolError::UnknownComponent(target));
        }
        let node = self.node_mut(id)?;
        let slot = match relation {
            Relation::Child => &mut node.parent,
            Relation::Decorator => &mut node.owner,
        };
        if *slot != Some(target) {
            return Err(ProtocolError::NotAttached {
                child: id,
                parent: target,
            });
        }
        *slot = None;
        self.remove_link(target, id, relation);
        Ok(())
    }

    fn remove_link(&mut self, target: ComponentId, id: ComponentId, relation: Relation) {
        if let Some(target) = self.nodes.get_mut(&target) {
            match relation {
                Relation::Child => target.children.retain(|child| *child != id),
                Relation::Decorator => target.decorators.retain(|decorator| *decorator != id),
            }
        }
    }

    fn dispose(&mut self, id: ComponentId) -> Result<(), ProtocolError> {
        let mut node = self
            .nodes
            .remove(&id)
            .ok_or(ProtocolError::UnknownComponent(id))?;
        if let Some(parent) = node.parent {
            self.remove_link(parent, id, Relation::Child);
        }
        if let Some(owner) = node.owner {
            self.remove_link(owner, id, Relation::Decorator);
        }
        for orphan in node.children.iter().chain(node.decorators.iter()) {
            if let Some(orphan) = self.nodes.get_mut(orphan) {
                orphan.parent = orphan.parent.filter(|parent| *parent != id);
                orphan.owner = orphan.owner.filter(|owner| *owner != id);
            }
        }
        node.placeholder.release();
        if self.root == Some(id) {
            // The server may build a new root after disposing the old one.
            self.root = None;
            self.unbound_root = Some(Self::root_placeholder(self.factory.as_ref()));
        }
        Ok(())
    }

    fn change_property(
        &mut self,
        id: ComponentId,
        change: &PropertyChange,
    ) -> Result<(), ProtocolError> {
        let value = PropertyValue::decode_as(change.shape, &change.new_value)?;
        let node = self.node_mut(id)?;

        match value {
            PropertyValue::Events(kinds) => {
                node.subscriptions = kinds.into_iter().collect();
                tracing::trace!(%id, kinds = ?node.subscriptions, "Input capture updated");
                Ok(())
            }
            PropertyValue::Null if change.name == EVENTS_PROPERTY => {
                node.subscriptions.clear();
                Ok(())
            }
            PropertyValue::Opaque => {
                tracing::trace!(%id, name = %change.name, "Skipping opaque value");
                Ok(())
            }
            value => node
                .placeholder
                .apply(&change.name, value)
                .map_err(|reason| ProtocolError::Property {
                    id,
                    name: change.name.clone(),
                    reason,
                }),
        }
    }

    /// Whether `id` currently captures input of `kind`.
    pub fn accepts(&self, id: ComponentId, kind: EventKind) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|node| node.subscriptions.contains(&kind))
    }

    pub fn root(&self) -> Option<ComponentId> {
        self.root
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

    pub fn class_of(&self, id: ComponentId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.placeholder.class())
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn value(&self, id: ComponentId, name: &str) -> Option<&PropertyValue> {
        self.nodes.get(&id)?.placeholder.value(name)
    }

    /// Structure and values in the same form as the server tree's snapshot.
    /// Subscriptions appear as the `events` property.
    pub fn snapshot(&self) -> TreeSnapshot {
        self.nodes
            .iter()
            .map(|(id, node)| {
                let mut properties = node.placeholder.values();
                properties.retain(|_, value| NodeSnapshot::keep_property(value));
                if !node.subscriptions.is_empty() {
                    properties.insert(
                        EVENTS_PROPERTY.to_string(),
                        PropertyValue::Events(node.subscriptions.iter().copied().collect()),
                    );
                }
                let snapshot = NodeSnapshot {
                    class: node.placeholder.class().to_string(),
                    parent: node.parent,
                    owner: node.owner,
                    children: node.children.clone(),
                    decorators: node.decorators.clone(),
                    properties,
                };
                (*id, snapshot)
            })
            .collect()
    }
}
