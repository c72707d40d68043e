//! What application code sees while it runs inside a session task.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};

use crate::protocol::{ComponentId, EventKind, InputEvent, PropertyValue, EVENTS_PROPERTY};
use crate::scheduler::{SchedulerHandle, TaskError, TaskId};
use crate::tree::{ClassRegistry, Tree, TreeError};

/// Input handler registered on a component.
pub type Handler = Arc<dyn Fn(&mut UiContext, &InputEvent) -> anyhow::Result<()> + Send + Sync>;

/// The application driven by a session: builds the initial UI under the
/// root and wires handlers. One instance serves every session.
pub trait Application: Send + Sync + 'static {
    /// Called once per process to declare the component classes in use.
    fn register_classes(&self, registry: &mut ClassRegistry);

    /// Called inside the start-session exchange, after the root exists.
    fn start(&self, ctx: &mut UiContext, root: ComponentId) -> anyhow::Result<()>;
}

pub struct UiContext {
    tree: Tree,
    scheduler: SchedulerHandle<UiContext>,
    handlers: HashMap<ComponentId, BTreeMap<EventKind, Vec<Handler>>>,
}

impl UiContext {
    pub fn new(tree: Tree, scheduler: SchedulerHandle<UiContext>) -> Self {
        Self {
            tree,
            scheduler,
            handlers: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn scheduler(&self) -> &SchedulerHandle<UiContext> {
        &self.scheduler
    }

    /// Create a component and attach it under `parent`.
    pub fn add(&mut self, parent: ComponentId, class: &str) -> Result<ComponentId, TreeError> {
        let id = self.tree.create(class)?;
        self.tree.attach(parent, id)?;
        Ok(id)
    }

    /// Dispose `id` with its subtree and forget their handlers.
    pub fn dispose(&mut self, id: ComponentId) -> Result<(), TreeError> {
        self.tree.dispose(id)?;
        self.prune_handlers();
        Ok(())
    }

    /// Drop handlers of components that no longer exist. Also covers
    /// disposals made directly through [`UiContext::tree_mut`].
    pub(crate) fn prune_handlers(&mut self) {
        let tree = &self.tree;
        let before = self.handlers.len();
        self.handlers.retain(|id, _| tree.contains(*id));
        let pruned = before - self.handlers.len();
        if pruned > 0 {
            tracing::trace!(pruned, "Dropped handlers of disposed components");
        }
    }

    pub fn set(
        &mut self,
        id: ComponentId,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool, TreeError> {
        self.tree.set_property(id, name, value)
    }

    /// Register `handler` for `kind` on `id` and publish the updated
    /// subscription list through the `events` property.
    pub fn on<F>(&mut self, id: ComponentId, kind: EventKind, handler: F) -> Result<(), TreeError>
    where
        F: Fn(&mut UiContext, &InputEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !self.tree.contains(id) {
            return Err(TreeError::UnknownComponent(id));
        }
        self.handlers
            .entry(id)
            .or_default()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self.publish_subscriptions(id)
    }

    /// Drop every handler for `kind` on `id`.
    pub fn off(&mut self, id: ComponentId, kind: EventKind) -> Result<(), TreeError> {
        if let Some(kinds) = self.handlers.get_mut(&id) {
            kinds.remove(&kind);
        }
        self.publish_subscriptions(id)
    }

    fn publish_subscriptions(&mut self, id: ComponentId) -> Result<(), TreeError> {
        let kinds: Vec<EventKind> = self
            .handlers
            .get(&id)
            .map(|kinds| kinds.keys().copied().collect())
            .unwrap_or_default();
        self.tree
            .set_property(id, EVENTS_PROPERTY, PropertyValue::Events(kinds))?;
        Ok(())
    }

    /// Run every handler registered for the event's kind on its target.
    pub fn dispatch(&mut self, event: &InputEvent) -> anyhow::Result<()> {
        if !self.tree.contains(event.target) {
            self.handlers.remove(&event.target);
            return Err(anyhow!(
                "{} event for unknown component {}",
                event.kind,
                event.target
            ));
        }

        let handlers: Vec<Handler> = self
            .handlers
            .get(&event.target)
            .and_then(|kinds| kinds.get(&event.kind))
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::debug!(kind = %event.kind, target = %event.target, "No handler registered for input event");
            return Ok(());
        }

        for handler in handlers {
            handler(self, event)
                .with_context(|| format!("{} handler on {}", event.kind, event.target))?;
        }
        Ok(())
    }

    /// Schedule `task` on this session after `delay`.
    pub fn defer<F>(&self, label: impl Into<String>, delay: Duration, task: F) -> TaskId
    where
        F: FnOnce(&mut UiContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.scheduler
            .enqueue(label, delay, move |ctx| task(ctx).map_err(TaskError::from))
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Run `future` on the tokio runtime while holding a poll open, then
    /// hand its output to `then` as a task on this session.
    pub fn spawn_external<T, Fut, Then>(
        &self,
        label: impl Into<String>,
        future: Fut,
        then: Then,
    ) -> anyhow::Result<()>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        Then: FnOnce(&mut UiContext, T) -> anyhow::Result<()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .context("external work needs a tokio runtime")?;
        let scheduler = self.scheduler.clone();
        let label = label.into();

        scheduler.request_polling();
        runtime.spawn(async move {
            let output = future.await;
            scheduler.enqueue(label, Duration::ZERO, move |ctx| {
                then(ctx, output).map_err(TaskError::from)
            });
            scheduler.release_polling();
        });
        Ok(())
    }
}
