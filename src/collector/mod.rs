//! Change capture: turns tree mutations into ordered render events.
//!
//! The collector is subscribed to a session's tree for the whole life of
//! the session. It only accepts mutations while an exchange is open; the
//! buffer it fills is drained exactly once when the exchange finishes.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::protocol::{ComponentId, PropertyChange, RenderEvent};
use crate::tree::{Mutation, MutationListener};

/// Programming errors in the mutation stream. Any of these means the id
/// map can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("component {0} constructed while already registered")]
    DuplicateConstruct(ComponentId),

    #[error("mutation references unregistered component {0}")]
    UnknownComponent(ComponentId),

    #[error("component {0} disposed twice")]
    DoubleDispose(ComponentId),

    #[error("tree mutated outside of a request exchange")]
    MutationOutsideExchange,

    #[error("event collector is poisoned by an earlier violation: {0}")]
    Poisoned(Box<InvariantViolation>),
}

#[derive(Default)]
struct CollectorState {
    /// id -> class tag for every live component.
    registered: HashMap<ComponentId, String>,
    /// One past the highest id ever constructed. The tree hands ids out in
    /// increasing order, so anything below it that is not registered has
    /// been disposed.
    next_id: u64,
    /// Bound only while an exchange is open.
    exchange: Option<Vec<RenderEvent>>,
    poisoned: Option<InvariantViolation>,
}

impl CollectorState {
    fn require(&self, id: ComponentId) -> Result<(), InvariantViolation> {
        if self.registered.contains_key(&id) {
            Ok(())
        } else {
            Err(InvariantViolation::UnknownComponent(id))
        }
    }

    fn capture(&mut self, mutation: &Mutation) -> Result<RenderEvent, InvariantViolation> {
        let event = match mutation {
            Mutation::Constructing { id, class } => {
                if id.0 < self.next_id {
                    return Err(InvariantViolation::DuplicateConstruct(*id));
                }
                self.next_id = id.0 + 1;
                self.registered.insert(*id, class.clone());
                RenderEvent::ComponentConstructing {
                    id: *id,
                    class: class.clone(),
                }
            }
            Mutation::Attached { id, parent } => {
                self.require(*id)?;
                self.require(*parent)?;
                RenderEvent::ComponentAttached {
                    id: *id,
                    parent: *parent,
                }
            }
            Mutation::Detached { id, parent } => {
                self.require(*id)?;
                self.require(*parent)?;
                RenderEvent::ComponentDetached {
                    id: *id,
                    parent: *parent,
                }
            }
            Mutation::DecoratorAttached { id, owner } => {
                self.require(*id)?;
                self.require(*owner)?;
                RenderEvent::DecoratorAttached {
                    id: *id,
                    owner: *owner,
                }
            }
            Mutation::DecoratorDetached { id, owner } => {
                self.require(*id)?;
                self.require(*owner)?;
                RenderEvent::DecoratorDetached {
                    id: *id,
                    owner: *owner,
                }
            }
            Mutation::PropertyChanged {
                id,
                name,
                shape,
                old,
                new,
            } => {
                self.require(*id)?;
                RenderEvent::PropertyChanged {
                    id: *id,
                    change: PropertyChange {
                        name: name.clone(),
                        shape: *shape,
                        old_value: old.encode(),
                        new_value: new.encode(),
                    },
                }
            }
            Mutation::Disposed { id } => {
                if id.0 < self.next_id && !self.registered.contains_key(id) {
                    return Err(InvariantViolation::DoubleDispose(*id));
                }
                self.require(*id)?;
                self.registered.remove(id);
                RenderEvent::ComponentDisposed { id: *id }
            }
        };
        Ok(event)
    }
}

#[derive(Default)]
pub struct EventCollector {
    state: Mutex<CollectorState>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh buffer for one request/response exchange.
    pub fn begin_exchange(&self) -> Result<(), InvariantViolation> {
        let mut state = self.state.lock();
        if let Some(violation) = &state.poisoned {
            return Err(InvariantViolation::Poisoned(Box::new(violation.clone())));
        }
        if state.exchange.is_some() {
            tracing::warn!("Exchange opened while a previous one was still bound; discarding its buffer");
        }
        state.exchange = Some(Vec::new());
        Ok(())
    }

    /// Drain the buffer and unbind it.
    pub fn finish_exchange(&self) -> Result<Vec<RenderEvent>, InvariantViolation> {
        let mut state = self.state.lock();
        let buffer = state.exchange.take();
        if let Some(violation) = &state.poisoned {
            return Err(InvariantViolation::Poisoned(Box::new(violation.clone())));
        }
        buffer.ok_or(InvariantViolation::MutationOutsideExchange)
    }

    pub fn in_exchange(&self) -> bool {
        self.state.lock().exchange.is_some()
    }

    pub fn is_registered(&self, id: ComponentId) -> bool {
        self.state.lock().registered.contains_key(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.state.lock().registered.len()
    }

    pub fn poisoned(&self) -> Option<InvariantViolation> {
        self.state.lock().poisoned.clone()
    }
}

impl MutationListener for EventCollector {
    fn on_mutation(&self, mutation: &Mutation) -> Result<(), InvariantViolation> {
        let mut state = self.state.lock();
        if let Some(violation) = &state.poisoned {
            return Err(InvariantViolation::Poisoned(Box::new(violation.clone())));
        }

        let outcome = if state.exchange.is_none() {
            Err(InvariantViolation::MutationOutsideExchange)
        } else {
            state.capture(mutation)
        };

        match outcome {
            Ok(event) => {
                tracing::trace!(event = event.event_type(), id = %event.component_id(), "Captured render event");
                if let Some(buffer) = state.exchange.as_mut() {
                    buffer.push(event);
                }
                Ok(())
            }
            Err(violation) => {
                tracing::error!(%violation, "Event collector poisoned");
                state.poisoned = Some(violation.clone());
                Err(violation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PropertyValue, ValueShape};

    fn constructing(id: u64) -> Mutation {
        Mutation::Constructing {
            id: ComponentId(id),
            class: "Button".to_string(),
        }
    }

    #[test]
    fn buffers_events_in_mutation_order() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        collector.on_mutation(&constructing(0)).unwrap();
        collector.on_mutation(&constructing(1)).unwrap();
        collector
            .on_mutation(&Mutation::Attached {
                id: ComponentId(1),
                parent: ComponentId(0),
            })
            .unwrap();
        collector
            .on_mutation(&Mutation::PropertyChanged {
                id: ComponentId(1),
                name: "label".to_string(),
                shape: ValueShape::String,
                old: PropertyValue::Null,
                new: PropertyValue::text("Hi"),
            })
            .unwrap();

        let events = collector.finish_exchange().unwrap();
        let kinds: Vec<_> = events.iter().map(RenderEvent::event_type).collect();
        assert_eq!(
            kinds,
            vec![
                "ComponentConstructing",
                "ComponentConstructing",
                "ComponentAttached",
                "PropertyChanged"
            ]
        );
        match &events[3] {
            RenderEvent::PropertyChanged { change, .. } => {
                assert_eq!(change.new_value, "s:Hi");
                assert_eq!(change.old_value, "n:");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn buffer_drains_once_per_exchange() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        collector.on_mutation(&constructing(0)).unwrap();
        assert_eq!(collector.finish_exchange().unwrap().len(), 1);
        assert_eq!(
            collector.finish_exchange(),
            Err(InvariantViolation::MutationOutsideExchange)
        );

        collector.begin_exchange().unwrap();
        assert!(collector.finish_exchange().unwrap().is_empty());
        assert!(collector.is_registered(ComponentId(0)));
    }

    #[test]
    fn mutation_without_exchange_fails_loudly() {
        let collector = EventCollector::new();
        assert_eq!(
            collector.on_mutation(&constructing(0)),
            Err(InvariantViolation::MutationOutsideExchange)
        );
        assert!(collector.poisoned().is_some());
        assert!(matches!(
            collector.begin_exchange(),
            Err(InvariantViolation::Poisoned(_))
        ));
    }

    #[test]
    fn duplicate_construct_is_rejected() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        collector.on_mutation(&constructing(5)).unwrap();
        assert_eq!(
            collector.on_mutation(&constructing(5)),
            Err(InvariantViolation::DuplicateConstruct(ComponentId(5)))
        );
    }

    #[test]
    fn double_dispose_is_rejected() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        collector.on_mutation(&constructing(2)).unwrap();
        let dispose = Mutation::Disposed { id: ComponentId(2) };
        collector.on_mutation(&dispose).unwrap();
        assert!(!collector.is_registered(ComponentId(2)));
        assert_eq!(
            collector.on_mutation(&dispose),
            Err(InvariantViolation::DoubleDispose(ComponentId(2)))
        );
    }

    #[test]
    fn reconstructing_a_disposed_id_is_a_duplicate() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        for id in 0..100 {
            collector.on_mutation(&constructing(id)).unwrap();
            collector
                .on_mutation(&Mutation::Disposed { id: ComponentId(id) })
                .unwrap();
        }
        assert_eq!(collector.registered_count(), 0);
        assert_eq!(
            collector.on_mutation(&constructing(40)),
            Err(InvariantViolation::DuplicateConstruct(ComponentId(40)))
        );
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let collector = EventCollector::new();
        collector.begin_exchange().unwrap();
        collector.on_mutation(&constructing(1)).unwrap();
        assert_eq!(
            collector.on_mutation(&Mutation::Attached {
                id: ComponentId(1),
                parent: ComponentId(9),
            }),
            Err(InvariantViolation::UnknownComponent(ComponentId(9)))
        );
        assert!(matches!(
            collector.finish_exchange(),
            Err(InvariantViolation::Poisoned(_))
        ));
    }
}
