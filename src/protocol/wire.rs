//! JSON messages exchanged on the single endpoint.

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::event::{ComponentId, InputEvent, PendingWait, PropertyChange, RenderEvent};
use super::value::ValueShape;

/// Client to server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(default)]
    pub start_session: bool,
    #[serde(default)]
    pub events: Vec<InputEvent>,
}

impl ClientMessage {
    pub fn start_session() -> Self {
        Self {
            start_session: true,
            events: Vec::new(),
        }
    }

    pub fn with_events(events: Vec<InputEvent>) -> Self {
        Self {
            start_session: false,
            events,
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub ui_events: Vec<WireUiEvent>,
    pub pending_wait: i64,
}

impl ServerMessage {
    pub fn new(events: &[RenderEvent], pending_wait: PendingWait) -> Self {
        Self {
            ui_events: events.iter().map(WireUiEvent::from).collect(),
            pending_wait: pending_wait.to_wire(),
        }
    }

    pub fn pending_wait(&self) -> PendingWait {
        PendingWait::from_wire(self.pending_wait)
    }

    /// Decode every event, failing on the first one that is not understood.
    pub fn render_events(&self) -> Result<Vec<RenderEvent>, ProtocolError> {
        self.ui_events
            .iter()
            .cloned()
            .map(RenderEvent::try_from)
            .collect()
    }
}

/// Flat JSON form of a [`RenderEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUiEvent {
    pub event_type: String,
    pub component_id: ComponentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_old_value: Option<String>,
}

impl WireUiEvent {
    fn bare(event_type: &str, id: ComponentId) -> Self {
        Self {
            event_type: event_type.to_string(),
            component_id: id,
            component_class: None,
            parent_id: None,
            prop_name: None,
            prop_value_type: None,
            prop_new_value: None,
            prop_old_value: None,
        }
    }
}

impl From<&RenderEvent> for WireUiEvent {
    fn from(event: &RenderEvent) -> Self {
        let mut wire = WireUiEvent::bare(event.event_type(), event.component_id());
        match event {
            RenderEvent::ComponentConstructing { class, .. } => {
                wire.component_class = Some(class.clone());
            }
            RenderEvent::ComponentAttached { parent, .. }
            | RenderEvent::ComponentDetached { parent, .. } => {
                wire.parent_id = Some(*parent);
            }
            RenderEvent::DecoratorAttached { owner, .. }
            | RenderEvent::DecoratorDetached { owner, .. } => {
                wire.parent_id = Some(*owner);
            }
            RenderEvent::ComponentDisposed { .. } => {}
            RenderEvent::PropertyChanged { change, .. } => {
                wire.prop_name = Some(change.name.clone());
                wire.prop_value_type = Some(change.shape.as_str().to_string());
                wire.prop_new_value = Some(change.new_value.clone());
                wire.prop_old_value = Some(change.old_value.clone());
            }
        }
        wire
    }
}

impl TryFrom<WireUiEvent> for RenderEvent {
    type Error = ProtocolError;

    fn try_from(wire: WireUiEvent) -> Result<Self, Self::Error> {
        let id = wire.component_id;
        let event_type = wire.event_type.as_str();
        let missing = |field: &'static str| ProtocolError::MissingField {
            event_type: wire.event_type.clone(),
            field,
        };

        let event = match event_type {
            "ComponentConstructing" => RenderEvent::ComponentConstructing {
                id,
                class: wire
                    .component_class
                    .clone()
                    .ok_or_else(|| missing("componentClass"))?,
            },
            "ComponentAttached" => RenderEvent::ComponentAttached {
                id,
                parent: wire.parent_id.ok_or_else(|| missing("parentId"))?,
            },
            "ComponentDetached" => RenderEvent::ComponentDetached {
                id,
                parent: wire.parent_id.ok_or_else(|| missing("parentId"))?,
            },
            "ComponentDisposed" => RenderEvent::ComponentDisposed { id },
            "DecoratorAttached" => RenderEvent::DecoratorAttached {
                id,
                owner: wire.parent_id.ok_or_else(|| missing("parentId"))?,
            },
            "DecoratorDetached" => RenderEvent::DecoratorDetached {
                id,
                owner: wire.parent_id.ok_or_else(|| missing("parentId"))?,
            },
            "PropertyChanged" => {
                let shape = wire
                    .prop_value_type
                    .as_deref()
                    .ok_or_else(|| missing("propValueType"))?;
                RenderEvent::PropertyChanged {
                    id,
                    change: PropertyChange {
                        name: wire.prop_name.clone().ok_or_else(|| missing("propName"))?,
                        shape: ValueShape::parse(shape)?,
                        new_value: wire
                            .prop_new_value
                            .clone()
                            .ok_or_else(|| missing("propNewValue"))?,
                        old_value: wire.prop_old_value.clone().unwrap_or_else(|| "n:".to_string()),
                    },
                }
            }
            other => return Err(ProtocolError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventKind;

    #[test]
    fn client_message_defaults_missing_fields() {
        let message: ClientMessage = serde_json::from_str("{}").unwrap();
        assert!(!message.start_session);
        assert!(message.events.is_empty());

        let message: ClientMessage = serde_json::from_str(
            r#"{"events":[{"eventType":"TEXT","componentId":4,"content":"abc","position":3}]}"#,
        )
        .unwrap();
        assert_eq!(
            message.events,
            vec![InputEvent::new(EventKind::Text, ComponentId(4))
                .with_content("abc")
                .with_position(3)]
        );
    }

    #[test]
    fn property_change_serializes_flat() {
        let event = RenderEvent::PropertyChanged {
            id: ComponentId(1),
            change: PropertyChange {
                name: "label".to_string(),
                shape: ValueShape::String,
                old_value: "n:".to_string(),
                new_value: "s:Hi".to_string(),
            },
        };
        let json = serde_json::to_value(ServerMessage::new(
            std::slice::from_ref(&event),
            PendingWait::Indefinite,
        ))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "uiEvents": [{
                    "eventType": "PropertyChanged",
                    "componentId": 1,
                    "propName": "label",
                    "propValueType": "string",
                    "propNewValue": "s:Hi",
                    "propOldValue": "n:"
                }],
                "pendingWait": -1
            })
        );
    }

    #[test]
    fn unknown_event_type_is_a_protocol_error() {
        let message: ServerMessage = serde_json::from_str(
            r#"{"uiEvents":[{"eventType":"ComponentExploded","componentId":1}],"pendingWait":0}"#,
        )
        .unwrap();
        assert_eq!(
            message.render_events(),
            Err(ProtocolError::UnknownEventType("ComponentExploded".to_string()))
        );
    }

    #[test]
    fn attach_without_parent_is_rejected() {
        let wire = WireUiEvent::bare("ComponentAttached", ComponentId(2));
        assert!(matches!(
            RenderEvent::try_from(wire),
            Err(ProtocolError::MissingField {
                field: "parentId",
                ..
            })
        ));
    }
}
