use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CodecError;
use super::value::ValueShape;

/// Session-unique component identifier. Never reused while the session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of client-originated input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Select,
    Text,
    Upload,
    Resize,
    #[serde(alias = "HISTORY-POP")]
    HistoryPop,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Select,
        EventKind::Text,
        EventKind::Upload,
        EventKind::Resize,
        EventKind::HistoryPop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Select => "SELECT",
            EventKind::Text => "TEXT",
            EventKind::Upload => "UPLOAD",
            EventKind::Resize => "RESIZE",
            EventKind::HistoryPop => "HISTORY_POP",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELECT" => Ok(EventKind::Select),
            "TEXT" => Ok(EventKind::Text),
            "UPLOAD" => Ok(EventKind::Upload),
            "RESIZE" => Ok(EventKind::Resize),
            "HISTORY_POP" | "HISTORY-POP" => Ok(EventKind::HistoryPop),
            other => Err(CodecError::UnknownEventKind(other.to_string())),
        }
    }
}

/// One client-originated user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    #[serde(rename = "eventType")]
    pub kind: EventKind,
    #[serde(rename = "componentId")]
    pub target: ComponentId,
    /// New text, encoded size, upload reference or history token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Caret position for text edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl InputEvent {
    pub fn new(kind: EventKind, target: ComponentId) -> Self {
        Self {
            kind,
            target,
            content: None,
            position: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

/// A property transition, with both values already in tagged wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub name: String,
    pub shape: ValueShape,
    pub old_value: String,
    pub new_value: String,
}

/// One ordered server-to-client state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    ComponentConstructing {
        id: ComponentId,
        class: String,
    },
    ComponentAttached {
        id: ComponentId,
        parent: ComponentId,
    },
    ComponentDetached {
        id: ComponentId,
        parent: ComponentId,
    },
    ComponentDisposed {
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
        change: PropertyChange,
    },
}

impl RenderEvent {
    pub fn component_id(&self) -> ComponentId {
        match self {
            RenderEvent::ComponentConstructing { id, .. }
            | RenderEvent::ComponentAttached { id, .. }
            | RenderEvent::ComponentDetached { id, .. }
            | RenderEvent::ComponentDisposed { id }
            | RenderEvent::DecoratorAttached { id, .. }
            | RenderEvent::DecoratorDetached { id, .. }
            | RenderEvent::PropertyChanged { id, .. } => *id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RenderEvent::ComponentConstructing { .. } => "ComponentConstructing",
            RenderEvent::ComponentAttached { .. } => "ComponentAttached",
            RenderEvent::ComponentDetached { .. } => "ComponentDetached",
            RenderEvent::ComponentDisposed { .. } => "ComponentDisposed",
            RenderEvent::DecoratorAttached { .. } => "DecoratorAttached",
            RenderEvent::DecoratorDetached { .. } => "DecoratorDetached",
            RenderEvent::PropertyChanged { .. } => "PropertyChanged",
        }
    }
}

/// The scheduler's suggestion for when the client should poll again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWait {
    After(Duration),
    /// Nothing is scheduled; only local input should trigger a request.
    Indefinite,
}

impl PendingWait {
    pub const NOW: PendingWait = PendingWait::After(Duration::ZERO);

    /// Wire form: milliseconds, or `-1` for no known deadline.
    pub fn to_wire(self) -> i64 {
        match self {
            PendingWait::After(wait) => i64::try_from(wait.as_millis()).unwrap_or(i64::MAX),
            PendingWait::Indefinite => -1,
        }
    }

    pub fn from_wire(millis: i64) -> Self {
        match u64::try_from(millis) {
            Ok(millis) => PendingWait::After(Duration::from_millis(millis)),
            Err(_) => PendingWait::Indefinite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_pop_accepts_both_spellings() {
        let hyphen: InputEvent =
            serde_json::from_str(r#"{"eventType":"HISTORY-POP","componentId":3}"#).unwrap();
        let underscore: InputEvent =
            serde_json::from_str(r#"{"eventType":"HISTORY_POP","componentId":3}"#).unwrap();
        assert_eq!(hyphen, underscore);
        assert_eq!("HISTORY-POP".parse::<EventKind>().unwrap(), EventKind::HistoryPop);
    }

    #[test]
    fn input_event_omits_absent_payload() {
        let json = serde_json::to_string(&InputEvent::new(EventKind::Select, ComponentId(1))).unwrap();
        assert_eq!(json, r#"{"eventType":"SELECT","componentId":1}"#);
    }

    #[test]
    fn pending_wait_sentinel() {
        assert_eq!(PendingWait::Indefinite.to_wire(), -1);
        assert_eq!(PendingWait::from_wire(-1), PendingWait::Indefinite);
        assert_eq!(
            PendingWait::from_wire(250),
            PendingWait::After(Duration::from_millis(250))
        );
        assert_eq!(PendingWait::NOW.to_wire(), 0);
    }
}
