//! Decode and replay errors.
//!
//! Everything here signals a desynchronized peer: the shadow tree can no
//! longer be trusted and the only recovery is a fresh session.

use thiserror::Error;

use super::event::ComponentId;
use super::value::ValueShape;

/// Failures of the typed value codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The raw value has no `tag:` prefix at all.
    #[error("value '{raw}' carries no type tag")]
    MissingTag { raw: String },

    /// The tag character is not one the codec knows.
    #[error("unknown value tag '{tag}'")]
    UnknownTag { tag: String },

    /// The tag is valid but does not match the declared property shape.
    #[error("expected a {expected} value, found tag '{found}'")]
    ShapeMismatch { expected: ValueShape, found: char },

    /// The payload could not be parsed for its tag.
    #[error("malformed {shape} payload '{payload}'")]
    Malformed { shape: ValueShape, payload: String },

    #[error("unknown value type '{0}'")]
    UnknownShape(String),

    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),
}

/// Failures while turning wire messages into render events or replaying
/// them against a shadow tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown render event type '{0}'")]
    UnknownEventType(String),

    #[error("{event_type} event is missing '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("render event references unknown component {0}")]
    UnknownComponent(ComponentId),

    #[error("component {0} constructed twice")]
    DuplicateComponent(ComponentId),

    #[error("no placeholder for component class '{0}'")]
    UnknownClass(String),

    #[error("component {child} is not attached to {parent}")]
    NotAttached {
        child: ComponentId,
        parent: ComponentId,
    },

    #[error("placeholder rejected property '{name}' on {id}: {reason}")]
    Property {
        id: ComponentId,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}
