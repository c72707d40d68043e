//! Wire protocol: render and input events, typed value codec, JSON messages.

mod error;
mod event;
mod value;
mod wire;

pub use error::{CodecError, ProtocolError};
pub use event::{ComponentId, EventKind, InputEvent, PendingWait, PropertyChange, RenderEvent};
pub use value::{PropertyValue, ValueShape};
pub use wire::{ClientMessage, ServerMessage, WireUiEvent};

/// Class tag of the root component. The client maps it onto its
/// pre-existing root placeholder instead of instantiating one.
pub const ROOT_CLASS: &str = "Root";

/// Name of the property listing the input kinds a component subscribes to.
pub const EVENTS_PROPERTY: &str = "events";
