//! Client side: shadow tree replay and the request loop that feeds it.

mod connection;
mod placeholder;
mod shadow;
mod transport;

pub use connection::{CaptureError, Connection, ConnectionHandle};
pub use placeholder::{
    DynamicWidgetFactory, Placeholder, RegistryWidgetFactory, SlotPlaceholder, WidgetFactory,
};
pub use shadow::ShadowTree;
pub use transport::{HttpTransport, Transport, TransportError, TransportOutcome};
