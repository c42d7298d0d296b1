//! # Devsim Protocol
//!
//! Events exchanged between a running device program and the visual
//! simulator that renders it.
//!
//! ## Wire Format
//!
//! Every event is a JSON frame:
//! ```text
//! {"event": <name>, "data": <text payload>}
//! ```
//! Over WebSocket each frame is one text message. Over TCP and Unix sockets
//! frames are length-prefixed:
//! ```text
//! [len:u32-LE][json...]
//! ```
//!
//! ## Events
//!
//! | Name | Direction | Payload |
//! |------|-----------|---------|
//! | `updateState` | device→simulator | state envelope |
//! | `received_state` | simulator→device | ignored |
//! | `input_changed` | simulator→device | state envelope |
//! | `receivedState` | device→simulator | echo of the `input_changed` payload |
//! | `process_disconnect` | simulator→device | ignored |
//!
//! The state envelope is `{"active_device": <token>, "state": {...}}`.

mod envelope;
mod event;
pub mod memory;
pub mod socket;
pub mod transport;
pub mod websocket;

pub use envelope::{DecodeError, DeviceId, DeviceState, Envelope};
pub use event::{event_name, Event, ProtocolError, MAX_FRAME_SIZE};
pub use socket::{SocketAddr, SocketConnection, SocketListener, SocketReader, SocketWriter};
pub use transport::{connect, Connection, Endpoint, EventSink, EventSource, Listener, RetryPolicy};
pub use websocket::{WebSocketConnection, WebSocketListener};

/// Host the simulator listens on
pub const DEFAULT_HOST: &str = "localhost";

/// Port the simulator listens on
pub const DEFAULT_PORT: u16 = 5678;

/// Connection attempts before giving up
pub const CONNECTION_ATTEMPTS: u32 = 10;
