//! Named events exchanged between the device program and the simulator.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum size of a single framed event on stream sockets
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Event names as they appear on the wire
pub mod event_name {
    pub const UPDATE_STATE: &str = "updateState";
    pub const INPUT_ACK: &str = "receivedState";
    pub const INPUT_CHANGED: &str = "input_changed";
    pub const STATE_ACK: &str = "received_state";
    pub const PROCESS_DISCONNECT: &str = "process_disconnect";
}

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    /// Event name not part of the protocol
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// Frame length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    /// Invalid frame format
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,
    /// Every connection attempt failed
    #[error("could not connect to {endpoint} after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        endpoint: String,
        attempts: u32,
        reason: String,
    },
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(e),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidFormat(e.to_string())
    }
}

/// Events exchanged with the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Device program -> simulator: new device state (envelope text)
    UpdateState(String),

    /// Device program -> simulator: acknowledges an `InputChanged`, echoing its payload
    InputAck(String),

    /// Simulator -> device program: user input or sensor change (envelope text)
    InputChanged(String),

    /// Simulator -> device program: the last `UpdateState` has been applied
    StateAck,

    /// Simulator -> device program: close the connection
    ProcessDisconnect,
}

#[derive(Serialize)]
struct OutFrame<'a> {
    event: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct InFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl Event {
    /// Wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            Event::UpdateState(_) => event_name::UPDATE_STATE,
            Event::InputAck(_) => event_name::INPUT_ACK,
            Event::InputChanged(_) => event_name::INPUT_CHANGED,
            Event::StateAck => event_name::STATE_ACK,
            Event::ProcessDisconnect => event_name::PROCESS_DISCONNECT,
        }
    }

    /// Text payload carried by this event (empty for signal-only events)
    pub fn payload(&self) -> &str {
        match self {
            Event::UpdateState(data) | Event::InputAck(data) | Event::InputChanged(data) => data,
            Event::StateAck | Event::ProcessDisconnect => "",
        }
    }

    /// Serialize to a JSON frame: `{"event": <name>, "data": <payload>}`
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let frame = OutFrame {
            event: self.name(),
            data: self.payload(),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Parse a JSON frame.
    ///
    /// Non-string `data` values are kept as their JSON text, so a simulator
    /// sending an object instead of a pre-serialized string still works.
    pub fn from_json(text: &str) -> Result<Event, ProtocolError> {
        let frame: InFrame = serde_json::from_str(text)?;
        let data = match frame.data {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        let event = match frame.event.as_str() {
            event_name::UPDATE_STATE => Event::UpdateState(data),
            event_name::INPUT_ACK => Event::InputAck(data),
            event_name::INPUT_CHANGED => Event::InputChanged(data),
            event_name::STATE_ACK => Event::StateAck,
            event_name::PROCESS_DISCONNECT => Event::ProcessDisconnect,
            _ => return Err(ProtocolError::UnknownEvent(frame.event)),
        };
        Ok(event)
    }

    /// Encode to stream wire format: `[len:u32-LE][json...]`
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let json = self.to_json()?;
        if json.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(json.len()));
        }

        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend(&len.to_le_bytes());
        result.extend(json.as_bytes());
        Ok(result)
    }

    /// Write event to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Read event from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Event, ProtocolError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        if len == 0 {
            return Err(ProtocolError::InvalidFormat(
                "Zero-length frame".to_string(),
            ));
        }

        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let text = std::str::from_utf8(&data)
            .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;
        Event::from_json(text)
    }
}
