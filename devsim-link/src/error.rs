//! Link error types.

use devsim_protocol::{DecodeError, DeviceId, ProtocolError};

use crate::channel::ChannelState;

/// Failure to bring a channel up. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint unreachable after every configured attempt
    #[error("could not reach simulator: {0}")]
    Unreachable(#[from] ProtocolError),

    /// Channels connect once; a disconnected channel stays disconnected
    #[error("channel cannot connect from state {0:?}")]
    InvalidState(ChannelState),

    /// The event thread could not be started
    #[error("could not start event thread: {0}")]
    Spawn(std::io::Error),
}

/// Failure of a sync round
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Channel is not connected, or was disconnected while waiting
    #[error("channel is disconnected")]
    Disconnected,

    /// Another round is still waiting for its acknowledge
    #[error("a sync round is already in flight")]
    Busy,

    #[error("could not encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// Emitting failed; the channel has been disconnected
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
}

/// A device model refused a partial state
#[derive(Debug, thiserror::Error)]
pub enum ApplyStateError {
    #[error("{device} has no field '{field}'")]
    UnknownField { device: DeviceId, field: String },

    #[error("{device} rejected '{field}': {reason}")]
    InvalidValue {
        device: DeviceId,
        field: String,
        reason: String,
    },
}

/// Why an inbound `input_changed` was dropped
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown device '{0}'")]
    UnknownDevice(DeviceId),

    #[error(transparent)]
    ApplyState(#[from] ApplyStateError),
}
