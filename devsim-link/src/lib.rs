//! # Devsim Link
//!
//! Keeps a device program and its visual simulator in step.
//!
//! A program hands each new device snapshot to [`SyncChannel::send_state`].
//! Unchanged snapshots are skipped; changed ones are sent as `updateState`
//! and the calling thread blocks until the simulator answers
//! `received_state`. Meanwhile a dedicated event thread applies
//! `input_changed` events (button presses, sensor changes) to the devices in
//! the [`DeviceRegistry`] and acknowledges them.
//!
//! ```no_run
//! use devsim_link::{DeviceKind, DeviceRegistry, LinkConfig, SyncChannel};
//!
//! let channel = SyncChannel::new(DeviceRegistry::with_default_devices());
//! channel.connect(&LinkConfig::default())?;
//!
//! let cpx = DeviceKind::CircuitPlayground.id();
//! if let Some(device) = channel.registry().resolve(&cpx) {
//!     channel.send_state(&cpx, &device.snapshot())?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod channel;
mod config;
mod device;
mod differ;
mod error;
pub mod handler;
mod registry;
mod signal;

pub use channel::{ChannelState, SyncChannel, SyncOutcome};
pub use config::LinkConfig;
pub use device::{DeviceHandle, DeviceKind, MemoryDevice};
pub use differ::{should_sync, PreviousState};
pub use error::{ApplyStateError, ConnectError, InboundError, SyncError};
pub use registry::DeviceRegistry;
pub use signal::{ReleaseSignal, Wake};

pub use devsim_protocol::{DeviceId, DeviceState, Endpoint, Envelope};
