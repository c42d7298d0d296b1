//! Sync channel: owns the connection and runs blocking sync rounds.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Sending -> AwaitingAck -> Connected
//!                                   \_____________ disconnect ____________/
//!                                                      |
//!                                                 Disconnected (terminal)
//! ```
//!
//! Two threads touch a channel: the program thread, which calls
//! [`SyncChannel::send_state`] and blocks, and the event thread spawned at
//! connect time, which runs the inbound handlers and releases the blocked
//! round. A round must never be started from the event thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use devsim_protocol::{
    transport, Connection, DeviceId, DeviceState, Envelope, Event, EventSink, ProtocolError,
};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::differ::PreviousState;
use crate::error::{ConnectError, SyncError};
use crate::handler::{self, ChannelControl};
use crate::registry::DeviceRegistry;
use crate::signal::{ReleaseSignal, Wake};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Sending,
    AwaitingAck,
}

/// Result of a [`SyncChannel::send_state`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Same as the last snapshot sent; nothing transmitted
    Unchanged,
    /// Sent and acknowledged
    Synced,
}

struct Inner {
    state: ChannelState,
    /// Set on the first connect or disconnect; a used channel never connects
    used: bool,
}

/// State shared with the event thread.
///
/// Lock order is `inner` then `sink`. `inner` is never held across a write.
struct Shared {
    inner: Mutex<Inner>,
    sink: Mutex<Option<Box<dyn EventSink>>>,
    signal: ReleaseSignal,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self) -> MutexGuard<'_, Option<Box<dyn EventSink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelControl for Shared {
    fn emit(&self, event: &Event) -> Result<(), ProtocolError> {
        let mut sink = self.sink();
        let sink = sink.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        sink.emit(event)
    }

    fn release(&self) {
        self.signal.set();
    }

    fn disconnect(&self) {
        {
            let mut inner = self.lock();
            inner.state = ChannelState::Disconnected;
            inner.used = true;
        }
        self.signal.close();

        // Waits for an emit in progress to finish
        let sink = self.sink().take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close() {
                debug!(error = %e, "error while closing connection");
            }
            info!("disconnected from simulator");
        }
    }
}

/// Blocking state link to one simulator
pub struct SyncChannel {
    shared: Arc<Shared>,
    registry: Arc<DeviceRegistry>,
    previous: Mutex<PreviousState>,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl SyncChannel {
    /// A disconnected channel that routes inbound state to `registry`
    pub fn new(registry: DeviceRegistry) -> Self {
        SyncChannel {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ChannelState::Disconnected,
                    used: false,
                }),
                sink: Mutex::new(None),
                signal: ReleaseSignal::new(),
            }),
            registry: Arc::new(registry),
            previous: Mutex::new(PreviousState::new()),
            events: Mutex::new(None),
        }
    }

    /// Connect to the simulator, retrying per `config`
    pub fn connect(&self, config: &LinkConfig) -> Result<(), ConnectError> {
        self.begin_connect()?;
        match transport::connect(&config.endpoint, &config.retry) {
            Ok(conn) => self.finish_connect(conn),
            Err(e) => {
                self.shared.lock().state = ChannelState::Disconnected;
                Err(ConnectError::Unreachable(e))
            }
        }
    }

    /// Use an already established connection (e.g. an in-memory pair)
    pub fn attach(&self, conn: Connection) -> Result<(), ConnectError> {
        self.begin_connect()?;
        self.finish_connect(conn)
    }

    fn begin_connect(&self) -> Result<(), ConnectError> {
        let mut inner = self.shared.lock();
        if inner.used || inner.state != ChannelState::Disconnected {
            return Err(ConnectError::InvalidState(inner.state));
        }
        inner.used = true;
        inner.state = ChannelState::Connecting;
        Ok(())
    }

    fn finish_connect(&self, conn: Connection) -> Result<(), ConnectError> {
        let Connection { mut sink, source } = conn;
        {
            let mut inner = self.shared.lock();
            if inner.state != ChannelState::Connecting {
                // Disconnected while the connection was being established
                let state = inner.state;
                drop(inner);
                if let Err(e) = sink.close() {
                    debug!(error = %e, "error while closing connection");
                }
                return Err(ConnectError::InvalidState(state));
            }
            *self.shared.sink() = Some(sink);
            inner.state = ChannelState::Connected;
        }

        let shared = self.shared.clone();
        let registry = self.registry.clone();
        let spawned = thread::Builder::new()
            .name("devsim-events".to_string())
            .spawn(move || handler::run_event_loop(source, &registry, &*shared));

        match spawned {
            Ok(handle) => {
                *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!("sync channel connected");
                Ok(())
            }
            Err(e) => {
                self.shared.disconnect();
                Err(ConnectError::Spawn(e))
            }
        }
    }

    /// Send `state` for `device` unless it equals the last snapshot sent,
    /// blocking until the simulator acknowledges it.
    pub fn send_state(&self, device: &DeviceId, state: &DeviceState) -> Result<SyncOutcome, SyncError> {
        let envelope = Envelope::new(device.clone(), state.clone());
        let text = envelope.encode()?;

        let prior = {
            let mut previous = self.previous();
            if !previous.needs_sync(device, state) {
                return Ok(SyncOutcome::Unchanged);
            }
            previous.commit(envelope.clone())
        };

        match self.sync_state(text) {
            Ok(()) => Ok(SyncOutcome::Synced),
            Err(e) => {
                // Not delivered; the next identical snapshot must go out again
                self.previous().revert(&envelope, prior);
                Err(e)
            }
        }
    }

    /// Emit `updateState` with `envelope_text` and block until
    /// `received_state` arrives.
    ///
    /// Fails fast when not connected or when another round is in flight. A
    /// disconnect while waiting wakes the caller with [`SyncError::Disconnected`].
    pub fn sync_state(&self, envelope_text: String) -> Result<(), SyncError> {
        {
            let mut inner = self.shared.lock();
            match inner.state {
                ChannelState::Connected => {}
                ChannelState::Sending | ChannelState::AwaitingAck => return Err(SyncError::Busy),
                ChannelState::Disconnected | ChannelState::Connecting => {
                    return Err(SyncError::Disconnected)
                }
            }
            inner.state = ChannelState::Sending;
            self.shared.signal.clear();
        }

        debug!(bytes = envelope_text.len(), "-> updateState");
        if let Err(e) = self.shared.emit(&Event::UpdateState(envelope_text)) {
            if self.state() == ChannelState::Disconnected {
                return Err(SyncError::Disconnected);
            }
            warn!(error = %e, "could not send state; disconnecting");
            self.shared.disconnect();
            return Err(SyncError::Transport(e));
        }

        {
            let mut inner = self.shared.lock();
            if inner.state == ChannelState::Sending {
                inner.state = ChannelState::AwaitingAck;
            }
        }

        match self.shared.signal.wait() {
            Wake::Released => {
                let mut inner = self.shared.lock();
                if inner.state == ChannelState::AwaitingAck {
                    inner.state = ChannelState::Connected;
                }
                debug!("<- received_state");
                Ok(())
            }
            Wake::Closed => {
                self.shared.lock().state = ChannelState::Disconnected;
                Err(SyncError::Disconnected)
            }
        }
    }

    /// Close the connection. Terminal; safe to call from any thread and state.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        !matches!(
            self.state(),
            ChannelState::Disconnected | ChannelState::Connecting
        )
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Last envelope accepted by [`send_state`](Self::send_state)
    pub fn last_sent(&self) -> Option<Envelope> {
        self.previous().last().cloned()
    }

    /// Block until the event thread has exited (after a disconnect from
    /// either side)
    pub fn wait_closed(&self) {
        let handle = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("event thread panicked");
            }
        }
    }

    fn previous(&self) -> MutexGuard<'_, PreviousState> {
        self.previous.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        self.disconnect();
        self.wait_closed();
    }
}
