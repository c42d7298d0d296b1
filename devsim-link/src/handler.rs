//! Inbound event handling.
//!
//! Runs on the event thread. Nothing in here may return an error to the
//! reader loop or block on a sync round: a failure is logged and the event is
//! dropped, so one bad message never stops delivery of the next.

use devsim_protocol::{DeviceId, Envelope, Event, EventSource, ProtocolError};
use tracing::{debug, error, info, trace, warn};

use crate::error::InboundError;
use crate::registry::DeviceRegistry;

/// Prefix for inbound state errors written to the error stream
pub const ERROR_SENDING_EVENT: &str = "Error trying to send event to the process :";

/// What the handlers need from the channel
pub trait ChannelControl {
    /// Send an event to the simulator
    fn emit(&self, event: &Event) -> Result<(), ProtocolError>;

    /// Wake the pending sync round
    fn release(&self);

    /// Close the connection for good
    fn disconnect(&self);
}

/// Route one inbound event to its handler
pub fn dispatch(event: Event, registry: &DeviceRegistry, channel: &dyn ChannelControl) {
    let name = event.name();
    trace!(event = name, payload = event.payload(), "inbound");
    match event {
        Event::InputChanged(payload) => on_input_changed(&payload, registry, channel),
        Event::StateAck => on_state_ack(channel),
        Event::ProcessDisconnect => on_process_disconnect(channel),
        Event::UpdateState(_) | Event::InputAck(_) => {
            warn!(event = name, "ignoring event only a device program sends");
        }
    }
}

/// `input_changed`: acknowledge first so the simulator's own send does not
/// hang, then apply to the named device.
pub fn on_input_changed(payload: &str, registry: &DeviceRegistry, channel: &dyn ChannelControl) {
    if let Err(e) = channel.emit(&Event::InputAck(payload.to_string())) {
        warn!(error = %e, "could not acknowledge input_changed");
    }

    match apply_input(payload, registry) {
        Ok(device) => debug!(%device, "applied simulator input"),
        Err(e) => error!("{} {}", ERROR_SENDING_EVENT, e),
    }
}

/// `received_state`: release the pending round (harmless if none is pending)
pub fn on_state_ack(channel: &dyn ChannelControl) {
    trace!("state acknowledged");
    channel.release();
}

/// `process_disconnect`
pub fn on_process_disconnect(channel: &dyn ChannelControl) {
    info!("simulator requested disconnect");
    channel.disconnect();
}

/// Decode an inbound envelope and hand its state to the matching device
pub fn apply_input(payload: &str, registry: &DeviceRegistry) -> Result<DeviceId, InboundError> {
    let envelope = Envelope::decode(payload)?;
    let device = registry
        .resolve(&envelope.active_device)
        .ok_or_else(|| InboundError::UnknownDevice(envelope.active_device.clone()))?;
    device.apply_state(&envelope.state)?;
    Ok(envelope.active_device)
}

/// Event thread body: read until the connection ends, then disconnect.
pub(crate) fn run_event_loop(
    mut source: Box<dyn EventSource>,
    registry: &DeviceRegistry,
    channel: &dyn ChannelControl,
) {
    loop {
        match source.next_event() {
            Ok(event) => dispatch(event, registry, channel),
            // Frame consumed in full; the stream is still in sync
            Err(e @ (ProtocolError::UnknownEvent(_) | ProtocolError::InvalidFormat(_))) => {
                warn!(error = %e, "dropping inbound frame");
            }
            Err(ProtocolError::ConnectionClosed) => {
                info!("connection closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "event stream failed");
                break;
            }
        }
    }
    channel.disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceHandle, DeviceKind};
    use devsim_protocol::DeviceState;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingChannel {
        emitted: RefCell<Vec<Event>>,
        releases: Cell<usize>,
        disconnected: Cell<bool>,
    }

    impl ChannelControl for RecordingChannel {
        fn emit(&self, event: &Event) -> Result<(), ProtocolError> {
            self.emitted.borrow_mut().push(event.clone());
            Ok(())
        }

        fn release(&self) {
            self.releases.set(self.releases.get() + 1);
        }

        fn disconnect(&self) {
            self.disconnected.set(true);
        }
    }

    struct ScriptedSource(VecDeque<Result<Event, ProtocolError>>);

    impl EventSource for ScriptedSource {
        fn next_event(&mut self) -> Result<Event, ProtocolError> {
            self.0.pop_front().unwrap_or(Err(ProtocolError::ConnectionClosed))
        }
    }

    fn envelope(token: &str, state: DeviceState) -> String {
        Envelope::new(DeviceId::from(token), state).encode().unwrap()
    }

    fn cpx_button_a(registry: &DeviceRegistry) -> serde_json::Value {
        let handle = registry.resolve(&DeviceKind::CircuitPlayground.id()).unwrap();
        handle.snapshot().get("button_a").cloned().unwrap()
    }

    #[test]
    fn test_input_changed_acks_then_applies() {
        let registry = DeviceRegistry::with_default_devices();
        let channel = RecordingChannel::default();
        let payload = envelope("CPX", DeviceState::new().with("button_a", true));

        dispatch(Event::InputChanged(payload.clone()), &registry, &channel);

        assert_eq!(*channel.emitted.borrow(), vec![Event::InputAck(payload)]);
        assert_eq!(cpx_button_a(&registry), json!(true));
    }

    #[test]
    fn test_malformed_payload_is_acked_and_dropped() {
        let registry = DeviceRegistry::with_default_devices();
        let channel = RecordingChannel::default();

        dispatch(Event::InputChanged("{garbled".to_string()), &registry, &channel);

        assert_eq!(
            *channel.emitted.borrow(),
            vec![Event::InputAck("{garbled".to_string())]
        );
        assert!(matches!(
            apply_input("{garbled", &registry),
            Err(InboundError::Decode(_))
        ));
        assert_eq!(cpx_button_a(&registry), json!(false));
    }

    #[test]
    fn test_unknown_device_is_dropped() {
        let registry = DeviceRegistry::with_default_devices();
        let payload = envelope("arduino", DeviceState::new().with("button_a", true));

        let err = apply_input(&payload, &registry).unwrap_err();
        assert!(matches!(err, InboundError::UnknownDevice(ref id) if id.as_str() == "arduino"));

        for kind in DeviceKind::ALL {
            let handle = registry.resolve(&kind.id()).unwrap();
            assert_eq!(handle.snapshot(), kind.initial_state());
        }
    }

    #[test]
    fn test_rejected_state_surfaces_as_apply_error() {
        let registry = DeviceRegistry::with_default_devices();
        let payload = envelope("CLUE", DeviceState::new().with("warp_drive", 9));
        assert!(matches!(
            apply_input(&payload, &registry),
            Err(InboundError::ApplyState(_))
        ));
    }

    #[test]
    fn test_state_ack_releases_and_disconnect_disconnects() {
        let registry = DeviceRegistry::new();
        let channel = RecordingChannel::default();

        dispatch(Event::StateAck, &registry, &channel);
        dispatch(Event::StateAck, &registry, &channel);
        assert_eq!(channel.releases.get(), 2);
        assert!(!channel.disconnected.get());

        dispatch(Event::ProcessDisconnect, &registry, &channel);
        assert!(channel.disconnected.get());
        assert!(channel.emitted.borrow().is_empty());
    }

    #[test]
    fn test_outbound_only_events_are_ignored() {
        let registry = DeviceRegistry::with_default_devices();
        let channel = RecordingChannel::default();

        dispatch(Event::UpdateState("{}".to_string()), &registry, &channel);
        dispatch(Event::InputAck("{}".to_string()), &registry, &channel);

        assert!(channel.emitted.borrow().is_empty());
        assert_eq!(channel.releases.get(), 0);
    }

    #[test]
    fn test_event_loop_skips_bad_frames_and_disconnects_at_end() {
        let registry = DeviceRegistry::with_default_devices();
        let channel = RecordingChannel::default();
        let source = ScriptedSource(VecDeque::from(vec![
            Err(ProtocolError::UnknownEvent("reboot".to_string())),
            Err(ProtocolError::InvalidFormat("bad json".to_string())),
            Ok(Event::StateAck),
        ]));

        run_event_loop(Box::new(source), &registry, &channel);

        assert_eq!(channel.releases.get(), 1);
        assert!(channel.disconnected.get());
    }
}
