//! In-memory transport: two connected ends routed through channels.
//!
//! Used to drive a link without network I/O, e.g. a simulator running in the
//! same process or a test standing in for one.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::transport::{Connection, EventSink, EventSource};
use crate::{Event, ProtocolError};

enum Packet {
    Event(Event),
    Closed,
}

/// One end of an in-memory connection
pub struct MemoryEnd {
    sink: MemorySink,
    source: MemorySource,
}

/// Create two connected ends
pub fn pair() -> (MemoryEnd, MemoryEnd) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();

    let a = MemoryEnd {
        sink: MemorySink {
            peer: Some(b_tx.clone()),
            local: Some(a_tx.clone()),
        },
        source: MemorySource { rx: a_rx },
    };
    let b = MemoryEnd {
        sink: MemorySink {
            peer: Some(a_tx),
            local: Some(b_tx),
        },
        source: MemorySource { rx: b_rx },
    };
    (a, b)
}

impl MemoryEnd {
    pub fn split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }

    /// Box both halves for use as a transport-neutral [`Connection`]
    pub fn into_connection(self) -> Connection {
        Connection {
            sink: Box::new(self.sink),
            source: Box::new(self.source),
        }
    }
}

/// Outbound half of a [`MemoryEnd`]
pub struct MemorySink {
    peer: Option<Sender<Packet>>,
    local: Option<Sender<Packet>>,
}

/// Inbound half of a [`MemoryEnd`]
pub struct MemorySource {
    rx: Receiver<Packet>,
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &Event) -> Result<(), ProtocolError> {
        let peer = self.peer.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        peer.send(Packet::Event(event.clone()))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        // Wake both readers, like a socket shutdown
        if let Some(peer) = self.peer.take() {
            let _ = peer.send(Packet::Closed);
        }
        if let Some(local) = self.local.take() {
            let _ = local.send(Packet::Closed);
        }
        Ok(())
    }
}

impl EventSource for MemorySource {
    fn next_event(&mut self) -> Result<Event, ProtocolError> {
        match self.rx.recv() {
            Ok(Packet::Event(event)) => Ok(event),
            Ok(Packet::Closed) | Err(_) => Err(ProtocolError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_cross_between_ends() {
        let (a, b) = pair();
        let (mut a_sink, mut a_source) = a.split();
        let (mut b_sink, mut b_source) = b.split();

        a_sink.emit(&Event::UpdateState("x".to_string())).unwrap();
        assert_eq!(
            b_source.next_event().unwrap(),
            Event::UpdateState("x".to_string())
        );

        b_sink.emit(&Event::StateAck).unwrap();
        assert_eq!(a_source.next_event().unwrap(), Event::StateAck);
    }

    #[test]
    fn test_close_wakes_both_readers() {
        let (a, b) = pair();
        let (mut a_sink, mut a_source) = a.split();
        let (_b_sink, mut b_source) = b.split();

        a_sink.close().unwrap();
        assert!(matches!(a_source.next_event(), Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(b_source.next_event(), Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(
            a_sink.emit(&Event::StateAck),
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
