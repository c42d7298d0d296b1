//! WebSocket support for device/simulator communication.
//!
//! Each event frame travels as one text message holding the JSON frame
//! (see [`Event::to_json`]).

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};

use tungstenite::error::ProtocolError as WsProtocolError;
use tungstenite::protocol::{Message as WsMessage, Role};
use tungstenite::{accept, client, WebSocket};

use crate::transport::{EventSink, EventSource};
use crate::{Event, ProtocolError};

/// TCP stream whose clones share one write lock.
///
/// Each `write` goes out whole under the lock. tungstenite only hands whole
/// frames to `write`, so the pong and close replies the reader half sends on
/// its own never land inside a frame from the writer half.
#[derive(Debug)]
struct SharedStream {
    stream: TcpStream,
    write_lock: Arc<Mutex<()>>,
}

impl SharedStream {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        SharedStream {
            stream,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn try_clone(&self) -> Result<Self, std::io::Error> {
        Ok(SharedStream {
            stream: self.stream.try_clone()?,
            write_lock: self.write_lock.clone(),
        })
    }

    fn shutdown(&self) -> Result<(), std::io::Error> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.stream.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

/// A WebSocket listener that accepts connections
pub struct WebSocketListener {
    listener: TcpListener,
}

impl WebSocketListener {
    /// Bind to a `host:port` address and start listening for WebSocket connections
    pub fn bind(addr: &str) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr)?;
        Ok(WebSocketListener { listener })
    }

    /// Accept a new WebSocket connection (blocking)
    ///
    /// This performs the WebSocket handshake automatically.
    pub fn accept(&self) -> Result<WebSocketConnection, std::io::Error> {
        let (stream, _addr) = self.listener.accept()?;

        let websocket = accept(SharedStream::new(stream)).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
        })?;

        Ok(WebSocketConnection {
            websocket,
            role: Role::Server,
        })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }
}

/// A WebSocket connection for bidirectional event exchange
pub struct WebSocketConnection {
    websocket: WebSocket<SharedStream>,
    role: Role,
}

impl WebSocketConnection {
    /// Connect to `ws://host:port/` and perform the client handshake
    pub fn connect(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let stream = SharedStream::new(TcpStream::connect((host, port))?);

        let url = format!("ws://{}:{}/", host, port);
        let (websocket, _response) = client(url.as_str(), stream).map_err(|e| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e.to_string(),
            ))
        })?;

        Ok(WebSocketConnection {
            websocket,
            role: Role::Client,
        })
    }

    /// Send an event
    pub fn send(&mut self, event: &Event) -> Result<(), ProtocolError> {
        send_event(&mut self.websocket, event)
    }

    /// Receive an event (blocking)
    pub fn recv(&mut self) -> Result<Event, ProtocolError> {
        recv_event(&mut self.websocket)
    }

    /// Split into reader and writer halves sharing the underlying socket.
    ///
    /// The writer is a second protocol state machine over a cloned stream; the
    /// reader keeps the handshake state and any bytes already buffered. Both
    /// write through the same lock.
    pub fn split(self) -> Result<(WebSocketReader, WebSocketWriter), ProtocolError> {
        let stream = self.websocket.get_ref().try_clone()?;
        let writer = WebSocket::from_raw_socket(stream, self.role, None);
        Ok((
            WebSocketReader {
                websocket: self.websocket,
            },
            WebSocketWriter { websocket: writer },
        ))
    }
}

/// Reader half of a split WebSocket connection
pub struct WebSocketReader {
    websocket: WebSocket<SharedStream>,
}

/// Writer half of a split WebSocket connection
pub struct WebSocketWriter {
    websocket: WebSocket<SharedStream>,
}

impl WebSocketWriter {
    /// Send a close frame, then shut the socket down so our reader unblocks too
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.websocket.close(None);
        let _ = self.websocket.flush();
        let _ = self.websocket.get_ref().shutdown();
        result.map_err(convert_ws_error)
    }
}

impl EventSink for WebSocketWriter {
    fn emit(&mut self, event: &Event) -> Result<(), ProtocolError> {
        send_event(&mut self.websocket, event)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        WebSocketWriter::close(self)
    }
}

impl EventSource for WebSocketReader {
    fn next_event(&mut self) -> Result<Event, ProtocolError> {
        recv_event(&mut self.websocket)
    }
}

fn send_event(websocket: &mut WebSocket<SharedStream>, event: &Event) -> Result<(), ProtocolError> {
    let text = event.to_json()?;
    websocket
        .send(WsMessage::Text(text))
        .map_err(convert_ws_error)
}

fn recv_event(websocket: &mut WebSocket<SharedStream>) -> Result<Event, ProtocolError> {
    loop {
        let ws_msg = websocket.read().map_err(convert_ws_error)?;

        match ws_msg {
            WsMessage::Text(text) => return Event::from_json(&text),
            WsMessage::Binary(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;
                return Event::from_json(text);
            }
            WsMessage::Close(_) => return Err(ProtocolError::ConnectionClosed),
            // tungstenite queues the pong reply itself
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

/// Convert tungstenite error to ProtocolError
fn convert_ws_error(e: tungstenite::Error) -> ProtocolError {
    match e {
        tungstenite::Error::Io(io_err) => ProtocolError::from(io_err),
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => {
            ProtocolError::ConnectionClosed
        }
        other => ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            other.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_websocket_round_trip() {
        let listener = WebSocketListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_thread = thread::spawn(move || {
            let mut conn = listener.accept().unwrap();
            let event = conn.recv().unwrap();
            assert_eq!(event, Event::UpdateState("{}".to_string()));
            conn.send(&Event::StateAck).unwrap();
            conn.send(&Event::ProcessDisconnect).unwrap();
        });

        let conn = WebSocketConnection::connect("127.0.0.1", port).unwrap();
        let (mut reader, mut writer) = conn.split().unwrap();

        writer.emit(&Event::UpdateState("{}".to_string())).unwrap();
        assert_eq!(reader.next_event().unwrap(), Event::StateAck);
        assert_eq!(reader.next_event().unwrap(), Event::ProcessDisconnect);

        server_thread.join().unwrap();
        let _ = writer.close();
    }

    #[test]
    fn test_pong_replies_do_not_split_large_frames() {
        const FRAMES: usize = 16;
        const PINGS: usize = 2000;
        let payload = |i: usize| format!("{}:{}", i, "x".repeat(256 * 1024));

        let listener = WebSocketListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_thread = thread::spawn(move || {
            let (mut reader, mut writer) = listener.accept().unwrap().split().unwrap();
            let frames = thread::spawn(move || {
                for i in 0..FRAMES {
                    assert_eq!(reader.next_event().unwrap(), Event::UpdateState(payload(i)));
                }
            });
            for _ in 0..PINGS {
                writer.websocket.send(WsMessage::Ping(vec![7; 8])).unwrap();
            }
            frames.join().unwrap();
            writer.emit(&Event::ProcessDisconnect).unwrap();
        });

        let (mut reader, mut writer) = WebSocketConnection::connect("127.0.0.1", port)
            .unwrap()
            .split()
            .unwrap();
        // Answers pings while the writer is busy
        let client_reader = thread::spawn(move || reader.next_event().unwrap());

        for i in 0..FRAMES {
            writer.emit(&Event::UpdateState(payload(i))).unwrap();
        }

        assert_eq!(client_reader.join().unwrap(), Event::ProcessDisconnect);
        server_thread.join().unwrap();
        let _ = writer.close();
    }
}
