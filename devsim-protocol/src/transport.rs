//! Transport-neutral connection halves, endpoints and the connect retry loop.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::socket::{SocketAddr, SocketConnection, SocketListener};
use crate::websocket::{WebSocketConnection, WebSocketListener};
use crate::{Event, ProtocolError, CONNECTION_ATTEMPTS, DEFAULT_HOST, DEFAULT_PORT};

/// Outbound half of a connection
pub trait EventSink: Send {
    /// Send one event
    fn emit(&mut self, event: &Event) -> Result<(), ProtocolError>;

    /// Close the connection. The matching [`EventSource`] and the peer both
    /// observe [`ProtocolError::ConnectionClosed`] afterwards.
    fn close(&mut self) -> Result<(), ProtocolError>;
}

/// Inbound half of a connection
pub trait EventSource: Send {
    /// Block until the next event arrives
    fn next_event(&mut self) -> Result<Event, ProtocolError>;
}

/// A connected pair of halves
pub struct Connection {
    pub sink: Box<dyn EventSink>,
    pub source: Box<dyn EventSource>,
}

/// Where the simulator listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://host:port/`
    WebSocket { host: String, port: u16 },
    /// Length-prefixed frames over TCP or a Unix socket
    Socket(SocketAddr),
}

impl Endpoint {
    pub fn websocket<S: Into<String>>(host: S, port: u16) -> Self {
        Endpoint::WebSocket {
            host: host.into(),
            port,
        }
    }

    /// Single connection attempt
    pub fn open(&self) -> Result<Connection, ProtocolError> {
        match self {
            Endpoint::WebSocket { host, port } => {
                let (reader, writer) = WebSocketConnection::connect(host, *port)?.split()?;
                Ok(Connection {
                    sink: Box::new(writer),
                    source: Box::new(reader),
                })
            }
            Endpoint::Socket(addr) => {
                let (reader, writer) = SocketConnection::connect(addr)?.split();
                Ok(Connection {
                    sink: Box::new(writer),
                    source: Box::new(reader),
                })
            }
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::websocket(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::WebSocket { host, port } => write!(f, "ws://{}:{}/", host, port),
            Endpoint::Socket(addr) => write!(f, "{}", addr),
        }
    }
}

/// Simulator-side listener for any [`Endpoint`]
pub enum Listener {
    WebSocket(WebSocketListener),
    Socket(SocketListener),
}

impl Listener {
    pub fn bind(endpoint: &Endpoint) -> Result<Self, std::io::Error> {
        match endpoint {
            Endpoint::WebSocket { host, port } => Ok(Listener::WebSocket(
                WebSocketListener::bind(&format!("{}:{}", host, port))?,
            )),
            Endpoint::Socket(addr) => Ok(Listener::Socket(SocketListener::bind(addr)?)),
        }
    }

    /// Endpoint a device program should connect to (resolves port 0)
    pub fn endpoint(&self) -> Result<Endpoint, std::io::Error> {
        match self {
            Listener::WebSocket(listener) => {
                let local = listener.local_addr()?;
                Ok(Endpoint::websocket(local.ip().to_string(), local.port()))
            }
            Listener::Socket(listener) => Ok(Endpoint::Socket(listener.addr().clone())),
        }
    }

    /// Accept one connection (blocking)
    pub fn accept(&self) -> Result<Connection, ProtocolError> {
        match self {
            Listener::WebSocket(listener) => {
                let (reader, writer) = listener.accept()?.split()?;
                Ok(Connection {
                    sink: Box::new(writer),
                    source: Box::new(reader),
                })
            }
            Listener::Socket(listener) => {
                let (reader, writer) = listener.accept()?.split();
                Ok(Connection {
                    sink: Box::new(writer),
                    source: Box::new(reader),
                })
            }
        }
    }
}

/// How many times to try connecting, and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: CONNECTION_ATTEMPTS,
            delay: Duration::from_secs(1),
        }
    }
}

/// Connect to `endpoint`, retrying per `policy`.
///
/// A policy with zero attempts still tries once.
pub fn connect(endpoint: &Endpoint, policy: &RetryPolicy) -> Result<Connection, ProtocolError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        info!(%endpoint, attempt, attempts, "connecting");
        match endpoint.open() {
            Ok(conn) => {
                info!(%endpoint, "connected");
                return Ok(conn);
            }
            Err(e) => {
                warn!(%endpoint, attempt, error = %e, "connection attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    thread::sleep(policy.delay);
                }
            }
        }
    }

    Err(ProtocolError::ConnectFailed {
        endpoint: endpoint.to_string(),
        attempts,
        reason: last_error.map_or_else(String::new, |e| e.to_string()),
    })
}
