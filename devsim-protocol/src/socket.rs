//! Socket abstraction for Unix sockets and TCP connections.
//!
//! Stream sockets carry length-prefixed event frames (see [`Event::encode`]).

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

use crate::transport::{EventSink, EventSource};
use crate::{Event, ProtocolError};

/// Default socket path for Unix sockets
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/devsim.sock";

/// Socket address type - either Unix socket path or TCP address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddr {
    #[cfg(unix)]
    Unix(String),
    Tcp(String),
}

impl SocketAddr {
    /// Create a Unix socket address
    #[cfg(unix)]
    pub fn unix<P: AsRef<Path>>(path: P) -> Self {
        SocketAddr::Unix(path.as_ref().to_string_lossy().to_string())
    }

    /// Create a TCP socket address
    pub fn tcp<S: Into<String>>(addr: S) -> Self {
        SocketAddr::Tcp(addr.into())
    }
}

impl std::fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            SocketAddr::Unix(path) => write!(f, "unix:{}", path),
            SocketAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Internal enum for listener types
enum ListenerInner {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// A socket listener that accepts connections
pub struct SocketListener {
    inner: ListenerInner,
    addr: SocketAddr,
}

impl SocketListener {
    /// Bind to a socket address and start listening.
    ///
    /// For TCP the stored address is the bound local address, so binding
    /// port 0 reports the port actually chosen.
    pub fn bind(addr: &SocketAddr) -> Result<Self, std::io::Error> {
        match addr {
            #[cfg(unix)]
            SocketAddr::Unix(path) => {
                // Remove existing socket file if present
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                Ok(SocketListener {
                    inner: ListenerInner::Unix(listener),
                    addr: addr.clone(),
                })
            }
            SocketAddr::Tcp(addr_str) => {
                let listener = TcpListener::bind(addr_str)?;
                let local = listener.local_addr()?;
                Ok(SocketListener {
                    inner: ListenerInner::Tcp(listener),
                    addr: SocketAddr::Tcp(local.to_string()),
                })
            }
        }
    }

    /// Accept a new connection (blocking)
    pub fn accept(&self) -> Result<SocketConnection, std::io::Error> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                SocketConnection::from_unix(stream)
            }
            ListenerInner::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                SocketConnection::from_tcp(stream)
            }
        }
    }

    /// Get the address this listener is bound to
    pub fn addr(&self) -> &SocketAddr {
        &self.addr
    }
}

#[cfg(unix)]
impl Drop for SocketListener {
    fn drop(&mut self) {
        // Clean up Unix socket file on drop
        if let SocketAddr::Unix(path) = &self.addr {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Internal enum for connection stream types
enum StreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl StreamInner {
    fn shutdown(&self, how: std::net::Shutdown) -> Result<(), std::io::Error> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.shutdown(how),
            StreamInner::Tcp(s) => s.shutdown(how),
        }
    }
}

impl Read for StreamInner {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.read(buf),
            StreamInner::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for StreamInner {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.write(buf),
            StreamInner::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.flush(),
            StreamInner::Tcp(s) => s.flush(),
        }
    }
}

/// A connection to a remote socket
pub struct SocketConnection {
    reader: BufReader<StreamInner>,
    writer: BufWriter<StreamInner>,
}

impl SocketConnection {
    #[cfg(unix)]
    fn from_unix(stream: UnixStream) -> Result<Self, std::io::Error> {
        let reader = BufReader::new(StreamInner::Unix(stream.try_clone()?));
        let writer = BufWriter::new(StreamInner::Unix(stream));
        Ok(SocketConnection { reader, writer })
    }

    fn from_tcp(stream: TcpStream) -> Result<Self, std::io::Error> {
        // Disable Nagle's algorithm; every frame waits on a reply
        let _ = stream.set_nodelay(true);
        let reader = BufReader::new(StreamInner::Tcp(stream.try_clone()?));
        let writer = BufWriter::new(StreamInner::Tcp(stream));
        Ok(SocketConnection { reader, writer })
    }

    /// Connect to a socket address
    pub fn connect(addr: &SocketAddr) -> Result<Self, std::io::Error> {
        match addr {
            #[cfg(unix)]
            SocketAddr::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                Self::from_unix(stream)
            }
            SocketAddr::Tcp(addr_str) => {
                let stream = TcpStream::connect(addr_str)?;
                Self::from_tcp(stream)
            }
        }
    }

    /// Send an event
    pub fn send(&mut self, event: &Event) -> Result<(), ProtocolError> {
        event.write_to(&mut self.writer)
    }

    /// Receive an event (blocking)
    pub fn recv(&mut self) -> Result<Event, ProtocolError> {
        Event::read_from(&mut self.reader)
    }

    /// Split into separate reader and writer halves
    pub fn split(self) -> (SocketReader, SocketWriter) {
        (
            SocketReader {
                reader: self.reader,
            },
            SocketWriter {
                writer: self.writer,
            },
        )
    }
}

/// Reader half of a split connection
pub struct SocketReader {
    reader: BufReader<StreamInner>,
}

impl SocketReader {
    /// Receive an event (blocking)
    pub fn recv(&mut self) -> Result<Event, ProtocolError> {
        Event::read_from(&mut self.reader)
    }
}

/// Writer half of a split connection
pub struct SocketWriter {
    writer: BufWriter<StreamInner>,
}

impl SocketWriter {
    /// Send an event
    pub fn send(&mut self, event: &Event) -> Result<(), ProtocolError> {
        event.write_to(&mut self.writer)
    }

    /// Flush and shut down both directions; the peer and our own reader see EOF
    pub fn shutdown(&mut self) -> Result<(), ProtocolError> {
        let _ = self.writer.flush();
        self.writer.get_ref().shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}

impl EventSink for SocketWriter {
    fn emit(&mut self, event: &Event) -> Result<(), ProtocolError> {
        self.send(event)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.shutdown()
    }
}

impl EventSource for SocketReader {
    fn next_event(&mut self) -> Result<Event, ProtocolError> {
        self.recv()
    }
}
