mod logger;
mod parse_args;
mod text_sim;

use devsim_protocol::{Connection, Endpoint, Event, EventSink, Listener, ProtocolError, SocketAddr};
use parse_args::{parse_args, AppArgs};
use text_sim::{input_payload, parse_command, Command, TextSim, COMMANDS};
use tracing::{debug, info, trace, warn};

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

/// Why a session with one program ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The program closed the connection; wait for the next one
    ProgramLeft,
    /// `quit` or end of stdin
    Quit,
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::init(args.verbosity, args.log_file.as_deref()) {
        eprintln!(
            "Failed to open log file '{}': {}",
            args.log_file.as_deref().unwrap_or_default(),
            e
        );
        std::process::exit(1);
    }

    let endpoint = endpoint(&args);
    let listener = match Listener::bind(&endpoint) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to listen on {}: {}", endpoint, e);
            std::process::exit(1);
        }
    };
    let bound = listener.endpoint().unwrap_or(endpoint);
    eprintln!("Waiting for a device program on {}...", bound);

    let stdin_lines = spawn_stdin_reader();

    loop {
        let conn = match listener.accept() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };
        eprintln!("Program connected (type `help` for commands)");

        match run_session(conn, &stdin_lines) {
            Ok(SessionEnd::Quit) => break,
            Ok(SessionEnd::ProgramLeft) => {
                eprintln!("Program disconnected, waiting for the next one...");
            }
            Err(e) => eprintln!("Session error: {}", e),
        }
    }
}

fn endpoint(args: &AppArgs) -> Endpoint {
    if let Some(tcp) = &args.tcp_addr {
        return Endpoint::Socket(SocketAddr::tcp(tcp.clone()));
    }
    if let Some(path) = &args.socket_path {
        #[cfg(unix)]
        {
            return Endpoint::Socket(SocketAddr::unix(path));
        }
        #[cfg(not(unix))]
        {
            eprintln!("Unix sockets not supported on this platform ({}), use --tcp", path);
            std::process::exit(1);
        }
    }
    Endpoint::websocket(args.host.clone(), args.port)
}

/// Forward stdin lines; the channel disconnects at end of input
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn run_session(conn: Connection, stdin_lines: &Receiver<String>) -> Result<SessionEnd, ProtocolError> {
    let Connection { mut sink, mut source } = conn;

    // Reader thread for incoming events
    let (tx_events, rx_events) = mpsc::channel();
    thread::spawn(move || loop {
        match source.next_event() {
            Ok(event) => {
                if tx_events.send(Ok(event)).is_err() {
                    break;
                }
            }
            Err(e @ (ProtocolError::UnknownEvent(_) | ProtocolError::InvalidFormat(_))) => {
                warn!(error = %e, "dropping frame");
            }
            Err(e) => {
                let _ = tx_events.send(Err(e));
                break;
            }
        }
    });

    let result = session_loop(sink.as_mut(), &rx_events, stdin_lines);
    if let Err(e) = sink.close() {
        debug!(error = %e, "error while closing connection");
    }
    result
}

fn session_loop(
    sink: &mut dyn EventSink,
    events: &Receiver<Result<Event, ProtocolError>>,
    stdin_lines: &Receiver<String>,
) -> Result<SessionEnd, ProtocolError> {
    let mut sim = TextSim::new();

    loop {
        // Process events from the program
        loop {
            match events.try_recv() {
                Ok(Ok(event)) => {
                    if let Some(end) = handle_event(event, &mut sim, sink)? {
                        return Ok(end);
                    }
                }
                Ok(Err(ProtocolError::ConnectionClosed)) | Err(TryRecvError::Disconnected) => {
                    info!("program closed the connection");
                    return Ok(SessionEnd::ProgramLeft);
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => break,
            }
        }

        match stdin_lines.try_recv() {
            Ok(line) => {
                if let Some(end) = handle_line(&line, sink)? {
                    return Ok(end);
                }
            }
            Err(TryRecvError::Disconnected) => {
                sink.emit(&Event::ProcessDisconnect)?;
                return Ok(SessionEnd::Quit);
            }
            Err(TryRecvError::Empty) => {}
        }

        // Small sleep to avoid busy-waiting
        thread::sleep(Duration::from_millis(1));
    }
}

fn handle_event(
    event: Event,
    sim: &mut TextSim,
    sink: &mut dyn EventSink,
) -> Result<Option<SessionEnd>, ProtocolError> {
    trace!(event = event.name(), payload = event.payload(), "<-");
    match event {
        Event::UpdateState(payload) => {
            match sim.apply_update(&payload) {
                Ok(lines) => {
                    for line in lines {
                        println!("{}", line);
                    }
                }
                Err(e) => warn!(error = %e, "unreadable state update"),
            }
            // The program stays blocked until this goes out
            sink.emit(&Event::StateAck)?;
        }
        Event::InputAck(payload) => debug!(bytes = payload.len(), "input acknowledged"),
        Event::ProcessDisconnect => return Ok(Some(SessionEnd::ProgramLeft)),
        other @ (Event::InputChanged(_) | Event::StateAck) => {
            warn!(event = other.name(), "ignoring event only a simulator sends");
        }
    }
    Ok(None)
}

fn handle_line(line: &str, sink: &mut dyn EventSink) -> Result<Option<SessionEnd>, ProtocolError> {
    match parse_command(line) {
        Ok(None) => {}
        Ok(Some(Command::Help)) => print!("{}", COMMANDS),
        Ok(Some(Command::Set {
            device,
            field,
            value,
        })) => {
            let payload = input_payload(device, field, value)?;
            sink.emit(&Event::InputChanged(payload))?;
        }
        Ok(Some(Command::Raw(text))) => sink.emit(&Event::InputChanged(text))?,
        Ok(Some(Command::Quit)) => {
            sink.emit(&Event::ProcessDisconnect)?;
            return Ok(Some(SessionEnd::Quit));
        }
        Err(msg) => eprintln!("{}", msg),
    }
    Ok(None)
}
