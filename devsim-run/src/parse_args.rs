use devsim_link::DeviceKind;
use devsim_protocol::{CONNECTION_ATTEMPTS, DEFAULT_HOST, DEFAULT_PORT};

const HELP: &str = "\
devsim-run - Demo device program

Blinks the board's LED and keeps the simulator in sync with every change.
Button presses made in the simulator are reported on the log.

USAGE:
  devsim-run [OPTIONS]

OPTIONS:
  -h, --help            Prints help information
  --device <name>       Board to drive: cpx, microbit or clue (default: cpx)
  --host <host>         Simulator websocket host (default: localhost)
  --port <port>         Simulator websocket port (default: 5678)
  --socket <path>       Use a Unix socket instead of a websocket
  --tcp <host:port>     Use a raw TCP socket instead of a websocket
  --attempts <n>        Connection attempts before giving up (default: 10)
  --ticks <n>           Stop after n blinks (default: run until disconnected)
  --interval-ms <ms>    Time between blinks (default: 500)
  -v, --verbose         Show connection events
  -vv, --trace          Show every sync round
  -vvv, --trace-frames  Show all protocol events
  --log <file>          Write log output to file instead of stderr
";

/// Verbosity level for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet = 0,
    /// Connection events
    Verbose = 1,
    /// Sync rounds and applied input
    Debug = 2,
    /// Every protocol event
    Trace = 3,
}

#[derive(Debug)]
pub struct AppArgs {
    pub device: DeviceKind,
    pub host: String,
    pub port: u16,
    pub socket_path: Option<String>,
    pub tcp_addr: Option<String>,
    pub attempts: u32,
    pub ticks: Option<u64>,
    pub interval_ms: u64,
    pub verbosity: Verbosity,
    pub log_file: Option<String>,
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    // Count -v flags for verbosity level
    let verbosity = if pargs.contains("--trace-frames") || pargs.contains("-vvv") {
        Verbosity::Trace
    } else if pargs.contains("--trace") || pargs.contains("-vv") {
        Verbosity::Debug
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let args = AppArgs {
        device: pargs
            .opt_value_from_str("--device")?
            .unwrap_or(DeviceKind::CircuitPlayground),
        host: pargs
            .opt_value_from_str("--host")?
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: pargs.opt_value_from_str("--port")?.unwrap_or(DEFAULT_PORT),
        socket_path: pargs.opt_value_from_str("--socket")?,
        tcp_addr: pargs.opt_value_from_str("--tcp")?,
        attempts: pargs
            .opt_value_from_str("--attempts")?
            .unwrap_or(CONNECTION_ATTEMPTS),
        ticks: pargs.opt_value_from_str("--ticks")?,
        interval_ms: pargs.opt_value_from_str("--interval-ms")?.unwrap_or(500),
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
