use devsim_protocol::{DEFAULT_HOST, DEFAULT_PORT};

const HELP: &str = "\
devsim-sim - Text-only device simulator

Waits for a device program, prints every state it sends and feeds it input
typed on stdin (type `help` once connected).

USAGE:
  devsim-sim [OPTIONS]

OPTIONS:
  -h, --help            Prints help information
  --host <host>         Websocket listen address (default: localhost)
  --port <port>         Websocket listen port (default: 5678)
  --socket <path>       Listen on a Unix socket instead of a websocket
  --tcp <host:port>     Listen on a raw TCP socket instead of a websocket
  -v, --verbose         Show connection events
  -vv, --trace          Show every state update
  -vvv, --trace-frames  Show all protocol events
  --log <file>          Write log output to file instead of stderr
";

/// Verbosity level for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet = 0,
    Verbose = 1,
    Debug = 2,
    Trace = 3,
}

#[derive(Debug)]
pub struct AppArgs {
    pub host: String,
    pub port: u16,
    pub socket_path: Option<String>,
    pub tcp_addr: Option<String>,
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
        host: pargs
            .opt_value_from_str("--host")?
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: pargs.opt_value_from_str("--port")?.unwrap_or(DEFAULT_PORT),
        socket_path: pargs.opt_value_from_str("--socket")?,
        tcp_addr: pargs.opt_value_from_str("--tcp")?,
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
