mod logger;
mod parse_args;

use devsim_link::{
    DeviceHandle, DeviceKind, DeviceRegistry, DeviceState, LinkConfig, SyncChannel, SyncError,
    SyncOutcome,
};
use devsim_protocol::{Endpoint, SocketAddr};
use parse_args::{parse_args, AppArgs};
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use std::thread;
use std::time::Duration;

/// Buttons reported when the simulator changes them
const BUTTONS: [&str; 2] = ["button_a", "button_b"];

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

    let config = LinkConfig::new(endpoint(&args))
        .with_attempts(args.attempts);

    eprintln!("Connecting to simulator at {}...", config.endpoint);
    let channel = SyncChannel::new(DeviceRegistry::with_default_devices());
    if let Err(e) = channel.connect(&config) {
        eprintln!("Failed to connect to simulator: {}", e);
        eprintln!("Make sure the simulator is running (e.g., devsim-sim)");
        std::process::exit(1);
    }
    eprintln!("Connected, driving {}", args.device);

    let Some(device) = channel.registry().resolve(&args.device.id()).cloned() else {
        eprintln!("No model registered for {}", args.device);
        std::process::exit(1);
    };

    let result = run_program(&channel, device.as_ref(), &args);
    channel.disconnect();
    channel.wait_closed();

    if let Err(e) = result {
        eprintln!("Program error: {}", e);
        std::process::exit(1);
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

/// Blink until the tick budget runs out or the simulator goes away
fn run_program(
    channel: &SyncChannel,
    device: &dyn DeviceHandle,
    args: &AppArgs,
) -> Result<(), SyncError> {
    let id = args.device.id();
    let interval = Duration::from_millis(args.interval_ms);
    let mut buttons = read_buttons(&device.snapshot());
    let mut lit = false;
    let mut tick: u64 = 0;

    while args.ticks.map_or(true, |limit| tick < limit) {
        lit = !lit;
        if let Err(e) = device.apply_state(&led_state(args.device, &device.snapshot(), lit)) {
            warn!(error = %e, "could not update LED");
        }

        match channel.send_state(&id, &device.snapshot()) {
            Ok(SyncOutcome::Synced) => debug!(tick, lit, "state synced"),
            Ok(SyncOutcome::Unchanged) => trace!(tick, "state unchanged"),
            Err(SyncError::Disconnected) => {
                info!("simulator disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let now = read_buttons(&device.snapshot());
        for (name, (was, is)) in BUTTONS.iter().zip(buttons.iter().zip(now.iter())) {
            if was != is {
                info!("{} {}", name, if *is { "pressed" } else { "released" });
            }
        }
        buttons = now;

        tick += 1;
        thread::sleep(interval);
    }
    info!(ticks = tick, "program finished");
    Ok(())
}

fn read_buttons(state: &DeviceState) -> [bool; 2] {
    BUTTONS.map(|name| state.get(name).and_then(Value::as_bool).unwrap_or(false))
}

/// Partial state that switches the board's indicator LED
fn led_state(kind: DeviceKind, current: &DeviceState, lit: bool) -> DeviceState {
    match kind {
        DeviceKind::CircuitPlayground | DeviceKind::Clue => {
            DeviceState::new().with("red_led", lit)
        }
        DeviceKind::Microbit => {
            // Centre pixel of the 5x5 matrix
            let mut leds = current.get("leds").cloned().unwrap_or_else(|| json!(vec![vec![0; 5]; 5]));
            if let Some(pixel) = leds.get_mut(2).and_then(|row| row.get_mut(2)) {
                *pixel = json!(if lit { 9 } else { 0 });
            }
            DeviceState::new().with("leds", leds)
        }
    }
}
