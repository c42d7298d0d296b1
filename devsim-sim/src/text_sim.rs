//! Text-only simulator.
//!
//! Prints the device state it receives and turns stdin commands into
//! simulator input.

use devsim_link::DeviceKind;
use devsim_protocol::{DecodeError, DeviceId, DeviceState, Envelope};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub const COMMANDS: &str = "\
commands:
  set <device> <field> <json>   change an input, e.g. `set cpx button_a true`
  raw <text>                    send <text> as an input_changed payload as is
  help                          show this list
  quit                          ask the program to disconnect
";

/// A parsed stdin line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set {
        device: DeviceId,
        field: String,
        value: Value,
    },
    Raw(String),
    Help,
    Quit,
}

/// Parse one stdin line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    match word {
        "" => Ok(None),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        "help" | "?" => Ok(Some(Command::Help)),
        "raw" if !rest.is_empty() => Ok(Some(Command::Raw(rest.to_string()))),
        "raw" => Err("usage: raw <text>".to_string()),
        "set" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let (Some(device), Some(field), Some(value)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err("usage: set <device> <field> <json>".to_string());
            };
            let device = device.parse::<DeviceKind>()?.id();
            let value = serde_json::from_str(value.trim())
                .map_err(|e| format!("bad value '{}': {}", value.trim(), e))?;
            Ok(Some(Command::Set {
                device,
                field: field.to_string(),
                value,
            }))
        }
        other => Err(format!("unknown command '{}' (try `help`)", other)),
    }
}

/// Last state seen per device
#[derive(Debug, Default)]
pub struct TextSim {
    boards: HashMap<DeviceId, DeviceState>,
}

impl TextSim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an `updateState` payload and describe what changed, one line
    /// per field.
    pub fn apply_update(&mut self, payload: &str) -> Result<Vec<String>, DecodeError> {
        let Envelope {
            active_device,
            state,
        } = Envelope::decode(payload)?;

        let board = self.boards.entry(active_device.clone()).or_default();
        let mut lines = Vec::new();
        for (field, value) in state.iter() {
            if board.get(field) != Some(value) {
                lines.push(format!("[{}] {} = {}", active_device, field, value));
            }
        }
        debug!(device = %active_device, changed = lines.len(), "state update");
        *board = state;
        Ok(lines)
    }

    /// Last state received for `device`
    pub fn board(&self, device: &DeviceId) -> Option<&DeviceState> {
        self.boards.get(device)
    }
}

/// `input_changed` payload for a single field
pub fn input_payload(device: DeviceId, field: String, value: Value) -> Result<String, serde_json::Error> {
    Envelope::new(device, DeviceState::new().with(field, value)).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_set() {
        let cmd = parse_command("set microbit temperature  21").unwrap();
        assert_eq!(
            cmd,
            Some(Command::Set {
                device: DeviceId::from("micro:bit"),
                field: "temperature".to_string(),
                value: json!(21),
            })
        );

        let cmd = parse_command("set cpx pixels [[255, 0, 0], [0, 0, 0]]").unwrap();
        assert!(matches!(cmd, Some(Command::Set { ref value, .. }) if value[0][0] == json!(255)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("set cpx button_a").is_err());
        assert!(parse_command("set arduino button_a true").is_err());
        assert!(parse_command("set cpx button_a yes please").is_err());
        assert!(parse_command("raw").is_err());
        assert!(parse_command("reboot").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("help").unwrap(), Some(Command::Help));
        assert_eq!(
            parse_command("raw {not json").unwrap(),
            Some(Command::Raw("{not json".to_string()))
        );
    }

    #[test]
    fn test_apply_update_reports_changed_fields() {
        let mut sim = TextSim::new();
        let first = r#"{"active_device":"CPX","state":{"red_led":false,"switch":true}}"#;
        let lines = sim.apply_update(first).unwrap();
        assert_eq!(lines.len(), 2);

        let second = r#"{"active_device":"CPX","state":{"red_led":true,"switch":true}}"#;
        let lines = sim.apply_update(second).unwrap();
        assert_eq!(lines, vec!["[CPX] red_led = true".to_string()]);

        let board = sim.board(&DeviceId::from("CPX")).unwrap();
        assert_eq!(board.get("red_led"), Some(&json!(true)));
        assert!(sim.apply_update("not json").is_err());
    }

    #[test]
    fn test_input_payload() {
        let payload = input_payload(DeviceId::from("CLUE"), "button_b".to_string(), json!(true)).unwrap();
        let envelope = Envelope::decode(&payload).unwrap();
        assert_eq!(envelope.active_device.as_str(), "CLUE");
        assert_eq!(envelope.state.get("button_b"), Some(&json!(true)));
        assert_eq!(envelope.state.len(), 1);
    }
}
