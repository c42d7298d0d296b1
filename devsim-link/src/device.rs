//! Device handles: the narrow contract the link uses to reach device models.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use devsim_protocol::{DeviceId, DeviceState};
use serde_json::{json, Value};

use crate::error::ApplyStateError;

/// Anything the simulator can drive.
///
/// Handles are shared between the program thread and the event thread, so
/// both methods take `&self`.
pub trait DeviceHandle: Send + Sync {
    /// Merge a partial state into the device model
    fn apply_state(&self, partial: &DeviceState) -> Result<(), ApplyStateError>;

    /// Deep copy of the full current state
    fn snapshot(&self) -> DeviceState;
}

/// Device families the simulator knows how to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    CircuitPlayground,
    Microbit,
    Clue,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [
        DeviceKind::CircuitPlayground,
        DeviceKind::Microbit,
        DeviceKind::Clue,
    ];

    /// Token used as `active_device` on the wire
    pub fn token(self) -> &'static str {
        match self {
            DeviceKind::CircuitPlayground => "CPX",
            DeviceKind::Microbit => "micro:bit",
            DeviceKind::Clue => "CLUE",
        }
    }

    pub fn id(self) -> DeviceId {
        DeviceId::new(self.token())
    }

    /// State of a freshly powered-on board
    pub fn initial_state(self) -> DeviceState {
        let fields = match self {
            DeviceKind::CircuitPlayground => json!({
                "brightness": 1.0,
                "button_a": false,
                "button_b": false,
                "pixels": vec![[0, 0, 0]; 10],
                "red_led": false,
                "switch": false,
                "temperature": 0,
                "light": 0,
                "motion_x": 0,
                "motion_y": 0,
                "motion_z": 0,
                "touch": vec![false; 7],
                "shake": false,
            }),
            DeviceKind::Microbit => json!({
                "leds": vec![vec![0; 5]; 5],
                "button_a": false,
                "button_b": false,
                "temperature": 0,
                "light": 0,
                "motion_x": 0,
                "motion_y": 0,
                "motion_z": 0,
                "gesture": "",
            }),
            DeviceKind::Clue => json!({
                "display_base64": "",
                "button_a": false,
                "button_b": false,
                "pixel": [0, 0, 0],
                "red_led": false,
                "white_leds": false,
                "temperature": 0,
                "light_r": 0,
                "light_g": 0,
                "light_b": 0,
                "light_c": 0,
                "motion_x": 0,
                "motion_y": 0,
                "motion_z": 0,
                "humidity": 0,
                "pressure": 0,
                "proximity": 0,
                "gesture": "",
            }),
        };

        match fields {
            Value::Object(map) => DeviceState::from(map),
            _ => DeviceState::new(),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpx" | "circuitplayground" => Ok(DeviceKind::CircuitPlayground),
            "micro:bit" | "microbit" => Ok(DeviceKind::Microbit),
            "clue" => Ok(DeviceKind::Clue),
            _ => Err(format!("unknown device '{}' (expected cpx, microbit or clue)", s)),
        }
    }
}

/// In-memory device model with a fixed set of fields.
///
/// Partial updates may only touch fields present in the initial state, and
/// must keep each field's JSON type. A bad update is rejected as a whole.
pub struct MemoryDevice {
    id: DeviceId,
    state: Mutex<DeviceState>,
}

impl MemoryDevice {
    pub fn new(id: DeviceId, initial: DeviceState) -> Self {
        MemoryDevice {
            id,
            state: Mutex::new(initial),
        }
    }

    pub fn for_kind(kind: DeviceKind) -> Self {
        MemoryDevice::new(kind.id(), kind.initial_state())
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }
}

impl DeviceHandle for MemoryDevice {
    fn apply_state(&self, partial: &DeviceState) -> Result<(), ApplyStateError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        for (field, value) in partial.iter() {
            let Some(current) = state.get(field) else {
                return Err(ApplyStateError::UnknownField {
                    device: self.id.clone(),
                    field: field.clone(),
                });
            };
            if !same_kind(current, value) {
                return Err(ApplyStateError::InvalidValue {
                    device: self.id.clone(),
                    field: field.clone(),
                    reason: format!("expected {}, got {}", kind_name(current), kind_name(value)),
                });
            }
        }

        for (field, value) in partial.iter() {
            state.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn snapshot(&self) -> DeviceState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("id", &self.id)
            .field("state", &self.snapshot())
            .finish()
    }
}
