//! State envelope: which device a message is about, plus its state snapshot.
//!
//! ```text
//! {"active_device": "CPX", "state": {"red_led": true, "pixels": [[0, 0, 0]]}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token naming the device a message is about (e.g. `"CPX"`, `"micro:bit"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new<S: Into<String>>(token: S) -> Self {
        DeviceId(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(token: &str) -> Self {
        DeviceId::new(token)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full (or partial) observable state of one device: field name -> value.
///
/// `Clone` is a deep copy and `==` is deep equality, so a cloned snapshot is
/// unaffected by later mutation of the original.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceState(Map<String, Value>);

impl DeviceState {
    pub fn new() -> Self {
        DeviceState(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set a field, returning the previous value
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, field: K, value: V) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Builder form of [`DeviceState::insert`]
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, field: K, value: V) -> Self {
        self.insert(field, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for DeviceState {
    fn from(map: Map<String, Value>) -> Self {
        DeviceState(map)
    }
}

impl FromIterator<(String, Value)> for DeviceState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        DeviceState(iter.into_iter().collect())
    }
}

/// Envelope text could not be parsed
#[derive(Debug, thiserror::Error)]
#[error("malformed state envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Wire envelope pairing a device token with its state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub active_device: DeviceId,
    pub state: DeviceState,
}

impl Envelope {
    pub fn new(active_device: DeviceId, state: DeviceState) -> Self {
        Envelope {
            active_device,
            state,
        }
    }

    /// Serialize to JSON text
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse JSON text
    pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_field_names_on_the_wire() {
        let envelope = Envelope::new(
            DeviceId::from("CPX"),
            DeviceState::new().with("red_led", true),
        );
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"active_device": "CPX", "state": {"red_led": true}}));
    }

    #[test]
    fn test_decode_simulator_payload() {
        let text = r#"{"active_device":"micro:bit","state":{"button_a":{"pressed":true}}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.active_device.as_str(), "micro:bit");
        assert_eq!(
            envelope.state.get("button_a"),
            Some(&json!({"pressed": true}))
        );
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Envelope::decode("{not json").is_err());
        assert!(Envelope::decode("").is_err());
        assert!(Envelope::decode("[1, 2, 3]").is_err());
        assert!(Envelope::decode(r#"{"state":{}}"#).is_err());
        assert!(Envelope::decode(r#"{"active_device":"CPX","state":7}"#).is_err());
    }

    #[test]
    fn test_clone_is_independent() {
        let original = DeviceState::new().with("pixels", json!([[1, 2, 3]]));
        let mut copy = original.clone();
        copy.insert("pixels", json!([[0, 0, 0]]));
        assert_ne!(original, copy);
        assert_eq!(original.get("pixels"), Some(&json!([[1, 2, 3]])));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::from),
            ".{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map(".{0,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_state() -> impl Strategy<Value = DeviceState> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_value(), 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn envelope_survives_encode_decode(token in ".{0,16}", state in arb_state()) {
            let envelope = Envelope::new(DeviceId::new(token), state);
            let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }
    }
}
