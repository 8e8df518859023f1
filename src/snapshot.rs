use crate::register;
use crate::remote_control::RemoteControlState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One decoded register or meter value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Flag(bool),
    /// Full contents of a bitfield register.
    Bitfield(u32),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bitfield(bits) => Some(f64::from(*bits)),
            Value::Flag(on) => Some(if *on { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }

    /// Raw integer content, for bitfield and whole-number registers.
    pub fn as_bits(&self) -> Option<u32> {
        match self {
            Value::Bitfield(bits) => Some(*bits),
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) => {
                Some(*n as u32)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Flag(on) => write!(f, "{}", on),
            Value::Bitfield(bits) => write!(f, "{:#x}", bits),
        }
    }
}

/// Result of one successful poll. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub values: BTreeMap<String, Value>,
    /// Names that could not be read or decoded during this poll.
    pub unavailable: BTreeSet<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(BTreeMap::new(), BTreeSet::new())
    }
}

impl Snapshot {
    pub fn new(values: BTreeMap<String, Value>, unavailable: BTreeSet<String>) -> Self {
        Self {
            taken_at: Utc::now(),
            values,
            unavailable,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn remote_control_state(&self) -> Option<RemoteControlState> {
        self.get(register::REMOTE_CONTROL)
            .and_then(Value::as_bits)
            .map(|raw| RemoteControlState::from_register(raw as u16))
    }

    /// Plain key -> JSON mapping handed to consumers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}
