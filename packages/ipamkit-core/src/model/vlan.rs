use super::fields::{self, Record, int_of};
use crate::error::{IpamError, Result};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A VLAN definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Vlan {
    record: Record,
}

impl Vlan {
    pub fn new(record: Record) -> Result<Self> {
        if record.is_empty() {
            return Err(IpamError::InvalidRecord("empty VLAN record".to_string()));
        }
        Ok(Self { record })
    }

    pub fn from_value(value: Value) -> Result<Self> {
        fields::into_record(value, "VLAN").and_then(Self::new)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn id(&self) -> i64 {
        int_of(self.record.get("id")).unwrap_or(0)
    }

    pub fn name(&self) -> &str {
        self.record.get("name").and_then(Value::as_str).unwrap_or("")
    }

    /// The 802.1Q tag.
    pub fn number(&self) -> i64 {
        int_of(self.record.get("number")).unwrap_or(0)
    }

    pub fn description(&self) -> &str {
        self.record
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

impl fmt::Display for Vlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VLAN {} ({}): {}",
            self.number(),
            self.name(),
            self.description()
        )
    }
}

impl Serialize for Vlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}
