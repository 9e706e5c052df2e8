use super::fields::{self, Record, int_of, text_of};
use crate::error::{IpamError, Result};
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A scan agent registered at the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAgent {
    record: Record,
}

impl ScanAgent {
    pub fn new(record: Record) -> Result<Self> {
        if record.is_empty() {
            return Err(IpamError::InvalidRecord("empty scan agent record".to_string()));
        }
        Ok(Self { record })
    }

    pub fn from_value(value: Value) -> Result<Self> {
        fields::into_record(value, "scan agent").and_then(Self::new)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    fn field_str(&self, name: &str) -> &str {
        self.record.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn id(&self) -> i64 {
        int_of(self.record.get("id")).unwrap_or(0)
    }

    pub fn name(&self) -> &str {
        self.field_str("name")
    }

    pub fn description(&self) -> &str {
        self.field_str("description")
    }

    /// Agent kind, e.g. `mysql` or `api`.
    pub fn kind(&self) -> &str {
        self.field_str("type")
    }

    pub fn code(&self) -> &str {
        self.field_str("code")
    }

    pub fn last_access(&self) -> Option<DateTime<Local>> {
        fields::timestamp_field(&self.record, "last_access")
    }

    /// Stamp the last access time with now and return the delta to send.
    pub fn mark_accessed(&mut self) -> Record {
        let now = Value::String(fields::now_timestamp());
        self.record.insert("last_access".to_string(), now.clone());
        let mut delta = Record::new();
        delta.insert("last_access".to_string(), now);
        delta
    }
}

impl fmt::Display for ScanAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScanAgent {} ({}): {} ({}) {}",
            self.name(),
            self.description(),
            self.kind(),
            self.code(),
            text_of(self.record.get("last_access")).unwrap_or_default()
        )
    }
}

impl Serialize for ScanAgent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors_and_display() {
        let agent = ScanAgent::from_value(json!({
            "id": "2",
            "name": "edge",
            "description": "remote site",
            "type": "api",
            "code": "abc123",
            "last_access": "2024-06-01 08:00:00"
        }))
        .unwrap();

        assert_eq!(agent.id(), 2);
        assert_eq!(agent.kind(), "api");
        assert!(agent.last_access().is_some());
        assert_eq!(
            agent.to_string(),
            "ScanAgent edge (remote site): api (abc123) 2024-06-01 08:00:00"
        );
    }

    #[test]
    fn test_empty_record_rejected() {
        assert!(ScanAgent::from_value(json!({})).is_err());
        assert!(ScanAgent::from_value(Value::Null).is_err());
    }

    #[test]
    fn test_mark_accessed() {
        let mut agent = ScanAgent::from_value(json!({"id": 1, "name": "local"})).unwrap();
        assert!(agent.last_access().is_none());
        let delta = agent.mark_accessed();
        assert_eq!(delta.keys().collect::<Vec<_>>(), vec!["last_access"]);
        assert!(agent.last_access().is_some());
    }
}
