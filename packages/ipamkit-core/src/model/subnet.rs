//! phpIPAM subnet records.

use super::fields::{self, Record, int_of, text_of, timestamp_field};
use super::mac::MacAddr;
use crate::error::{IpamError, Result};
use chrono::{DateTime, Local};
use ipnetwork::IpNetwork;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;

/// A subnet as returned by the service.
///
/// Fetched subnets are read-only apart from the scan and discovery
/// timestamps, which change through [`Subnet::mark_scanned`] and
/// [`Subnet::mark_discovered`].
#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    record: Record,
}

impl Subnet {
    pub fn new(record: Record) -> Self {
        Self { record }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        fields::into_record(value, "subnet").map(Self::new)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Integer field, `default` when missing or not numeric.
    pub fn field_int(&self, name: &str, default: i64) -> i64 {
        int_of(self.record.get(name)).unwrap_or(default)
    }

    fn optional_id(&self, name: &str) -> Option<i64> {
        int_of(self.record.get(name)).filter(|id| *id != 0)
    }

    pub fn id(&self) -> i64 {
        self.field_int("id", 0)
    }

    pub fn base_address(&self) -> Option<IpAddr> {
        self.record
            .get("subnet")
            .and_then(Value::as_str)
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn mask(&self) -> Option<u8> {
        int_of(self.record.get("mask")).and_then(|m| u8::try_from(m).ok())
    }

    /// The address range this subnet covers.
    pub fn network(&self) -> Result<IpNetwork> {
        let base = self.base_address().ok_or_else(|| {
            IpamError::InvalidRecord(format!("subnet {} has no base address", self.id()))
        })?;
        let mask = self.mask().ok_or_else(|| {
            IpamError::InvalidRecord(format!("subnet {} has no mask", self.id()))
        })?;
        IpNetwork::new(base, mask).map_err(|e| {
            IpamError::InvalidRecord(format!("subnet {}: {}/{}: {}", self.id(), base, mask, e))
        })
    }

    pub fn is_pool(&self) -> bool {
        self.field_int("isPool", 0) != 0
    }

    pub fn discover_enabled(&self) -> bool {
        self.field_int("discoverSubnet", 0) != 0
    }

    pub fn ping_enabled(&self) -> bool {
        self.field_int("pingSubnet", 0) != 0
    }

    pub fn resolve_dns(&self) -> bool {
        self.field_int("resolveDNS", 0) != 0
    }

    pub fn vlan_id(&self) -> Option<i64> {
        self.optional_id("vlanId")
    }

    pub fn scan_agent_id(&self) -> Option<i64> {
        self.optional_id("scanAgent")
    }

    pub fn nameserver_id(&self) -> Option<i64> {
        self.optional_id("nameserverId")
    }

    pub fn description(&self) -> &str {
        self.record
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn edit_date(&self) -> Option<DateTime<Local>> {
        timestamp_field(&self.record, "editDate")
    }

    pub fn last_scan(&self) -> Option<DateTime<Local>> {
        timestamp_field(&self.record, "lastScan")
    }

    pub fn last_discovery(&self) -> Option<DateTime<Local>> {
        timestamp_field(&self.record, "lastDiscovery")
    }

    /// Base MAC from the `custom_basemac` field. A malformed value is an error.
    pub fn base_mac(&self) -> Result<Option<MacAddr>> {
        match self.record.get("custom_basemac").and_then(Value::as_str) {
            Some(mac) if !mac.trim().is_empty() => mac
                .parse()
                .map(Some)
                .map_err(|e| IpamError::InvalidRecord(format!("{} in subnet {}", e, self))),
            _ => Ok(None),
        }
    }

    /// Stamp the last scan time with now and return the delta to send.
    pub fn mark_scanned(&mut self) -> Record {
        self.stamp("lastScan")
    }

    /// Stamp the last discovery time with now and return the delta to send.
    pub fn mark_discovered(&mut self) -> Record {
        self.stamp("lastDiscovery")
    }

    fn stamp(&mut self, field: &str) -> Record {
        let now = Value::String(fields::now_timestamp());
        self.record.insert(field.to_string(), now.clone());
        let mut delta = Record::new();
        delta.insert(field.to_string(), now);
        delta
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = text_of(self.record.get("subnet")).unwrap_or_else(|| "?".to_string());
        let mask = text_of(self.record.get("mask")).unwrap_or_else(|| "?".to_string());
        write!(f, "{}/{} ({})", base, mask, self.description())
    }
}

impl Serialize for Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subnet(value: Value) -> Subnet {
        Subnet::from_value(value).unwrap()
    }

    #[test]
    fn test_accessors_read_string_numbers() {
        let sn = subnet(json!({
            "id": "12",
            "subnet": "10.1.2.0",
            "mask": "24",
            "isPool": "1",
            "vlanId": "3",
            "scanAgent": null,
            "nameserverId": "0",
            "description": "lab"
        }));

        assert_eq!(sn.id(), 12);
        assert_eq!(sn.base_address(), Some("10.1.2.0".parse().unwrap()));
        assert_eq!(sn.mask(), Some(24));
        assert!(sn.is_pool());
        assert!(!sn.ping_enabled());
        assert_eq!(sn.vlan_id(), Some(3));
        assert_eq!(sn.scan_agent_id(), None);
        assert_eq!(sn.nameserver_id(), None);
        assert_eq!(sn.network().unwrap().to_string(), "10.1.2.0/24");
        assert_eq!(sn.to_string(), "10.1.2.0/24 (lab)");
    }

    #[test]
    fn test_network_requires_base_and_mask() {
        let sn = subnet(json!({"id": 4, "description": "folder"}));
        assert!(matches!(sn.network(), Err(IpamError::InvalidRecord(_))));
        assert_eq!(sn.to_string(), "?/? (folder)");
    }

    #[test]
    fn test_base_mac() {
        let sn = subnet(json!({"custom_basemac": "02:00:00:aa:bb:cc"}));
        assert_eq!(
            sn.base_mac().unwrap(),
            Some(MacAddr([0x02, 0, 0, 0xaa, 0xbb, 0xcc]))
        );
        assert_eq!(subnet(json!({"custom_basemac": ""})).base_mac().unwrap(), None);
        assert!(subnet(json!({"custom_basemac": "nope"})).base_mac().is_err());
    }

    #[test]
    fn test_mark_scanned_returns_single_field_delta() {
        let mut sn = subnet(json!({"id": 1, "lastScan": null}));
        assert!(sn.last_scan().is_none());

        let delta = sn.mark_scanned();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("lastScan"), sn.field("lastScan"));
        assert!(sn.last_scan().is_some());
        assert!(sn.last_discovery().is_none());

        let delta = sn.mark_discovered();
        assert!(delta.contains_key("lastDiscovery"));
        assert!(sn.last_discovery().is_some());
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Subnet::from_value(json!([1, 2])).is_err());
    }
}
