//! phpIPAM address records with local change tracking.

use super::fields::{self, Record, int_of};
use crate::error::{IpamError, Result};
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Address tags as numbered by phpIPAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressTag {
    Offline = 1,
    Used = 2,
    Reserved = 3,
    Dhcp = 4,
    StaticDhcp = 5,
    StaticIp = 6,
    Router = 7,
    NotUsable = 8,
}

impl AddressTag {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Offline),
            2 => Some(Self::Used),
            3 => Some(Self::Reserved),
            4 => Some(Self::Dhcp),
            5 => Some(Self::StaticDhcp),
            6 => Some(Self::StaticIp),
            7 => Some(Self::Router),
            8 => Some(Self::NotUsable),
            _ => None,
        }
    }
}

/// Fields that stay writable on reserved and gateway addresses.
const ALWAYS_WRITABLE: &[&str] = &["lastSeen", "custom_tcpports", "mac"];

/// An IP address record.
///
/// Every change made through the setters is remembered in a dirty-set so
/// that an update sends only the fields that actually changed. The set is
/// cleared with [`Address::mark_clean`] once the service has accepted them.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    record: Record,
    dirty: BTreeSet<String>,
}

impl Address {
    /// Wrap a record fetched from the service. Nothing is dirty.
    pub fn new(record: Record) -> Self {
        Self {
            record,
            dirty: BTreeSet::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        fields::into_record(value, "address").map(Self::new)
    }

    /// A new, unsaved address, optionally bound to a subnet.
    pub fn for_ip(ip: IpAddr, subnet_id: Option<i64>) -> Self {
        let mut record = Record::new();
        record.insert("ip".to_string(), Value::String(ip.to_string()));
        if let Some(id) = subnet_id {
            record.insert("subnetId".to_string(), Value::from(id));
        }
        Self::new(record)
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

    fn field_str(&self, name: &str) -> &str {
        self.record.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn id(&self) -> Option<i64> {
        int_of(self.record.get("id"))
    }

    pub fn ip(&self) -> Result<IpAddr> {
        let text = self.field_str("ip");
        text.trim()
            .parse()
            .map_err(|_| IpamError::InvalidRecord(format!("address has invalid ip '{}'", text)))
    }

    pub fn set_ip(&mut self, ip: IpAddr) {
        self.store("ip", Value::String(ip.to_string()));
    }

    pub fn subnet_id(&self) -> Option<i64> {
        int_of(self.record.get("subnetId"))
    }

    pub fn set_subnet_id(&mut self, subnet_id: i64) {
        self.store("subnetId", Value::from(subnet_id));
    }

    pub fn hostname(&self) -> &str {
        self.field_str("hostname")
    }

    /// Hostname up to the first dot.
    pub fn short_hostname(&self) -> &str {
        self.hostname().split('.').next().unwrap_or("")
    }

    pub fn description(&self) -> &str {
        self.field_str("description")
    }

    pub fn note(&self) -> &str {
        self.field_str("note")
    }

    pub fn tag(&self) -> Option<AddressTag> {
        AddressTag::from_code(self.field_int("tag", 0))
    }

    pub fn is_gateway(&self) -> bool {
        self.field_int("is_gateway", 0) == 1
    }

    pub fn last_seen(&self) -> Option<DateTime<Local>> {
        fields::timestamp_field(&self.record, "lastSeen")
    }

    /// Set a field, honouring the API protection flags unless `force` is set.
    ///
    /// Returns whether the value changed. Only changed fields become dirty.
    pub fn update_field(&mut self, field: &str, value: impl Into<Value>, force: bool) -> Result<bool> {
        if !force {
            self.check_writable(field)?;
        }
        let value = value.into();
        if self.record.get(field) == Some(&value) {
            return Ok(false);
        }
        self.store(field, value);
        Ok(true)
    }

    /// Refuse writes to locked addresses, and to reserved or gateway
    /// addresses outside the always writable fields.
    pub fn check_writable(&self, field: &str) -> Result<()> {
        if self.field_int("custom_apiblock", 0) == 1 {
            return Err(IpamError::PermissionDenied(format!(
                "address {} has apiblock set: can't update field {}",
                self, field
            )));
        }
        let special = self.field_int("tag", 0) >= AddressTag::Reserved.code() || self.is_gateway();
        if special && !ALWAYS_WRITABLE.contains(&field) {
            return Err(IpamError::PermissionDenied(format!(
                "address {} is reserved or a gateway: can't update field {}",
                self, field
            )));
        }
        Ok(())
    }

    /// Refuse removal of locked, reserved and gateway addresses.
    pub fn check_removable(&self) -> Result<()> {
        if self.field_int("custom_apiblock", 0) == 1
            || self.field_int("custom_apinotremovable", 0) == 1
        {
            return Err(IpamError::PermissionDenied(format!(
                "address {} is protected against API removal",
                self
            )));
        }
        if self.field_int("tag", 0) > AddressTag::Used.code() || self.is_gateway() {
            return Err(IpamError::PermissionDenied(format!(
                "address {} is marked as special and can't be removed",
                self
            )));
        }
        Ok(())
    }

    fn store(&mut self, field: &str, value: Value) {
        self.record.insert(field.to_string(), value);
        self.dirty.insert(field.to_string());
    }

    fn pings_enabled(&self) -> bool {
        self.field_int("excludePing", 0) == 0
    }

    /// Record that the address answered now. No-op for ping-excluded addresses.
    pub fn update_last_seen(&mut self, force: bool) -> Result<()> {
        if self.pings_enabled() {
            self.update_field("lastSeen", fields::now_timestamp(), force)?;
        }
        Ok(())
    }

    pub fn clear_last_seen(&mut self, force: bool) -> Result<()> {
        if self.pings_enabled() {
            self.update_field("lastSeen", "", force)?;
        }
        Ok(())
    }

    pub fn update_mac(&mut self, mac: &str, force: bool) -> Result<()> {
        self.update_field("mac", mac, force).map(|_| ())
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// The dirty fields and their current values.
    pub fn pending_changes(&self) -> Record {
        self.dirty
            .iter()
            .map(|k| (k.clone(), self.record.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// `ip hostname # description # note`, one line.
    pub fn format_simple(&self) -> String {
        format!(
            "{:15} {:17} # {} # {}",
            self.to_string(),
            self.short_hostname(),
            self.description(),
            self.note()
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            Ok(ip) => write!(f, "{}", ip),
            Err(_) => write!(f, "?"),
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn address(value: Value) -> Address {
        Address::from_value(value).unwrap()
    }

    #[test]
    fn test_for_ip_builds_unsaved_record() {
        let addr = Address::for_ip("10.0.0.5".parse().unwrap(), Some(7));
        assert_eq!(addr.id(), None);
        assert_eq!(addr.subnet_id(), Some(7));
        assert_eq!(addr.to_string(), "10.0.0.5");
        assert!(!addr.is_dirty());
    }

    #[test]
    fn test_text_accessors_default_to_empty() {
        let addr = address(json!({"id": "3", "ip": "10.0.0.1", "hostname": null}));
        assert_eq!(addr.id(), Some(3));
        assert_eq!(addr.hostname(), "");
        assert_eq!(addr.description(), "");
        assert_eq!(addr.note(), "");
        assert!(addr.last_seen().is_none());
    }

    #[test]
    fn test_dirty_set_tracks_only_changes() {
        let mut addr = address(json!({"ip": "10.0.0.1", "hostname": "a.example.org"}));

        assert!(!addr.update_field("hostname", "a.example.org", false).unwrap());
        assert!(!addr.is_dirty());

        assert!(addr.update_field("hostname", "b.example.org", false).unwrap());
        assert!(addr.update_field("note", "moved", false).unwrap());
        assert_eq!(addr.dirty_fields().collect::<Vec<_>>(), vec!["hostname", "note"]);

        let pending = addr.pending_changes();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending["hostname"], json!("b.example.org"));
        assert_eq!(pending["note"], json!("moved"));

        addr.mark_clean();
        assert!(!addr.is_dirty());
        assert!(addr.pending_changes().is_empty());
    }

    #[test]
    fn test_apiblock_denies_every_field() {
        let mut addr = address(json!({"ip": "10.0.0.1", "custom_apiblock": "1"}));
        let err = addr.update_field("mac", "aa:bb:cc:dd:ee:ff", false).unwrap_err();
        assert!(matches!(err, IpamError::PermissionDenied(_)));
        assert!(!addr.is_dirty());

        assert!(addr.update_field("mac", "aa:bb:cc:dd:ee:ff", true).unwrap());
    }

    #[test]
    fn test_reserved_and_gateway_keep_exempt_fields_writable() {
        let mut reserved = address(json!({"ip": "10.0.0.1", "tag": "3"}));
        assert!(reserved.update_field("description", "x", false).is_err());
        assert!(reserved.update_field("custom_tcpports", "22", false).is_ok());
        assert!(reserved.update_mac("aa:bb:cc:dd:ee:ff", false).is_ok());
        assert!(reserved.update_last_seen(false).is_ok());

        let mut gateway = address(json!({"ip": "10.0.0.254", "tag": 2, "is_gateway": 1}));
        assert!(gateway.update_field("hostname", "gw", false).is_err());

        let mut used = address(json!({"ip": "10.0.0.2", "tag": 2}));
        assert!(used.update_field("hostname", "host", false).is_ok());
    }

    #[test]
    fn test_last_seen_respects_exclude_ping() {
        let mut excluded = address(json!({"ip": "10.0.0.1", "excludePing": "1"}));
        excluded.update_last_seen(false).unwrap();
        assert!(!excluded.is_dirty());

        let mut pinged = address(json!({"ip": "10.0.0.1", "lastSeen": "2024-01-01 00:00:00"}));
        pinged.clear_last_seen(false).unwrap();
        assert_eq!(pinged.field("lastSeen"), Some(&json!("")));
        assert!(pinged.last_seen().is_none());
        assert_eq!(pinged.dirty_fields().collect::<Vec<_>>(), vec!["lastSeen"]);
    }

    #[test]
    fn test_check_removable() {
        assert!(address(json!({"ip": "10.0.0.1", "tag": 2})).check_removable().is_ok());
        assert!(address(json!({"ip": "10.0.0.1", "custom_apinotremovable": 1})).check_removable().is_err());
        assert!(address(json!({"ip": "10.0.0.1", "custom_apiblock": 1})).check_removable().is_err());
        assert!(address(json!({"ip": "10.0.0.1", "tag": 3})).check_removable().is_err());
        assert!(address(json!({"ip": "10.0.0.1", "is_gateway": "1"})).check_removable().is_err());
    }

    #[test]
    fn test_format_simple_uses_short_hostname() {
        let addr = address(json!({
            "ip": "10.0.0.9",
            "hostname": "ldap1.example.org",
            "description": "directory",
            "note": "rack 4"
        }));
        assert_eq!(
            addr.format_simple(),
            "10.0.0.9        ldap1             # directory # rack 4"
        );
    }

    #[test]
    fn test_invalid_ip_is_an_error() {
        let addr = address(json!({"ip": "not-an-ip"}));
        assert!(addr.ip().is_err());
        assert_eq!(addr.to_string(), "?");
    }
}
