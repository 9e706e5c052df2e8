//! Remote IPAM API access.
//!
//! Everything above this module talks to the service through [`IpamApi`],
//! four entity operations addressed by controller and path. [`RestClient`]
//! is the HTTP implementation used by the CLI.

mod client;
pub mod config;

pub use client::RestClient;
pub use config::{load_config, ConfigOverrides, ConfigSource, IpamConfig};

use crate::error::Result;
use crate::model::Record;
use serde_json::Value;
use std::future::Future;

/// Controller names of the phpIPAM API.
pub mod controllers {
    pub const SECTIONS: &str = "sections";
    pub const SUBNETS: &str = "subnets";
    pub const ADDRESSES: &str = "addresses";
    pub const VLAN: &str = "vlan";
    pub const SCAN_AGENTS: &str = "tools/scanagents";
    pub const NAMESERVERS: &str = "tools/nameservers";
}

/// Minimal entity interface of the remote service.
///
/// A missing entity must surface as [`crate::IpamError::NotFound`].
pub trait IpamApi {
    /// Read the entity or entity list at `controller/path`.
    fn fetch_entities(
        &self,
        controller: &str,
        path: &str,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Create an entity. The answer carries the new `id` when the service
    /// reports one.
    fn create_entity(
        &self,
        controller: &str,
        data: &Record,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Patch the given fields of the entity at `controller/path`.
    fn update_entity(
        &self,
        controller: &str,
        path: &str,
        params: &Record,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_entity(&self, controller: &str, path: &str) -> impl Future<Output = Result<()>> + Send;
}
