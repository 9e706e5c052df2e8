//! Accessor wrappers over the JSON records the service returns.

mod address;
pub(crate) mod fields;
mod mac;
mod scan_agent;
mod subnet;
mod vlan;

pub use address::{Address, AddressTag};
pub use fields::Record;
pub use mac::MacAddr;
pub use scan_agent::ScanAgent;
pub use subnet::Subnet;
pub use vlan::Vlan;
