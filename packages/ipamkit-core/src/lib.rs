//! ipamkit Core Library
//!
//! Client-side helpers for a phpIPAM service:
//! - Accessor wrappers over subnet, address, scan agent and VLAN records
//! - Free address block search (first/best/worst fit)
//! - Composite operations: annotation, registration, subnet reports
//!
//! The service is reached through the [`IpamApi`] trait. [`RestClient`]
//! implements it over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use ipamkit_core::{api, FitPolicy, IpamServer, RestClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ipamkit_core::IpamError> {
//!     let config = api::load_config(&api::ConfigOverrides::default());
//!     let server = IpamServer::new(RestClient::connect(&config).await?);
//!
//!     let subnet = server.subnet(7).await?;
//!     for addr in server.find_free(&subnet, 4, FitPolicy::BestFit).await? {
//!         println!("{}", addr);
//!     }
//!     Ok(())
//! }
//! ```

pub mod alloc;
pub mod api;
pub mod error;
pub mod model;
pub mod server;

// Re-export commonly used types
pub use alloc::{AddressRange, FitPolicy, FreeRun};
pub use api::{IpamApi, IpamConfig, RestClient};
pub use error::{IpamError, Result};
pub use model::{Address, AddressTag, MacAddr, Record, ScanAgent, Subnet, Vlan};
pub use server::{AnnotateOutcome, Annotation, IpamServer, SubnetAnnotation};
