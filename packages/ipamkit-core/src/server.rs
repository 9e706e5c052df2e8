//! Composite operations over the remote API.

use crate::alloc::{self, AddressRange, FitPolicy};
use crate::api::{IpamApi, controllers};
use crate::error::{IpamError, Result, or_empty};
use crate::model::fields::{int_of, text_of};
use crate::model::{Address, AddressTag, Record, ScanAgent, Subnet, Vlan};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::net::IpAddr;

/// Router position used when a subnet's router is not placed explicitly:
/// the address just below broadcast.
pub const DEFAULT_ROUTER_POSITION: i128 = -2;

const BANNER_RULE: &str =
    "##################################################################################################";

/// Fields written by [`IpamServer::annotate_address`].
#[derive(Debug, Clone)]
pub struct Annotation {
    pub description: String,
    pub tag: AddressTag,
    pub api_block: bool,
    pub api_not_removable: bool,
    pub is_router: bool,
    /// Written only when non-empty.
    pub hostname: String,
    pub clear_last_seen: bool,
}

impl Annotation {
    pub fn new(description: impl Into<String>, tag: AddressTag) -> Self {
        Self {
            description: description.into(),
            tag,
            api_block: false,
            api_not_removable: false,
            is_router: false,
            hostname: String::new(),
            clear_last_seen: false,
        }
    }
}

/// What [`IpamServer::annotate_address`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotateOutcome {
    Created,
    Updated,
    /// Nothing changed on an existing address.
    Unchanged,
    /// A protection flag refused the change.
    Blocked,
}

/// Settings for [`IpamServer::annotate_subnet`].
#[derive(Debug, Clone)]
pub struct SubnetAnnotation {
    pub has_router: bool,
    /// Index into the subnet, negative counting from the end.
    pub router_position: i128,
    pub router_hostname: String,
    pub force: bool,
}

impl Default for SubnetAnnotation {
    fn default() -> Self {
        Self {
            has_router: true,
            router_position: DEFAULT_ROUTER_POSITION,
            router_hostname: String::new(),
            force: false,
        }
    }
}

/// High level operations on a phpIPAM service.
///
/// Each operation issues its remote calls one after another. Nothing is
/// cached; every call sees the service's current state.
#[derive(Debug, Clone)]
pub struct IpamServer<A> {
    api: A,
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

impl<A: IpamApi> IpamServer<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn fetch_list<T>(
        &self,
        controller: &str,
        path: &str,
        wrap: impl Fn(Value) -> Result<T>,
    ) -> Result<Vec<T>> {
        let fetched = self.api.fetch_entities(controller, path).await;
        or_empty(fetched.and_then(|value| into_list(value).into_iter().map(&wrap).collect()))
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    pub async fn all_sections(&self) -> Result<Vec<Value>> {
        self.fetch_list(controllers::SECTIONS, "", Ok).await
    }

    pub async fn all_subnets(&self) -> Result<Vec<Subnet>> {
        self.fetch_list(controllers::SUBNETS, "", Subnet::from_value).await
    }

    pub async fn all_addresses(&self) -> Result<Vec<Address>> {
        self.fetch_list(controllers::ADDRESSES, "", Address::from_value).await
    }

    pub async fn all_vlans(&self) -> Result<Vec<Vlan>> {
        self.fetch_list(controllers::VLAN, "", Vlan::from_value).await
    }

    pub async fn all_scan_agents(&self) -> Result<Vec<ScanAgent>> {
        self.fetch_list(controllers::SCAN_AGENTS, "", ScanAgent::from_value).await
    }

    pub async fn subnet(&self, id: i64) -> Result<Subnet> {
        let value = self
            .api
            .fetch_entities(controllers::SUBNETS, &id.to_string())
            .await?;
        Subnet::from_value(value)
    }

    pub async fn vlan(&self, id: i64) -> Result<Vlan> {
        let value = self
            .api
            .fetch_entities(controllers::VLAN, &id.to_string())
            .await?;
        Vlan::from_value(value)
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    pub async fn update_scan_agent(&self, agent: &mut ScanAgent) -> Result<()> {
        let params = agent.mark_accessed();
        self.api
            .update_entity(controllers::SCAN_AGENTS, &agent.id().to_string(), &params)
            .await
    }

    pub async fn update_subnet_last_scan(&self, subnet: &mut Subnet) -> Result<()> {
        let params = subnet.mark_scanned();
        self.api
            .update_entity(controllers::SUBNETS, &subnet.id().to_string(), &params)
            .await
    }

    pub async fn update_subnet_last_discovery(&self, subnet: &mut Subnet) -> Result<()> {
        let params = subnet.mark_discovered();
        self.api
            .update_entity(controllers::SUBNETS, &subnet.id().to_string(), &params)
            .await
    }

    /// Send the address's dirty fields, and only those, then flush them.
    pub async fn update_address(&self, address: &mut Address) -> Result<()> {
        if !address.is_dirty() {
            tracing::debug!("Address {} has no pending changes", address);
            return Ok(());
        }
        let id = address.id().ok_or_else(|| {
            IpamError::InvalidRecord(format!("address {} has no id, register it first", address))
        })?;
        let params = address.pending_changes();
        self.api
            .update_entity(controllers::ADDRESSES, &id.to_string(), &params)
            .await?;
        address.mark_clean();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub async fn find_subnets_by_ip_mask(&self, base: IpAddr, mask: u8) -> Result<Vec<Subnet>> {
        let path = format!("search/{}/{}", base, mask);
        self.fetch_list(controllers::SUBNETS, &path, Subnet::from_value).await
    }

    /// Addresses registered with exactly this IP. Normally at most one.
    pub async fn find_ips(&self, ip: IpAddr) -> Result<Vec<Address>> {
        let path = format!("search/{}", ip);
        self.fetch_list(controllers::ADDRESSES, &path, Address::from_value).await
    }

    pub async fn find_ips_by_hostname(&self, hostname: &str) -> Result<Vec<Address>> {
        let path = format!("search_hostname/{}", hostname);
        self.fetch_list(controllers::ADDRESSES, &path, Address::from_value).await
    }

    /// Every address registered inside the subnet.
    pub async fn find_ips_by_net(&self, subnet: &Subnet) -> Result<Vec<Address>> {
        let path = format!("{}/addresses", subnet.id());
        self.fetch_list(controllers::SUBNETS, &path, Address::from_value).await
    }

    /// Addresses of the subnet whose `field` matches `pattern` from its start.
    pub async fn find_ips_by_field(
        &self,
        subnet: &Subnet,
        field: &str,
        pattern: &str,
    ) -> Result<Vec<Address>> {
        let re = Regex::new(&format!("^(?:{})", pattern))
            .map_err(|e| IpamError::InvalidRecord(format!("bad pattern '{}': {}", pattern, e)))?;
        let addresses = self.find_ips_by_net(subnet).await?;
        Ok(addresses
            .into_iter()
            .filter(|a| {
                let value = text_of(a.field(field)).unwrap_or_default();
                re.is_match(&value)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Find `num` contiguous free addresses in the subnet.
    ///
    /// Returns new, unsaved addresses bound to the subnet, or an empty list
    /// when no block fits. Nothing is reserved: register the addresses and
    /// expect registration to fail if another client got there first.
    pub async fn find_free(&self, subnet: &Subnet, num: usize, policy: FitPolicy) -> Result<Vec<Address>> {
        let range = policy.search_range(subnet.network()?);
        let used: Vec<IpAddr> = self
            .find_ips_by_net(subnet)
            .await?
            .iter()
            .filter_map(|a| match a.ip() {
                Ok(ip) => Some(ip),
                Err(e) => {
                    tracing::warn!("Ignoring used address of subnet {}: {}", subnet, e);
                    None
                }
            })
            .collect();

        let block = alloc::find_free_block(range, used.iter().copied(), num, policy);
        tracing::debug!(
            "{} over {} ({} used): {} free addresses found for {} requested",
            policy,
            subnet,
            used.len(),
            block.len(),
            num
        );

        let subnet_id = Some(subnet.id());
        Ok(block
            .into_iter()
            .map(|ip| Address::for_ip(ip, subnet_id))
            .collect())
    }

    /// Create the address at the service. Fails if it is already registered.
    pub async fn register_ip(&self, address: &Address) -> Result<Address> {
        let answer = self
            .api
            .create_entity(controllers::ADDRESSES, address.record())
            .await?;

        let mut record = address.record().clone();
        match int_of(answer.get("id")) {
            Some(id) => {
                record.insert("id".to_string(), Value::from(id));
            }
            None => tracing::warn!("Service did not report an id for new address {}", address),
        }
        tracing::info!("Registered address {}", address);
        Ok(Address::new(record))
    }

    /// Remove the address. Protected and special addresses need `force`.
    pub async fn unregister_ip(&self, address: &Address, force: bool) -> Result<()> {
        if !force {
            address.check_removable()?;
        }
        let id = address
            .id()
            .ok_or_else(|| IpamError::InvalidRecord(format!("address {} has no id", address)))?;
        self.api
            .delete_entity(controllers::ADDRESSES, &id.to_string())
            .await?;
        tracing::info!("Unregistered address {}", address);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Annotation
    // ------------------------------------------------------------------

    /// Write the annotation to the address, creating it when unknown.
    pub async fn annotate_address(
        &self,
        ip: IpAddr,
        subnet: &Subnet,
        annotation: &Annotation,
        force: bool,
    ) -> Result<AnnotateOutcome> {
        let existing = self.find_ips(ip).await?.pop();
        let create = existing.is_none();
        let mut address = existing.unwrap_or_else(|| Address::for_ip(ip, Some(subnet.id())));

        match apply_annotation(&mut address, annotation, force) {
            Ok(()) => {}
            Err(IpamError::PermissionDenied(reason)) => {
                tracing::error!("Address {} can't be annotated: {}", ip, reason);
                return Ok(AnnotateOutcome::Blocked);
            }
            Err(e) => return Err(e),
        }

        if create {
            self.register_ip(&address).await?;
            tracing::debug!("Annotated new IP address: {:?}", address.record());
            Ok(AnnotateOutcome::Created)
        } else if address.is_dirty() {
            self.update_address(&mut address).await?;
            tracing::debug!("Annotated existing IP address: {:?}", address.record());
            Ok(AnnotateOutcome::Updated)
        } else {
            Ok(AnnotateOutcome::Unchanged)
        }
    }

    /// Mark the network, broadcast and (optionally) router addresses of a
    /// pool subnet. Non-pool subnets are left alone.
    pub async fn annotate_subnet(
        &self,
        subnet: &Subnet,
        options: &SubnetAnnotation,
    ) -> Result<Vec<(IpAddr, AnnotateOutcome)>> {
        if !subnet.is_pool() {
            tracing::debug!("Subnet {} is not a pool, skipping annotation", subnet);
            return Ok(Vec::new());
        }

        let range = AddressRange::full(subnet.network()?);

        let reserved = |description: &str| {
            let mut a = Annotation::new(description, AddressTag::NotUsable);
            a.api_not_removable = true;
            a.clear_last_seen = true;
            a
        };

        let mut targets = vec![
            (range.first(), reserved("NETWORK ADDRESS")),
            (range.last(), reserved("BROADCAST ADDRESS")),
        ];

        if options.has_router {
            let router = range.nth(options.router_position).ok_or_else(|| {
                IpamError::InvalidRecord(format!(
                    "router position {} is outside subnet {}",
                    options.router_position, subnet
                ))
            })?;
            let mut a = Annotation::new("DEFAULT ROUTER", AddressTag::Router);
            a.api_not_removable = true;
            a.is_router = true;
            a.hostname = options.router_hostname.clone();
            targets.push((router, a));
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for (ip, annotation) in &targets {
            let outcome = self
                .annotate_address(*ip, subnet, annotation, options.force)
                .await?;
            outcomes.push((*ip, outcome));
        }
        Ok(outcomes)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// DNS servers configured for a pool subnet through its nameserver set.
    pub async fn dns_subnet(&self, subnet: &Subnet) -> Result<Vec<IpAddr>> {
        let Some(ns_id) = subnet.nameserver_id().filter(|_| subnet.is_pool()) else {
            return Ok(Vec::new());
        };

        let nameserver = match self
            .api
            .fetch_entities(controllers::NAMESERVERS, &ns_id.to_string())
            .await
        {
            Ok(value) => value,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Nameserver set {} of subnet {} not found", ns_id, subnet);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let servers = nameserver
            .get("namesrv1")
            .and_then(Value::as_str)
            .unwrap_or("");
        servers
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|_| {
                    IpamError::InvalidRecord(format!(
                        "nameserver set {} lists invalid address '{}'",
                        ns_id, s
                    ))
                })
            })
            .collect()
    }

    /// VLAN number for the report banner; blank when unknown or unreachable.
    async fn vlan_label(&self, subnet: &Subnet) -> String {
        let Some(vlan_id) = subnet.vlan_id().filter(|id| *id > 0) else {
            return String::new();
        };
        match self
            .api
            .fetch_entities(controllers::VLAN, &vlan_id.to_string())
            .await
        {
            Ok(value) => text_of(value.get("number")).unwrap_or_default(),
            Err(e) => {
                tracing::debug!("VLAN {} lookup failed: {}", vlan_id, e);
                String::new()
            }
        }
    }

    /// Plain text report of a subnet: banner, then one line per address.
    pub async fn list_subnet_plain(&self, subnet: &Subnet) -> Result<String> {
        let network = subnet.network()?;
        let vlan = self.vlan_label(subnet).await;
        let router = AddressRange::full(network)
            .nth(DEFAULT_ROUTER_POSITION)
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let ip_range = format!("{}/{}", network.ip(), network.prefix());

        let mut out = String::new();
        let _ = writeln!(out, "{}", BANNER_RULE);
        let _ = writeln!(
            out,
            "# vlan: {:3} red: {:18} {:61}#",
            vlan,
            ip_range,
            subnet.description()
        );
        let _ = writeln!(
            out,
            "# router: {:18} mask {:>21}                                          #",
            router,
            network.prefix()
        );
        let _ = writeln!(out, "{}", BANNER_RULE);
        out.push('\n');

        for address in self.find_ips_by_net(subnet).await? {
            let _ = writeln!(
                out,
                "{:15} {:17} {} {}",
                address.to_string(),
                address.short_hostname(),
                report_comment(address.description()),
                report_comment(address.note())
            );
        }
        out.push_str("\n\n");
        Ok(out)
    }
}

/// Protection is judged on the address as found, before any field is written.
fn apply_annotation(address: &mut Address, annotation: &Annotation, force: bool) -> Result<()> {
    if !force {
        address.check_writable("description")?;
    }
    address.update_field("description", annotation.description.as_str(), true)?;
    address.update_field("tag", annotation.tag.code(), true)?;
    address.update_field("custom_apiblock", i64::from(annotation.api_block), true)?;
    address.update_field(
        "custom_apinotremovable",
        i64::from(annotation.api_not_removable),
        true,
    )?;
    address.update_field("is_gateway", i64::from(annotation.is_router), true)?;
    if !annotation.hostname.is_empty() {
        address.update_field("hostname", annotation.hostname.as_str(), true)?;
    }
    if annotation.clear_last_seen {
        address.clear_last_seen(true)?;
    }
    Ok(())
}

/// `# text` for report lines; blank for empty or autodiscovery text.
fn report_comment(text: &str) -> String {
    if text.is_empty() || text.to_lowercase().contains("autodiscover") {
        String::new()
    } else {
        format!("# {}", text)
    }
}
