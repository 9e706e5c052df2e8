//! ipamkit CLI - command line access to a phpIPAM service
//!
//! This binary wraps the ipamkit core library to:
//! - List subnets, addresses, scan agents and VLANs
//! - Find free address blocks inside a subnet
//! - Register, unregister and annotate addresses
//! - Print plain text subnet reports

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ipamkit_core::api::{self, ConfigOverrides};
use ipamkit_core::{
    Address, FitPolicy, IpamServer, RestClient, Subnet, SubnetAnnotation,
};
use std::net::IpAddr;

#[derive(Parser)]
#[command(name = "ipamkit")]
#[command(author = "ipamkit contributors")]
#[command(version)]
#[command(about = "Command line access to a phpIPAM service")]
#[command(long_about = "
ipamkit talks to a phpIPAM service through its REST API.

Quick start:
  1. Configure access:   export MYIPAM_URL=https://ipam.example.com
                         export MYIPAM_APPID=myipamclient MYIPAM_TOKEN=...
  2. List subnets:       ipamkit subnets --mask 24
  3. Find free space:    ipamkit free 7 --count 4 --fit best

See 'ipamkit config' for the configuration file format.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Service URL (overrides MYIPAM_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// API application id (overrides MYIPAM_APPID)
    #[arg(long, global = true)]
    pub app_id: Option<String>,

    /// Static API token (overrides MYIPAM_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Login user (overrides MYIPAM_USER); the password comes from MYIPAM_PASSWD
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// CA certificate file, or NONE to skip verification (overrides MYIPAM_CACERT)
    #[arg(long, global = true)]
    pub cacert: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Fit {
    First,
    Best,
    Worst,
}

impl From<Fit> for FitPolicy {
    fn from(fit: Fit) -> Self {
        match fit {
            Fit::First => FitPolicy::FirstFit,
            Fit::Best => FitPolicy::BestFit,
            Fit::Worst => FitPolicy::WorstFit,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List subnets
    Subnets {
        /// Only subnets with this prefix length
        #[arg(short, long)]
        mask: Option<u8>,

        /// Only subnets scanned by this scan agent id
        #[arg(short, long)]
        agent: Option<i64>,
    },

    /// List the addresses registered in a subnet
    Addresses {
        subnet_id: i64,

        /// Field matched against --pattern
        #[arg(long, default_value = "hostname")]
        field: String,

        /// Regular expression matched from the start of the field
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Look up an address by IP
    Search { ip: IpAddr },

    /// Look up addresses by hostname
    SearchHost { hostname: String },

    /// Find a block of contiguous free addresses in a subnet
    Free {
        subnet_id: i64,

        /// Number of contiguous addresses
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Block selection policy
        #[arg(long, default_value = "first")]
        fit: Fit,
    },

    /// Register a free address
    Register {
        ip: IpAddr,
        subnet_id: i64,

        #[arg(long)]
        hostname: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Remove an address registration
    Unregister {
        ip: IpAddr,

        /// Ignore protection flags
        #[arg(long)]
        force: bool,
    },

    /// Mark the network, broadcast and router addresses of a pool subnet
    Annotate {
        subnet_id: i64,

        /// Also mark the default router
        #[arg(long)]
        router: bool,

        /// Router index in the subnet, negative counts from the end
        #[arg(long, default_value = "-2", allow_hyphen_values = true)]
        router_pos: i128,

        #[arg(long, default_value = "")]
        router_hostname: String,

        /// Ignore protection flags
        #[arg(long)]
        force: bool,
    },

    /// Print a plain text report of a subnet
    Report { subnet_id: i64 },

    /// Show the DNS servers of a pool subnet
    Dns { subnet_id: i64 },

    /// List scan agents
    Agents,

    /// List VLANs
    Vlans,

    /// Stamp a subnet's last scan (or discovery) time with now
    MarkScanned {
        subnet_id: i64,

        /// Stamp the discovery time instead
        #[arg(long)]
        discovery: bool,
    },

    /// Stamp a scan agent's last access time with now
    TouchAgent { agent_id: i64 },

    /// Show configuration paths and settings
    Config,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            app_id: self.app_id.clone(),
            token: self.token.clone(),
            user: self.user.clone(),
            cacert: self.cacert.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ipamkit={},ipamkit_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Config = cli.command {
        return cmd_config(&cli);
    }

    let server = connect(&cli).await?;

    match &cli.command {
        Commands::Subnets { mask, agent } => cmd_subnets(&cli, &server, *mask, *agent).await,
        Commands::Addresses {
            subnet_id,
            field,
            pattern,
        } => cmd_addresses(&cli, &server, *subnet_id, field, pattern.as_deref()).await,
        Commands::Search { ip } => {
            let found = server.find_ips(*ip).await?;
            print_addresses(&cli, &found);
            Ok(())
        }
        Commands::SearchHost { hostname } => {
            let found = server.find_ips_by_hostname(hostname).await?;
            print_addresses(&cli, &found);
            Ok(())
        }
        Commands::Free {
            subnet_id,
            count,
            fit,
        } => cmd_free(&cli, &server, *subnet_id, *count, (*fit).into()).await,
        Commands::Register {
            ip,
            subnet_id,
            hostname,
            description,
        } => {
            cmd_register(
                &cli,
                &server,
                *ip,
                *subnet_id,
                hostname.as_deref(),
                description.as_deref(),
            )
            .await
        }
        Commands::Unregister { ip, force } => cmd_unregister(&cli, &server, *ip, *force).await,
        Commands::Annotate {
            subnet_id,
            router,
            router_pos,
            router_hostname,
            force,
        } => {
            let options = SubnetAnnotation {
                has_router: *router,
                router_position: *router_pos,
                router_hostname: router_hostname.clone(),
                force: *force,
            };
            cmd_annotate(&cli, &server, *subnet_id, &options).await
        }
        Commands::Report { subnet_id } => {
            let subnet = fetch_subnet(&server, *subnet_id).await?;
            let report = server.list_subnet_plain(&subnet).await?;
            match cli.format {
                OutputFormat::Text => print!("{}", report),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "subnet": subnet, "report": report }))
                }
            }
            Ok(())
        }
        Commands::Dns { subnet_id } => {
            let subnet = fetch_subnet(&server, *subnet_id).await?;
            let servers = server.dns_subnet(&subnet).await?;
            match cli.format {
                OutputFormat::Text => {
                    if servers.is_empty() {
                        println!("No DNS servers configured for {}", subnet);
                    }
                    for dns in &servers {
                        println!("{}", dns);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::json!({ "dns": servers })),
            }
            Ok(())
        }
        Commands::Agents => {
            let agents = server.all_scan_agents().await?;
            match cli.format {
                OutputFormat::Text => {
                    for agent in &agents {
                        println!("{:>4}  {}", agent.id(), agent);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::json!(agents)),
            }
            Ok(())
        }
        Commands::Vlans => {
            let vlans = server.all_vlans().await?;
            match cli.format {
                OutputFormat::Text => {
                    for vlan in &vlans {
                        println!("{:>4}  {}", vlan.id(), vlan);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::json!(vlans)),
            }
            Ok(())
        }
        Commands::MarkScanned {
            subnet_id,
            discovery,
        } => {
            let mut subnet = fetch_subnet(&server, *subnet_id).await?;
            if *discovery {
                server.update_subnet_last_discovery(&mut subnet).await?;
            } else {
                server.update_subnet_last_scan(&mut subnet).await?;
            }
            match cli.format {
                OutputFormat::Text => println!(
                    "{} -- last scanned at: {} -- last discovered at: {}",
                    subnet,
                    format_time(subnet.last_scan()),
                    format_time(subnet.last_discovery())
                ),
                OutputFormat::Json => println!("{}", serde_json::json!(subnet)),
            }
            Ok(())
        }
        Commands::TouchAgent { agent_id } => {
            let mut agent = server
                .all_scan_agents()
                .await?
                .into_iter()
                .find(|a| a.id() == *agent_id)
                .with_context(|| format!("No scan agent with id {}", agent_id))?;
            server.update_scan_agent(&mut agent).await?;
            match cli.format {
                OutputFormat::Text => println!("{}", agent),
                OutputFormat::Json => println!("{}", serde_json::json!(agent)),
            }
            Ok(())
        }
        Commands::Config => cmd_config(&cli),
    }
}

async fn connect(cli: &Cli) -> Result<IpamServer<RestClient>> {
    let config = api::load_config(&cli.overrides());
    let client = RestClient::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to IPAM service '{}'", config.url))?;
    Ok(IpamServer::new(client))
}

async fn fetch_subnet(server: &IpamServer<RestClient>, id: i64) -> Result<Subnet> {
    server
        .subnet(id)
        .await
        .with_context(|| format!("Failed to fetch subnet {}", id))
}

fn format_time(ts: Option<chrono::DateTime<chrono::Local>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_addresses(cli: &Cli, addresses: &[Address]) {
    match cli.format {
        OutputFormat::Text => {
            if addresses.is_empty() {
                println!("No addresses found.");
            }
            for addr in addresses {
                println!("{}", addr.format_simple());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::json!(addresses)),
    }
}

async fn cmd_subnets(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    mask: Option<u8>,
    agent: Option<i64>,
) -> Result<()> {
    let subnets: Vec<Subnet> = server
        .all_subnets()
        .await?
        .into_iter()
        .filter(|sn| mask.is_none_or(|m| sn.mask() == Some(m)))
        .filter(|sn| agent.is_none_or(|a| sn.scan_agent_id() == Some(a)))
        .collect();

    match cli.format {
        OutputFormat::Text => {
            println!("Found {} subnets:", subnets.len());
            println!();
            for sn in &subnets {
                println!(
                    "  {:>5}  {} -- last scanned at: {} -- last discovered at: {}",
                    sn.id(),
                    sn,
                    format_time(sn.last_scan()),
                    format_time(sn.last_discovery())
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::json!(subnets)),
    }
    Ok(())
}

async fn cmd_addresses(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    subnet_id: i64,
    field: &str,
    pattern: Option<&str>,
) -> Result<()> {
    let subnet = fetch_subnet(server, subnet_id).await?;
    let addresses = match pattern {
        Some(pattern) => server.find_ips_by_field(&subnet, field, pattern).await?,
        None => server.find_ips_by_net(&subnet).await?,
    };

    if let OutputFormat::Text = cli.format {
        println!("{}", subnet);
        println!();
    }
    print_addresses(cli, &addresses);

    if let (OutputFormat::Text, Ok(network)) = (cli.format, subnet.network()) {
        let outside: Vec<_> = addresses
            .iter()
            .filter(|a| a.ip().map(|ip| !network.contains(ip)).unwrap_or(true))
            .collect();
        for addr in outside {
            tracing::warn!("{} is NOT in {}", addr, subnet);
        }
    }
    Ok(())
}

async fn cmd_free(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    subnet_id: i64,
    count: usize,
    policy: FitPolicy,
) -> Result<()> {
    let subnet = fetch_subnet(server, subnet_id).await?;
    let block = server.find_free(&subnet, count, policy).await?;

    match cli.format {
        OutputFormat::Text => {
            if block.is_empty() {
                println!("No block of {} free addresses in {} ({})", count, subnet, policy);
            } else {
                println!("{} free addresses in {} ({}):", block.len(), subnet, policy);
                for addr in &block {
                    println!("  {}", addr.format_simple());
                }
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "subnet_id": subnet.id(),
                    "policy": policy,
                    "requested": count,
                    "addresses": block,
                })
            );
        }
    }
    Ok(())
}

async fn cmd_register(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    ip: IpAddr,
    subnet_id: i64,
    hostname: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    let mut addr = Address::for_ip(ip, Some(subnet_id));
    if let Some(hostname) = hostname {
        addr.update_field("hostname", hostname, false)?;
    }
    if let Some(description) = description {
        addr.update_field("description", description, false)?;
    }

    let registered = server
        .register_ip(&addr)
        .await
        .with_context(|| format!("Failed to register {}", ip))?;

    match cli.format {
        OutputFormat::Text => println!(
            "Registered {} (id {})",
            registered,
            registered
                .id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        OutputFormat::Json => println!("{}", serde_json::json!(registered)),
    }
    Ok(())
}

async fn cmd_unregister(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    ip: IpAddr,
    force: bool,
) -> Result<()> {
    let found = server.find_ips(ip).await?;
    if found.is_empty() {
        anyhow::bail!("{} is not registered", ip);
    }

    for addr in &found {
        server
            .unregister_ip(addr, force)
            .await
            .with_context(|| format!("Failed to unregister {}", addr))?;
    }

    match cli.format {
        OutputFormat::Text => println!("Unregistered {}", ip),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "status": "unregistered", "ip": ip, "count": found.len() })
        ),
    }
    Ok(())
}

async fn cmd_annotate(
    cli: &Cli,
    server: &IpamServer<RestClient>,
    subnet_id: i64,
    options: &SubnetAnnotation,
) -> Result<()> {
    let subnet = fetch_subnet(server, subnet_id).await?;
    if !subnet.is_pool() {
        tracing::warn!("{} is not a pool subnet, nothing to annotate", subnet);
    }
    let outcomes = server.annotate_subnet(&subnet, options).await?;

    match cli.format {
        OutputFormat::Text => {
            for (ip, outcome) in &outcomes {
                println!("  {:15} {:?}", ip.to_string(), outcome);
            }
        }
        OutputFormat::Json => {
            let rows: Vec<_> = outcomes
                .iter()
                .map(|(ip, outcome)| serde_json::json!({ "ip": ip, "outcome": outcome }))
                .collect();
            println!("{}", serde_json::json!(rows));
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = api::load_config(&cli.overrides());
    let config_path = api::config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Service URL:      {} (from {})", config.url, config.source);
            println!("Application id:   {}", config.app_id);
            println!(
                "Authentication:   {}",
                if config.uses_login() {
                    format!("user '{}'", config.user)
                } else if config.token.is_empty() {
                    "none".to_string()
                } else {
                    "application token".to_string()
                }
            );
            println!(
                "CA certificate:   {}",
                if config.cacert.is_empty() { "system" } else { config.cacert.as_str() }
            );
            if let Err(e) = config.validate() {
                println!();
                println!("Warning: {}", e);
            }
            println!();
            println!("Environment variables:");
            println!("  MYIPAM_URL, MYIPAM_APPID, MYIPAM_TOKEN,");
            println!("  MYIPAM_USER, MYIPAM_PASSWD, MYIPAM_CACERT");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", api::config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "config": config,
                    "valid": config.validate().is_ok(),
                })
            );
        }
    }

    Ok(())
}
