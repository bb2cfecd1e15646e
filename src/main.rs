// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kea-Roost: lifecycle orchestrator for permissioned ledger networks
//!
//! Thin command-line front end; every behavior lives in the library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info_span, warn};

use kea_roost::{
    config::CA_PASSWORD_ENV,
    logging::{self, Verbosity},
    readiness::Cancellation,
    runtime::{LineSink, ProcessRunner, StreamKind, SystemRunner},
    Config, InitRequest, Network, OrgRequest,
};

/// Kea-Roost: The Ledger Nest
///
/// Stands up a permissioned ledger network: certificate authorities,
/// organizations, peers, orderers and one channel.
#[derive(Parser, Debug)]
#[command(name = "roost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Network base directory (holds stack.json and every generated artifact)
    #[arg(short, long, global = true, default_value = "./network-config")]
    base_path: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "roost.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the root authority and the initial nodes
    Init {
        /// Channel name (overrides the configured one)
        #[arg(long)]
        channel: Option<String>,

        /// Number of peers to create
        #[arg(long, default_value_t = 1)]
        peers: usize,

        /// Number of orderers to create
        #[arg(long, default_value_t = 1)]
        orderers: usize,

        /// Start the containers and form the channel afterwards
        #[arg(long)]
        start: bool,

        /// Member organization to create with the root; it then owns the nodes
        #[arg(long, requires = "domain")]
        org: Option<String>,

        /// Domain of the member organization
        #[arg(long, requires = "org")]
        domain: Option<String>,

        /// Prefix of the member organization's bootstrap identity
        #[arg(long, requires = "org")]
        identifier: Option<String>,
    },

    /// Add an organization with its own certificate authority
    AddOrg {
        /// Organization name (also its MSP id)
        #[arg(long)]
        name: String,

        /// Organization domain
        #[arg(long)]
        domain: String,

        /// Prefix of the bootstrap identity (defaults to the name)
        #[arg(long)]
        identifier: Option<String>,
    },

    /// Add peers
    AddPeer {
        /// Number of peers to add
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Owning organization (defaults to the root organization)
        #[arg(long)]
        org: Option<String>,
    },

    /// Add orderers (only before any node has joined the channel)
    AddOrderer {
        /// Number of orderers to add
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Owning organization (defaults to the root organization)
        #[arg(long)]
        org: Option<String>,
    },

    /// Generate the genesis block and join every node to the channel
    CreateChannel {
        /// Channel name (overrides the recorded one while the channel has no members)
        #[arg(long)]
        channel: Option<String>,
    },

    /// Start all containers
    Start,

    /// Stop all containers
    Stop,

    /// Remove all containers
    Down {
        /// Also remove the declared volumes
        #[arg(long)]
        volumes: bool,
    },

    /// Show container logs
    Logs {
        /// Keep streaming until interrupted
        #[arg(short, long)]
        follow: bool,

        /// Services to show (all when omitted)
        services: Vec<String>,
    },

    /// Print an overview of the network
    Summary,

    /// Regenerate docker-compose.yml from the recorded network
    GenerateCompose,

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Commands::Init {
        channel: Some(channel),
        ..
    } = &cli.command
    {
        config.network.channel = channel.clone();
    }

    logging::init(
        &config.logging,
        Verbosity {
            verbose: cli.verbose,
            debug: cli.debug,
        },
    )?;

    let base = cli.base_path.as_path();
    match cli.command {
        Commands::Version => {
            println!("Kea-Roost v{}", env!("CARGO_PKG_VERSION"));
            println!("The Ledger Nest for the Kea Ecosystem");
            Ok(())
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }

        Commands::Init {
            peers,
            orderers,
            start,
            org,
            domain,
            identifier,
            ..
        } => {
            let organization = match (org, domain) {
                (Some(name), Some(domain)) => Some(OrgRequest {
                    name,
                    domain,
                    identifier,
                }),
                _ => None,
            };
            let request = InitRequest {
                peers,
                orderers,
                start,
                admin_password: std::env::var(CA_PASSWORD_ENV).ok(),
                organization,
            };
            init_network(base, config, request).await
        }

        Commands::AddOrg {
            name,
            domain,
            identifier,
        } => {
            let mut network = open_network(base, config)?;
            network
                .add_organization(&name, &domain, identifier.as_deref())
                .await
                .with_context(|| format!("Failed to add organization '{}'", name))?;
            println!("Organization '{}' added", name);
            Ok(())
        }

        Commands::AddPeer { count, org } => {
            let mut network = open_network(base, config)?;
            network
                .add_peers(count, org.as_deref())
                .await
                .context("Failed to add peers")?;
            println!("Added {} peer(s); run 'start' to launch them", count);
            Ok(())
        }

        Commands::AddOrderer { count, org } => {
            let mut network = open_network(base, config)?;
            network
                .add_orderers(count, org.as_deref())
                .await
                .context("Failed to add orderers")?;
            println!("Added {} orderer(s); run 'start' to launch them", count);
            Ok(())
        }

        Commands::CreateChannel { channel } => {
            let mut network = open_network(base, config)?;
            network
                .create_channel(channel.as_deref())
                .await
                .context("Channel creation failed")?;
            println!("Channel '{}' formed", network.descriptor().channel_name);
            Ok(())
        }

        Commands::Start => {
            let mut network = open_network(base, config)?;
            network
                .start_network()
                .await
                .context("Failed to start the network")?;
            println!("Network started");
            Ok(())
        }

        Commands::Stop => {
            let mut network = open_network(base, config)?;
            network.stop().await.context("Failed to stop the network")?;
            println!("Network stopped");
            Ok(())
        }

        Commands::Down { volumes } => {
            let mut network = open_network(base, config)?;
            network
                .down(volumes)
                .await
                .context("Failed to remove the network")?;
            println!("Network removed");
            Ok(())
        }

        Commands::Logs { follow, services } => {
            let network = open_network(base, config)?;
            let sink: LineSink = Arc::new(|kind: StreamKind, line: &str| match kind {
                StreamKind::Stdout => println!("{}", line),
                StreamKind::Stderr => eprintln!("{}", line),
            });
            network
                .logs(follow, &services, sink)
                .await
                .context("Failed to read logs")?;
            Ok(())
        }

        Commands::Summary => {
            let network = open_network(base, config)?;
            print!("{}", network.summary());
            Ok(())
        }

        Commands::GenerateCompose => {
            let mut network = open_network(base, config)?;
            let path = network
                .generate_compose()
                .context("Failed to generate the compose file")?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

/// Cancellation signal fired by Ctrl-C
fn cancel_on_interrupt() -> Cancellation {
    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            handle.cancel();
        }
    });
    cancel
}

fn runner(config: &Config) -> Arc<dyn ProcessRunner> {
    Arc::new(SystemRunner::with_timeout(config.readiness.process_timeout()))
}

fn open_network(base: &Path, config: Config) -> anyhow::Result<Network> {
    let span = info_span!("network", base = %base.display());
    let runner = runner(&config);
    Network::open(base, config, runner, cancel_on_interrupt(), span)
        .with_context(|| format!("No network found at {}; run init first", base.display()))
}

async fn init_network(base: &Path, config: Config, request: InitRequest) -> anyhow::Result<()> {
    let span = info_span!("network", base = %base.display());
    let runner = runner(&config);
    let mut network = Network::create(base, config, runner, cancel_on_interrupt(), span);
    network
        .init(request)
        .await
        .context("Network initialization failed")?;

    println!("Network initialized at {}", base.display());
    print!("{}", network.summary());
    Ok(())
}
