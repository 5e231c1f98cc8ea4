//! `brookd` — the brook daemon.
//!
//! Binary entrypoint that ties the brook components together into a node
//! that serves, publishes, and fetches content-addressed artifacts.
//!
//! # Usage
//!
//! ```text
//! brookd start                                  # serve the local store
//! brookd start -c brook.toml                    # serve with a config file
//! brookd publish ./release.tar.gz               # chunk + manifest + store
//! brookd fetch <id> -o out.bin --peer <endpoint_id>
//! brookd status                                 # local store statistics
//! brookd id                                     # print this node's endpoint id
//! ```

mod config;
mod handler;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use brook_exchange::Exchange;
use brook_net::{BrookTransport, RemoteProvider, StaticDirectory, mesh_alpn};
use brook_store::{ChunkStore, FileStore, MemoryStore};
use brook_types::ContentId;
use clap::{Parser, Subcommand};
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, SecretKey};
use tracing::{info, warn};

use config::CliConfig;
use handler::BrookProtocol;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "brookd",
    version,
    about = "Content-addressed artifact storage and peer-to-peer exchange daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and serve the local store to peers.
    Start {
        /// Override data directory (useful for running multiple instances).
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Mesh secret for authentication (nodes must share the same secret).
        ///
        /// Can also be set via BROOK_SECRET env var or `[mesh] secret` in
        /// the config file. If none is provided, a random secret is
        /// generated and displayed.
        #[arg(long, env = "BROOK_SECRET")]
        secret: Option<String>,

        /// Run fully in-memory (no disk persistence).
        #[arg(short, long)]
        memory: bool,
    },

    /// Publish a file: chunk it, build its manifest, store both locally.
    Publish {
        /// The file to publish.
        file: PathBuf,

        /// Object name recorded in the manifest (defaults to the file name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Fetch an object by its manifest identifier.
    Fetch {
        /// The manifest identifier to fetch.
        id: String,

        /// Write the object to this path (defaults to stdout byte count only).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Provider endpoint(s) to fetch from.
        ///
        /// Format: `<endpoint_id>` or `<endpoint_id>@<host:port>`.
        /// Can be specified multiple times.
        #[arg(short, long)]
        peer: Vec<String>,

        /// Mesh secret shared with the providers.
        #[arg(long, env = "BROOK_SECRET")]
        secret: Option<String>,
    },

    /// Show local store statistics.
    Status,

    /// Print this node's endpoint id.
    Id,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            secret,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(s) = secret {
                config.mesh.secret = s;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Publish { file, name } => cmd_publish(&config, &file, name).await,
        Commands::Fetch {
            id,
            output,
            peer,
            secret,
        } => {
            if let Some(s) = secret {
                config.mesh.secret = s;
            }
            if !peer.is_empty() {
                config.mesh.peers = peer;
            }
            cmd_fetch(&config, &id, output.as_deref()).await
        }
        Commands::Status => cmd_status(&config).await,
        Commands::Id => cmd_id(&config),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the configured store backend.
fn open_store(config: &CliConfig) -> Result<Arc<dyn ChunkStore>> {
    match config.storage.backend.as_str() {
        "memory" => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => {
            let store_path = config.node.data_dir.join("store");
            info!(path = %store_path.display(), "using file store");
            Ok(Arc::new(
                FileStore::new(&store_path).context("failed to open file store")?,
            ))
        }
    }
}

/// Resolve the mesh secret, generating and reporting one if unset.
fn resolve_secret(config: &mut CliConfig) -> bool {
    let generated = config.mesh.secret.is_empty();
    if generated {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        config.mesh.secret = bytes.iter().map(|b| format!("{b:02x}")).collect();
    }
    generated
}

// -----------------------------------------------------------------------
// brookd start
// -----------------------------------------------------------------------

async fn cmd_start(mut config: CliConfig) -> Result<()> {
    info!("starting brookd");
    info!(
        data_dir = %config.node.data_dir.display(),
        backend = %config.storage.backend,
        chunk_size = config.chunk_size(),
        "node configuration"
    );

    let memory_mode = config.storage.backend == "memory";
    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    // --- Node identity ---
    let secret_key = if memory_mode {
        let key = random_secret_key();
        info!("generated ephemeral node key (memory mode)");
        key
    } else {
        load_or_create_secret_key(&config.node.data_dir)?
    };

    // --- Mesh secret ---
    let generated_secret = resolve_secret(&mut config);
    let alpn = mesh_alpn(config.mesh.secret.as_bytes());

    // --- Store ---
    let store = open_store(&config)?;

    // --- Endpoint + incoming connection handler ---
    let endpoint = Endpoint::builder(iroh::endpoint::presets::N0)
        .secret_key(secret_key)
        .alpns(vec![alpn.clone()])
        .relay_mode(iroh::RelayMode::Default)
        .bind()
        .await
        .context("failed to bind iroh endpoint")?;

    info!(endpoint_id = %endpoint.id().fmt_short(), "iroh endpoint ready");
    for addr in endpoint.addr().ip_addrs() {
        info!(%addr, "listening on");
    }

    let protocol = BrookProtocol::new(store);
    let router = Router::builder(endpoint.clone())
        .accept(alpn, protocol)
        .spawn();

    if generated_secret {
        info!("mesh secret (generated): {}", config.mesh.secret);
    }
    info!(
        "to fetch from this node: brookd fetch <id> --secret {} --peer {}",
        config.mesh.secret,
        endpoint.id()
    );

    // Serve until interrupted.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down iroh router");
    router.shutdown().await.context("router shutdown failed")?;

    Ok(())
}

// -----------------------------------------------------------------------
// brookd publish
// -----------------------------------------------------------------------

async fn cmd_publish(config: &CliConfig, file: &Path, name: Option<String>) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let name = name.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    std::fs::create_dir_all(&config.node.data_dir).context("failed to create data directory")?;
    let store = open_store(config)?;
    let exchange = Exchange::new(
        config.exchange_config()?,
        store,
        Arc::new(StaticDirectory::new()),
    );

    let manifest = exchange.publish(&name, &data).await?;

    println!("published {}", name);
    println!("  identifier: {}", manifest.identifier);
    println!("  size:       {} bytes", manifest.total_size);
    println!(
        "  chunks:     {} x {} bytes",
        manifest.chunk_count, manifest.chunk_size
    );
    println!("  root:       {}", hex_of(&manifest.root_hash));

    Ok(())
}

// -----------------------------------------------------------------------
// brookd fetch
// -----------------------------------------------------------------------

async fn cmd_fetch(config: &CliConfig, id: &str, output: Option<&Path>) -> Result<()> {
    let target: ContentId = id.parse().context("invalid content identifier")?;

    anyhow::ensure!(
        !config.mesh.peers.is_empty(),
        "no providers: pass at least one --peer"
    );
    anyhow::ensure!(
        !config.mesh.secret.is_empty(),
        "no mesh secret: pass --secret or set BROOK_SECRET"
    );

    std::fs::create_dir_all(&config.node.data_dir).context("failed to create data directory")?;
    let store = open_store(config)?;

    // Ephemeral endpoint identity for the fetch.
    let transport = Arc::new(
        BrookTransport::bind_with_alpn(
            random_secret_key(),
            iroh::RelayMode::Default,
            mesh_alpn(config.mesh.secret.as_bytes()),
        )
        .await
        .context("failed to bind iroh endpoint")?,
    );

    let directory = Arc::new(StaticDirectory::new());
    for peer in &config.mesh.peers {
        let addr = parse_peer(peer).with_context(|| format!("invalid peer {peer:?}"))?;
        directory
            .add_global(Arc::new(RemoteProvider::new(transport.clone(), addr)))
            .await;
    }

    let exchange = Exchange::new(config.exchange_config()?, store, directory);
    let result = exchange.fetch(target).await?;

    if let Some(path) = output {
        tokio::fs::write(path, &result.data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {} bytes to {}", result.data.len(), path.display());
    } else {
        println!("fetched {} bytes (no --output given)", result.data.len());
    }
    println!("  name:        {}", result.manifest.name);
    println!(
        "  chunks:      {} ({} transferred, {} already local)",
        result.report.chunk_count, result.report.transferred, result.report.already_present
    );
    if result.report.rejected_blocks > 0 || result.report.timeouts > 0 {
        println!(
            "  degraded:    {} rejected blocks, {} timeouts",
            result.report.rejected_blocks, result.report.timeouts
        );
    }

    transport.close().await;
    Ok(())
}

// -----------------------------------------------------------------------
// brookd status
// -----------------------------------------------------------------------

async fn cmd_status(config: &CliConfig) -> Result<()> {
    let store = open_store(config)?;
    let ids = store.list().await.context("failed to list store")?;

    let mut chunks = 0usize;
    let mut manifests = Vec::new();
    for id in &ids {
        match id.codec() {
            brook_types::Codec::Raw => chunks += 1,
            brook_types::Codec::Manifest => manifests.push(*id),
        }
    }

    println!("Store: {}", config.node.data_dir.join("store").display());
    println!("  chunks:    {chunks}");
    println!("  manifests: {}", manifests.len());

    for id in manifests {
        match store.get(id).await {
            Ok(bytes) => match brook_cas::deserialize_manifest(&bytes) {
                Ok(m) => println!(
                    "  {} {} ({} bytes, {} chunks)",
                    id, m.name, m.total_size, m.chunk_count
                ),
                Err(e) => warn!(%id, %e, "undecodable manifest in store"),
            },
            Err(e) => warn!(%id, %e, "unreadable manifest in store"),
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------
// brookd id
// -----------------------------------------------------------------------

fn cmd_id(config: &CliConfig) -> Result<()> {
    let key = load_or_create_secret_key(&config.node.data_dir)?;
    println!("{}", key.public());
    Ok(())
}

// -----------------------------------------------------------------------
// Networking helpers
// -----------------------------------------------------------------------

/// Parse a peer string.
///
/// Formats:
/// - `<endpoint_id>` — hex-encoded public key (iroh relay used for discovery)
/// - `<endpoint_id>@<host:port>` — with an explicit direct address
fn parse_peer(s: &str) -> Result<EndpointAddr> {
    let (id_str, addr_str) = match s.split_once('@') {
        Some((id, addr)) => (id, Some(addr)),
        None => (s, None),
    };

    let endpoint_id: iroh::EndpointId = id_str
        .parse()
        .context("invalid endpoint ID (expected hex-encoded public key)")?;

    let mut endpoint_addr = EndpointAddr::new(endpoint_id);
    if let Some(addr) = addr_str {
        let socket_addr: SocketAddr = addr
            .parse()
            .context("invalid socket address in peer (expected host:port)")?;
        endpoint_addr = endpoint_addr.with_ip_addr(socket_addr);
    }

    Ok(endpoint_addr)
}

// -----------------------------------------------------------------------
// Key management
// -----------------------------------------------------------------------

fn random_secret_key() -> SecretKey {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    SecretKey::from(bytes)
}

/// Load or create a persistent iroh secret key from `data_dir/node.key`.
///
/// On first run, generates a new random key and writes it to `node.key`.
/// On subsequent runs, reads the existing key, giving the node a stable
/// identity across restarts.
fn load_or_create_secret_key(data_dir: &Path) -> Result<SecretKey> {
    let key_path = data_dir.join("node.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read node.key")?;
        anyhow::ensure!(bytes.len() == 32, "node.key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let key = SecretKey::from_bytes(&arr);
        info!(
            endpoint_id = %key.public().fmt_short(),
            "loaded existing node key"
        );
        Ok(key)
    } else {
        std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
        let key = random_secret_key();
        std::fs::write(&key_path, key.to_bytes()).context("failed to write node.key")?;
        info!(
            path = %key_path.display(),
            endpoint_id = %key.public().fmt_short(),
            "generated new node key"
        );
        Ok(key)
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
