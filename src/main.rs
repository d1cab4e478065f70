//! Licensegate HTTP server
//!
//! Serves the register-machine, check-machine and validate-license
//! endpoints over JSON.
//!
//! Usage:
//!   licensegate --bind 0.0.0.0:8080 --seed seed.json --persist
//!
//! Most flags fall back to a `LICENSEGATE_*` environment variable.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use licensegate::config::{
    default_snapshot_path, RateLimitConfig, ENV_BIND, ENV_CREDENTIAL, ENV_EXPOSE_INTERNAL_ERRORS,
    ENV_MODE, ENV_RATE_LIMIT, ENV_RATE_WINDOW_SECS, ENV_SEED, ENV_SNAPSHOT, ENV_TRUSTED_PROXIES,
};
use licensegate::store::file::SnapshotFile;
use licensegate::store::format::Snapshot;
use licensegate::store::RandomIdGenerator;
use licensegate::{
    Clock, CredentialKind, DeploymentMode, LicensegateConfig, MemoryStore, SystemClock,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "licensegate")]
#[command(about = "License issuance backend: machine binding and license validation")]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = ENV_BIND, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Client resolution and conflict policy
    #[arg(long, env = ENV_MODE, value_enum, default_value_t = DeploymentMode::default())]
    mode: DeploymentMode,

    /// Credential field callers present
    #[arg(long, env = ENV_CREDENTIAL, value_enum, default_value_t = CredentialKind::default())]
    credential: CredentialKind,

    /// Snapshot file to persist the store to
    #[arg(long, env = ENV_SNAPSHOT)]
    snapshot: Option<PathBuf>,

    /// Persist to the default data directory when no snapshot path is given
    #[arg(long)]
    persist: bool,

    /// Seed file loaded when the store starts empty
    #[arg(long, env = ENV_SEED)]
    seed: Option<PathBuf>,

    /// Requests allowed per caller per window
    #[arg(long, env = ENV_RATE_LIMIT, default_value = "60")]
    rate_limit: u64,

    /// Throttle window in seconds
    #[arg(long, env = ENV_RATE_WINDOW_SECS, default_value = "60")]
    rate_window_secs: u64,

    /// Proxy address whose X-Forwarded-For header is trusted (repeatable)
    #[arg(long = "trusted-proxy", env = ENV_TRUSTED_PROXIES, value_delimiter = ',')]
    trusted_proxies: Vec<IpAddr>,

    /// Include internal error detail in 500 responses (development only)
    #[arg(long, env = ENV_EXPOSE_INTERNAL_ERRORS)]
    expose_internal_errors: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<LicensegateConfig> {
        let snapshot_path = match (&self.snapshot, self.persist) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(default_snapshot_path()?),
            (None, false) => None,
        };

        let config = LicensegateConfig {
            bind_addr: self.bind,
            mode: self.mode,
            credential: self.credential,
            snapshot_path,
            rate_limit: RateLimitConfig {
                max_requests: self.rate_limit,
                window: Duration::from_secs(self.rate_window_secs),
                trusted_proxies: self.trusted_proxies.clone(),
            },
            expose_internal_errors: self.expose_internal_errors,
        };
        config.validate()?;
        Ok(config)
    }
}

fn load_seed(path: &PathBuf) -> Result<Snapshot> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let snapshot = Snapshot::from_json(&json)
        .with_context(|| format!("invalid seed file {}", path.display()))?;
    Ok(snapshot)
}

fn open_store(config: &LicensegateConfig, seed: Option<Snapshot>, clock: Arc<dyn Clock>) -> Result<MemoryStore> {
    let ids = Arc::new(RandomIdGenerator::default());
    let store = match (&config.snapshot_path, seed) {
        (Some(path), seed) => MemoryStore::open(SnapshotFile::new(path), seed, clock, ids)?,
        (None, Some(seed)) => MemoryStore::from_snapshot(seed, clock, ids)?,
        (None, None) => MemoryStore::with_seams(clock, ids),
    };
    Ok(store)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = args.config()?;
    let seed = args.seed.as_ref().map(load_seed).transpose()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(open_store(&config, seed, Arc::clone(&clock))?);
    let snapshot = store.snapshot();
    info!(
        mode = %config.mode,
        credential = config.credential.field_name(),
        licenses = snapshot.licenses.len(),
        machines = snapshot.machines.len(),
        persisted = config.snapshot_path.is_some(),
        trusted_proxies = config.rate_limit.trusted_proxies.len(),
        "store ready"
    );

    let app = licensegate::http::app(store, &config, clock)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;

    Ok(())
}
