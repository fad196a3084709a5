//! pelotond — the Peloton scheduler daemon.
//!
//! One process owning the scheduling substrate: the framework driver and
//! event router, the offer manager with its TTL reaper, the
//! resource-pool engine, the placement round runner, the job manager's
//! handler pool and launcher, and the reconciler.
//!
//! # Usage
//!
//! ```text
//! pelotond --config /etc/peloton/peloton.toml --master 10.0.0.1:5050
//! pelotond --config peloton.toml --master master:5050 --pools pools.toml
//! ```

mod handler;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing::{error, info, warn};

use peloton_core::{Backoff, Config};
use peloton_state::{ResourcePoolConfig, StateStore};

/// Normal shutdown.
const EXIT_OK: u8 = 0;
/// Configuration is unusable.
const EXIT_CONFIG: u8 = 64;
/// Master unreachable beyond the retry budget, or the master rejected us.
const EXIT_MASTER_UNREACHABLE: u8 = 69;
/// Internal invariant violation.
const EXIT_INTERNAL: u8 = 70;
/// Persistent store unavailable.
const EXIT_STORE_UNAVAILABLE: u8 = 75;

#[derive(Parser)]
#[command(name = "pelotond", about = "Peloton scheduler daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Mesos master endpoint (host:port).
    #[arg(long)]
    master: String,

    /// Resource-pool bootstrap file, applied when the store has no pools.
    #[arg(long)]
    pools: Option<PathBuf>,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Pool bootstrap file: `[[pools]]` entries.
#[derive(Debug, Deserialize)]
struct PoolsFile {
    pools: Vec<ResourcePoolConfig>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pelotond=debug,peloton=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = ?cli.config, error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let store = match open_store(&config).await {
        Some(store) => store,
        None => return ExitCode::from(EXIT_STORE_UNAVAILABLE),
    };

    let pools = match load_pools(&store, cli.pools.as_deref()) {
        Ok(pools) => pools,
        Err(code) => return ExitCode::from(code),
    };
    if pools.is_empty() {
        error!("no resource pools defined; provide --pools on first start");
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(master = %cli.master, pools = pools.len(), "pelotond starting");
    let code = supervisor::run(config, store, pools, cli.master).await;
    info!(code, "pelotond stopped");
    ExitCode::from(code)
}

/// Open the store with a bounded retry; the daemon refuses to schedule
/// anything until persistence is available.
async fn open_store(config: &Config) -> Option<StateStore> {
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        error!(dir = ?config.storage.data_dir, error = %e, "cannot create data directory");
        return None;
    }
    let db_path = config.storage.data_dir.join("peloton.redb");

    let mut backoff = Backoff::new(
        Duration::from_millis(500),
        Duration::from_secs(10),
        config.storage.open_retry_budget,
    );
    loop {
        match StateStore::open(&db_path) {
            Ok(store) => {
                info!(path = ?db_path, "state store opened");
                return Some(store);
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(error = %e, ?delay, "state store unavailable, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(error = %e, "state store unavailable beyond retry budget");
                    return None;
                }
            },
        }
    }
}

/// Pools come from the store; a bootstrap file seeds them on first start.
fn load_pools(store: &StateStore, bootstrap: Option<&std::path::Path>) -> Result<Vec<ResourcePoolConfig>, u8> {
    let existing = store.list_pools().map_err(|e| {
        error!(error = %e, "failed to read pools from store");
        EXIT_STORE_UNAVAILABLE
    })?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let Some(path) = bootstrap else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path).map_err(|e| {
        error!(path = ?path, error = %e, "cannot read pools file");
        EXIT_CONFIG
    })?;
    let file: PoolsFile = toml::from_str(&content).map_err(|e| {
        error!(path = ?path, error = %e, "cannot parse pools file");
        EXIT_CONFIG
    })?;

    for pool in &file.pools {
        store.put_pool(pool).map_err(|e| {
            error!(error = %e, "failed to persist bootstrap pool");
            EXIT_STORE_UNAVAILABLE
        })?;
    }
    info!(pools = file.pools.len(), "bootstrap pools persisted");
    Ok(file.pools)
}
