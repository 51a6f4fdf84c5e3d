//! # modforge-host
//!
//! The modforge host process.
//!
//! The host is responsible for:
//! - Installing the permission catalog and blacklist additions
//! - Discovering mods in the configured directories
//! - Resolving, vetting and loading them in one batch
//! - Driving the tick loop
//! - Unloading everything on shutdown
//!
//! ## Configuration
//!
//! The host reads configuration from `$XDG_CONFIG_HOME/modforge/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the host
//! cargo run --bin modforge-host
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin modforge-host
//! ```

use anyhow::Result;
use modforge_host::config::Config;
use modforge_host::runner::Host;
use modforge_loader::NativeCodeHost;
use modforge_runtime::{Blacklist, PermissionRegistry};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so its level applies
    let (config, config_error) = match Config::load_default() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting modforge-host v{}", env!("CARGO_PKG_VERSION"));
    match config_error {
        None => info!("Loaded configuration from default path"),
        Some(e) => info!("Failed to load config, using defaults: {:#}", e),
    }

    let mut host = Host::new(
        config,
        PermissionRegistry::global(),
        Blacklist::global(),
        Arc::new(NativeCodeHost::new()),
    )?;

    host.start().await?;

    info!("Host startup complete");
    info!("Press Ctrl+C to stop");

    let frames = host.run().await?;
    info!("Ran {} frame(s)", frames);

    host.shutdown().await;

    info!("Host stopped");
    Ok(())
}
