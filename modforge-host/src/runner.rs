//! The host loop: discovery, batch load, ticking and shutdown.
//!
//! A [`Host`] wires the configuration into a [`ModManager`], loads every
//! discovered mod in one batch, then drives the three tick callbacks at the
//! configured rate until Ctrl+C or the configured frame limit.
//!
//! # Example
//!
//! ```no_run
//! use modforge_host::config::Config;
//! use modforge_host::runner::Host;
//! use modforge_loader::NativeCodeHost;
//! use modforge_runtime::{Blacklist, PermissionRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut host = Host::new(
//!     Config::default(),
//!     PermissionRegistry::global(),
//!     Blacklist::global(),
//!     Arc::new(NativeCodeHost::new()),
//! )?;
//! host.start().await?;
//! host.run().await?;
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{BlacklistAdditions, Config};
use anyhow::{Context, Result};
use modforge_loader::{BatchReport, CodeHost, ModManager, ModOutcome};
use modforge_runtime::{
    Blacklist, DirectoryProvider, MetadataProvider, ModUnit, PermissionRegistry,
    SecurityValidator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Register the built-in permission catalog followed by the configured
/// extras.
pub fn install_permissions(registry: &PermissionRegistry, config: &Config) -> Result<()> {
    registry
        .register_defaults()
        .context("Failed to register built-in permissions")?;

    for permission in &config.permissions {
        let id = permission.id.clone();
        registry
            .register(permission.clone())
            .with_context(|| format!("Failed to register permission '{}'", id))?;
        debug!("Registered permission '{}'", id);
    }

    info!("Permission registry holds {} permission(s)", registry.len());
    Ok(())
}

/// Add configured patterns to the blacklist. Returns how many were new.
pub fn install_blacklist(blacklist: &Blacklist, additions: &BlacklistAdditions) -> Result<usize> {
    let mut added = 0;
    for (kind, pattern) in additions.entries() {
        if blacklist
            .add(kind, pattern)
            .with_context(|| format!("Invalid {} blacklist pattern '{}'", kind, pattern))?
        {
            added += 1;
        }
    }
    if added > 0 {
        info!("Added {} blacklist pattern(s)", added);
    }
    Ok(added)
}

/// Discover mods from the configured directories, minus disabled ids.
pub fn discover(config: &Config) -> Result<Vec<ModUnit>> {
    let mut provider = DirectoryProvider::new(config.mods.directories.clone());
    if config.mods.include_user_dir {
        provider = provider.with_user_dir();
    }

    let units = provider.provide().context("Mod discovery failed")?;
    let found = units.len();
    let units: Vec<ModUnit> = units
        .into_iter()
        .filter(|unit| {
            let disabled = config.mods.disabled.iter().any(|id| unit.answers_to(id));
            if disabled {
                info!(mod_id = %unit.id(), "Skipping disabled mod");
            }
            !disabled
        })
        .collect();

    info!("Discovered {} mod(s), {} enabled", found, units.len());
    Ok(units)
}

/// A configured host process.
pub struct Host {
    config: Config,
    manager: ModManager,
    frames: u64,
}

impl Host {
    /// Apply the configuration to `registry` and `blacklist` and build the
    /// manager on top of them.
    pub fn new(
        config: Config,
        registry: Arc<PermissionRegistry>,
        blacklist: Arc<Blacklist>,
        code_host: Arc<dyn CodeHost>,
    ) -> Result<Self> {
        config.validate()?;
        install_permissions(&registry, &config)?;
        install_blacklist(&blacklist, &config.security.blacklist)?;

        let manager = ModManager::new(code_host)
            .with_registry(registry)
            .with_validator(SecurityValidator::new(blacklist))
            .with_host_units(config.security.host_units.iter().cloned());

        Ok(Self {
            config,
            manager,
            frames: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &ModManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ModManager {
        &mut self.manager
    }

    /// Frames run so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Discover and load every enabled mod.
    pub async fn start(&mut self) -> Result<BatchReport> {
        let units = discover(&self.config)?;
        let report = self.manager.load_batch(units).await;

        for issue in &report.errors {
            warn!("Resolution error: {}", issue);
        }
        for (mod_id, outcome) in &report.outcomes {
            match outcome {
                ModOutcome::Loaded { warnings } => {
                    for warning in warnings {
                        warn!(mod_id = %mod_id, "{}", warning);
                    }
                }
                other => warn!(mod_id = %mod_id, "Not loaded: {}", other),
            }
        }

        info!(
            "Startup complete: {} mod(s) loaded, load order {:?}",
            self.manager.len(),
            self.manager.load_order()
        );
        Ok(report)
    }

    /// Run one frame. Returns the number of failed callbacks.
    pub fn frame(&mut self, dt: Duration) -> usize {
        let fixed_dt = self.config.host.tick_interval();
        let failures = self.manager.fixed_tick(fixed_dt).len()
            + self.manager.tick(dt).len()
            + self.manager.late_tick(dt).len();

        self.frames += 1;
        if failures > 0 {
            warn!("Frame {} had {} failed callback(s)", self.frames, failures);
        }
        failures
    }

    /// Tick until Ctrl+C or until `run_ticks` frames have run.
    pub async fn run(&mut self) -> Result<u64> {
        let mut ticker = interval(self.config.host.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let limit = self.config.host.run_ticks;
        let started = self.frames;
        let mut last = Instant::now();
        info!(
            "Running at {} Hz{}",
            self.config.host.tick_rate_hz,
            limit.map(|n| format!(" for {} frames", n)).unwrap_or_default()
        );

        loop {
            if limit.is_some_and(|n| self.frames - started >= n) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = now - last;
                    last = now;
                    self.frame(dt);
                }
                result = &mut shutdown => {
                    result.context("Failed to listen for Ctrl+C")?;
                    info!("Received Ctrl+C");
                    break;
                }
            }
        }

        Ok(self.frames - started)
    }

    /// Unload every mod.
    pub async fn shutdown(&mut self) -> BatchReport {
        info!("Shutting down {} mod(s)...", self.manager.len());
        let report = self.manager.unload_all().await;
        for (mod_id, outcome) in &report.outcomes {
            if !outcome.is_success() {
                warn!(mod_id = %mod_id, "Unload {}", outcome);
            }
        }
        report
    }
}
