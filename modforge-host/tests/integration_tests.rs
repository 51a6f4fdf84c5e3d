//! Integration tests for modforge-host.
//!
//! This module verifies:
//! - Discovery from configured directories, with disabled mods skipped
//! - Permission and blacklist configuration applied before loading
//! - The tick loop with a frame limit, and shutdown

use async_trait::async_trait;
use modforge_host::config::Config;
use modforge_host::runner::{discover, install_blacklist, Host};
use modforge_loader::{
    CodeHost, EntryCapability, EntryContext, ModEntry, ModOutcome, NativeCodeHost, TickHandlers,
};
use modforge_runtime::bytecode::{BytecodeMetadata, Function, Instruction, TypeDefinition};
use modforge_runtime::{
    Blacklist, Bytecode, BytecodeLoader, Permission, PermissionRegistry, RiskTier, ViolationKind,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Writes `<dir>/<id>/mod.toml` and `<dir>/<id>/<id>.mfc`.
///
/// The code unit defines `<id>.Main` and calls each of `calls`.
fn create_mod(dir: &Path, id: &str, permissions: &[&str], calls: &[&str]) -> PathBuf {
    let mod_dir = dir.join(id);
    std::fs::create_dir_all(&mod_dir).unwrap();

    let type_name = format!("{}.Main", id);
    let bytecode = Bytecode {
        version: 1,
        metadata: BytecodeMetadata {
            unit_name: id.to_string(),
            unit_version: "1.0.0".to_string(),
            compiled_at: None,
            compiler_version: None,
        },
        references: vec![],
        types: vec![TypeDefinition {
            name: type_name.clone(),
            base: None,
            implements: vec!["main".to_string()],
        }],
        type_refs: vec![],
        constants: vec![],
        functions: vec![Function {
            name: "update".to_string(),
            owner: Some(type_name.clone()),
            params: vec![],
            instructions: calls
                .iter()
                .map(|c| Instruction::Call {
                    name: c.to_string(),
                    arg_count: 0,
                })
                .chain(std::iter::once(Instruction::Return))
                .collect(),
            local_count: 0,
        }],
        entry_point: None,
    };
    std::fs::write(
        mod_dir.join(format!("{}.mfc", id)),
        BytecodeLoader::encode(&bytecode).unwrap(),
    )
    .unwrap();

    let permissions = permissions
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join(", ");
    let manifest = format!(
        r#"[mod]
id = "{id}"
name = "Test Mod {id}"
version = "1.0.0"
permissions = [{permissions}]
code = ["{id}.mfc"]

[entrypoints]
main = ["{type_name}"]
"#
    );
    std::fs::write(mod_dir.join("mod.toml"), manifest).unwrap();
    mod_dir
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.mods.directories = vec![dir.to_path_buf()];
    config.mods.include_user_dir = false;
    config.host.tick_rate_hz = 1000;
    config
}

struct Ticker {
    ticks: Arc<AtomicUsize>,
}

#[async_trait]
impl ModEntry for Ticker {
    fn capabilities(&self) -> Vec<EntryCapability> {
        vec![EntryCapability::Main]
    }

    fn tick_handlers(&self) -> TickHandlers {
        TickHandlers::ALL
    }

    fn update(&self, _dt: Duration) -> anyhow::Result<()> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn code_host(type_names: &[&str], ticks: &Arc<AtomicUsize>) -> Arc<dyn CodeHost> {
    let host = NativeCodeHost::new();
    for type_name in type_names {
        let ticks = Arc::clone(ticks);
        host.register(*type_name, move || {
            Arc::new(Ticker {
                ticks: Arc::clone(&ticks),
            }) as Arc<dyn ModEntry>
        });
    }
    Arc::new(host)
}

fn new_host(config: Config, code_host: Arc<dyn CodeHost>) -> Host {
    Host::new(
        config,
        Arc::new(PermissionRegistry::new()),
        Arc::new(Blacklist::with_defaults()),
        code_host,
    )
    .unwrap()
}

// ============================================================================
// Discovery Tests
// ============================================================================

#[test]
fn test_discover_skips_disabled_mods() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(temp_dir.path(), "alpha", &[], &[]);
    create_mod(temp_dir.path(), "beta", &[], &[]);

    let mut config = test_config(temp_dir.path());
    config.mods.disabled = vec!["beta".to_string()];

    let units = discover(&config).unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.id()).collect();
    assert_eq!(ids, vec!["alpha"]);
}

#[test]
fn test_discover_fails_on_duplicate_id() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    create_mod(first.path(), "shared", &[], &[]);
    create_mod(second.path(), "shared", &[], &[]);

    let mut config = test_config(first.path());
    config.mods.directories.push(second.path().to_path_buf());

    let err = discover(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("duplicate mod id 'shared'"));
}

#[tokio::test]
async fn test_broken_manifest_aborts_startup() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(temp_dir.path(), "good", &[], &[]);
    let broken = temp_dir.path().join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("mod.toml"), "[mod]\nid = \"broken\"\n").unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let mut host = new_host(test_config(temp_dir.path()), code_host(&["good.Main"], &ticks));

    assert!(host.start().await.is_err());
    assert!(host.manager().is_empty());
}

// ============================================================================
// Security Configuration Tests
// ============================================================================

#[tokio::test]
async fn test_blacklist_addition_rejects_mod() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(temp_dir.path(), "spy", &[], &["host.telemetry.Reporter::send"]);
    create_mod(temp_dir.path(), "honest", &[], &[]);

    let mut config = test_config(temp_dir.path());
    config.security.blacklist.namespaces = vec!["host.telemetry".to_string()];

    let ticks = Arc::new(AtomicUsize::new(0));
    let mut host = new_host(config, code_host(&["spy.Main", "honest.Main"], &ticks));
    let report = host.start().await.unwrap();

    assert!(matches!(report.outcome("spy"), Some(ModOutcome::Rejected { .. })));
    assert!(matches!(report.outcome("honest"), Some(ModOutcome::Loaded { .. })));
}

#[tokio::test]
async fn test_configured_permission_allows_mod() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(
        temp_dir.path(),
        "reporter",
        &["telemetry"],
        &["host.telemetry.Reporter::send"],
    );

    let mut config = test_config(temp_dir.path());
    config.security.blacklist.namespaces = vec!["host.telemetry".to_string()];
    config.permissions.push(
        Permission::new("telemetry", RiskTier::Medium)
            .with_parent("network")
            .allow_namespaces(["host.telemetry"]),
    );

    let ticks = Arc::new(AtomicUsize::new(0));
    let mut host = new_host(config, code_host(&["reporter.Main"], &ticks));
    let report = host.start().await.unwrap();

    assert!(report.is_success(), "{:?}", report);
    assert!(host.manager().registry().contains("network"));
    assert!(host.manager().registry().contains("telemetry"));
}

#[test]
fn test_install_blacklist_counts_new_patterns() {
    let blacklist = Blacklist::with_defaults();
    let mut config = Config::default();
    config.security.blacklist.namespaces = vec!["std.process".to_string(), "host.audio".to_string()];

    let added = install_blacklist(&blacklist, &config.security.blacklist).unwrap();
    assert_eq!(added, 1);
    assert!(blacklist
        .snapshot()
        .set(ViolationKind::Namespace)
        .find("host.audio")
        .is_some());
}

// ============================================================================
// Tick Loop Tests
// ============================================================================

#[tokio::test]
async fn test_run_stops_after_frame_limit() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(temp_dir.path(), "clock", &[], &[]);

    let mut config = test_config(temp_dir.path());
    config.host.run_ticks = Some(3);

    let ticks = Arc::new(AtomicUsize::new(0));
    let mut host = new_host(config, code_host(&["clock.Main"], &ticks));
    host.start().await.unwrap();

    let frames = host.run().await.unwrap();

    assert_eq!(frames, 3);
    assert_eq!(host.frames(), 3);
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_shutdown_unloads_everything() {
    let temp_dir = TempDir::new().unwrap();
    create_mod(temp_dir.path(), "alpha", &[], &[]);
    create_mod(temp_dir.path(), "beta", &[], &[]);

    let ticks = Arc::new(AtomicUsize::new(0));
    let mut host = new_host(
        test_config(temp_dir.path()),
        code_host(&["alpha.Main", "beta.Main"], &ticks),
    );
    host.start().await.unwrap();
    assert_eq!(host.manager().len(), 2);

    let report = host.shutdown().await;

    assert!(report.is_success());
    assert!(host.manager().is_empty());
    assert_eq!(host.frame(Duration::from_millis(1)), 0);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = Config::default();
    config.host.tick_rate_hz = 0;

    let result = Host::new(
        config,
        Arc::new(PermissionRegistry::new()),
        Arc::new(Blacklist::with_defaults()),
        Arc::new(NativeCodeHost::new()),
    );
    assert!(result.is_err());
}
