//! The per-group lifecycle state machine.
//!
//! ```text
//! None -> Initialized -> PostInitialized -> PreDisposed -> Disposed
//! ```
//!
//! Initialization phases run only while the group is enabled, teardown
//! phases only while it is disabled. A call that is not legal in the current
//! state does nothing and reports `advanced: false`. Each phase runs every
//! instance as its own task and waits for all of them; a failing or
//! panicking instance is reported but does not stop the phase.
//!
//! Instances that fail their pre-dispose are remembered as refusals. The
//! next `pre_dispose` re-runs only those, and `dispose` is not legal until
//! none are left.

use crate::entry::{CodeHost, EntryCapability, EntryContext, ModEntry, TickHandlers, TickKind};
use crate::error::LifecycleError;
use crate::events::{EventSink, ModEvent};
use modforge_runtime::{IsolatedLoadContext, TypeLookup};
use semver::Version;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Where a group is in its lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    #[default]
    None,
    Initialized,
    PostInitialized,
    PreDisposed,
    Disposed,
}

/// One instance that failed during a phase or tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFailure {
    pub instance: String,
    pub error: String,
    pub panicked: bool,
}

/// Result of a phase transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Phase of the group after the call.
    pub phase: LifecyclePhase,
    /// Whether the phase callbacks ran.
    pub advanced: bool,
    pub failures: Vec<InstanceFailure>,
}

impl PhaseOutcome {
    fn unchanged(phase: LifecyclePhase) -> Self {
        Self {
            phase,
            advanced: false,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct EntryInstance {
    type_name: String,
    entry: Arc<dyn ModEntry>,
    handlers: TickHandlers,
}

/// One entry group of a loaded mod.
pub struct EntryGroup {
    mod_id: String,
    version: Version,
    name: String,
    capability: EntryCapability,
    declared: Vec<String>,
    instances: Vec<EntryInstance>,
    instantiated: bool,
    phase: LifecyclePhase,
    enabled: bool,
    /// Instances whose last pre-dispose failed.
    refused: Vec<String>,
    sink: Arc<dyn EventSink>,
}

impl EntryGroup {
    pub fn new(
        mod_id: impl Into<String>,
        version: Version,
        name: impl Into<String>,
        declared: Vec<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let name = name.into();
        Self {
            mod_id: mod_id.into(),
            version,
            capability: EntryCapability::from_group(&name),
            name,
            declared,
            instances: Vec::new(),
            instantiated: false,
            phase: LifecyclePhase::None,
            enabled: false,
            refused: Vec::new(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &EntryCapability {
        &self.capability
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether teardown has started. A retired group never runs again.
    pub fn is_retired(&self) -> bool {
        self.phase >= LifecyclePhase::PreDisposed
    }

    /// Instances that failed their last pre-dispose.
    pub fn refusals(&self) -> &[String] {
        &self.refused
    }

    /// Names of the instances that were created.
    pub fn instance_names(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.type_name.as_str()).collect()
    }

    /// Enable the group, creating its instances on first use.
    ///
    /// Returns a warning for every declared type that was skipped.
    pub fn enable(&mut self, context: &IsolatedLoadContext, host: &dyn CodeHost) -> Vec<String> {
        self.enabled = true;
        if self.instantiated {
            return Vec::new();
        }
        self.instantiated = true;

        let mut warnings = Vec::new();
        for type_name in &self.declared {
            match self.instantiate(type_name, context, host) {
                Ok(instance) => self.instances.push(instance),
                Err(reason) => {
                    warn!(
                        mod_id = %self.mod_id,
                        group = %self.name,
                        "Skipping entry {}: {}",
                        type_name,
                        reason
                    );
                    warnings.push(format!("{}/{}: {}", self.name, type_name, reason));
                }
            }
        }

        debug!(
            mod_id = %self.mod_id,
            group = %self.name,
            "Created {} of {} entries",
            self.instances.len(),
            self.declared.len()
        );
        warnings
    }

    fn instantiate(
        &self,
        type_name: &str,
        context: &IsolatedLoadContext,
        host: &dyn CodeHost,
    ) -> Result<EntryInstance, String> {
        let handle = match context.find_type(type_name, self.capability.tag()) {
            TypeLookup::Found(handle) => handle,
            TypeLookup::NotFound => return Err("type not found".to_string()),
            TypeLookup::MissingCapability { available } => {
                return Err(format!(
                    "does not implement '{}' (implements {:?})",
                    self.capability, available
                ))
            }
        };
        context.check_handle(&handle).map_err(|e| e.to_string())?;

        let entry = host.instantiate(&handle).map_err(|e| e.to_string())?;
        if !entry.capabilities().contains(&self.capability) {
            return Err(format!("instance does not answer to '{}'", self.capability));
        }

        Ok(EntryInstance {
            type_name: type_name.to_string(),
            handlers: entry.tick_handlers(),
            entry,
        })
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub async fn initialize(&mut self) -> Result<PhaseOutcome, LifecycleError> {
        let legal = self.enabled && self.phase == LifecyclePhase::None;
        self.advance(LifecyclePhase::Initialized, legal).await
    }

    pub async fn post_initialize(&mut self) -> Result<PhaseOutcome, LifecycleError> {
        let legal = self.enabled && self.phase == LifecyclePhase::Initialized;
        self.advance(LifecyclePhase::PostInitialized, legal).await
    }

    /// Legal from `PostInitialized`. Once pre-disposed, calling again
    /// re-runs only the instances that refused last time.
    pub async fn pre_dispose(&mut self) -> Result<PhaseOutcome, LifecycleError> {
        if !self.enabled && self.phase == LifecyclePhase::PreDisposed && !self.refused.is_empty() {
            let refused = self.refused.clone();
            let failures = self
                .run_phase(LifecyclePhase::PreDisposed, |name| {
                    refused.iter().any(|r| r == name)
                })
                .await?;
            self.refused = failures.iter().map(|f| f.instance.clone()).collect();
            return Ok(PhaseOutcome {
                phase: self.phase,
                advanced: true,
                failures,
            });
        }

        let legal = !self.enabled && self.phase == LifecyclePhase::PostInitialized;
        let outcome = self.advance(LifecyclePhase::PreDisposed, legal).await?;
        if outcome.advanced {
            self.refused = outcome.failures.iter().map(|f| f.instance.clone()).collect();
        }
        Ok(outcome)
    }

    pub async fn dispose(&mut self) -> Result<PhaseOutcome, LifecycleError> {
        let legal =
            !self.enabled && self.phase == LifecyclePhase::PreDisposed && self.refused.is_empty();
        self.advance(LifecyclePhase::Disposed, legal).await
    }

    /// Disable the group and run every teardown phase still pending,
    /// overriding refusals.
    ///
    /// Unlike [`pre_dispose`](Self::pre_dispose) this also accepts a group
    /// left at `Initialized`, so a faulted load or a forced unload can
    /// always finish. Returns the outcomes of the phases that ran.
    pub(crate) async fn teardown(&mut self) -> Result<Vec<PhaseOutcome>, LifecycleError> {
        self.enabled = false;
        let mut outcomes = Vec::new();

        let started = matches!(
            self.phase,
            LifecyclePhase::Initialized | LifecyclePhase::PostInitialized
        );
        if started {
            outcomes.push(self.advance(LifecyclePhase::PreDisposed, true).await?);
        }
        if !self.refused.is_empty() {
            debug!(
                mod_id = %self.mod_id,
                group = %self.name,
                "Overriding refusals: {:?}",
                self.refused
            );
            self.refused.clear();
        }
        if self.phase == LifecyclePhase::PreDisposed {
            outcomes.push(self.advance(LifecyclePhase::Disposed, true).await?);
        }
        Ok(outcomes)
    }

    async fn advance(
        &mut self,
        target: LifecyclePhase,
        legal: bool,
    ) -> Result<PhaseOutcome, LifecycleError> {
        if !legal {
            debug!(
                mod_id = %self.mod_id,
                group = %self.name,
                phase = ?self.phase,
                enabled = self.enabled,
                "Ignoring transition to {:?}",
                target
            );
            return Ok(PhaseOutcome::unchanged(self.phase));
        }

        let failures = self.run_phase(target, |_| true).await?;
        self.phase = target;
        Ok(PhaseOutcome {
            phase: target,
            advanced: true,
            failures,
        })
    }

    /// Run `target`'s callback on every selected instance, one task each.
    async fn run_phase(
        &self,
        target: LifecyclePhase,
        selected: impl Fn(&str) -> bool,
    ) -> Result<Vec<InstanceFailure>, LifecycleError> {
        let mut tasks = Vec::with_capacity(self.instances.len());
        for instance in self.instances.iter().filter(|i| selected(i.type_name.as_str())) {
            self.sink.emit(ModEvent::PhaseStarted {
                mod_id: self.mod_id.clone(),
                group: self.name.clone(),
                phase: target,
                instance: instance.type_name.clone(),
            });

            let entry = Arc::clone(&instance.entry);
            let ctx = EntryContext {
                mod_id: self.mod_id.clone(),
                version: self.version.clone(),
                group: self.name.clone(),
                type_name: instance.type_name.clone(),
            };
            let task = tokio::spawn(async move {
                match target {
                    LifecyclePhase::Initialized => entry.initialize(&ctx).await,
                    LifecyclePhase::PostInitialized => entry.post_initialize(&ctx).await,
                    LifecyclePhase::PreDisposed => entry.pre_dispose(&ctx).await,
                    LifecyclePhase::Disposed => entry.dispose(&ctx).await,
                    LifecyclePhase::None => Ok(()),
                }
            });
            tasks.push((instance.type_name.clone(), task));
        }

        let mut failures = Vec::new();
        for (instance, task) in tasks {
            let failure = match task.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(InstanceFailure {
                    instance: instance.clone(),
                    error: format!("{:#}", e),
                    panicked: false,
                }),
                Err(join_error) if join_error.is_panic() => Some(InstanceFailure {
                    instance: instance.clone(),
                    error: panic_message(join_error.into_panic()),
                    panicked: true,
                }),
                Err(_) => {
                    return Err(LifecycleError::Substrate {
                        mod_id: self.mod_id.clone(),
                        group: self.name.clone(),
                        instance,
                        phase: target,
                    })
                }
            };

            match failure {
                None => self.sink.emit(ModEvent::PhaseSucceeded {
                    mod_id: self.mod_id.clone(),
                    group: self.name.clone(),
                    phase: target,
                    instance,
                }),
                Some(failure) => {
                    error!(
                        mod_id = %self.mod_id,
                        version = %self.version,
                        phase = ?target,
                        instance = %failure.instance,
                        "Lifecycle callback failed: {}",
                        failure.error
                    );
                    self.sink.emit(ModEvent::PhaseFailed {
                        mod_id: self.mod_id.clone(),
                        group: self.name.clone(),
                        phase: target,
                        instance,
                        error: failure.error.clone(),
                    });
                    failures.push(failure);
                }
            }
        }
        Ok(failures)
    }

    /// Run one tick callback on every instance that declared it.
    ///
    /// Only runs while enabled and post-initialized.
    pub fn tick(&self, kind: TickKind, dt: Duration) -> Vec<InstanceFailure> {
        if !self.enabled || self.phase != LifecyclePhase::PostInitialized {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for instance in self.instances.iter().filter(|i| i.handlers.handles(kind)) {
            let entry = &instance.entry;
            let result = catch_unwind(AssertUnwindSafe(|| match kind {
                TickKind::Update => entry.update(dt),
                TickKind::FixedUpdate => entry.fixed_update(dt),
                TickKind::LateUpdate => entry.late_update(dt),
            }));

            let failure = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => InstanceFailure {
                    instance: instance.type_name.clone(),
                    error: format!("{:#}", e),
                    panicked: false,
                },
                Err(payload) => InstanceFailure {
                    instance: instance.type_name.clone(),
                    error: panic_message(payload),
                    panicked: true,
                },
            };
            error!(
                mod_id = %self.mod_id,
                version = %self.version,
                tick = ?kind,
                instance = %failure.instance,
                "Tick failed: {}",
                failure.error
            );
            failures.push(failure);
        }
        failures
    }
}

impl std::fmt::Debug for EntryGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryGroup")
            .field("mod_id", &self.mod_id)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("enabled", &self.enabled)
            .field("instances", &self.instance_names())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NativeCodeHost;
    use crate::events::NullSink;
    use async_trait::async_trait;
    use modforge_runtime::bytecode::{BytecodeMetadata, TypeDefinition};
    use modforge_runtime::{
        Blacklist, Bytecode, BytecodeLoader, PermissionContext, PermissionRegistry,
        SecurityValidator,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counter {
        initialized: AtomicUsize,
        pre_disposed: AtomicUsize,
        disposed: AtomicUsize,
        ticks: AtomicUsize,
        refusing: AtomicBool,
    }

    struct Probe {
        counter: Arc<Counter>,
        fail_init: bool,
        panic_tick: bool,
        refuse: bool,
    }

    #[async_trait]
    impl ModEntry for Probe {
        fn capabilities(&self) -> Vec<EntryCapability> {
            vec![EntryCapability::Main]
        }

        async fn initialize(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("init refused");
            }
            self.counter.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn pre_dispose(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
            self.counter.pre_disposed.fetch_add(1, Ordering::SeqCst);
            if self.refuse && self.counter.refusing.load(Ordering::SeqCst) {
                anyhow::bail!("still busy");
            }
            Ok(())
        }

        async fn dispose(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
            self.counter.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn tick_handlers(&self) -> TickHandlers {
            TickHandlers {
                update: true,
                ..TickHandlers::NONE
            }
        }

        fn update(&self, _dt: Duration) -> anyhow::Result<()> {
            if self.panic_tick {
                panic!("tick exploded");
            }
            self.counter.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        context: IsolatedLoadContext,
        host: NativeCodeHost,
        counter: Arc<Counter>,
    }

    /// A context with types `t.A`, `t.B`, `t.C` (main) and `t.Hud` (client).
    ///
    /// `t.B` fails init and panics on tick. `t.C` refuses pre-dispose while
    /// `refusing` is set.
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let types = [("t.A", "main"), ("t.B", "main"), ("t.C", "main"), ("t.Hud", "client")]
            .iter()
            .map(|(name, tag)| TypeDefinition {
                name: name.to_string(),
                base: None,
                implements: vec![tag.to_string()],
            })
            .collect();
        let bc = Bytecode {
            version: 1,
            metadata: BytecodeMetadata {
                unit_name: "t".to_string(),
                unit_version: "1.0.0".to_string(),
                compiled_at: None,
                compiler_version: None,
            },
            references: vec![],
            types,
            type_refs: vec![],
            constants: vec![],
            functions: vec![],
            entry_point: None,
        };
        let path = dir.path().join("t.mfc");
        std::fs::write(&path, BytecodeLoader::encode(&bc).unwrap()).unwrap();

        let registry = Arc::new(PermissionRegistry::new());
        let mut context = IsolatedLoadContext::new(
            "m",
            Some(dir.path().to_path_buf()),
            PermissionContext::new("m", Vec::<String>::new(), registry),
            SecurityValidator::new(Arc::new(Blacklist::with_defaults())),
        );
        context.load_unit(&path).unwrap();

        let counter = Arc::new(Counter::default());
        let host = NativeCodeHost::new();
        for (name, fail_init, panic_tick, refuse) in [
            ("t.A", false, false, false),
            ("t.B", true, true, false),
            ("t.C", false, false, true),
            ("t.Hud", false, false, false),
        ] {
            let counter = Arc::clone(&counter);
            host.register(name, move || {
                Arc::new(Probe {
                    counter: Arc::clone(&counter),
                    fail_init,
                    panic_tick,
                    refuse,
                }) as Arc<dyn ModEntry>
            });
        }

        Fixture {
            _dir: dir,
            context,
            host,
            counter,
        }
    }

    fn group(types: &[&str]) -> EntryGroup {
        EntryGroup::new(
            "m",
            Version::new(1, 0, 0),
            "main",
            types.iter().map(|s| s.to_string()).collect(),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_post_initialize_before_initialize_is_noop() {
        let fx = fixture();
        let mut group = group(&["t.A"]);
        group.enable(&fx.context, &fx.host);

        let outcome = group.post_initialize().await.unwrap();
        assert!(!outcome.advanced);
        assert_eq!(group.phase(), LifecyclePhase::None);
    }

    #[tokio::test]
    async fn test_dispose_while_enabled_is_noop() {
        let fx = fixture();
        let mut group = group(&["t.A"]);
        group.enable(&fx.context, &fx.host);
        group.initialize().await.unwrap();
        group.post_initialize().await.unwrap();

        assert!(!group.pre_dispose().await.unwrap().advanced);
        assert!(!group.dispose().await.unwrap().advanced);
        assert_eq!(group.phase(), LifecyclePhase::PostInitialized);
    }

    #[tokio::test]
    async fn test_failing_instance_does_not_block_phase() {
        let fx = fixture();
        let mut group = group(&["t.A", "t.B", "t.C"]);
        assert!(group.enable(&fx.context, &fx.host).is_empty());

        let outcome = group.initialize().await.unwrap();
        assert!(outcome.advanced);
        assert_eq!(outcome.phase, LifecyclePhase::Initialized);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].instance, "t.B");
        assert_eq!(fx.counter.initialized.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let fx = fixture();
        let mut group = group(&["t.A"]);
        group.enable(&fx.context, &fx.host);

        assert!(group.initialize().await.unwrap().advanced);
        assert!(!group.initialize().await.unwrap().advanced);
        assert!(group.post_initialize().await.unwrap().advanced);

        group.disable();
        assert!(group.pre_dispose().await.unwrap().advanced);
        assert!(group.dispose().await.unwrap().advanced);
        assert_eq!(group.phase(), LifecyclePhase::Disposed);
    }

    #[tokio::test]
    async fn test_pre_dispose_requires_post_initialized() {
        let fx = fixture();
        let mut group = group(&["t.A"]);
        group.enable(&fx.context, &fx.host);
        group.initialize().await.unwrap();

        group.disable();
        let outcome = group.pre_dispose().await.unwrap();
        assert!(!outcome.advanced);
        assert_eq!(group.phase(), LifecyclePhase::Initialized);
        assert_eq!(fx.counter.pre_disposed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_from_initialized() {
        let fx = fixture();
        let mut group = group(&["t.A"]);
        group.enable(&fx.context, &fx.host);
        group.initialize().await.unwrap();

        let outcomes = group.teardown().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(!group.is_enabled());
        assert_eq!(group.phase(), LifecyclePhase::Disposed);
        assert_eq!(fx.counter.pre_disposed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.counter.disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_pre_dispose_is_retried() {
        let fx = fixture();
        fx.counter.refusing.store(true, Ordering::SeqCst);
        let mut group = group(&["t.A", "t.C"]);
        group.enable(&fx.context, &fx.host);
        group.initialize().await.unwrap();
        group.post_initialize().await.unwrap();
        group.disable();

        let outcome = group.pre_dispose().await.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(group.phase(), LifecyclePhase::PreDisposed);
        assert_eq!(group.refusals(), ["t.C".to_string()]);

        // Still refusing: only t.C runs again, and dispose stays blocked
        let outcome = group.pre_dispose().await.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(fx.counter.pre_disposed.load(Ordering::SeqCst), 3);
        assert!(!group.dispose().await.unwrap().advanced);

        fx.counter.refusing.store(false, Ordering::SeqCst);
        assert!(group.pre_dispose().await.unwrap().is_clean());
        assert!(group.refusals().is_empty());
        assert_eq!(fx.counter.pre_disposed.load(Ordering::SeqCst), 4);

        // Nothing left to retry
        assert!(!group.pre_dispose().await.unwrap().advanced);
        assert!(group.dispose().await.unwrap().advanced);
        assert_eq!(fx.counter.disposed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ticks_gated_and_isolated() {
        let fx = fixture();
        let mut group = group(&["t.A", "t.B"]);
        group.enable(&fx.context, &fx.host);

        assert!(group.tick(TickKind::Update, Duration::from_millis(16)).is_empty());
        assert_eq!(fx.counter.ticks.load(Ordering::SeqCst), 0);

        group.initialize().await.unwrap();
        group.post_initialize().await.unwrap();

        let failures = group.tick(TickKind::Update, Duration::from_millis(16));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].panicked);
        assert_eq!(fx.counter.ticks.load(Ordering::SeqCst), 1);

        // Only update was declared
        assert!(group.tick(TickKind::LateUpdate, Duration::from_millis(16)).is_empty());
        assert_eq!(fx.counter.ticks.load(Ordering::SeqCst), 1);

        group.disable();
        group.tick(TickKind::Update, Duration::from_millis(16));
        assert_eq!(fx.counter.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_and_mismatched_entries_are_skipped() {
        let fx = fixture();
        let mut group = group(&["t.A", "t.Ghost", "t.Hud"]);

        let warnings = group.enable(&fx.context, &fx.host);
        assert_eq!(warnings.len(), 2);
        assert_eq!(group.instance_names(), vec!["t.A"]);
    }

    #[tokio::test]
    async fn test_enable_instantiates_once() {
        let fx = fixture();
        let mut group = group(&["t.A", "t.Ghost"]);
        assert_eq!(group.enable(&fx.context, &fx.host).len(), 1);
        group.disable();
        assert!(group.enable(&fx.context, &fx.host).is_empty());
        assert_eq!(group.instance_names().len(), 1);
    }
}
