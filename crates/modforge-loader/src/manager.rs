//! The mod manager.
//!
//! [`ModManager`] owns every loaded mod and drives the whole pipeline:
//! resolution, load context creation and security vetting, the two-pass
//! lifecycle start (every mod initialized before any is post-initialized),
//! ticking, and cascading unload.

use crate::entry::{CodeHost, TickKind};
use crate::error::{LoaderError, LoaderResult};
use crate::events::{EventSink, ModEvent, TracingSink};
use crate::lifecycle::{EntryGroup, InstanceFailure, LifecyclePhase};
use crate::resolver::{DependencyResolver, ResolutionIssue, ResolutionResult};
use chrono::{DateTime, Utc};
use modforge_runtime::{
    IsolatedLoadContext, ModManifest, ModUnit, PermissionContext, PermissionRegistry,
    RelationKind, RuntimeError, SecurityValidator, ValidationResult,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A mod that is currently loaded.
pub struct LoadedMod {
    pub unit: ModUnit,
    pub context: IsolatedLoadContext,
    pub groups: Vec<EntryGroup>,
    pub loaded_at: DateTime<Utc>,
    pub enabled: bool,
    /// Loaded with a kernel permission context.
    pub builtin: bool,
}

impl LoadedMod {
    fn new(
        unit: ModUnit,
        context: IsolatedLoadContext,
        sink: &Arc<dyn EventSink>,
        builtin: bool,
    ) -> Self {
        let groups = unit
            .entry_groups
            .iter()
            .map(|(name, types)| {
                EntryGroup::new(
                    unit.id(),
                    unit.version().clone(),
                    name.as_str(),
                    types.clone(),
                    Arc::clone(sink),
                )
            })
            .collect();

        Self {
            unit,
            context,
            groups,
            loaded_at: Utc::now(),
            enabled: false,
            builtin,
        }
    }

    pub fn id(&self) -> &str {
        self.unit.id()
    }

    fn enable(&mut self, host: &dyn CodeHost) -> Vec<String> {
        self.enabled = true;
        let mut warnings = Vec::new();
        for group in self.groups.iter_mut() {
            warnings.extend(group.enable(&self.context, host));
        }
        warnings
    }

    fn disable(&mut self) {
        self.enabled = false;
        for group in self.groups.iter_mut() {
            group.disable();
        }
    }

    fn info(&self) -> ModInfo {
        ModInfo {
            id: self.unit.id().to_string(),
            name: self.unit.name.clone(),
            version: self.unit.version().to_string(),
            enabled: self.enabled,
            builtin: self.builtin,
            loaded_at: self.loaded_at,
            groups: self
                .groups
                .iter()
                .map(|g| (g.name().to_string(), g.phase()))
                .collect(),
            permissions: self.context.permissions().resolved().iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for LoadedMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedMod")
            .field("unit", &self.unit.to_string())
            .field("context", &self.context)
            .field("groups", &self.groups)
            .field("loaded_at", &self.loaded_at)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Summary of a loaded mod.
#[derive(Debug, Clone, Serialize)]
pub struct ModInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub builtin: bool,
    pub loaded_at: DateTime<Utc>,
    pub groups: Vec<(String, LifecyclePhase)>,
    pub permissions: Vec<String>,
}

/// What happened to one mod in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModOutcome {
    Loaded { warnings: Vec<String> },
    /// Security rejection or another load-time error.
    Rejected { reason: String },
    /// A dependency failed to load in the same batch.
    DependencyFailed { dependency: String },
    Unloaded,
    Failed { reason: String },
}

impl ModOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ModOutcome::Loaded { .. } | ModOutcome::Unloaded)
    }
}

impl fmt::Display for ModOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModOutcome::Loaded { warnings } if warnings.is_empty() => write!(f, "loaded"),
            ModOutcome::Loaded { warnings } => {
                write!(f, "loaded with {} warning(s)", warnings.len())
            }
            ModOutcome::Rejected { reason } => write!(f, "rejected: {}", reason),
            ModOutcome::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' failed to load", dependency)
            }
            ModOutcome::Unloaded => write!(f, "unloaded"),
            ModOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Structured result of a batch operation.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Per-mod outcomes in processing order.
    pub outcomes: Vec<(String, ModOutcome)>,
    /// Resolution errors. When present, nothing was loaded.
    pub errors: Vec<ResolutionIssue>,
    pub warnings: Vec<ResolutionIssue>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    pub fn outcome(&self, mod_id: &str) -> Option<&ModOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == mod_id)
            .map(|(_, o)| o)
    }

    /// Ids that loaded successfully.
    pub fn loaded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ModOutcome::Loaded { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    fn merge(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    fn into_single(self, mod_id: &str) -> LoaderResult<()> {
        if !self.errors.is_empty() {
            return Err(LoaderError::Resolution(self.errors));
        }
        match self.outcome(mod_id) {
            Some(ModOutcome::Loaded { .. }) => Ok(()),
            Some(other) => Err(LoaderError::LoadFailed {
                mod_id: mod_id.to_string(),
                reason: other.to_string(),
            }),
            None => Err(LoaderError::LoadFailed {
                mod_id: mod_id.to_string(),
                reason: "not resolved".to_string(),
            }),
        }
    }
}

/// A resolved mod on its way into the manager.
struct Pending {
    unit: ModUnit,
    context: Option<IsolatedLoadContext>,
    failure: Option<ModOutcome>,
}

struct Staged {
    position: usize,
    module: LoadedMod,
    warnings: Vec<String>,
    fault: Option<ModOutcome>,
}

/// Loads, runs and unloads mods.
pub struct ModManager {
    mods: HashMap<String, LoadedMod>,
    /// Load order of `mods`.
    order: Vec<String>,
    registry: Arc<PermissionRegistry>,
    validator: SecurityValidator,
    resolver: DependencyResolver,
    host: Arc<dyn CodeHost>,
    sink: Arc<dyn EventSink>,
    host_units: Vec<String>,
}

impl ModManager {
    /// Create a manager using the process-wide permission registry and
    /// blacklist, logging events through `tracing`.
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self {
            mods: HashMap::new(),
            order: Vec::new(),
            registry: PermissionRegistry::global(),
            validator: SecurityValidator::default(),
            resolver: DependencyResolver::new(),
            host,
            sink: Arc::new(TracingSink),
            host_units: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PermissionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_validator(mut self, validator: SecurityValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Extra unit names resolved by the host in every load context.
    pub fn with_host_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_units.extend(units.into_iter().map(Into::into));
        self
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    fn loaded_units(&self) -> Vec<ModUnit> {
        self.order
            .iter()
            .filter_map(|id| self.mods.get(id))
            .map(|m| m.unit.clone())
            .collect()
    }

    /// Id of the loaded mod answering to `id` or one of its aliases.
    fn loaded_id(&self, id: &str) -> Option<String> {
        if self.mods.contains_key(id) {
            return Some(id.to_string());
        }
        self.order
            .iter()
            .find(|loaded| self.mods.get(*loaded).is_some_and(|m| m.unit.answers_to(id)))
            .cloned()
    }

    /// Resolve candidates against the mods already loaded.
    pub fn resolve(&self, candidates: &[ModUnit]) -> ResolutionResult {
        self.resolver.resolve(candidates, &self.loaded_units())
    }

    /// Statically validate every code unit of a mod without loading it.
    pub fn validate(&self, unit: &ModUnit) -> LoaderResult<Vec<ValidationResult>> {
        let ctx = PermissionContext::new(unit.id(), &unit.permissions, Arc::clone(&self.registry));
        if unit.code_units.is_empty() {
            return Ok(Vec::new());
        }
        let root = unit.root.as_ref().ok_or_else(|| {
            RuntimeError::ModNotFound(format!("{} has no root directory", unit.id()))
        })?;

        let mut results = Vec::with_capacity(unit.code_units.len());
        for code_unit in &unit.code_units {
            results.push(self.validator.validate(&root.join(code_unit), &ctx)?);
        }
        Ok(results)
    }

    /// Load a single mod.
    pub async fn load(&mut self, unit: ModUnit) -> LoaderResult<()> {
        let id = unit.id().to_string();
        self.load_batch(vec![unit]).await.into_single(&id)
    }

    /// Load trusted built-in code with a kernel permission context.
    pub async fn load_builtin(&mut self, unit: ModUnit) -> LoaderResult<()> {
        let id = unit.id().to_string();
        self.load_all(vec![unit], true).await.into_single(&id)
    }

    /// Resolve and load a batch of mods.
    ///
    /// Resolution errors abort the batch before anything is loaded. After
    /// that, a mod that fails to load only takes down the mods depending on
    /// it.
    pub async fn load_batch(&mut self, candidates: Vec<ModUnit>) -> BatchReport {
        self.load_all(candidates, false).await
    }

    async fn load_all(&mut self, candidates: Vec<ModUnit>, builtin: bool) -> BatchReport {
        let resolution = self.resolve(&candidates);
        for warning in &resolution.warnings {
            self.sink.emit(ModEvent::ResolutionWarning {
                message: warning.to_string(),
            });
        }

        if !resolution.is_ok() {
            for issue in &resolution.errors {
                self.sink.emit(ModEvent::ResolutionError {
                    message: issue.to_string(),
                });
            }
            warn!(
                "Batch of {} mods aborted with {} resolution error(s)",
                candidates.len(),
                resolution.errors.len()
            );
            return BatchReport {
                outcomes: Vec::new(),
                errors: resolution.errors,
                warnings: resolution.warnings,
            };
        }

        let mut pending: Vec<Pending> = resolution
            .order
            .into_iter()
            .map(|unit| match self.prepare(&unit, builtin) {
                Ok(context) => Pending {
                    unit,
                    context: Some(context),
                    failure: None,
                },
                Err(e) => {
                    warn!(mod_id = %unit.id(), "Failed to load: {}", e);
                    Pending {
                        unit,
                        context: None,
                        failure: Some(ModOutcome::Rejected {
                            reason: e.to_string(),
                        }),
                    }
                }
            })
            .collect();

        self.propagate_failures(&mut pending);

        let mut outcomes: BTreeMap<usize, (String, ModOutcome)> = BTreeMap::new();
        let mut staged = Vec::new();
        for (position, item) in pending.into_iter().enumerate() {
            let id = item.unit.id().to_string();
            match (item.failure, item.context) {
                (None, Some(context)) => {
                    let mut module = LoadedMod::new(item.unit, context, &self.sink, builtin);
                    let warnings = module.enable(self.host.as_ref());
                    staged.push(Staged {
                        position,
                        module,
                        warnings,
                        fault: None,
                    });
                }
                (failure, _) => {
                    let outcome = failure.unwrap_or(ModOutcome::Failed {
                        reason: "no load context".to_string(),
                    });
                    outcomes.insert(position, (id, outcome));
                }
            }
        }

        // Every mod reaches Initialized before any reaches PostInitialized
        for item in staged.iter_mut() {
            for group in item.module.groups.iter_mut() {
                if let Err(e) = group.initialize().await {
                    warn!(mod_id = %item.module.unit.id(), "Lifecycle fault during load: {}", e);
                    item.fault = Some(ModOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.propagate_faults(&mut staged);
        for item in staged.iter_mut().filter(|s| s.fault.is_none()) {
            for group in item.module.groups.iter_mut() {
                if let Err(e) = group.post_initialize().await {
                    warn!(mod_id = %item.module.unit.id(), "Lifecycle fault during load: {}", e);
                    item.fault = Some(ModOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.propagate_faults(&mut staged);

        for mut item in staged {
            let id = item.module.id().to_string();
            match item.fault {
                Some(outcome) => {
                    teardown(&mut item.module).await;
                    outcomes.insert(item.position, (id, outcome));
                }
                None => {
                    self.sink.emit(ModEvent::ModLoaded {
                        mod_id: id.clone(),
                        version: item.module.unit.version().to_string(),
                    });
                    self.sink.emit(ModEvent::ModEnabled { mod_id: id.clone() });
                    self.order.push(id.clone());
                    self.mods.insert(id.clone(), item.module);
                    outcomes.insert(
                        item.position,
                        (
                            id,
                            ModOutcome::Loaded {
                                warnings: item.warnings,
                            },
                        ),
                    );
                }
            }
        }

        let report = BatchReport {
            outcomes: outcomes.into_values().collect(),
            errors: Vec::new(),
            warnings: resolution.warnings,
        };
        info!(
            "Loaded {} of {} mods",
            report.loaded().len(),
            report.outcomes.len()
        );
        report
    }

    fn prepare(&self, unit: &ModUnit, builtin: bool) -> LoaderResult<IsolatedLoadContext> {
        let registry = Arc::clone(&self.registry);
        let permissions = if builtin {
            PermissionContext::kernel(unit.id(), registry)
        } else {
            PermissionContext::new(unit.id(), &unit.permissions, registry)
        };

        if let Some(risk) = permissions.max_risk() {
            info!(
                mod_id = %unit.id(),
                risk = ?risk,
                "Granted permissions: {:?}",
                permissions.resolved()
            );
        }

        let mut context = IsolatedLoadContext::new(
            unit.id(),
            unit.root.clone(),
            permissions,
            self.validator.clone(),
        )
        .with_host_units(self.host_units.iter().cloned());

        if !unit.code_units.is_empty() {
            context.load_units(&unit.code_units)?;
        }
        debug!(
            mod_id = %unit.id(),
            context = %context.id(),
            units = context.unit_names().len(),
            "Prepared load context"
        );
        Ok(context)
    }

    /// First `depends` target of `unit` that neither a loaded mod nor one
    /// of `available` satisfies.
    fn missing_dependency(&self, unit: &ModUnit, available: &[&ModUnit]) -> Option<String> {
        unit.relations_of(RelationKind::Depends)
            .find(|relation| {
                let loaded = self.mods.values().any(|m| relation.is_satisfied_by(&m.unit));
                let in_batch = available.iter().any(|u| relation.is_satisfied_by(u));
                !loaded && !in_batch
            })
            .map(|relation| relation.target.clone())
    }

    /// Mark mods whose dependencies are no longer available after failures
    /// earlier in the batch, until nothing changes.
    fn propagate_failures(&self, pending: &mut [Pending]) {
        loop {
            let mut changed = false;
            for i in 0..pending.len() {
                if pending[i].failure.is_some() {
                    continue;
                }
                let available: Vec<&ModUnit> = pending
                    .iter()
                    .filter(|p| p.failure.is_none())
                    .map(|p| &p.unit)
                    .collect();
                let Some(dependency) = self.missing_dependency(&pending[i].unit, &available)
                else {
                    continue;
                };

                warn!(
                    mod_id = %pending[i].unit.id(),
                    "Skipping: dependency '{}' failed to load",
                    dependency
                );
                if let Some(context) = pending[i].context.as_mut() {
                    context.unload();
                }
                pending[i].failure = Some(ModOutcome::DependencyFailed { dependency });
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    /// Fault every staged mod whose dependency faulted during the lifecycle
    /// passes, until nothing changes. Faulted mods are torn down later.
    fn propagate_faults(&self, staged: &mut [Staged]) {
        loop {
            let mut changed = false;
            for i in 0..staged.len() {
                if staged[i].fault.is_some() {
                    continue;
                }
                let available: Vec<&ModUnit> = staged
                    .iter()
                    .filter(|s| s.fault.is_none())
                    .map(|s| &s.module.unit)
                    .collect();
                let Some(dependency) = self.missing_dependency(&staged[i].module.unit, &available)
                else {
                    continue;
                };

                warn!(
                    mod_id = %staged[i].module.id(),
                    "Abandoning load: dependency '{}' faulted",
                    dependency
                );
                staged[i].fault = Some(ModOutcome::DependencyFailed { dependency });
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    /// Loaded mods that depend on `root`, directly or transitively, followed
    /// by `root`.
    ///
    /// Every mod comes before the mods it depends on. Among mods with no
    /// such edge between them, later-loaded mods come first.
    fn unload_chain(&self, root: &str) -> Vec<String> {
        let mut members: HashSet<String> = HashSet::new();
        members.insert(root.to_string());

        loop {
            let mut changed = false;
            for id in &self.order {
                if members.contains(id) {
                    continue;
                }
                let Some(candidate) = self.mods.get(id) else {
                    continue;
                };
                let depends_on_member = members
                    .iter()
                    .filter_map(|m| self.mods.get(m))
                    .any(|m| candidate.unit.depends_on(&m.unit));
                if depends_on_member {
                    members.insert(id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut remaining: Vec<&String> = self
            .order
            .iter()
            .rev()
            .filter(|id| id.as_str() != root && members.contains(*id))
            .collect();

        let mut chain = Vec::with_capacity(members.len());
        while !remaining.is_empty() {
            // Next is the first mod no remaining mod depends on. A cycle
            // falls back to reverse load order.
            let next = remaining
                .iter()
                .position(|id| {
                    let Some(module) = self.mods.get(*id) else {
                        return true;
                    };
                    !remaining.iter().any(|other| {
                        other != id
                            && self
                                .mods
                                .get(*other)
                                .is_some_and(|o| o.unit.depends_on(&module.unit))
                    })
                })
                .unwrap_or(0);
            chain.push(remaining.remove(next).clone());
        }
        chain.push(root.to_string());
        chain
    }

    /// Unload a mod and every mod depending on it.
    ///
    /// Every mod in the chain is disabled and pre-disposed first. If any
    /// instance fails its pre-dispose, nothing is detached and the call
    /// fails. Calling again re-runs only the refused pre-disposes and stays
    /// blocked while any still fail; [`force_unload`](Self::force_unload)
    /// overrides them. Dispose failures are logged and do not block. Returns
    /// the unloaded ids in unload order.
    pub async fn unload(&mut self, id: &str) -> LoaderResult<Vec<String>> {
        let root = self
            .loaded_id(id)
            .ok_or_else(|| LoaderError::NotLoaded(id.to_string()))?;
        let chain = self.unload_chain(&root);
        debug!(mod_id = %root, "Unload chain: {:?}", chain);

        for mod_id in &chain {
            let Some(module) = self.mods.get_mut(mod_id) else {
                continue;
            };
            if module.enabled {
                module.disable();
                self.sink.emit(ModEvent::ModDisabled {
                    mod_id: mod_id.clone(),
                });
            }

            for group in module.groups.iter_mut() {
                let outcome = group.pre_dispose().await?;
                if !outcome.is_clean() {
                    let reason = describe_failures(&outcome.failures);
                    warn!(mod_id = %mod_id, "Pre-dispose failed, unload of {} blocked", root);
                    return Err(LoaderError::UnloadBlocked {
                        mod_id: root,
                        blocker: mod_id.clone(),
                        reason,
                    });
                }
            }
        }

        self.detach(&chain).await;
        Ok(chain)
    }

    /// Unload a mod and every mod depending on it without consulting their
    /// pre-dispose results.
    ///
    /// Pending teardown phases still run, in the same order as
    /// [`unload`](Self::unload), but failures and refusals are only logged.
    pub async fn force_unload(&mut self, id: &str) -> LoaderResult<Vec<String>> {
        let root = self
            .loaded_id(id)
            .ok_or_else(|| LoaderError::NotLoaded(id.to_string()))?;
        let chain = self.unload_chain(&root);
        warn!(mod_id = %root, "Forcing unload of {:?}", chain);

        for mod_id in &chain {
            if let Some(module) = self.mods.get_mut(mod_id) {
                if module.enabled {
                    module.disable();
                    self.sink.emit(ModEvent::ModDisabled {
                        mod_id: mod_id.clone(),
                    });
                }
            }
        }

        self.detach(&chain).await;
        Ok(chain)
    }

    /// Tear down and remove every mod in `chain`, in order.
    async fn detach(&mut self, chain: &[String]) {
        for mod_id in chain {
            if let Some(mut module) = self.mods.remove(mod_id) {
                teardown(&mut module).await;
                self.order.retain(|o| o != mod_id);
                self.sink.emit(ModEvent::ModUnloaded {
                    mod_id: mod_id.clone(),
                });
            }
        }
    }

    /// Unload several mods, cascading each to its dependents.
    pub async fn unload_batch(&mut self, ids: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for id in ids {
            if report.outcome(id).is_some() {
                continue;
            }
            if !self.is_loaded(id) {
                report.outcomes.push((
                    id.clone(),
                    ModOutcome::Failed {
                        reason: "not loaded".to_string(),
                    },
                ));
                continue;
            }
            match self.unload(id).await {
                Ok(chain) => {
                    for unloaded in chain {
                        report.outcomes.push((unloaded, ModOutcome::Unloaded));
                    }
                }
                Err(e) => report.outcomes.push((
                    id.clone(),
                    ModOutcome::Failed {
                        reason: e.to_string(),
                    },
                )),
            }
        }
        report
    }

    /// Unload everything in reverse load order.
    pub async fn unload_all(&mut self) -> BatchReport {
        let ids: Vec<String> = self.order.iter().rev().cloned().collect();
        self.unload_batch(&ids).await
    }

    /// Unload a mod and its dependents, then load them again with metadata
    /// re-read from their manifests where available.
    pub async fn reload(&mut self, id: &str) -> LoaderResult<BatchReport> {
        let root = self
            .loaded_id(id)
            .ok_or_else(|| LoaderError::NotLoaded(id.to_string()))?;
        let chain = self.unload_chain(&root);

        // Re-read metadata first so a broken manifest leaves everything loaded
        let mut regular = Vec::new();
        let mut builtin = Vec::new();
        for mod_id in chain.iter().rev() {
            let Some(module) = self.mods.get(mod_id) else {
                continue;
            };
            let unit = refresh_unit(&module.unit)?;
            if module.builtin {
                builtin.push(unit);
            } else {
                regular.push(unit);
            }
        }

        self.unload(&root).await?;
        info!(mod_id = %root, "Reloading {} mod(s)", chain.len());

        let mut report = BatchReport::default();
        if !builtin.is_empty() {
            report.merge(self.load_all(builtin, true).await);
        }
        if !regular.is_empty() {
            report.merge(self.load_all(regular, false).await);
        }

        if !report.errors.is_empty() {
            return Err(LoaderError::Resolution(report.errors));
        }
        Ok(report)
    }

    /// Enable a disabled mod, starting any group that has not started yet.
    ///
    /// Fails with [`LoaderError::Retired`] once a pre-dispose has run,
    /// for example after a blocked unload.
    pub async fn enable_mod(&mut self, id: &str) -> LoaderResult<Vec<String>> {
        let mod_id = self
            .loaded_id(id)
            .ok_or_else(|| LoaderError::NotLoaded(id.to_string()))?;
        let host = Arc::clone(&self.host);
        let Some(module) = self.mods.get_mut(&mod_id) else {
            return Err(LoaderError::NotLoaded(id.to_string()));
        };
        if module.enabled {
            return Ok(Vec::new());
        }
        if module.groups.iter().any(EntryGroup::is_retired) {
            return Err(LoaderError::Retired(mod_id));
        }

        let warnings = module.enable(host.as_ref());
        for group in module.groups.iter_mut() {
            group.initialize().await?;
        }
        for group in module.groups.iter_mut() {
            group.post_initialize().await?;
        }

        self.sink.emit(ModEvent::ModEnabled { mod_id });
        Ok(warnings)
    }

    /// Disable a mod. Its ticks stop; its phase is unchanged.
    pub fn disable_mod(&mut self, id: &str) -> LoaderResult<()> {
        let mod_id = self
            .loaded_id(id)
            .ok_or_else(|| LoaderError::NotLoaded(id.to_string()))?;
        if let Some(module) = self.mods.get_mut(&mod_id) {
            if module.enabled {
                module.disable();
                self.sink.emit(ModEvent::ModDisabled { mod_id });
            }
        }
        Ok(())
    }

    pub fn tick(&self, dt: Duration) -> Vec<(String, InstanceFailure)> {
        self.run_tick(TickKind::Update, dt)
    }

    pub fn fixed_tick(&self, dt: Duration) -> Vec<(String, InstanceFailure)> {
        self.run_tick(TickKind::FixedUpdate, dt)
    }

    pub fn late_tick(&self, dt: Duration) -> Vec<(String, InstanceFailure)> {
        self.run_tick(TickKind::LateUpdate, dt)
    }

    fn run_tick(&self, kind: TickKind, dt: Duration) -> Vec<(String, InstanceFailure)> {
        let mut failures = Vec::new();
        for id in &self.order {
            if let Some(module) = self.mods.get(id) {
                for group in &module.groups {
                    failures.extend(group.tick(kind, dt).into_iter().map(|f| (id.clone(), f)));
                }
            }
        }
        failures
    }

    /// Whether a loaded mod answers to `id`.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded_id(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&LoadedMod> {
        self.loaded_id(id).and_then(|id| self.mods.get(&id))
    }

    /// Loaded mods in load order.
    pub fn list_loaded(&self) -> Vec<ModInfo> {
        self.order
            .iter()
            .filter_map(|id| self.mods.get(id))
            .map(LoadedMod::info)
            .collect()
    }

    /// Ids of loaded mods in load order.
    pub fn load_order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

impl fmt::Debug for ModManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModManager")
            .field("order", &self.order)
            .field("host_units", &self.host_units)
            .finish()
    }
}

/// Run every teardown phase that is still pending and release the context.
async fn teardown(module: &mut LoadedMod) {
    module.disable();
    for group in module.groups.iter_mut() {
        match group.teardown().await {
            Ok(outcomes) => {
                for outcome in outcomes.iter().filter(|o| !o.is_clean()) {
                    warn!(
                        mod_id = %module.unit.id(),
                        group = %group.name(),
                        "{:?} had failures: {}",
                        outcome.phase,
                        describe_failures(&outcome.failures)
                    );
                }
            }
            Err(e) => warn!(mod_id = %module.unit.id(), "{}", e),
        }
    }

    let report = module.context.unload();
    debug!(
        mod_id = %module.unit.id(),
        units = report.units_released,
        types = report.types_released,
        reclaimed = report.reclaimed,
        "Released load context"
    );
}

fn describe_failures(failures: &[InstanceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.instance, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Re-read a mod's manifest, keeping its location.
fn refresh_unit(unit: &ModUnit) -> LoaderResult<ModUnit> {
    let Some(manifest_path) = &unit.manifest_path else {
        return Ok(unit.clone());
    };
    let mut refreshed = ModManifest::from_file(manifest_path)?.into_unit()?;
    refreshed.root = unit.root.clone();
    refreshed.manifest_path = Some(manifest_path.clone());
    Ok(refreshed)
}
