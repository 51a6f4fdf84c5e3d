//! Per-mod isolated load contexts.
//!
//! Each mod gets its own [`IsolatedLoadContext`]. The context owns every
//! code unit loaded for the mod, the mod's private type registry, and the
//! capability lookup table entry groups use to find their implementations.
//!
//! Unloading is best effort: the context drops its own references, bumps
//! its generation so outstanding [`TypeHandle`]s become stale, and reports
//! whether the unit memory was observed to be reclaimed.

use crate::bytecode::{Bytecode, BytecodeLoader, UNIT_EXTENSION};
use crate::error::{RuntimeError, RuntimeResult};
use crate::permission::PermissionContext;
use crate::security::{SecurityValidator, ViolationKind};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Unit names the host provides to every mod.
pub const DEFAULT_HOST_UNITS: &[&str] = &["modforge.api", "std"];

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a load context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A code unit held in memory by a load context.
#[derive(Debug)]
pub struct LoadedUnit {
    pub name: String,
    pub version: String,
    /// Where the unit was read from. The file may since have changed.
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub bytecode: Bytecode,
}

#[derive(Debug, Clone)]
struct TypeEntry {
    unit: String,
    implements: Vec<String>,
}

/// A resolved type, valid for one generation of one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHandle {
    pub context: ContextId,
    pub generation: u64,
    pub unit: String,
    pub type_name: String,
    pub implements: Vec<String>,
}

impl TypeHandle {
    pub fn implements(&self, capability: &str) -> bool {
        self.implements.iter().any(|c| c == capability)
    }
}

/// Result of looking a type up by name and capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLookup {
    Found(TypeHandle),
    NotFound,
    /// The type exists but does not implement the requested capability.
    MissingCapability { available: Vec<String> },
}

/// What an unload released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnloadReport {
    pub units_released: usize,
    pub types_released: usize,
    /// Whether every released unit was observed dropped.
    pub reclaimed: bool,
    pub already_unloaded: bool,
}

/// The load context owning one mod's code.
pub struct IsolatedLoadContext {
    id: ContextId,
    mod_id: String,
    root: Option<PathBuf>,
    permissions: Arc<PermissionContext>,
    validator: SecurityValidator,
    host_units: HashSet<String>,
    units: HashMap<String, Arc<LoadedUnit>>,
    /// Load order of `units`.
    order: Vec<String>,
    types: HashMap<String, TypeEntry>,
    generation: u64,
    disposed: bool,
    released: Vec<Weak<LoadedUnit>>,
}

impl IsolatedLoadContext {
    pub fn new(
        mod_id: impl Into<String>,
        root: Option<PathBuf>,
        permissions: PermissionContext,
        validator: SecurityValidator,
    ) -> Self {
        Self {
            id: ContextId::next(),
            mod_id: mod_id.into(),
            root,
            permissions: Arc::new(permissions),
            validator,
            host_units: DEFAULT_HOST_UNITS.iter().map(|s| s.to_string()).collect(),
            units: HashMap::new(),
            order: Vec::new(),
            types: HashMap::new(),
            generation: 0,
            disposed: false,
            released: Vec::new(),
        }
    }

    /// Add unit names that resolve to the host rather than to files.
    pub fn with_host_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_units.extend(units.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn permissions(&self) -> &Arc<PermissionContext> {
        &self.permissions
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn unit(&self, name: &str) -> Option<Arc<LoadedUnit>> {
        self.units.get(name).cloned()
    }

    /// Loaded unit names in load order.
    pub fn unit_names(&self) -> &[String] {
        &self.order
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Load a code unit and everything it references.
    ///
    /// On failure nothing from this call stays loaded.
    pub fn load_unit(&mut self, path: &Path) -> RuntimeResult<Arc<LoadedUnit>> {
        if self.disposed {
            return Err(RuntimeError::ContextDisposed(self.mod_id.clone()));
        }

        let loaded_before = self.order.len();
        let mut in_progress = HashSet::new();
        match self.load_recursive(path, &mut in_progress) {
            Ok(unit) => Ok(unit),
            Err(e) => {
                self.rollback(loaded_before);
                Err(e)
            }
        }
    }

    /// Load every code unit named relative to the mod root.
    pub fn load_units(&mut self, names: &[String]) -> RuntimeResult<Vec<Arc<LoadedUnit>>> {
        let root = self.root.clone().ok_or_else(|| {
            RuntimeError::ModNotFound(format!("{} has no root directory", self.mod_id))
        })?;
        names
            .iter()
            .map(|name| self.load_unit(&root.join(name)))
            .collect()
    }

    fn load_recursive(
        &mut self,
        path: &Path,
        in_progress: &mut HashSet<String>,
    ) -> RuntimeResult<Arc<LoadedUnit>> {
        let bytes = BytecodeLoader::read(path)?;
        let bytecode = BytecodeLoader::parse(&bytes)?;
        BytecodeLoader::validate(&bytecode)?;

        let name = bytecode.name().to_string();
        if let Some(existing) = self.units.get(&name) {
            return Ok(Arc::clone(existing));
        }

        let result = self.validator.validate_bytecode(&bytecode, &self.permissions);
        if !result.is_valid() {
            let only_references = result
                .violations
                .iter()
                .all(|v| v.kind == ViolationKind::Assembly);
            if only_references {
                return Err(RuntimeError::DependencyRejected {
                    unit: name,
                    dependency: result.violations[0].symbol.clone(),
                });
            }
            return Err(RuntimeError::SecurityRejected(result));
        }

        in_progress.insert(name.clone());
        for reference in &bytecode.references {
            self.resolve_reference(&name, &reference.name, in_progress)?;
        }
        in_progress.remove(&name);

        let unit = Arc::new(LoadedUnit {
            name: name.clone(),
            version: bytecode.metadata.unit_version.clone(),
            path: path.to_path_buf(),
            bytes,
            bytecode,
        });
        self.register_types(&unit);
        self.units.insert(name.clone(), Arc::clone(&unit));
        self.order.push(name);

        debug!(
            mod_id = %self.mod_id,
            context = %self.id,
            unit = %unit.name,
            "Loaded code unit"
        );
        Ok(unit)
    }

    fn resolve_reference(
        &mut self,
        unit: &str,
        reference: &str,
        in_progress: &mut HashSet<String>,
    ) -> RuntimeResult<()> {
        if self.host_units.contains(reference)
            || self.units.contains_key(reference)
            || in_progress.contains(reference)
        {
            return Ok(());
        }

        let candidate = self
            .root
            .as_ref()
            .map(|root| root.join(format!("{}.{}", reference, UNIT_EXTENSION)))
            .filter(|path| path.is_file());

        match candidate {
            Some(path) => {
                self.load_recursive(&path, in_progress)?;
                Ok(())
            }
            None => Err(RuntimeError::UnresolvedReference {
                unit: unit.to_string(),
                dependency: reference.to_string(),
            }),
        }
    }

    fn register_types(&mut self, unit: &LoadedUnit) {
        for def in &unit.bytecode.types {
            if let Some(existing) = self.types.get(&def.name) {
                warn!(
                    mod_id = %self.mod_id,
                    "Type {} from {} already defined by {}; keeping the first",
                    def.name, unit.name, existing.unit
                );
                continue;
            }
            self.types.insert(
                def.name.clone(),
                TypeEntry {
                    unit: unit.name.clone(),
                    implements: def.implements.clone(),
                },
            );
        }
    }

    fn rollback(&mut self, keep: usize) {
        for name in self.order.split_off(keep) {
            self.units.remove(&name);
            self.types.retain(|_, entry| entry.unit != name);
        }
    }

    /// Look up a type by name, requiring it to implement `capability`.
    pub fn find_type(&self, type_name: &str, capability: &str) -> TypeLookup {
        if self.disposed {
            return TypeLookup::NotFound;
        }
        match self.types.get(type_name) {
            None => TypeLookup::NotFound,
            Some(entry) if !entry.implements.iter().any(|c| c == capability) => {
                TypeLookup::MissingCapability {
                    available: entry.implements.clone(),
                }
            }
            Some(entry) => TypeLookup::Found(TypeHandle {
                context: self.id,
                generation: self.generation,
                unit: entry.unit.clone(),
                type_name: type_name.to_string(),
                implements: entry.implements.clone(),
            }),
        }
    }

    /// Reject handles from another context or an earlier generation.
    pub fn check_handle(&self, handle: &TypeHandle) -> RuntimeResult<()> {
        if self.disposed || handle.context != self.id || handle.generation != self.generation {
            return Err(RuntimeError::StaleHandle(format!(
                "{} ({} gen {}, current {} gen {})",
                handle.type_name, handle.context, handle.generation, self.id, self.generation
            )));
        }
        Ok(())
    }

    /// Release every unit and type. Safe to call more than once.
    pub fn unload(&mut self) -> UnloadReport {
        if self.disposed {
            return UnloadReport {
                reclaimed: self.is_reclaimed(),
                already_unloaded: true,
                ..UnloadReport::default()
            };
        }

        let units_released = self.units.len();
        let types_released = self.types.len();

        self.released = self.units.values().map(Arc::downgrade).collect();
        self.units.clear();
        self.order.clear();
        self.types.clear();
        self.generation += 1;
        self.disposed = true;

        let reclaimed = self.is_reclaimed();
        info!(
            mod_id = %self.mod_id,
            context = %self.id,
            units = units_released,
            types = types_released,
            reclaimed,
            "Unloaded load context"
        );

        UnloadReport {
            units_released,
            types_released,
            reclaimed,
            already_unloaded: false,
        }
    }

    /// Whether every unit released by [`unload`](Self::unload) has been dropped.
    pub fn is_reclaimed(&self) -> bool {
        self.released.iter().all(|w| w.strong_count() == 0)
    }
}

impl fmt::Debug for IsolatedLoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedLoadContext")
            .field("id", &self.id)
            .field("mod_id", &self.mod_id)
            .field("units", &self.order)
            .field("types", &self.types.len())
            .field("generation", &self.generation)
            .field("disposed", &self.disposed)
            .finish()
    }
}
