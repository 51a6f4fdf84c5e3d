//! Capability-based permission model for mods.
//!
//! A [`Permission`] names a capability and lists the symbol patterns it
//! unlocks. Permissions form a single-parent hierarchy and live in a
//! [`PermissionRegistry`]. Each loaded mod gets a [`PermissionContext`] that
//! freezes the closure of its declared permissions and answers whether a
//! given type, namespace or unit is allowed for that mod.

use crate::error::{RuntimeError, RuntimeResult};
use crate::pattern::PatternSet;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Risk tier of a permission, ordered from least to most dangerous.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// A permission declaration, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,

    #[serde(default)]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub risk: RiskTier,

    #[serde(default)]
    pub description: Option<String>,

    /// Type patterns this permission allows.
    #[serde(default)]
    pub types: Vec<String>,

    /// Namespace patterns this permission allows.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Unit (assembly) patterns this permission allows.
    #[serde(default)]
    pub assemblies: Vec<String>,
}

impl Permission {
    pub fn new(id: impl Into<String>, risk: RiskTier) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            risk,
            description: None,
            types: Vec::new(),
            namespaces: Vec::new(),
            assemblies: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn allow_types<I: IntoIterator<Item = S>, S: Into<String>>(mut self, patterns: I) -> Self {
        self.types.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn allow_namespaces<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        patterns: I,
    ) -> Self {
        self.namespaces.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn allow_assemblies<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        patterns: I,
    ) -> Self {
        self.assemblies.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// A permission with its patterns compiled, as held by the registry.
#[derive(Debug, Clone)]
pub struct RegisteredPermission {
    pub declaration: Permission,
    pub types: PatternSet,
    pub namespaces: PatternSet,
    pub assemblies: PatternSet,
}

impl RegisteredPermission {
    fn compile(declaration: Permission) -> RuntimeResult<Self> {
        let context = |e: RuntimeError| match e {
            RuntimeError::Config(msg) => {
                RuntimeError::Config(format!("permission '{}': {}", declaration.id, msg))
            }
            other => other,
        };
        let types = PatternSet::compile(&declaration.types).map_err(context)?;
        let namespaces = PatternSet::compile(&declaration.namespaces).map_err(context)?;
        let assemblies = PatternSet::compile(&declaration.assemblies).map_err(context)?;
        Ok(Self {
            declaration,
            types,
            namespaces,
            assemblies,
        })
    }

    pub fn id(&self) -> &str {
        &self.declaration.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.declaration.parent_id.as_deref()
    }

    pub fn risk(&self) -> RiskTier {
        self.declaration.risk
    }

    pub fn allows_type(&self, symbol: &str) -> bool {
        self.types.find(symbol).is_some()
    }

    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.namespaces.find_namespace(namespace).is_some()
    }

    pub fn allows_assembly(&self, name: &str) -> bool {
        self.assemblies.find(name).is_some()
    }
}

#[derive(Default)]
struct RegistryState {
    permissions: HashMap<String, Arc<RegisteredPermission>>,
    /// Registration order, used when suggesting a permission.
    order: Vec<String>,
}

impl RegistryState {
    fn parent_of(&self, id: &str) -> Option<&str> {
        self.permissions.get(id).and_then(|p| p.parent_id())
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<PermissionRegistry>> =
    Lazy::new(|| Arc::new(PermissionRegistry::new()));

/// Catalog of named permissions.
///
/// Mutation takes the writer lock; queries take the reader lock, so a
/// registration never interleaves with a resolution or an allow check.
#[derive(Default)]
pub struct PermissionRegistry {
    state: RwLock<RegistryState>,
}

impl PermissionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in catalog.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for permission in default_permissions() {
            // Built-in patterns are static and known to compile
            if let Err(e) = registry.register(permission) {
                tracing::error!("Built-in permission rejected: {}", e);
            }
        }
        registry
    }

    /// The process-wide registry.
    pub fn global() -> Arc<PermissionRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register or replace a permission.
    ///
    /// Malformed patterns reject the whole permission; nothing is stored.
    pub fn register(&self, permission: Permission) -> RuntimeResult<()> {
        if permission.id.is_empty() {
            return Err(RuntimeError::Config(
                "permission id cannot be empty".to_string(),
            ));
        }
        if permission.parent_id.as_deref() == Some(permission.id.as_str()) {
            return Err(RuntimeError::Config(format!(
                "permission '{}' cannot be its own parent",
                permission.id
            )));
        }

        let compiled = Arc::new(RegisteredPermission::compile(permission)?);
        let id = compiled.id().to_string();

        let mut state = self.state.write();
        if state.permissions.insert(id.clone(), compiled).is_none() {
            state.order.push(id.clone());
            debug!(permission = %id, "Registered permission");
        } else {
            debug!(permission = %id, "Replaced permission");
        }
        Ok(())
    }

    /// Install the built-in catalog.
    pub fn register_defaults(&self) -> RuntimeResult<()> {
        for permission in default_permissions() {
            self.register(permission)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<RegisteredPermission>> {
        self.state.read().permissions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().permissions.contains_key(id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand declared ids to include every ancestor and every descendant.
    ///
    /// Unknown ids are kept as-is.
    pub fn resolve<I, S>(&self, declared: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.read();
        let declared: Vec<String> = declared
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let mut resolved: BTreeSet<String> = declared.iter().cloned().collect();

        // Ancestors
        for id in &declared {
            let mut seen = HashSet::new();
            seen.insert(id.as_str());
            let mut current = state.parent_of(id);
            while let Some(parent) = current {
                if !seen.insert(parent) {
                    break;
                }
                resolved.insert(parent.to_string());
                current = state.parent_of(parent);
            }
        }

        // Descendants
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for permission in state.permissions.values() {
            if let Some(parent) = permission.parent_id() {
                children.entry(parent).or_default().push(permission.id());
            }
        }

        let mut queue: VecDeque<&str> = declared.iter().map(String::as_str).collect();
        let mut visited: HashSet<&str> = queue.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if let Some(kids) = children.get(id) {
                for &kid in kids {
                    if visited.insert(kid) {
                        resolved.insert(kid.to_string());
                        queue.push_back(kid);
                    }
                }
            }
        }

        resolved
    }

    /// First registered permission, in registration order, satisfying `pred`.
    pub fn find_first<F>(&self, pred: F) -> Option<String>
    where
        F: Fn(&RegisteredPermission) -> bool,
    {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.permissions.get(id))
            .find(|p| pred(p))
            .map(|p| p.id().to_string())
    }
}

impl PermissionRegistry {
    /// Permission that would allow `symbol` as a type or member.
    pub fn suggest_for_type(&self, symbol: &str) -> Option<String> {
        self.find_first(|p| p.allows_type(symbol))
    }

    pub fn suggest_for_namespace(&self, namespace: &str) -> Option<String> {
        self.find_first(|p| p.allows_namespace(namespace))
    }

    pub fn suggest_for_assembly(&self, name: &str) -> Option<String> {
        self.find_first(|p| p.allows_assembly(name))
    }
}

/// The resolved permissions of one mod.
#[derive(Clone)]
pub struct PermissionContext {
    mod_id: String,
    declared: BTreeSet<String>,
    resolved: BTreeSet<String>,
    kernel: bool,
    registry: Arc<PermissionRegistry>,
}

impl PermissionContext {
    /// Resolve the declared permissions of a mod against `registry`.
    pub fn new<I, S>(mod_id: impl Into<String>, declared: I, registry: Arc<PermissionRegistry>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let declared: BTreeSet<String> = declared
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let resolved = registry.resolve(&declared);
        Self {
            mod_id: mod_id.into(),
            declared,
            resolved,
            kernel: false,
            registry,
        }
    }

    /// A context for trusted built-in code that bypasses every check.
    pub fn kernel(mod_id: impl Into<String>, registry: Arc<PermissionRegistry>) -> Self {
        Self {
            mod_id: mod_id.into(),
            declared: BTreeSet::new(),
            resolved: BTreeSet::new(),
            kernel: true,
            registry,
        }
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    pub fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    pub fn resolved(&self) -> &BTreeSet<String> {
        &self.resolved
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    pub fn allows_type(&self, symbol: &str) -> bool {
        self.kernel || self.granting(|p| p.allows_type(symbol)).is_some()
    }

    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.kernel || self.granting(|p| p.allows_namespace(namespace)).is_some()
    }

    pub fn allows_assembly(&self, name: &str) -> bool {
        self.kernel || self.granting(|p| p.allows_assembly(name)).is_some()
    }

    /// First resolved permission satisfying `pred`.
    ///
    /// Rules are read from the live registry, so permissions registered
    /// after this context was built still apply to ids it already holds.
    pub fn granting<F>(&self, pred: F) -> Option<String>
    where
        F: Fn(&RegisteredPermission) -> bool,
    {
        self.resolved
            .iter()
            .filter_map(|id| self.registry.get(id))
            .find(|p| pred(p))
            .map(|p| p.id().to_string())
    }

    /// Highest risk tier among the registered resolved permissions.
    pub fn max_risk(&self) -> Option<RiskTier> {
        if self.kernel {
            return Some(RiskTier::Critical);
        }
        self.resolved
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|p| p.risk())
            .max()
    }
}

impl std::fmt::Debug for PermissionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionContext")
            .field("mod_id", &self.mod_id)
            .field("declared", &self.declared)
            .field("resolved", &self.resolved)
            .field("kernel", &self.kernel)
            .finish()
    }
}

/// The built-in permission catalog.
///
/// Every blacklisted category in [`crate::security`] has a permission that
/// exempts it.
pub fn default_permissions() -> Vec<Permission> {
    vec![
        Permission::new("process", RiskTier::Critical)
            .with_description("Spawn and control operating system processes")
            .allow_namespaces(["std.process"]),
        Permission::new("network", RiskTier::Medium)
            .with_description("Name resolution and address types")
            .allow_namespaces(["std.net.dns"]),
        Permission::new("network.http", RiskTier::Medium)
            .with_parent("network")
            .with_description("Outbound HTTP requests")
            .allow_namespaces(["std.net.http"]),
        Permission::new("network.socket", RiskTier::High)
            .with_parent("network")
            .with_description("Raw TCP and UDP sockets")
            .allow_namespaces(["std.net.socket"])
            .allow_types(["std.net.TcpStream", "std.net.TcpListener", "std.net.UdpSocket"]),
        Permission::new("codegen", RiskTier::Critical)
            .with_description("Generate and load code at runtime")
            .allow_namespaces(["runtime.emit", "runtime.compile"])
            .allow_types(["runtime.reflect.DynamicMethod", "runtime.reflect.Assembly::load*"]),
        Permission::new("native", RiskTier::Critical)
            .with_description("Call into native libraries")
            .allow_namespaces(["std.ffi"])
            .allow_types(["runtime.interop.*"])
            .allow_assemblies(["native.*"]),
        Permission::new("security", RiskTier::Critical)
            .with_description("Inspect and change host security policy")
            .allow_namespaces(["host.security"]),
        Permission::new("security.registry", RiskTier::Critical)
            .with_parent("security")
            .with_description("Read and write the host settings registry")
            .allow_namespaces(["host.registry"]),
        Permission::new("environment", RiskTier::High)
            .with_description("Modify process environment variables")
            .allow_types(["std.env::set_var", "std.env::remove_var"]),
        Permission::new("filesystem", RiskTier::Medium)
            .with_description("Access files outside the mod directory"),
        Permission::new("filesystem.read", RiskTier::Medium)
            .with_parent("filesystem")
            .allow_types(["std.fs::read*", "std.fs.File::open"]),
        Permission::new("filesystem.write", RiskTier::High)
            .with_parent("filesystem")
            .allow_types(["std.fs::write*", "std.fs::remove*", "std.fs.File::create"]),
        Permission::new("editor", RiskTier::Medium)
            .with_description("Use editor-only host APIs")
            .allow_namespaces(["host.editor"])
            .allow_assemblies(["host.editor", "host.editor.*"]),
    ]
}
