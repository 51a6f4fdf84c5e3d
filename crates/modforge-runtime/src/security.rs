//! Static security validation of compiled code units.
//!
//! Before any mod code is loaded, its symbol table is scanned against a
//! blacklist of dangerous units, namespaces, types and members. A match is
//! a violation unless the mod's [`PermissionContext`] grants a permission
//! covering the symbol. Nothing in the unit is executed.

use crate::bytecode::{Bytecode, BytecodeLoader, SymbolKind, SymbolRef};
use crate::error::{RuntimeError, RuntimeResult};
use crate::pattern::{PatternSet, SymbolPattern};
use crate::permission::PermissionContext;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which blacklist category a pattern or violation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A referenced code unit.
    Assembly,
    /// The namespace of a referenced type.
    Namespace,
    /// A referenced type.
    Type,
    /// A referenced method or field.
    Member,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Assembly => "assembly",
            ViolationKind::Namespace => "namespace",
            ViolationKind::Type => "type",
            ViolationKind::Member => "member",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four pattern sets of a blacklist.
#[derive(Debug, Clone, Default)]
pub struct BlacklistRules {
    pub assemblies: PatternSet,
    pub namespaces: PatternSet,
    pub types: PatternSet,
    pub members: PatternSet,
}

impl BlacklistRules {
    /// The built-in rules.
    ///
    /// Covers process execution, raw sockets and HTTP, dynamic code
    /// generation, security and registry manipulation, native interop, and
    /// editor-only host APIs.
    pub fn defaults() -> RuntimeResult<Self> {
        Ok(Self {
            assemblies: PatternSet::compile(["native.*", "host.editor", "host.editor.*"])?,
            namespaces: PatternSet::compile([
                "std.process",
                "std.net.socket",
                "std.net.http",
                "runtime.emit",
                "runtime.compile",
                "std.ffi",
                "host.security",
                "host.registry",
                "host.editor",
            ])?,
            types: PatternSet::compile([
                "std.net.TcpStream",
                "std.net.TcpListener",
                "std.net.UdpSocket",
                "runtime.reflect.DynamicMethod",
                "runtime.interop.*",
            ])?,
            members: PatternSet::compile([
                "std.env::set_var",
                "std.env::remove_var",
                "runtime.reflect.Assembly::load*",
            ])?,
        })
    }

    pub fn set(&self, kind: ViolationKind) -> &PatternSet {
        match kind {
            ViolationKind::Assembly => &self.assemblies,
            ViolationKind::Namespace => &self.namespaces,
            ViolationKind::Type => &self.types,
            ViolationKind::Member => &self.members,
        }
    }

    fn set_mut(&mut self, kind: ViolationKind) -> &mut PatternSet {
        match kind {
            ViolationKind::Assembly => &mut self.assemblies,
            ViolationKind::Namespace => &mut self.namespaces,
            ViolationKind::Type => &mut self.types,
            ViolationKind::Member => &mut self.members,
        }
    }

    pub fn len(&self) -> usize {
        self.assemblies.len() + self.namespaces.len() + self.types.len() + self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_BLACKLIST: Lazy<Arc<Blacklist>> = Lazy::new(|| Arc::new(Blacklist::with_defaults()));

/// A runtime-mutable blacklist.
///
/// Readers take an [`Arc`] snapshot of the rules and scan without holding
/// the lock. Writers clone the current rules, modify the clone and swap it
/// in, so a scan in progress always sees one consistent rule set.
#[derive(Debug, Default)]
pub struct Blacklist {
    rules: RwLock<Arc<BlacklistRules>>,
}

impl Blacklist {
    pub fn new(rules: BlacklistRules) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// A blacklist holding the built-in rules.
    pub fn with_defaults() -> Self {
        match BlacklistRules::defaults() {
            Ok(rules) => Self::new(rules),
            Err(e) => {
                tracing::error!("Built-in blacklist rejected: {}", e);
                Self::default()
            }
        }
    }

    /// The process-wide blacklist.
    pub fn global() -> Arc<Blacklist> {
        Arc::clone(&GLOBAL_BLACKLIST)
    }

    /// Current rules.
    pub fn snapshot(&self) -> Arc<BlacklistRules> {
        self.rules.read().clone()
    }

    /// Add a pattern. Returns `false` if it was already present.
    pub fn add(&self, kind: ViolationKind, pattern: &str) -> RuntimeResult<bool> {
        let pattern = SymbolPattern::new(pattern)?;
        let mut guard = self.rules.write();
        let mut rules = BlacklistRules::clone(&guard);
        let added = rules.set_mut(kind).insert(pattern);
        if added {
            *guard = Arc::new(rules);
        }
        Ok(added)
    }

    /// Remove a pattern by its source text.
    pub fn remove(&self, kind: ViolationKind, pattern: &str) -> bool {
        let mut guard = self.rules.write();
        let mut rules = BlacklistRules::clone(&guard);
        let removed = rules.set_mut(kind).remove(pattern);
        if removed {
            *guard = Arc::new(rules);
        }
        removed
    }

    /// Whether a unit name is blacklisted.
    pub fn blocks_assembly(&self, name: &str) -> Option<String> {
        self.snapshot()
            .assemblies
            .find(name)
            .map(|p| p.as_str().to_string())
    }
}

/// One blacklisted reference found in a code unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub kind: ViolationKind,
    /// The offending symbol.
    pub symbol: String,
    /// The type or function the reference appears in.
    pub container: String,
    pub location: String,
    /// The blacklist pattern that matched.
    pub pattern: String,
    /// A permission that would exempt the reference, if one is registered.
    pub suggested_permission: Option<String>,
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' in {} ({}) matches '{}'",
            self.kind, self.symbol, self.container, self.location, self.pattern
        )?;
        match &self.suggested_permission {
            Some(permission) => write!(f, "; requires permission '{}'", permission),
            None => Ok(()),
        }
    }
}

/// Outcome of validating one code unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub unit: String,
    pub violations: Vec<SecurityViolation>,
}

impl ValidationResult {
    pub fn valid(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            violations: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "Code unit '{}' passed validation", self.unit);
        }
        write!(
            f,
            "Code unit '{}' rejected: {} security violation(s)",
            self.unit,
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}

/// Scans code units against a blacklist.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    blacklist: Arc<Blacklist>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(Blacklist::global())
    }
}

impl SecurityValidator {
    pub fn new(blacklist: Arc<Blacklist>) -> Self {
        Self { blacklist }
    }

    pub fn blacklist(&self) -> &Arc<Blacklist> {
        &self.blacklist
    }

    /// Validate the code unit at `path`.
    ///
    /// A kernel context is valid without the file being read.
    pub fn validate(&self, path: &Path, ctx: &PermissionContext) -> RuntimeResult<ValidationResult> {
        if ctx.is_kernel() {
            let unit = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(ValidationResult::valid(unit));
        }

        let bytecode = BytecodeLoader::load(path)?;
        Ok(self.validate_bytecode(&bytecode, ctx))
    }

    /// Validate an already parsed code unit.
    pub fn validate_bytecode(&self, bytecode: &Bytecode, ctx: &PermissionContext) -> ValidationResult {
        let mut result = ValidationResult::valid(bytecode.name());
        if ctx.is_kernel() {
            return result;
        }

        let rules = self.blacklist.snapshot();
        for symbol in bytecode.symbols() {
            if let Some(violation) = check_symbol(&symbol, &rules, ctx) {
                debug!(
                    mod_id = %ctx.mod_id(),
                    unit = %bytecode.name(),
                    "Security violation: {}",
                    violation
                );
                result.violations.push(violation);
            }
        }

        if !result.is_valid() {
            warn!(
                mod_id = %ctx.mod_id(),
                unit = %bytecode.name(),
                violations = result.violations.len(),
                "Code unit failed security validation"
            );
        }
        result
    }

    /// Validate and convert a failing result into an error.
    pub fn ensure_valid(&self, path: &Path, ctx: &PermissionContext) -> RuntimeResult<()> {
        let result = self.validate(path, ctx)?;
        if result.is_valid() {
            Ok(())
        } else {
            Err(RuntimeError::SecurityRejected(result))
        }
    }
}

fn check_symbol(
    symbol: &SymbolRef,
    rules: &BlacklistRules,
    ctx: &PermissionContext,
) -> Option<SecurityViolation> {
    let (kind, pattern) = match symbol.kind {
        SymbolKind::Unit => {
            let pattern = rules.assemblies.find(&symbol.symbol)?;
            if ctx.allows_assembly(&symbol.symbol) {
                return None;
            }
            (ViolationKind::Assembly, pattern)
        }
        SymbolKind::Type | SymbolKind::Method | SymbolKind::Field => {
            let type_name = symbol.type_name().unwrap_or(&symbol.symbol);
            let namespace = symbol.namespace();

            let member = if symbol.kind == SymbolKind::Type {
                None
            } else {
                rules
                    .members
                    .find(&symbol.symbol)
                    .map(|p| (ViolationKind::Member, p))
            };
            let matched = member
                .or_else(|| {
                    rules
                        .types
                        .find(type_name)
                        .map(|p| (ViolationKind::Type, p))
                })
                .or_else(|| {
                    namespace
                        .and_then(|ns| rules.namespaces.find_namespace(ns))
                        .map(|p| (ViolationKind::Namespace, p))
                })?;

            let exempt = ctx.allows_type(&symbol.symbol)
                || ctx.allows_type(type_name)
                || namespace.is_some_and(|ns| ctx.allows_namespace(ns));
            if exempt {
                return None;
            }
            matched
        }
    };

    Some(SecurityViolation {
        kind,
        symbol: symbol.symbol.clone(),
        container: symbol.container.clone(),
        location: symbol.location.clone(),
        pattern: pattern.as_str().to_string(),
        suggested_permission: suggest(symbol, ctx),
    })
}

fn suggest(symbol: &SymbolRef, ctx: &PermissionContext) -> Option<String> {
    let registry = ctx.registry();
    if symbol.kind == SymbolKind::Unit {
        return registry.suggest_for_assembly(&symbol.symbol);
    }
    registry
        .suggest_for_type(&symbol.symbol)
        .or_else(|| symbol.type_name().and_then(|ty| registry.suggest_for_type(ty)))
        .or_else(|| {
            symbol
                .namespace()
                .and_then(|ns| registry.suggest_for_namespace(ns))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeMetadata, Function, Instruction, TypeDefinition, UnitReference};
    use crate::permission::PermissionRegistry;

    fn unit(references: &[&str], calls: &[&str]) -> Bytecode {
        Bytecode {
            version: 1,
            metadata: BytecodeMetadata {
                unit_name: "probe".to_string(),
                unit_version: "0.1.0".to_string(),
                compiled_at: None,
                compiler_version: None,
            },
            references: references
                .iter()
                .map(|r| UnitReference {
                    name: r.to_string(),
                    version: None,
                })
                .collect(),
            types: vec![TypeDefinition {
                name: "Probe.Main".to_string(),
                base: None,
                implements: vec!["main".to_string()],
            }],
            type_refs: vec![],
            constants: vec![],
            functions: vec![Function {
                name: "init".to_string(),
                owner: Some("Probe.Main".to_string()),
                params: vec![],
                instructions: calls
                    .iter()
                    .map(|c| Instruction::Call {
                        name: c.to_string(),
                        arg_count: 0,
                    })
                    .collect(),
                local_count: 0,
            }],
            entry_point: None,
        }
    }

    fn validator() -> SecurityValidator {
        SecurityValidator::new(Arc::new(Blacklist::with_defaults()))
    }

    fn registry() -> Arc<PermissionRegistry> {
        Arc::new(PermissionRegistry::with_defaults())
    }

    #[test]
    fn test_clean_unit_valid_for_any_context() {
        let bc = unit(&["modforge.api"], &["modforge.api.Log::info", "std.collections.Map::new"]);
        let validator = validator();

        for declared in [vec![], vec!["process"], vec!["nonexistent"]] {
            let ctx = PermissionContext::new("m", declared, registry());
            assert!(validator.validate_bytecode(&bc, &ctx).is_valid());
        }
    }

    #[test]
    fn test_blacklisted_call_rejected_without_permission() {
        let bc = unit(&[], &["std.process.Command::spawn"]);
        let ctx = PermissionContext::new("m", Vec::<String>::new(), registry());

        let result = validator().validate_bytecode(&bc, &ctx);
        assert!(!result.is_valid());
        let violation = &result.violations[0];
        assert_eq!(violation.kind, ViolationKind::Namespace);
        assert_eq!(violation.pattern, "std.process");
        assert_eq!(violation.container, "Probe.Main::init");
        assert_eq!(violation.suggested_permission.as_deref(), Some("process"));
    }

    #[test]
    fn test_permission_exempts_symbol() {
        let bc = unit(&[], &["std.process.Command::spawn"]);
        let ctx = PermissionContext::new("m", ["process"], registry());
        assert!(validator().validate_bytecode(&bc, &ctx).is_valid());
    }

    #[test]
    fn test_parent_permission_exempts_child_rule() {
        let bc = unit(&[], &["std.net.TcpStream::connect"]);
        let ctx = PermissionContext::new("m", ["network"], registry());
        assert!(validator().validate_bytecode(&bc, &ctx).is_valid());
    }

    #[test]
    fn test_member_pattern() {
        let bc = unit(&[], &["std.env::set_var", "std.env::var"]);
        let ctx = PermissionContext::new("m", Vec::<String>::new(), registry());

        let result = validator().validate_bytecode(&bc, &ctx);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::Member);
        assert_eq!(
            result.violations[0].suggested_permission.as_deref(),
            Some("environment")
        );
    }

    #[test]
    fn test_scan_is_exhaustive() {
        let bc = unit(
            &["native.libc"],
            &[
                "std.process.Command::spawn",
                "runtime.interop.Marshal::copy",
                "host.registry.Keys::set",
            ],
        );
        let ctx = PermissionContext::new("m", Vec::<String>::new(), registry());

        let result = validator().validate_bytecode(&bc, &ctx);
        assert_eq!(result.violations.len(), 4);
        assert_eq!(result.violations[0].kind, ViolationKind::Assembly);
        assert_eq!(result.violations[2].kind, ViolationKind::Type);
    }

    #[test]
    fn test_kernel_skips_file() {
        let ctx = PermissionContext::kernel("builtin", registry());
        let result = validator()
            .validate(Path::new("/nonexistent/unit.mfc"), &ctx)
            .unwrap();
        assert!(result.is_valid());
        assert_eq!(result.unit, "unit");
    }

    #[test]
    fn test_unreadable_unit_is_error() {
        let ctx = PermissionContext::new("m", Vec::<String>::new(), registry());
        assert!(validator()
            .validate(Path::new("/nonexistent/unit.mfc"), &ctx)
            .is_err());
    }

    #[test]
    fn test_runtime_blacklist_changes() {
        let validator = validator();
        let bc = unit(&[], &["game.cheats.God::enable"]);
        let ctx = PermissionContext::new("m", Vec::<String>::new(), registry());
        assert!(validator.validate_bytecode(&bc, &ctx).is_valid());

        assert!(validator
            .blacklist()
            .add(ViolationKind::Namespace, "game.cheats")
            .unwrap());
        assert!(!validator.validate_bytecode(&bc, &ctx).is_valid());

        assert!(validator
            .blacklist()
            .remove(ViolationKind::Namespace, "game.cheats"));
        assert!(validator.validate_bytecode(&bc, &ctx).is_valid());
    }

    #[test]
    fn test_snapshot_unaffected_by_later_writes() {
        let blacklist = Blacklist::with_defaults();
        let before = blacklist.snapshot();
        blacklist.add(ViolationKind::Type, "game.Debug").unwrap();
        assert!(before.types.find("game.Debug").is_none());
        assert!(blacklist.snapshot().types.find("game.Debug").is_some());
    }

    #[test]
    fn test_malformed_blacklist_pattern() {
        let blacklist = Blacklist::new(BlacklistRules::default());
        assert!(blacklist.add(ViolationKind::Member, "").is_err());
        assert!(blacklist.snapshot().is_empty());
    }
}
