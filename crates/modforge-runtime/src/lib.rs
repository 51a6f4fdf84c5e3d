//! # modforge-runtime
//!
//! Core data model and static vetting for modforge mods.
//!
//! This crate provides:
//! - The [`ModUnit`] metadata record and the [`MetadataProvider`] seam
//! - `mod.toml` manifest parsing and mod discovery from well-known paths
//! - The compiled code unit format and its static symbol table
//! - Hierarchical, pattern-based permissions
//! - The security blacklist and static validator
//! - Isolated, per-mod load contexts
//!
//! ## Mod Structure
//!
//! Mods are directories containing:
//! - `mod.toml` - Mod metadata, relations, permissions and entry groups
//! - `*.mfc` - Compiled code units, listed under `code` in the manifest
//!
//! ## Security Model
//!
//! Mods declare the permissions they need in their manifest. Every code unit
//! is scanned before it is loaded, and any reference to a blacklisted symbol
//! that none of the mod's permissions covers rejects the unit. Nothing is
//! enforced at run time.

pub mod bytecode;
pub mod discovery;
pub mod error;
pub mod load_context;
pub mod manifest;
pub mod pattern;
pub mod permission;
pub mod security;
pub mod unit;

pub use bytecode::{Bytecode, BytecodeLoader, SymbolKind, SymbolRef};
pub use discovery::{discover_mod, discover_mods, DirectoryProvider, ModPath};
pub use error::{RuntimeError, RuntimeResult};
pub use load_context::{
    ContextId, IsolatedLoadContext, LoadedUnit, TypeHandle, TypeLookup, UnloadReport,
};
pub use manifest::{ModManifest, ModMetadata};
pub use pattern::{PatternSet, SymbolPattern};
pub use permission::{Permission, PermissionContext, PermissionRegistry, RiskTier};
pub use security::{
    Blacklist, BlacklistRules, SecurityValidator, SecurityViolation, ValidationResult,
    ViolationKind,
};
pub use unit::{LoadConstraint, MetadataProvider, ModUnit, Relation, RelationKind};
