//! Error types for the modforge runtime.

use crate::security::ValidationResult;
use thiserror::Error;

/// Errors that can occur in the modforge runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Mod not found at the specified path.
    #[error("Mod not found: {0}")]
    ModNotFound(String),

    /// Failed to parse or validate a mod manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Failed to load a code unit.
    #[error("Bytecode error: {0}")]
    BytecodeError(String),

    /// A permission or blacklist pattern was rejected at registration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery found unreadable manifests or duplicate mod ids.
    #[error("Mod discovery failed: {}", .0.join("; "))]
    Discovery(Vec<String>),

    /// A code unit failed static security validation and was not loaded.
    #[error("Security rejected: {0}")]
    SecurityRejected(ValidationResult),

    /// A transitive dependency matched the blacklist.
    #[error("Dependency '{dependency}' of '{unit}' is blacklisted")]
    DependencyRejected { unit: String, dependency: String },

    /// A referenced code unit could not be found.
    #[error("Unresolved reference '{dependency}' from '{unit}'")]
    UnresolvedReference { unit: String, dependency: String },

    /// The load context has been unloaded.
    #[error("Load context for '{0}' has been disposed")]
    ContextDisposed(String),

    /// A type handle from an unloaded context or an older generation.
    #[error("Stale type handle: {0}")]
    StaleHandle(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Version or version requirement parsing error.
    #[error("Version error: {0}")]
    Version(#[from] semver::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
