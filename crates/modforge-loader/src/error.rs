//! Error types for the mod loader.

use crate::lifecycle::LifecyclePhase;
use crate::resolver::ResolutionIssue;
use modforge_runtime::RuntimeError;
use thiserror::Error;

/// Errors returned by [`ModManager`](crate::ModManager) operations.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// No loaded mod answers to the id.
    #[error("Mod not loaded: {0}")]
    NotLoaded(String),

    /// Resolution produced fatal errors; nothing was loaded.
    #[error("Resolution failed: {}", format_issues(.0))]
    Resolution(Vec<ResolutionIssue>),

    /// The mod passed resolution but could not be loaded.
    #[error("Failed to load mod '{mod_id}': {reason}")]
    LoadFailed { mod_id: String, reason: String },

    /// A mod in the unload chain failed to pre-dispose.
    #[error("Unload of '{mod_id}' blocked by '{blocker}': {reason}")]
    UnloadBlocked {
        mod_id: String,
        blocker: String,
        reason: String,
    },

    /// The mod's teardown has started, so it can no longer be enabled.
    #[error("Mod '{0}' is being unloaded")]
    Retired(String),

    /// Lifecycle substrate fault.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Runtime error.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Faults in the task machinery driving a phase, as opposed to failures
/// reported by mod code.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Phase {phase:?} of {mod_id}/{group} was cancelled while running {instance}")]
    Substrate {
        mod_id: String,
        group: String,
        instance: String,
        phase: LifecyclePhase,
    },
}

fn format_issues(issues: &[ResolutionIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for loader operations.
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;
