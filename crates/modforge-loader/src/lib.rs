//! # modforge-loader
//!
//! Resolution and lifecycle orchestration for modforge mods.
//!
//! This crate turns a batch of [`ModUnit`](modforge_runtime::ModUnit)
//! records into running mods:
//!
//! - [`DependencyResolver`] validates relations and computes a load order
//! - [`EntryGroup`] drives one entry group through its lifecycle phases
//! - [`ModManager`] ties resolution, load contexts and lifecycles together
//!
//! ## Lifecycle
//!
//! Every group moves forward only:
//! `None -> Initialized -> PostInitialized -> PreDisposed -> Disposed`.
//! Within a batch, every mod is initialized before any mod is
//! post-initialized. A failing instance is reported and isolated; the rest
//! of its group still advances.

pub mod entry;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod resolver;

pub use entry::{
    CodeHost, EntryCapability, EntryContext, ModEntry, NativeCodeHost, TickHandlers, TickKind,
};
pub use error::{LifecycleError, LoaderError, LoaderResult};
pub use events::{ChannelSink, EventSink, ModEvent, NullSink, TracingSink};
pub use lifecycle::{EntryGroup, InstanceFailure, LifecyclePhase, PhaseOutcome};
pub use manager::{BatchReport, LoadedMod, ModInfo, ModManager, ModOutcome};
pub use resolver::{DependencyResolver, ResolutionIssue, ResolutionResult};
