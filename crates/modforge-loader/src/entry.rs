//! Entry points: the code a mod runs through its lifecycle.
//!
//! A mod declares entry groups in its manifest. The group name selects an
//! [`EntryCapability`], and every type listed in the group must be declared
//! as implementing that capability in its code unit. The [`CodeHost`] turns
//! a resolved [`TypeHandle`] into a live [`ModEntry`].

use async_trait::async_trait;
use modforge_runtime::TypeHandle;
use parking_lot::RwLock;
use semver::Version;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The lifecycle capability an entry group implements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryCapability {
    Main,
    Client,
    Server,
    Editor,
    Custom(String),
}

impl EntryCapability {
    /// Capability selected by an entry group name.
    pub fn from_group(group: &str) -> Self {
        match group {
            "main" => EntryCapability::Main,
            "client" => EntryCapability::Client,
            "server" => EntryCapability::Server,
            "editor" => EntryCapability::Editor,
            other => EntryCapability::Custom(other.to_string()),
        }
    }

    /// Tag used in code unit type tables.
    pub fn tag(&self) -> &str {
        match self {
            EntryCapability::Main => "main",
            EntryCapability::Client => "client",
            EntryCapability::Server => "server",
            EntryCapability::Editor => "editor",
            EntryCapability::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for EntryCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which per-frame callbacks an entry wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickHandlers {
    pub update: bool,
    pub fixed_update: bool,
    pub late_update: bool,
}

impl TickHandlers {
    pub const NONE: TickHandlers = TickHandlers {
        update: false,
        fixed_update: false,
        late_update: false,
    };

    pub const ALL: TickHandlers = TickHandlers {
        update: true,
        fixed_update: true,
        late_update: true,
    };

    pub fn handles(&self, kind: TickKind) -> bool {
        match kind {
            TickKind::Update => self.update,
            TickKind::FixedUpdate => self.fixed_update,
            TickKind::LateUpdate => self.late_update,
        }
    }
}

/// The three tick callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickKind {
    Update,
    FixedUpdate,
    LateUpdate,
}

/// What an entry is told about itself when a phase runs.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub mod_id: String,
    pub version: Version,
    pub group: String,
    pub type_name: String,
}

/// A live entry-point instance.
///
/// Every callback has a no-op default, so implementations override only
/// the phases they care about.
#[async_trait]
pub trait ModEntry: Send + Sync {
    /// Capabilities this instance answers to.
    fn capabilities(&self) -> Vec<EntryCapability>;

    async fn initialize(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_initialize(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_dispose(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dispose(&self, _ctx: &EntryContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tick callbacks this instance wants, read once at enable time.
    fn tick_handlers(&self) -> TickHandlers {
        TickHandlers::NONE
    }

    fn update(&self, _dt: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn fixed_update(&self, _dt: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn late_update(&self, _dt: Duration) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates entry instances for resolved types.
pub trait CodeHost: Send + Sync {
    fn instantiate(&self, handle: &TypeHandle) -> anyhow::Result<Arc<dyn ModEntry>>;
}

type EntryFactory = Arc<dyn Fn() -> Arc<dyn ModEntry> + Send + Sync>;

/// A code host that binds qualified type names to Rust constructors.
#[derive(Default)]
pub struct NativeCodeHost {
    factories: RwLock<HashMap<String, EntryFactory>>,
}

impl NativeCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `type_name` to a constructor, replacing any earlier binding.
    pub fn register<F>(&self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ModEntry> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(type_name.into(), Arc::new(factory));
    }

    pub fn unregister(&self, type_name: &str) -> bool {
        self.factories.write().remove(type_name).is_some()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }
}

impl CodeHost for NativeCodeHost {
    fn instantiate(&self, handle: &TypeHandle) -> anyhow::Result<Arc<dyn ModEntry>> {
        let factory = self
            .factories
            .read()
            .get(&handle.type_name)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("No implementation bound for type '{}'", handle.type_name)
            })?;
        Ok(factory())
    }
}

impl fmt::Debug for NativeCodeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<String> = self.factories.read().keys().cloned().collect();
        bound.sort();
        f.debug_struct("NativeCodeHost").field("bound", &bound).finish()
    }
}
