//! Lifecycle events and the sinks that receive them.

use crate::lifecycle::LifecyclePhase;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Something that happened to a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModEvent {
    ModLoaded {
        mod_id: String,
        version: String,
    },
    ModUnloaded {
        mod_id: String,
    },
    ModEnabled {
        mod_id: String,
    },
    ModDisabled {
        mod_id: String,
    },
    PhaseStarted {
        mod_id: String,
        group: String,
        phase: LifecyclePhase,
        instance: String,
    },
    PhaseSucceeded {
        mod_id: String,
        group: String,
        phase: LifecyclePhase,
        instance: String,
    },
    PhaseFailed {
        mod_id: String,
        group: String,
        phase: LifecyclePhase,
        instance: String,
        error: String,
    },
    ResolutionWarning {
        message: String,
    },
    ResolutionError {
        message: String,
    },
}

impl ModEvent {
    /// The mod this event concerns, if any.
    pub fn mod_id(&self) -> Option<&str> {
        match self {
            ModEvent::ModLoaded { mod_id, .. }
            | ModEvent::ModUnloaded { mod_id }
            | ModEvent::ModEnabled { mod_id }
            | ModEvent::ModDisabled { mod_id }
            | ModEvent::PhaseStarted { mod_id, .. }
            | ModEvent::PhaseSucceeded { mod_id, .. }
            | ModEvent::PhaseFailed { mod_id, .. } => Some(mod_id),
            ModEvent::ResolutionWarning { .. } | ModEvent::ResolutionError { .. } => None,
        }
    }
}

/// Receiver of mod events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ModEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ModEvent) {
        match event {
            ModEvent::ModLoaded { mod_id, version } => info!(mod_id = %mod_id, "Loaded mod v{}", version),
            ModEvent::ModUnloaded { mod_id } => info!(mod_id = %mod_id, "Unloaded mod"),
            ModEvent::ModEnabled { mod_id } => info!(mod_id = %mod_id, "Enabled mod"),
            ModEvent::ModDisabled { mod_id } => info!(mod_id = %mod_id, "Disabled mod"),
            ModEvent::PhaseStarted {
                mod_id,
                group,
                phase,
                instance,
            } => debug!(mod_id = %mod_id, group = %group, phase = ?phase, "Starting {}", instance),
            ModEvent::PhaseSucceeded {
                mod_id,
                group,
                phase,
                instance,
            } => debug!(mod_id = %mod_id, group = %group, phase = ?phase, "Completed {}", instance),
            ModEvent::PhaseFailed {
                mod_id,
                group,
                phase,
                instance,
                error,
            } => error!(
                mod_id = %mod_id,
                group = %group,
                phase = ?phase,
                "Instance {} failed: {}",
                instance,
                error
            ),
            ModEvent::ResolutionWarning { message } => warn!("Resolution warning: {}", message),
            ModEvent::ResolutionError { message } => error!("Resolution error: {}", message),
        }
    }
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ModEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ModEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ModEvent) {
        // Receiver gone means nobody is listening
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ModEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(ModEvent::ModEnabled {
            mod_id: "a".to_string(),
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.mod_id(), Some("a"));
    }

    #[test]
    fn test_channel_sink_without_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(ModEvent::ResolutionWarning {
            message: "ignored".to_string(),
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = ModEvent::PhaseFailed {
            mod_id: "a".to_string(),
            group: "main".to_string(),
            phase: LifecyclePhase::Initialized,
            instance: "A.Main".to_string(),
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase_failed");
        assert_eq!(json["phase"], "initialized");
    }
}
