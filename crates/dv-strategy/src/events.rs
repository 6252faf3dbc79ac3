//! Append-only lifecycle log kept in memory for diagnostics.

use crate::StrategyKind;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Load,
    Save,
    Validate,
    Error,
    Cleanup,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Load => "load",
            Self::Save => "save",
            Self::Validate => "validate",
            Self::Error => "error",
            Self::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyEvent {
    pub kind: EventKind,
    pub timestamp: u64,
    pub strategy: StrategyKind,
    pub snapshot: Value,
}

/// Shared between clones of a strategy so the log outlives spawned loads.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StrategyEvent>>>,
}

impl EventLog {
    pub fn record(&self, event: StrategyEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<StrategyEvent> {
        self.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|event| event.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while pushing cannot leave the vector half-written.
    fn lock(&self) -> MutexGuard<'_, Vec<StrategyEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
