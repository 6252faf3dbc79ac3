//! State and bookkeeping common to every strategy.

use crate::StrategyKind;
use crate::context::ContextUpdate;
use crate::context::ValidationContext;
use crate::events::EventKind;
use crate::events::EventLog;
use crate::events::StrategyEvent;
use crate::result::ValidationMetadata;
use dv_core::Clock;
use dv_core::RequestId;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub(crate) struct StrategyBase {
    kind: StrategyKind,
    context: ValidationContext,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl StrategyBase {
    pub(crate) fn new(kind: StrategyKind, context: ValidationContext, clock: Arc<dyn Clock>) -> Self {
        let base = Self {
            kind,
            context,
            events: EventLog::default(),
            clock,
        };
        base.emit(EventKind::Init, base.context.snapshot());
        base
    }

    pub(crate) fn context(&self) -> &ValidationContext {
        &self.context
    }

    pub(crate) fn request_id(&self) -> Option<&RequestId> {
        self.context.request_id.as_ref()
    }

    pub(crate) fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn update_context(&mut self, update: ContextUpdate) {
        self.context.apply(update);
        self.emit(EventKind::Init, self.context.snapshot());
    }

    pub(crate) fn metadata(&self) -> ValidationMetadata {
        let request_id = self
            .request_id()
            .map(ToString::to_string)
            .unwrap_or_default();
        ValidationMetadata::new(self.kind.source(), request_id, self.now_millis())
    }

    pub(crate) fn emit(&self, kind: EventKind, snapshot: Value) {
        debug!(
            strategy = self.kind.as_str(),
            event = kind.as_str(),
            "strategy event"
        );
        self.events.record(StrategyEvent {
            kind,
            timestamp: self.now_millis(),
            strategy: self.kind,
            snapshot,
        });
    }

    pub(crate) fn emit_error(&self, operation: &str, message: &str) {
        self.emit(
            EventKind::Error,
            json!({ "operation": operation, "error": message }),
        );
    }
}

/// Wall time since `started`, saturating for `duration_ms` metadata.
pub(crate) fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
