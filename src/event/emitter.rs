//! EventEmitter Trait - fire-and-forget event publication
//!
//! Real EventLog in production, NoopEmitter or a custom sink in tests.

use super::log::{EventKind, EventLog};

/// Publisher for run lifecycle signals; no acknowledgement or backpressure.
pub trait EventEmitter: Send + Sync {
    /// Emit an event and return its ID
    fn emit(&self, kind: EventKind) -> u64;
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        EventLog::emit(self, kind)
    }
}

/// No-op emitter (always returns 0)
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn skipped(node: &str) -> EventKind {
        EventKind::NodeSkipped {
            node: Arc::from(node),
            condition: "validation.passed".to_string(),
        }
    }

    #[test]
    fn event_emitter_trait_is_object_safe() {
        fn accepts_emitter(_: &dyn EventEmitter) {}

        accepts_emitter(&EventLog::new());
        accepts_emitter(&NoopEmitter::new());
    }

    #[test]
    fn eventlog_through_arc_dyn() {
        let log = EventLog::new();
        let emitter: Arc<dyn EventEmitter> = Arc::new(log.clone());

        assert_eq!(emitter.emit(skipped("render")), 0);
        assert_eq!(emitter.emit(skipped("review")), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn noop_emitter_always_returns_zero() {
        let noop = NoopEmitter::new();
        assert_eq!(noop.emit(skipped("a")), 0);
        assert_eq!(noop.emit(skipped("b")), 0);
    }

    #[test]
    fn noop_emitter_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEmitter>();
    }
}
