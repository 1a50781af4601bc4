//! Automation and activity sinks
//!
//! Best-effort notification of external collaborators after a successful
//! governance mutation. Sink failures are logged and never roll back the
//! governance transaction.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Domain event emitted after a committed mutation.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: String,
    pub organization_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
}

pub trait EventSink: Send + Sync {
    fn notify(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Default sink: accepts everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: &DomainEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fire-and-forget dispatch; outside the governance failure domain.
pub fn dispatch(sink: &dyn EventSink, event: &DomainEvent) {
    if let Err(e) = sink.notify(event) {
        warn!(
            event_type = %event.event_type,
            organization_id = %event.organization_id,
            error = %e,
            "Event sink notification failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink;

    impl EventSink for FailingSink {
        fn notify(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    struct CountingSink(AtomicUsize);

    impl EventSink for CountingSink {
        fn notify(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event() -> DomainEvent {
        DomainEvent {
            event_type: "application.stage_changed".to_string(),
            organization_id: Uuid::new_v4(),
            entity_type: "application".to_string(),
            entity_id: "app-1".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_sink_failure_does_not_propagate() {
        dispatch(&FailingSink, &event());
    }

    #[test]
    fn test_sink_receives_events() {
        let sink = CountingSink(AtomicUsize::new(0));
        dispatch(&sink, &event());
        dispatch(&sink, &event());
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
