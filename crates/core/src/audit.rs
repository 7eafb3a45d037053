use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Capability;
use crate::domain::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// One orchestration event, appended fire-and-forget after every capability
/// call. Sinks must never surface failure to the caller; the user-visible
/// response does not depend on the audit write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: TenantId,
    pub capability: Option<Capability>,
    pub correlation_id: String,
    pub event_type: String,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        capability: Option<Capability>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id,
            capability,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
    use crate::config::Capability;
    use crate::domain::TenantId;

    #[test]
    fn in_memory_sink_records_events_with_tenant_and_capability() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                TenantId("org-7".to_owned()),
                Some(Capability::Chat),
                "req-123",
                "ai.chat",
                "user-42",
                AuditOutcome::Success,
            )
            .with_metadata("model", "gpt-4o-mini"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tenant_id.0, "org-7");
        assert_eq!(events[0].capability, Some(Capability::Chat));
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].metadata.get("model").map(String::as_str), Some("gpt-4o-mini"));
    }
}
