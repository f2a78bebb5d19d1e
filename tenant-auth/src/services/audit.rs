//! Audit collaborator for security-relevant events.
//!
//! Recording is best-effort: a failing sink is logged and never fails the
//! operation that produced the event.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::models::{AuditEvent, AuditEventType};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error>;
}

/// Emits every event as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        let details = serde_json::to_string(&event.details)?;
        let user_id = event.user_id.as_ref().map(|u| u.as_str()).unwrap_or("");
        let actor = event.actor.as_deref().unwrap_or("");

        match event.event_type {
            AuditEventType::LoginFailed | AuditEventType::RefreshReuseDetected => {
                tracing::warn!(
                    event_type = %event.event_type,
                    tenant_id = %event.tenant_id,
                    user_id = %user_id,
                    actor = %actor,
                    details = %details,
                    "Security event"
                );
            }
            _ => {
                tracing::info!(
                    event_type = %event.event_type,
                    tenant_id = %event.tenant_id,
                    user_id = %user_id,
                    actor = %actor,
                    details = %details,
                    "Audit event"
                );
            }
        }
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit sink mutex poisoned: {}", e))?
            .push(event);
        Ok(())
    }
}
