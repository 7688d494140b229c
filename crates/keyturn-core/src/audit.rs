//! Audit event generation.
//!
//! Protocol-integrity failures are reported to the backend audit-log
//! collaborator in addition to being surfaced locally; a replayed or
//! forged frame is a security signal, not just a UX problem. Session
//! lifecycle milestones are recorded alongside so the backend can
//! reconstruct what led up to a failure.
//!
//! Note: key material, tickets, and frame contents are never included
//! in audit events.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::LockId;
use crate::codes::RequestCode;
use crate::errors::SessionFailure;

/// Unix timestamp in seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Audit events emitted by a lock session.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// Secure channel established: ticket accepted by the lock
    SessionEstablished { lock: LockId, timestamp: u64 },

    /// An encrypted command was dispatched
    CommandSent {
        lock: LockId,
        request: RequestCode,
        timestamp: u64,
    },

    /// No connection could be established within the connect window
    ConnectTimedOut { lock: LockId, timestamp: u64 },

    /// The session died; integrity failures always produce this
    SessionFailed {
        lock: LockId,
        failure: SessionFailure,
        timestamp: u64,
    },
}

impl AuditEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            AuditEvent::SessionEstablished { timestamp, .. } => *timestamp,
            AuditEvent::CommandSent { timestamp, .. } => *timestamp,
            AuditEvent::ConnectTimedOut { timestamp, .. } => *timestamp,
            AuditEvent::SessionFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Pluggable audit destination. The production implementation forwards
/// to the backend; tests and the demo use [`MemoryAuditSink`].
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// In-memory audit sink.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.write().await.push(event);
    }
}
