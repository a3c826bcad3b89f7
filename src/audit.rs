//! Audit trail for sync runs and ledger writes.
//!
//! The engine reports what it did through a [`SyncAuditLogger`]. The default
//! [`TracingAuditLogger`] emits one INFO event per entry on the
//! `gatesync::audit` target; plug in your own to persist them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

use crate::gateway::{GatewayId, RecordKind};
use crate::ledger::EntryType;

/// Audit event types for sync operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAuditEvent {
    /// A run started for one gateway and kind.
    SyncStarted {
        gateway: GatewayId,
        kind: RecordKind,
        window: String,
    },
    /// A run finished, possibly with per-record failures.
    SyncCompleted {
        gateway: GatewayId,
        kind: RecordKind,
        created: u64,
        updated: u64,
        unchanged: u64,
        failed: u64,
    },
    /// A run stopped before finishing.
    SyncAborted {
        gateway: GatewayId,
        kind: RecordKind,
        reason: String,
    },
    /// One record could not be transformed or stored.
    RecordRejected {
        gateway: GatewayId,
        kind: RecordKind,
        external_id: Option<String>,
        reason: String,
    },
    /// A new ledger entry was written.
    LedgerPosted {
        gateway: GatewayId,
        payment_ref: String,
        entry_type: EntryType,
        gross: Decimal,
        fee: Decimal,
    },
    /// A ledger write was skipped because the key already existed.
    LedgerDuplicate {
        gateway: GatewayId,
        idempotency_key: String,
    },
    /// A manual trigger was refused.
    TriggerRejected {
        gateway: GatewayId,
        kind: RecordKind,
        reason: String,
    },
}

impl SyncAuditEvent {
    /// Event kind as a string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncStarted { .. } => "sync_started",
            Self::SyncCompleted { .. } => "sync_completed",
            Self::SyncAborted { .. } => "sync_aborted",
            Self::RecordRejected { .. } => "record_rejected",
            Self::LedgerPosted { .. } => "ledger_posted",
            Self::LedgerDuplicate { .. } => "ledger_duplicate",
            Self::TriggerRejected { .. } => "trigger_rejected",
        }
    }
}

impl fmt::Display for SyncAuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncStarted { gateway, kind, window } => {
                write!(f, "Sync started: gateway={}, kind={}, window={}", gateway, kind, window)
            }
            Self::SyncCompleted { gateway, kind, created, updated, unchanged, failed } => {
                write!(
                    f,
                    "Sync completed: gateway={}, kind={}, created={}, updated={}, unchanged={}, failed={}",
                    gateway, kind, created, updated, unchanged, failed
                )
            }
            Self::SyncAborted { gateway, kind, reason } => {
                write!(f, "Sync aborted: gateway={}, kind={}, reason={}", gateway, kind, reason)
            }
            Self::RecordRejected { gateway, kind, external_id, reason } => {
                write!(
                    f,
                    "Record rejected: gateway={}, kind={}, id={}, reason={}",
                    gateway,
                    kind,
                    external_id.as_deref().unwrap_or("<unknown>"),
                    reason
                )
            }
            Self::LedgerPosted { gateway, payment_ref, entry_type, gross, fee } => {
                write!(
                    f,
                    "Ledger posted: gateway={}, payment={}, type={}, gross={}, fee={}",
                    gateway, payment_ref, entry_type, gross, fee
                )
            }
            Self::LedgerDuplicate { gateway, idempotency_key } => {
                write!(f, "Ledger duplicate skipped: gateway={}, key={}", gateway, idempotency_key)
            }
            Self::TriggerRejected { gateway, kind, reason } => {
                write!(f, "Trigger rejected: gateway={}, kind={}, reason={}", gateway, kind, reason)
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implementations should swallow their own failures; auditing never
/// aborts a sync.
#[async_trait]
pub trait SyncAuditLogger: Send + Sync {
    async fn log(&self, event: SyncAuditEvent);
}

/// Audit logger that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

#[async_trait]
impl SyncAuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: SyncAuditEvent) {}
}

/// Logs audit events through `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl SyncAuditLogger for TracingAuditLogger {
    async fn log(&self, event: SyncAuditEvent) {
        tracing::info!(
            target: "gatesync::audit",
            event_type = %event.kind(),
            "{}", event
        );
    }
}

/// Captures events in memory so tests can assert on them.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLogger {
    events: std::sync::Arc<tokio::sync::Mutex<Vec<SyncAuditEvent>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SyncAuditEvent> {
        self.events.lock().await.clone()
    }

    /// Kinds of the captured events, in order.
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(SyncAuditEvent::kind).collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SyncAuditLogger for RecordingAuditLogger {
    async fn log(&self, event: SyncAuditEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_logger_keeps_order() {
        let logger = RecordingAuditLogger::new();
        logger
            .log(SyncAuditEvent::SyncStarted {
                gateway: GatewayId::Asaas,
                kind: RecordKind::Payment,
                window: "2024-01-01..2024-01-31".into(),
            })
            .await;
        logger
            .log(SyncAuditEvent::LedgerDuplicate {
                gateway: GatewayId::Asaas,
                idempotency_key: "charge:1".into(),
            })
            .await;

        assert_eq!(logger.kinds().await, vec!["sync_started", "ledger_duplicate"]);
    }

    #[tokio::test]
    async fn test_noop_logger() {
        NoOpAuditLogger
            .log(SyncAuditEvent::SyncAborted {
                gateway: GatewayId::Pagarme,
                kind: RecordKind::Customer,
                reason: "auth".into(),
            })
            .await;
    }

    #[test]
    fn test_event_display() {
        let event = SyncAuditEvent::RecordRejected {
            gateway: GatewayId::MercadoPago,
            kind: RecordKind::Payment,
            external_id: None,
            reason: "missing amount".into(),
        };
        assert_eq!(
            event.to_string(),
            "Record rejected: gateway=mercado_pago, kind=payment, id=<unknown>, reason=missing amount"
        );
    }
}
