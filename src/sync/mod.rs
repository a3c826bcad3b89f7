//! The sync orchestrator.
//!
//! One run pulls one record kind from one gateway over one [`SyncWindow`],
//! page by page. Each record is matched against local storage and created,
//! updated or left alone; paid and refunded payments are posted to the
//! ledger. Bad records are reported and skipped. Gateway failures that
//! survive the retry policy abort the run with the counts reached so far.
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::from_config(registry, store, &config);
//! let report = orchestrator
//!     .run(&SyncRequest::new(GatewayId::Asaas, RecordKind::Payment))
//!     .await?;
//! println!("{} created, {} updated", report.created, report.updated);
//! ```

pub mod guard;
pub mod retry;

pub use guard::{SyncGate, SyncPermit, gate_key};
pub use retry::{RetryPolicy, Retried, calculate_backoff_delay, with_retry};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::audit::{SyncAuditEvent, SyncAuditLogger, TracingAuditLogger};
use crate::config::Config;
use crate::error::{GatesyncError, GatewayError};
use crate::fees::TierSchedule;
use crate::gateway::{
    GatewayClient, GatewayId, GatewayRegistry, PageCursor, PaymentState, RecordKind,
    RecordTransformError, RemoteRecord,
};
use crate::ledger::{ChargeRequest, EntryStatus, LedgerWriter, RefundFeePolicy, RefundRequest};
use crate::matcher::{MatchDecision, RecordMatcher};
use crate::storage::{LocalRecord, LocalRecordFields, SyncStore};
use crate::window::{DEFAULT_LOOKBACK_DAYS, SyncWindow};

/// Refund reference used for refunds discovered by sync.
pub const SYNC_REFUND_REF: &str = "gateway";

/// Inputs to one run. Dates are raw strings; anything that is not a valid
/// `YYYY-MM-DD` pair falls back to the lookback window.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncRequest {
    pub gateway: GatewayId,
    pub kind: RecordKind,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub lookback_days: Option<i64>,
}

impl SyncRequest {
    pub fn new(gateway: GatewayId, kind: RecordKind) -> Self {
        Self {
            gateway,
            kind,
            start_date: None,
            end_date: None,
            lookback_days: None,
        }
    }

    #[must_use]
    pub fn with_dates(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_date = Some(start.into());
        self.end_date = Some(end.into());
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, days: i64) -> Self {
        self.lookback_days = Some(days);
        self
    }
}

/// Where a run's data came from, or why there is none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    /// The gateway answered with at least one record.
    Gateway,
    /// The gateway answered, but the window held no records.
    Empty,
    /// The gateway could not be reached or kept failing.
    Unreachable,
    /// The gateway rejected the credentials.
    AuthRejected,
    /// The integration is disabled or has no credentials.
    NotConfigured,
    /// The trigger was refused before anything ran.
    Rejected,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Empty => "empty",
            Self::Unreachable => "unreachable",
            Self::AuthRejected => "auth_rejected",
            Self::NotConfigured => "not_configured",
            Self::Rejected => "rejected",
        }
    }

    fn from_gateway_error(error: &GatewayError) -> Self {
        match error {
            GatewayError::NotConfigured { .. } => Self::NotConfigured,
            GatewayError::Auth { .. } => Self::AuthRejected,
            _ => Self::Unreachable,
        }
    }
}

impl std::fmt::Display for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counts for one run. `processed` counts every item the gateway returned,
/// including the ones listed in `errors`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncReport {
    pub gateway: GatewayId,
    pub kind: RecordKind,
    pub window: SyncWindow,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errors: Vec<String>,
    pub ledger_posted: u64,
    pub pages: u32,
    pub retries: u32,
    pub source: SyncSource,
}

impl SyncReport {
    pub fn new(gateway: GatewayId, kind: RecordKind, window: SyncWindow) -> Self {
        Self {
            gateway,
            kind,
            window,
            processed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            errors: Vec::new(),
            ledger_posted: 0,
            pages: 0,
            retries: 0,
            source: SyncSource::Empty,
        }
    }

    pub fn failed(&self) -> u64 {
        self.errors.len() as u64
    }
}

/// A run that stopped early. `partial` holds what was done before the error.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SyncAbort {
    pub error: GatesyncError,
    pub partial: SyncReport,
}

/// Drives sync runs against a registry of gateways and a store.
#[derive(Clone)]
pub struct SyncOrchestrator<S> {
    registry: GatewayRegistry,
    matcher: RecordMatcher<S>,
    ledger: LedgerWriter<S>,
    retry: RetryPolicy,
    default_lookback: i64,
    audit: Arc<dyn SyncAuditLogger>,
}

impl<S: SyncStore + Clone> SyncOrchestrator<S> {
    pub fn new(registry: GatewayRegistry, store: S, schedule: Arc<TierSchedule>) -> Self {
        let audit: Arc<dyn SyncAuditLogger> = Arc::new(TracingAuditLogger);
        Self {
            registry,
            matcher: RecordMatcher::new(store.clone()),
            ledger: LedgerWriter::new(store, schedule).with_audit_logger(audit.clone()),
            retry: RetryPolicy::default(),
            default_lookback: DEFAULT_LOOKBACK_DAYS,
            audit,
        }
    }

    pub fn from_config(registry: GatewayRegistry, store: S, config: &Config) -> Self {
        Self::new(registry, store, Arc::new(config.fees.schedule.clone()))
            .with_retry_policy(RetryPolicy::from_config(&config.sync))
            .with_default_lookback(config.sync.lookback_days)
            .with_refund_policy(config.fees.refund_fee_policy)
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_default_lookback(mut self, days: i64) -> Self {
        self.default_lookback = days;
        self
    }

    #[must_use]
    pub fn with_refund_policy(mut self, policy: RefundFeePolicy) -> Self {
        self.ledger = self.ledger.with_refund_policy(policy);
        self
    }

    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<dyn SyncAuditLogger>) -> Self {
        self.ledger = self.ledger.with_audit_logger(audit.clone());
        self.audit = audit;
        self
    }

    pub fn ledger(&self) -> &LedgerWriter<S> {
        &self.ledger
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn default_lookback(&self) -> i64 {
        self.default_lookback
    }

    /// Resolve the window a request would use today.
    pub fn resolve_window(&self, request: &SyncRequest, today: NaiveDate) -> SyncWindow {
        SyncWindow::resolve(
            request.start_date.as_deref(),
            request.end_date.as_deref(),
            request.lookback_days,
            self.default_lookback,
            today,
        )
    }

    pub async fn run(&self, request: &SyncRequest) -> Result<SyncReport, SyncAbort> {
        self.run_at(request, Utc::now().date_naive()).await
    }

    /// Run with an explicit "today" for the lookback fallback.
    pub async fn run_at(
        &self,
        request: &SyncRequest,
        today: NaiveDate,
    ) -> Result<SyncReport, SyncAbort> {
        let (gateway, kind) = (request.gateway, request.kind);
        let window = self.resolve_window(request, today);
        let mut report = SyncReport::new(gateway, kind, window);

        let client = match self.configured_client(gateway) {
            Ok(client) => client,
            Err(error) => {
                report.source = SyncSource::NotConfigured;
                return Err(self.abort(error.into(), report).await);
            }
        };

        tracing::info!(
            target: "gatesync::sync",
            gateway = %gateway,
            kind = %kind,
            window = %window,
            "Sync run started"
        );
        self.audit
            .log(SyncAuditEvent::SyncStarted {
                gateway,
                kind,
                window: window.to_string(),
            })
            .await;

        let mut cursor: Option<PageCursor> = None;
        let mut seen_cursors: HashSet<PageCursor> = HashSet::new();
        loop {
            let operation = format!("fetch_{}", kind);
            let fetched = with_retry(&self.retry, gateway, &operation, || {
                client.fetch_page(kind, &window, cursor.as_ref())
            })
            .await;

            let page = match fetched {
                Ok(retried) => {
                    report.retries += retried.retries;
                    retried.value
                }
                Err(error) => {
                    report.source = SyncSource::from_gateway_error(&error);
                    return Err(self.abort(error.into(), report).await);
                }
            };
            report.pages += 1;

            for item in page.items {
                report.processed += 1;
                if let Err(error) = self.process_item(gateway, item, &mut report).await {
                    return Err(self.abort(error, report).await);
                }
            }

            match page.next {
                None => break,
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    tracing::warn!(
                        target: "gatesync::sync",
                        gateway = %gateway,
                        kind = %kind,
                        cursor = ?next,
                        "Gateway repeated a page cursor; stopping pagination"
                    );
                    break;
                }
                Some(next) => cursor = Some(next),
            }
        }

        if report.processed > 0 {
            report.source = SyncSource::Gateway;
        }

        tracing::info!(
            target: "gatesync::sync",
            gateway = %gateway,
            kind = %kind,
            window = %window,
            processed = report.processed,
            created = report.created,
            updated = report.updated,
            failed = report.failed(),
            ledger_posted = report.ledger_posted,
            "Sync run completed"
        );
        self.audit
            .log(SyncAuditEvent::SyncCompleted {
                gateway,
                kind,
                created: report.created,
                updated: report.updated,
                unchanged: report.unchanged,
                failed: report.failed(),
            })
            .await;

        Ok(report)
    }

    fn configured_client(&self, gateway: GatewayId) -> Result<Arc<dyn GatewayClient>, GatewayError> {
        let not_configured = GatewayError::NotConfigured { gateway };
        if !self.registry.is_enabled(gateway) {
            return Err(not_configured);
        }
        match self.registry.get(gateway) {
            Some(client) if client.is_configured() => Ok(client),
            _ => Err(not_configured),
        }
    }

    /// Handle one page item. Record-scoped failures land in `report.errors`;
    /// anything returned here aborts the run.
    async fn process_item(
        &self,
        gateway: GatewayId,
        item: Result<RemoteRecord, RecordTransformError>,
        report: &mut SyncReport,
    ) -> Result<(), GatesyncError> {
        let remote = match item {
            Ok(remote) => remote,
            Err(error) => {
                self.reject(gateway, report, error.external_id.clone(), error.to_string())
                    .await;
                return Ok(());
            }
        };

        let fields = match LocalRecordFields::from_remote(gateway, &remote) {
            Ok(fields) => fields,
            Err(error) => {
                self.reject(gateway, report, error.external_id.clone(), error.to_string())
                    .await;
                return Ok(());
            }
        };

        let reconciled = match self.matcher.reconcile(&fields).await {
            Ok(reconciled) => reconciled,
            Err(error) if error.is_record_scoped() => {
                self.reject(gateway, report, Some(fields.external_id), error.to_string())
                    .await;
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match reconciled.decision {
            MatchDecision::Create => report.created += 1,
            MatchDecision::Update => report.updated += 1,
            MatchDecision::Unchanged => report.unchanged += 1,
        }

        if fields.kind == RecordKind::Payment {
            if let Err(error) = self.post_payment(&remote, &reconciled.record, report).await {
                if !error.is_record_scoped() {
                    return Err(error);
                }
                self.reject(gateway, report, Some(fields.external_id), error.to_string())
                    .await;
            }
        }

        Ok(())
    }

    /// Post ledger entries a payment's state calls for. Every call is safe to
    /// repeat: the ledger ignores events it already holds.
    async fn post_payment(
        &self,
        remote: &RemoteRecord,
        local: &LocalRecord,
        report: &mut SyncReport,
    ) -> Result<(), GatesyncError> {
        let state = remote.payment_state().unwrap_or(PaymentState::Unknown);
        if !matches!(state, PaymentState::Paid | PaymentState::Refunded) {
            return Ok(());
        }
        if local.amount <= rust_decimal::Decimal::ZERO {
            tracing::debug!(
                target: "gatesync::sync",
                external_id = %local.external_id,
                "Skipping ledger for zero-amount payment"
            );
            return Ok(());
        }

        let payment_ref = local.id.to_string();
        let charge = self
            .ledger
            .post_charge(ChargeRequest {
                payment_ref: payment_ref.clone(),
                external_ref: local.external_id.clone(),
                gateway: local.gateway,
                gross_amount: local.amount,
                currency: local.currency.clone(),
                payment_method: local.payment_method,
                occurred_at: local.occurred_at,
            })
            .await?;
        if charge.created {
            report.ledger_posted += 1;
        }

        // A charge already refunded in full (by sync or another caller) has
        // nothing left for the gateway's refund to cover.
        if state == PaymentState::Refunded && charge.entry.status != EntryStatus::Refunded {
            let refund = self
                .ledger
                .post_refund(RefundRequest {
                    payment_ref,
                    refund_ref: SYNC_REFUND_REF.to_string(),
                    amount: None,
                    occurred_at: local.occurred_at,
                })
                .await?;
            if refund.created {
                report.ledger_posted += 1;
            }
        }
        Ok(())
    }

    async fn reject(
        &self,
        gateway: GatewayId,
        report: &mut SyncReport,
        external_id: Option<String>,
        reason: String,
    ) {
        tracing::warn!(
            target: "gatesync::sync",
            gateway = %gateway,
            kind = %report.kind,
            window = %report.window,
            external_id = external_id.as_deref().unwrap_or("<unknown>"),
            reason = %reason,
            "Skipping record"
        );
        self.audit
            .log(SyncAuditEvent::RecordRejected {
                gateway,
                kind: report.kind,
                external_id,
                reason: reason.clone(),
            })
            .await;
        report.errors.push(reason);
    }

    async fn abort(&self, error: GatesyncError, partial: SyncReport) -> SyncAbort {
        tracing::error!(
            target: "gatesync::sync",
            gateway = %partial.gateway,
            kind = %partial.kind,
            window = %partial.window,
            processed = partial.processed,
            error = %error,
            "Sync run aborted"
        );
        self.audit
            .log(SyncAuditEvent::SyncAborted {
                gateway: partial.gateway,
                kind: partial.kind,
                reason: error.safe_message(),
            })
            .await;
        SyncAbort { error, partial }
    }
}
