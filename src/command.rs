//! Command surface: the sync service and its HTTP routes.
//!
//! [`SyncService`] is what a trigger (cron, admin button, webhook) calls.
//! It applies the trigger discipline, runs the orchestrator and folds the
//! outcome into a [`SyncResponse`] that never leaks internal detail.
//!
//! ```rust,ignore
//! let service = SyncService::from_config(registry, store, &config);
//! let app = gatesync::command::routes(service);
//! axum::serve(listener, app).await?;
//! ```

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{SyncAuditEvent, SyncAuditLogger, TracingAuditLogger};
use crate::config::Config;
use crate::error::{GatesyncError, Result};
use crate::fees::{TierProgress, TierSchedule};
use crate::gateway::{GatewayId, GatewayRegistry, RecordKind};
use crate::reporting::{
    GroupBy, LedgerRollup, LedgerSummary, RecordGroupBy, RecordRollup, ReportingAggregator,
};
use crate::storage::SyncStore;
use crate::sync::{SyncGate, SyncOrchestrator, SyncReport, SyncRequest, SyncSource};
use crate::window::{SyncWindow, parse_date};

/// Result of one sync trigger, in the shape callers consume.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub gateway: GatewayId,
    pub kind: RecordKind,
    pub window: SyncWindow,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub source: SyncSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl SyncResponse {
    fn from_report(report: SyncReport) -> Self {
        Self {
            success: true,
            gateway: report.gateway,
            kind: report.kind,
            window: report.window,
            processed: report.processed,
            created: report.created,
            updated: report.updated,
            source: report.source,
            error: None,
            errors: report.errors,
            status: StatusCode::OK,
        }
    }

    fn from_failure(error: &GatesyncError, partial: SyncReport) -> Self {
        Self {
            success: false,
            error: Some(error.safe_message()),
            status: error.status_code(),
            ..Self::from_report(partial)
        }
    }
}

impl IntoResponse for SyncResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Composition of gate, orchestrator and reports over one store.
#[derive(Clone)]
pub struct SyncService<S> {
    orchestrator: SyncOrchestrator<S>,
    gate: SyncGate,
    reports: ReportingAggregator<S>,
    audit: Arc<dyn SyncAuditLogger>,
}

impl<S: SyncStore + Clone> SyncService<S> {
    pub fn new(orchestrator: SyncOrchestrator<S>, gate: SyncGate, store: S) -> Self {
        let schedule = Arc::new(orchestrator.ledger().schedule().clone());
        Self {
            orchestrator,
            gate,
            reports: ReportingAggregator::new(store, schedule),
            audit: Arc::new(TracingAuditLogger),
        }
    }

    pub fn from_config(registry: GatewayRegistry, store: S, config: &Config) -> Self {
        let orchestrator = SyncOrchestrator::from_config(registry, store.clone(), config);
        Self::new(orchestrator, SyncGate::from_config(&config.trigger_limit), store)
    }

    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<dyn SyncAuditLogger>) -> Self {
        self.orchestrator = self.orchestrator.with_audit_logger(audit.clone());
        self.audit = audit;
        self
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<S> {
        &self.orchestrator
    }

    pub fn reports(&self) -> &ReportingAggregator<S> {
        &self.reports
    }

    pub fn schedule(&self) -> &TierSchedule {
        self.orchestrator.ledger().schedule()
    }

    /// Trigger a run. Failures are reported in the response, never raised.
    pub async fn run_sync(&self, request: SyncRequest) -> SyncResponse {
        let (gateway, kind) = (request.gateway, request.kind);

        let _permit = match self.gate.acquire(gateway, kind) {
            Ok(permit) => permit,
            Err(error) => {
                self.audit
                    .log(SyncAuditEvent::TriggerRejected {
                        gateway,
                        kind,
                        reason: error.safe_message(),
                    })
                    .await;
                let window = self
                    .orchestrator
                    .resolve_window(&request, Utc::now().date_naive());
                let mut partial = SyncReport::new(gateway, kind, window);
                partial.source = SyncSource::Rejected;
                return SyncResponse::from_failure(&error, partial);
            }
        };

        match self.orchestrator.run(&request).await {
            Ok(report) => SyncResponse::from_report(report),
            Err(abort) => SyncResponse::from_failure(&abort.error, abort.partial),
        }
    }
}

/// Query string shared by sync and report routes. Everything is optional
/// and lenient: values that do not parse are treated as absent.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub lookback_days: Option<String>,
}

impl WindowQuery {
    fn lookback(&self) -> Option<i64> {
        self.lookback_days.as_deref().and_then(|v| v.trim().parse().ok())
    }

    /// Report window, falling back to `default_lookback` days.
    fn window(&self, default_lookback: i64) -> SyncWindow {
        SyncWindow::resolve(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            self.lookback(),
            default_lookback,
            Utc::now().date_naive(),
        )
    }

    fn into_request(self, gateway: GatewayId, kind: RecordKind) -> SyncRequest {
        let lookback_days = self.lookback();
        SyncRequest {
            gateway,
            kind,
            start_date: self.start_date,
            end_date: self.end_date,
            lookback_days,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TierQuery {
    /// `YYYY-MM-DD`; progress is measured at the end of that day.
    pub as_of: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RollupResponse {
    pub group_by: GroupBy,
    pub window: SyncWindow,
    pub rows: Vec<LedgerRollup>,
    pub summary: LedgerSummary,
}

#[derive(Debug, Serialize)]
pub struct RecordRollupResponse {
    pub kind: RecordKind,
    pub group_by: RecordGroupBy,
    pub window: SyncWindow,
    pub rows: Vec<RecordRollup>,
}

type SharedService<S> = Arc<SyncService<S>>;

/// Routes for the command surface.
pub fn routes<S>(service: SyncService<S>) -> Router
where
    S: SyncStore + Clone + 'static,
{
    Router::new()
        .route("/sync/{gateway}/{kind}", post(run_sync_handler::<S>))
        .route("/reports/{group_by}", get(rollup_handler::<S>))
        .route("/reports/records/{kind}/{group_by}", get(record_rollup_handler::<S>))
        .route("/fees/tier", get(tier_handler::<S>))
        .with_state(Arc::new(service))
}

async fn run_sync_handler<S>(
    State(service): State<SharedService<S>>,
    Path((gateway, kind)): Path<(String, String)>,
    Query(query): Query<WindowQuery>,
) -> std::result::Result<SyncResponse, GatesyncError>
where
    S: SyncStore + Clone + 'static,
{
    let gateway: GatewayId = gateway
        .parse()
        .map_err(|_| GatesyncError::not_found(format!("unknown gateway: {}", gateway)))?;
    let kind: RecordKind = kind
        .parse()
        .map_err(|_| GatesyncError::not_found(format!("unknown record kind: {}", kind)))?;

    Ok(service.run_sync(query.into_request(gateway, kind)).await)
}

async fn rollup_handler<S>(
    State(service): State<SharedService<S>>,
    Path(group_by): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<RollupResponse>>
where
    S: SyncStore + Clone + 'static,
{
    let group_by: GroupBy = group_by.parse()?;
    let window = query.window(service.orchestrator().default_lookback());

    let rows = service.reports().rollup(group_by, &window).await?;
    let summary = service.reports().summary(&window).await?;
    Ok(Json(RollupResponse {
        group_by,
        window,
        rows,
        summary,
    }))
}

async fn record_rollup_handler<S>(
    State(service): State<SharedService<S>>,
    Path((kind, group_by)): Path<(String, String)>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<RecordRollupResponse>>
where
    S: SyncStore + Clone + 'static,
{
    let kind: RecordKind = kind
        .parse()
        .map_err(|_| GatesyncError::not_found(format!("unknown record kind: {}", kind)))?;
    let group_by: RecordGroupBy = group_by.parse()?;
    let window = query.window(service.orchestrator().default_lookback());

    let rows = service.reports().record_rollup(kind, group_by, &window).await?;
    Ok(Json(RecordRollupResponse {
        kind,
        group_by,
        window,
        rows,
    }))
}

async fn tier_handler<S>(
    State(service): State<SharedService<S>>,
    Query(query): Query<TierQuery>,
) -> Result<Json<TierProgress>>
where
    S: SyncStore + Clone + 'static,
{
    let as_of = match query.as_of.as_deref() {
        None => Utc::now(),
        Some(raw) => {
            let day: NaiveDate = parse_date(raw)
                .ok_or_else(|| GatesyncError::bad_request("as_of must be YYYY-MM-DD"))?;
            SyncWindow::new(day, day).end_instant()
        }
    };
    Ok(Json(service.reports().tier_progress(as_of).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGatewayClient;
    use crate::storage::InMemorySyncStore;
    use crate::sync::RetryPolicy;
    use std::time::Duration;

    fn service(enabled: bool, max_triggers: u32) -> SyncService<InMemorySyncStore> {
        let store = InMemorySyncStore::new();
        let registry = GatewayRegistry::new()
            .with_client(Arc::new(ScriptedGatewayClient::new(GatewayId::Asaas)), enabled);
        let orchestrator =
            SyncOrchestrator::new(registry, store.clone(), Arc::new(TierSchedule::default()))
                .with_retry_policy(RetryPolicy::immediate(0));
        SyncService::new(orchestrator, SyncGate::new(max_triggers, Duration::from_secs(120)), store)
    }

    #[tokio::test]
    async fn test_not_configured_is_reported_not_raised() {
        let response = service(false, 3)
            .run_sync(SyncRequest::new(GatewayId::Asaas, RecordKind::Payment))
            .await;
        assert!(!response.success);
        assert_eq!(response.source, SyncSource::NotConfigured);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_throttled_trigger() {
        let service = service(true, 1);
        let request = SyncRequest::new(GatewayId::Asaas, RecordKind::Customer);
        assert!(service.run_sync(request.clone()).await.success);

        let throttled = service.run_sync(request).await;
        assert!(!throttled.success);
        assert_eq!(throttled.source, SyncSource::Rejected);
        assert_eq!(throttled.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_unparseable_lookback_is_absent() {
        let query = WindowQuery {
            start_date: Some("not-a-date".into()),
            end_date: None,
            lookback_days: Some("ten".into()),
        };
        let request = query.into_request(GatewayId::Asaas, RecordKind::Payment);
        assert_eq!(request.lookback_days, None);
        assert_eq!(request.start_date.as_deref(), Some("not-a-date"));
    }

    #[test]
    fn test_response_json_shape() {
        let window = SyncWindow::lookback(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(), 30);
        let response =
            SyncResponse::from_report(SyncReport::new(GatewayId::Pagarme, RecordKind::Payment, window));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["source"], "empty");
        assert!(json.get("error").is_none());
        assert!(json.get("status").is_none());
        assert_eq!(json["errors"], serde_json::json!([]));
    }
}
