use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;

use crate::gateway::{GatewayId, RecordTransformError};
use crate::ledger::LedgerError;

/// The main error type for gatesync operations
#[derive(Debug, thiserror::Error)]
pub enum GatesyncError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Gateway authentication failed: {0}")]
    GatewayAuth(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Gateway rate limited: {0}")]
    GatewayRateLimited(String),

    #[error("Gateway returned an unusable response: {0}")]
    GatewayResponse(String),

    #[error(transparent)]
    RecordTransform(#[from] RecordTransformError),

    #[error("Invalid tier schedule: {0}")]
    InvalidTierSchedule(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Too many sync triggers: {0}")]
    TriggerThrottled(String),

    #[error("Sync already in progress: {0}")]
    SyncInProgress(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GatesyncError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_id: String,
}

impl GatesyncError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// HTTP status for the command surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured(_) | Self::BadRequest(_) | Self::InvalidTierSchedule(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GatewayAuth(_) | Self::GatewayResponse(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayRateLimited(_) | Self::TriggerThrottled(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::SyncInProgress(_) => StatusCode::CONFLICT,
            Self::RecordTransform(_) | Self::Ledger(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a message safe to hand back to callers.
    ///
    /// Client-side problems and gateway auth failures keep their detail.
    /// Server-side failures are collapsed to a generic message; the detail
    /// goes to the logs only.
    pub fn safe_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Failures that belong to a single record rather than the whole run.
    pub fn is_record_scoped(&self) -> bool {
        match self {
            Self::RecordTransform(_) => true,
            Self::Ledger(err) => !matches!(err, LedgerError::Store(_)),
            _ => false,
        }
    }
}

impl IntoResponse for GatesyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Request failed"
        );

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Gateway boundary errors
// ============================================================================

/// Errors raised by a gateway client while fetching a page.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Integration disabled or credentials missing.
    NotConfigured { gateway: GatewayId },
    /// Gateway rejected the credentials (401/403).
    Auth { gateway: GatewayId, http_status: u16 },
    /// Gateway asked us to slow down (429).
    RateLimited {
        gateway: GatewayId,
        retry_after: Option<Duration>,
    },
    /// Timeout, connection failure or 5xx.
    Unavailable { gateway: GatewayId, message: String },
    /// The page body could not be understood at all.
    InvalidResponse { gateway: GatewayId, message: String },
}

impl GatewayError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited { .. })
    }

    pub fn gateway(&self) -> GatewayId {
        match self {
            Self::NotConfigured { gateway }
            | Self::Auth { gateway, .. }
            | Self::RateLimited { gateway, .. }
            | Self::Unavailable { gateway, .. }
            | Self::InvalidResponse { gateway, .. } => *gateway,
        }
    }

    pub fn unavailable(gateway: GatewayId, message: impl Into<String>) -> Self {
        Self::Unavailable {
            gateway,
            message: message.into(),
        }
    }

    pub fn invalid_response(gateway: GatewayId, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            gateway,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured { gateway } => write!(f, "{} integration is not configured", gateway),
            Self::Auth {
                gateway,
                http_status,
            } => write!(f, "{} rejected credentials (HTTP {})", gateway, http_status),
            Self::RateLimited {
                gateway,
                retry_after: Some(wait),
            } => write!(f, "{} rate limited, retry after {}s", gateway, wait.as_secs()),
            Self::RateLimited { gateway, .. } => write!(f, "{} rate limited", gateway),
            Self::Unavailable { gateway, message } => write!(f, "{} unavailable: {}", gateway, message),
            Self::InvalidResponse { gateway, message } => {
                write!(f, "{} sent an invalid response: {}", gateway, message)
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for GatesyncError {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::NotConfigured { .. } => GatesyncError::NotConfigured(message),
            GatewayError::Auth { .. } => GatesyncError::GatewayAuth(message),
            GatewayError::RateLimited { .. } => GatesyncError::GatewayRateLimited(message),
            GatewayError::Unavailable { .. } => GatesyncError::GatewayUnavailable(message),
            GatewayError::InvalidResponse { .. } => GatesyncError::GatewayResponse(message),
        }
    }
}

impl From<serde_json::Error> for GatesyncError {
    fn from(err: serde_json::Error) -> Self {
        GatesyncError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

#[cfg(feature = "database")]
impl From<sea_orm::DbErr> for GatesyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        GatesyncError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_gateway_errors_retry() {
        let gateway = GatewayId::Asaas;
        assert!(GatewayError::unavailable(gateway, "timeout").is_retryable());
        assert!(
            GatewayError::RateLimited {
                gateway,
                retry_after: None
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::Auth {
                gateway,
                http_status: 401
            }
            .is_retryable()
        );
        assert!(!GatewayError::NotConfigured { gateway }.is_retryable());
        assert!(!GatewayError::invalid_response(gateway, "not json").is_retryable());
    }

    #[test]
    fn test_gateway_error_maps_to_status() {
        let gateway = GatewayId::Pagarme;
        let err: GatesyncError = GatewayError::NotConfigured { gateway }.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: GatesyncError = GatewayError::Auth {
            gateway,
            http_status: 403,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: GatesyncError = GatewayError::unavailable(gateway, "503").into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_safe_message_hides_internal_detail() {
        let err = GatesyncError::database("connection refused to 10.0.0.3");
        assert_eq!(err.safe_message(), "Internal server error");

        let err = GatesyncError::bad_request("bad gateway name");
        assert_eq!(err.safe_message(), "Bad request: bad gateway name");
    }

    #[test]
    fn test_gateway_auth_is_surfaced_verbatim() {
        let err: GatesyncError = GatewayError::Auth {
            gateway: GatewayId::MercadoPago,
            http_status: 401,
        }
        .into();
        assert_eq!(
            err.safe_message(),
            "Gateway authentication failed: mercado_pago rejected credentials (HTTP 401)"
        );
        assert_eq!(err.safe_message(), err.to_string());
    }

    #[test]
    fn test_record_scoped_errors() {
        let err = GatesyncError::from(RecordTransformError::new(Some("pay_1".into()), "missing value"));
        assert!(err.is_record_scoped());
        assert!(!GatesyncError::database("down").is_record_scoped());
        assert!(!GatesyncError::from(LedgerError::Store("down".into())).is_record_scoped());
        assert!(GatesyncError::from(LedgerError::NoCharge("12".into())).is_record_scoped());
    }
}
