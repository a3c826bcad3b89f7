//! Payment gateway adapters.
//!
//! Each supported gateway gets a [`GatewayClient`] that lists subscriptions,
//! payments and customers for a date window, one page at a time, and turns
//! every item into a [`RemoteRecord`]. Items that cannot be understood come
//! back as [`RecordTransformError`] inside the page so the caller can keep
//! going; only page-level failures are reported as [`GatewayError`].

mod asaas;
mod http;
mod mercado_pago;
mod normalize;
mod pagarme;
mod pagbank;
mod registry;
#[cfg(any(test, feature = "test-utils"))]
mod scripted;

pub use asaas::AsaasClient;
pub use http::{AuthScheme, GatewayHttp};
pub use mercado_pago::MercadoPagoClient;
pub use pagarme::PagarmeClient;
pub use pagbank::PagBankClient;
pub use registry::GatewayRegistry;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{ScriptedGatewayClient, customer_record, payment_record};

pub use crate::error::GatewayError;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::window::SyncWindow;

// ============================================================================
// Identifiers
// ============================================================================

/// Supported gateways.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayId {
    Asaas,
    #[serde(rename = "pagbank")]
    PagBank,
    MercadoPago,
    Pagarme,
}

impl GatewayId {
    pub const ALL: [GatewayId; 4] = [
        GatewayId::Asaas,
        GatewayId::PagBank,
        GatewayId::MercadoPago,
        GatewayId::Pagarme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asaas => "asaas",
            Self::PagBank => "pagbank",
            Self::MercadoPago => "mercado_pago",
            Self::Pagarme => "pagarme",
        }
    }

    /// Name segment used in environment variables (`GATESYNC_ASAAS_API_KEY`).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Asaas => "ASAAS",
            Self::PagBank => "PAGBANK",
            Self::MercadoPago => "MERCADO_PAGO",
            Self::Pagarme => "PAGARME",
        }
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "asaas" => Ok(Self::Asaas),
            "pagbank" | "pagseguro" => Ok(Self::PagBank),
            "mercado_pago" | "mercadopago" => Ok(Self::MercadoPago),
            "pagarme" | "pagar_me" => Ok(Self::Pagarme),
            other => Err(format!("unknown gateway: {}", other)),
        }
    }
}

/// What kind of object a sync run pulls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Subscription,
    Payment,
    Customer,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Subscription,
        RecordKind::Payment,
        RecordKind::Customer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Payment => "payment",
            Self::Customer => "customer",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    /// Accepts singular and plural forms (`payment`, `payments`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subscription" | "subscriptions" => Ok(Self::Subscription),
            "payment" | "payments" => Ok(Self::Payment),
            "customer" | "customers" => Ok(Self::Customer),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

// ============================================================================
// Normalized records
// ============================================================================

/// Normalized payment lifecycle across gateways.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Paid,
    Refunded,
    Failed,
    Unknown,
}

/// Normalized payment method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Boleto,
    CreditCard,
    DebitCard,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Boleto => "boleto",
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::Other => "other",
        }
    }

    /// Lenient parse; anything unrecognized is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "pix" | "bank_transfer" => Self::Pix,
            "boleto" | "ticket" | "bolbradesco" => Self::Boleto,
            "credit_card" | "creditcard" => Self::CreditCard,
            "debit_card" | "debitcard" => Self::DebitCard,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-specific fields of a remote record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetails {
    Subscription {
        customer_ref: Option<String>,
        cycle: Option<String>,
        next_due: Option<NaiveDate>,
    },
    Payment {
        customer_ref: Option<String>,
        subscription_ref: Option<String>,
        method: PaymentMethod,
        state: PaymentState,
    },
    Customer {
        name: Option<String>,
        email: Option<String>,
    },
}

/// A gateway object after normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub external_id: String,
    /// Gateway status string, kept verbatim.
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub details: RecordDetails,
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl RemoteRecord {
    pub fn kind(&self) -> RecordKind {
        match self.details {
            RecordDetails::Subscription { .. } => RecordKind::Subscription,
            RecordDetails::Payment { .. } => RecordKind::Payment,
            RecordDetails::Customer { .. } => RecordKind::Customer,
        }
    }

    pub fn customer_ref(&self) -> Option<&str> {
        match &self.details {
            RecordDetails::Subscription { customer_ref, .. }
            | RecordDetails::Payment { customer_ref, .. } => customer_ref.as_deref(),
            RecordDetails::Customer { .. } => None,
        }
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        match &self.details {
            RecordDetails::Payment { method, .. } => Some(*method),
            _ => None,
        }
    }

    pub fn payment_state(&self) -> Option<PaymentState> {
        match &self.details {
            RecordDetails::Payment { state, .. } => Some(*state),
            _ => None,
        }
    }
}

/// A single gateway item that could not be normalized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("record {}: {message}", .external_id.as_deref().unwrap_or("<unknown>"))]
pub struct RecordTransformError {
    pub external_id: Option<String>,
    pub message: String,
}

impl RecordTransformError {
    pub fn new(external_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            external_id,
            message: message.into(),
        }
    }
}

// ============================================================================
// Paging
// ============================================================================

/// Where the next page starts. Gateways paginate in different ways.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PageCursor {
    Offset(u64),
    Page(u32),
}

/// One page of results.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Result<RemoteRecord, RecordTransformError>>,
    pub next: Option<PageCursor>,
}

impl Page {
    pub fn last(items: Vec<Result<RemoteRecord, RecordTransformError>>) -> Self {
        Self { items, next: None }
    }
}

// ============================================================================
// Client trait
// ============================================================================

/// A gateway the sync engine can pull from.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn gateway(&self) -> GatewayId;

    /// Whether credentials are present. Unconfigured clients are never called.
    fn is_configured(&self) -> bool;

    async fn fetch_subscriptions(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError>;

    async fn fetch_payments(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError>;

    async fn fetch_customers(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError>;

    /// Dispatch on record kind.
    async fn fetch_page(
        &self,
        kind: RecordKind,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        match kind {
            RecordKind::Subscription => self.fetch_subscriptions(window, cursor).await,
            RecordKind::Payment => self.fetch_payments(window, cursor).await,
            RecordKind::Customer => self.fetch_customers(window, cursor).await,
        }
    }
}
