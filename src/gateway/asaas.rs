//! Asaas adapter.
//!
//! Lists are offset-paginated (`offset`, `limit`) and report `hasMore`.
//! Amounts are decimal reais; dates are plain `YYYY-MM-DD`.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::time::Duration;

use super::http::{AuthScheme, GatewayHttp};
use super::normalize::{Item, list_items};
use super::{
    GatewayClient, GatewayError, GatewayId, Page, PageCursor, PaymentMethod, PaymentState,
    RecordDetails, RecordTransformError, RemoteRecord,
};
use crate::window::SyncWindow;

pub const PRODUCTION_URL: &str = "https://api.asaas.com/v3";
pub const SANDBOX_URL: &str = "https://api-sandbox.asaas.com/v3";

#[derive(Debug, Clone)]
pub struct AsaasClient {
    http: GatewayHttp,
    page_size: u32,
}

impl AsaasClient {
    pub fn new(
        api_key: Option<SecretString>,
        base_url: Option<String>,
        sandbox: bool,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let default_url = if sandbox { SANDBOX_URL } else { PRODUCTION_URL };
        let base_url = base_url.unwrap_or_else(|| default_url.to_string());
        let http = GatewayHttp::new(
            GatewayId::Asaas,
            base_url,
            api_key,
            AuthScheme::Header("access_token"),
            timeout,
        )?;
        Ok(Self {
            http,
            page_size: page_size.clamp(1, 100),
        })
    }

    async fn list(
        &self,
        path: &str,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
        parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
    ) -> Result<Page, GatewayError> {
        let offset = match cursor {
            Some(PageCursor::Offset(offset)) => *offset,
            _ => 0,
        };
        let query = [
            ("dateCreated[ge]", window.start.to_string()),
            ("dateCreated[le]", window.end.to_string()),
            ("offset", offset.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        let body = self.http.get_json(path, &query).await?;
        parse_list(&body, offset, parse)
    }
}

#[async_trait]
impl GatewayClient for AsaasClient {
    fn gateway(&self) -> GatewayId {
        GatewayId::Asaas
    }

    fn is_configured(&self) -> bool {
        self.http.has_credentials()
    }

    async fn fetch_subscriptions(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/subscriptions", window, cursor, parse_subscription).await
    }

    async fn fetch_payments(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/payments", window, cursor, parse_payment).await
    }

    async fn fetch_customers(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/customers", window, cursor, parse_customer).await
    }
}

fn parse_list(
    body: &Value,
    offset: u64,
    parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
) -> Result<Page, GatewayError> {
    let data = list_items(body, "data")
        .ok_or_else(|| GatewayError::invalid_response(GatewayId::Asaas, "missing data array"))?;
    let items: Vec<_> = data.iter().map(parse).collect();

    let has_more = body.get("hasMore").and_then(Value::as_bool).unwrap_or(false);
    let next = (has_more && !data.is_empty())
        .then(|| PageCursor::Offset(offset + data.len() as u64));

    Ok(Page { items, next })
}

/// Asaas billing status to the normalized lifecycle.
fn payment_state(status: &str) -> PaymentState {
    match status {
        "RECEIVED" | "CONFIRMED" | "RECEIVED_IN_CASH" => PaymentState::Paid,
        "PENDING" | "OVERDUE" | "AWAITING_RISK_ANALYSIS" | "AUTHORIZED" => PaymentState::Pending,
        "REFUNDED" => PaymentState::Refunded,
        // Money has not left yet; an open dispute can still be won.
        "REFUND_REQUESTED" | "REFUND_IN_PROGRESS" => PaymentState::Paid,
        "CHARGEBACK_REQUESTED" | "CHARGEBACK_DISPUTE" | "AWAITING_CHARGEBACK_REVERSAL" => {
            PaymentState::Paid
        }
        "DELETED" | "DUNNING_REQUESTED" | "DUNNING_RECEIVED" => PaymentState::Failed,
        _ => PaymentState::Unknown,
    }
}

fn payment_method(billing_type: Option<&str>) -> PaymentMethod {
    match billing_type {
        Some("UNDEFINED") | None => PaymentMethod::Other,
        Some(label) => PaymentMethod::from_label(label),
    }
}

pub(crate) fn parse_payment(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let external_id = item.id()?;
    let status = item.required_str("status")?;
    Ok(RemoteRecord {
        external_id,
        amount: item.major_amount("value")?,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["confirmedDate", "paymentDate", "clientPaymentDate", "dateCreated"])?,
        details: RecordDetails::Payment {
            customer_ref: item.str("customer"),
            subscription_ref: item.str("subscription"),
            method: payment_method(item.str("billingType").as_deref()),
            state: payment_state(&status),
        },
        status,
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_subscription(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: item.required_str("status")?,
        amount: item.major_amount("value")?,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["dateCreated"])?,
        details: RecordDetails::Subscription {
            customer_ref: item.str("customer"),
            cycle: item.str("cycle"),
            next_due: item.date("nextDueDate"),
        },
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_customer(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let deleted = item.path("deleted").and_then(Value::as_bool).unwrap_or(false);
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: if deleted { "deleted" } else { "active" }.to_string(),
        amount: rust_decimal::Decimal::ZERO,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["dateCreated"])?,
        details: RecordDetails::Customer {
            name: item.str("name"),
            email: item.str("email"),
        },
        raw_payload: item.raw(),
    })
}
