//! PagBank adapter.
//!
//! Lists are offset-paginated and carry a `result_set` block with the total.
//! Amounts are integer cents under `amount.value`.

use async_trait::async_trait;
use rust_decimal::Decimal;
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

pub const PRODUCTION_URL: &str = "https://api.pagseguro.com";
pub const SANDBOX_URL: &str = "https://sandbox.api.pagseguro.com";

#[derive(Debug, Clone)]
pub struct PagBankClient {
    http: GatewayHttp,
    page_size: u32,
}

impl PagBankClient {
    pub fn new(
        token: Option<SecretString>,
        base_url: Option<String>,
        sandbox: bool,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let default_url = if sandbox { SANDBOX_URL } else { PRODUCTION_URL };
        let http = GatewayHttp::new(
            GatewayId::PagBank,
            base_url.unwrap_or_else(|| default_url.to_string()),
            token,
            AuthScheme::Bearer,
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
        items_field: &str,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
        parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
    ) -> Result<Page, GatewayError> {
        let offset = match cursor {
            Some(PageCursor::Offset(offset)) => *offset,
            _ => 0,
        };
        let query = [
            ("created_at_gte", window.start_instant().to_rfc3339()),
            ("created_at_lt", window.end_instant().to_rfc3339()),
            ("offset", offset.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        let body = self.http.get_json(path, &query).await?;
        parse_list(&body, items_field, offset, parse)
    }
}

#[async_trait]
impl GatewayClient for PagBankClient {
    fn gateway(&self) -> GatewayId {
        GatewayId::PagBank
    }

    fn is_configured(&self) -> bool {
        self.http.has_credentials()
    }

    async fn fetch_subscriptions(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/subscriptions", "subscriptions", window, cursor, parse_subscription)
            .await
    }

    async fn fetch_payments(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/charges", "charges", window, cursor, parse_charge)
            .await
    }

    async fn fetch_customers(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.list("/customers", "customers", window, cursor, parse_customer)
            .await
    }
}

fn parse_list(
    body: &Value,
    items_field: &str,
    offset: u64,
    parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
) -> Result<Page, GatewayError> {
    let data = list_items(body, items_field).ok_or_else(|| {
        GatewayError::invalid_response(GatewayId::PagBank, format!("missing {} array", items_field))
    })?;
    let items: Vec<_> = data.iter().map(parse).collect();

    let total = body
        .get("result_set")
        .and_then(|r| r.get("total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let consumed = offset + data.len() as u64;
    let next = (!data.is_empty() && consumed < total).then_some(PageCursor::Offset(consumed));

    Ok(Page { items, next })
}

fn charge_state(item: &Item<'_>, status: &str) -> PaymentState {
    match status {
        "PAID" | "AVAILABLE" => PaymentState::Paid,
        "AUTHORIZED" | "IN_ANALYSIS" | "WAITING" => PaymentState::Pending,
        "DECLINED" => PaymentState::Failed,
        "CANCELED" => {
            // A canceled charge with refunded money was paid and then returned.
            let refunded = item
                .path("amount/summary/refunded")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if refunded > 0 {
                PaymentState::Refunded
            } else {
                PaymentState::Failed
            }
        }
        _ => PaymentState::Unknown,
    }
}

pub(crate) fn parse_charge(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let external_id = item.id()?;
    let status = item.required_str("status")?;
    let state = charge_state(&item, &status);
    let method = item
        .str("payment_method/type")
        .map(|m| PaymentMethod::from_label(&m))
        .unwrap_or(PaymentMethod::Other);
    Ok(RemoteRecord {
        external_id,
        status,
        amount: item.minor_amount("amount/value")?,
        currency: item.currency("amount/currency"),
        occurred_at: item.timestamp(&["paid_at", "created_at"])?,
        details: RecordDetails::Payment {
            customer_ref: item.str("customer/id"),
            subscription_ref: item.str("subscription/id"),
            method,
            state,
        },
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_subscription(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: item.required_str("status")?,
        amount: item.minor_amount("amount/value")?,
        currency: item.currency("amount/currency"),
        occurred_at: item.timestamp(&["created_at"])?,
        details: RecordDetails::Subscription {
            customer_ref: item.str("customer/id"),
            cycle: item.str("plan/interval/unit"),
            next_due: item.date("next_invoice_at"),
        },
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_customer(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: "active".to_string(),
        amount: Decimal::ZERO,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["created_at"])?,
        details: RecordDetails::Customer {
            name: item.str("name"),
            email: item.str("email"),
        },
        raw_payload: item.raw(),
    })
}
