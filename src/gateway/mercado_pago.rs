//! Mercado Pago adapter.
//!
//! Search endpoints page with `offset`/`limit` and report `paging.total`.
//! Payment ids are numeric and amounts are decimal reais.

use async_trait::async_trait;
use chrono::SecondsFormat;
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

pub const PRODUCTION_URL: &str = "https://api.mercadopago.com";

#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    http: GatewayHttp,
    page_size: u32,
}

impl MercadoPagoClient {
    /// Mercado Pago uses the same host for test credentials, so `sandbox`
    /// only changes which access token the caller supplies.
    pub fn new(
        access_token: Option<SecretString>,
        base_url: Option<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = GatewayHttp::new(
            GatewayId::MercadoPago,
            base_url.unwrap_or_else(|| PRODUCTION_URL.to_string()),
            access_token,
            AuthScheme::Bearer,
            timeout,
        )?;
        Ok(Self {
            http,
            page_size: page_size.clamp(1, 100),
        })
    }

    async fn search(
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
            ("range", "date_created".to_string()),
            (
                "begin_date",
                window.start_instant().to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "end_date",
                window.end_instant().to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("sort", "date_created".to_string()),
            ("criteria", "asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        let body = self.http.get_json(path, &query).await?;
        parse_search(&body, offset, parse)
    }
}

#[async_trait]
impl GatewayClient for MercadoPagoClient {
    fn gateway(&self) -> GatewayId {
        GatewayId::MercadoPago
    }

    fn is_configured(&self) -> bool {
        self.http.has_credentials()
    }

    async fn fetch_subscriptions(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.search("/preapproval/search", window, cursor, parse_preapproval)
            .await
    }

    async fn fetch_payments(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.search("/v1/payments/search", window, cursor, parse_payment)
            .await
    }

    async fn fetch_customers(
        &self,
        window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.search("/v1/customers/search", window, cursor, parse_customer)
            .await
    }
}

fn parse_search(
    body: &Value,
    offset: u64,
    parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
) -> Result<Page, GatewayError> {
    let results = list_items(body, "results").ok_or_else(|| {
        GatewayError::invalid_response(GatewayId::MercadoPago, "missing results array")
    })?;
    let items: Vec<_> = results.iter().map(parse).collect();

    let total = body
        .get("paging")
        .and_then(|p| p.get("total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let consumed = offset + results.len() as u64;
    let next = (!results.is_empty() && consumed < total).then_some(PageCursor::Offset(consumed));

    Ok(Page { items, next })
}

fn payment_state(status: &str) -> PaymentState {
    match status {
        "approved" | "authorized" => PaymentState::Paid,
        "pending" | "in_process" | "in_mediation" => PaymentState::Pending,
        "refunded" | "charged_back" => PaymentState::Refunded,
        "rejected" | "cancelled" => PaymentState::Failed,
        _ => PaymentState::Unknown,
    }
}

fn payment_method(item: &Item<'_>) -> PaymentMethod {
    // payment_method_id is more specific ("pix", "bolbradesco", "visa").
    match item.str("payment_method_id").as_deref() {
        Some("pix") => return PaymentMethod::Pix,
        Some("bolbradesco") | Some("pec") => return PaymentMethod::Boleto,
        _ => {}
    }
    item.str("payment_type_id")
        .map(|t| PaymentMethod::from_label(&t))
        .unwrap_or(PaymentMethod::Other)
}

pub(crate) fn parse_payment(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let external_id = item.id()?;
    let status = item.required_str("status")?;
    Ok(RemoteRecord {
        external_id,
        amount: item.major_amount("transaction_amount")?,
        currency: item.currency("currency_id"),
        occurred_at: item.timestamp(&["date_approved", "date_created"])?,
        details: RecordDetails::Payment {
            customer_ref: item.str("payer/id"),
            subscription_ref: item.str("metadata/preapproval_id"),
            method: payment_method(&item),
            state: payment_state(&status),
        },
        status,
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_preapproval(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let cycle = match (
        item.str("auto_recurring/frequency"),
        item.str("auto_recurring/frequency_type"),
    ) {
        (Some(freq), Some(unit)) => Some(format!("{} {}", freq, unit)),
        _ => None,
    };
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: item.required_str("status")?,
        amount: item.major_amount("auto_recurring/transaction_amount")?,
        currency: item.currency("auto_recurring/currency_id"),
        occurred_at: item.timestamp(&["date_created"])?,
        details: RecordDetails::Subscription {
            customer_ref: item.str("payer_id"),
            cycle,
            next_due: item.date("next_payment_date"),
        },
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_customer(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let name = match (item.str("first_name"), item.str("last_name")) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (first, last) => first.or(last),
    };
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: "active".to_string(),
        amount: Decimal::ZERO,
        currency: item.currency("currency_id"),
        occurred_at: item.timestamp(&["date_created", "date_registered"])?,
        details: RecordDetails::Customer {
            name,
            email: item.str("email"),
        },
        raw_payload: item.raw(),
    })
}
