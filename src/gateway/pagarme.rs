//! Pagar.me (API v5) adapter.
//!
//! Lists page by number (`page`, `size`, 1-based) and include a
//! `paging.next` link while more results exist. Amounts are integer cents.
//! Payments are read from the charges endpoint.

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

pub const PRODUCTION_URL: &str = "https://api.pagar.me/core/v5";

#[derive(Debug, Clone)]
pub struct PagarmeClient {
    http: GatewayHttp,
    page_size: u32,
}

impl PagarmeClient {
    pub fn new(
        secret_key: Option<SecretString>,
        base_url: Option<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = GatewayHttp::new(
            GatewayId::Pagarme,
            base_url.unwrap_or_else(|| PRODUCTION_URL.to_string()),
            secret_key,
            AuthScheme::BasicKeyAsUser,
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
        let page = match cursor {
            Some(PageCursor::Page(page)) => *page,
            _ => 1,
        };
        let query = [
            ("created_since", window.start_instant().to_rfc3339()),
            ("created_until", window.end_instant().to_rfc3339()),
            ("page", page.to_string()),
            ("size", self.page_size.to_string()),
        ];
        let body = self.http.get_json(path, &query).await?;
        parse_list(&body, page, parse)
    }
}

#[async_trait]
impl GatewayClient for PagarmeClient {
    fn gateway(&self) -> GatewayId {
        GatewayId::Pagarme
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
        self.list("/charges", window, cursor, parse_charge).await
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
    page: u32,
    parse: fn(&Value) -> Result<RemoteRecord, RecordTransformError>,
) -> Result<Page, GatewayError> {
    let data = list_items(body, "data")
        .ok_or_else(|| GatewayError::invalid_response(GatewayId::Pagarme, "missing data array"))?;
    let items: Vec<_> = data.iter().map(parse).collect();

    let has_next = body
        .get("paging")
        .and_then(|p| p.get("next"))
        .and_then(Value::as_str)
        .is_some_and(|link| !link.is_empty());
    let next = (has_next && !data.is_empty()).then_some(PageCursor::Page(page + 1));

    Ok(Page { items, next })
}

fn charge_state(status: &str) -> PaymentState {
    match status {
        "paid" | "overpaid" | "underpaid" => PaymentState::Paid,
        "pending" | "processing" | "authorized_pending_capture" => PaymentState::Pending,
        "refunded" | "chargedback" => PaymentState::Refunded,
        "failed" | "canceled" | "not_authorized" => PaymentState::Failed,
        _ => PaymentState::Unknown,
    }
}

pub(crate) fn parse_charge(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let external_id = item.id()?;
    let status = item.required_str("status")?;
    let method = item
        .str("payment_method")
        .map(|m| PaymentMethod::from_label(&m))
        .unwrap_or(PaymentMethod::Other);
    Ok(RemoteRecord {
        external_id,
        amount: item.minor_amount("amount")?,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["paid_at", "created_at"])?,
        details: RecordDetails::Payment {
            customer_ref: item.str("customer/id"),
            subscription_ref: item.str("invoice/subscription_id"),
            method,
            state: charge_state(&status),
        },
        status,
        raw_payload: item.raw(),
    })
}

/// Subscription price is the sum of its item prices.
fn subscription_amount(item: &Item<'_>) -> Result<Decimal, RecordTransformError> {
    let Some(items) = item.path("items").and_then(Value::as_array) else {
        return item.minor_amount("minimum_price");
    };
    items.iter().try_fold(Decimal::ZERO, |total, sub_item| {
        let line = Item::new(sub_item, "id");
        let price = line
            .minor_amount("pricing_scheme/price")
            .map_err(|e| item.error(e.message))?;
        let quantity = line
            .path("quantity")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        Ok(total + price * Decimal::from(quantity))
    })
}

pub(crate) fn parse_subscription(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let cycle = match (item.str("interval_count"), item.str("interval")) {
        (Some(count), Some(unit)) => Some(format!("{} {}", count, unit)),
        (None, unit) => unit,
        _ => None,
    };
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: item.required_str("status")?,
        amount: subscription_amount(&item)?,
        currency: item.currency("currency"),
        occurred_at: item.timestamp(&["created_at"])?,
        details: RecordDetails::Subscription {
            customer_ref: item.str("customer/id"),
            cycle,
            next_due: item.date("next_billing_at"),
        },
        raw_payload: item.raw(),
    })
}

pub(crate) fn parse_customer(raw: &Value) -> Result<RemoteRecord, RecordTransformError> {
    let item = Item::new(raw, "id");
    let deleted = item.path("delinquent").and_then(Value::as_bool).unwrap_or(false);
    Ok(RemoteRecord {
        external_id: item.id()?,
        status: if deleted { "delinquent" } else { "active" }.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_parse_charges_page() {
        let body = json!({
            "data": [
                {
                    "id": "ch_K8xNV1Pi6i4RbzNV",
                    "code": "ORD-1",
                    "amount": 15990,
                    "status": "paid",
                    "currency": "BRL",
                    "payment_method": "credit_card",
                    "paid_at": "2024-04-02T12:00:00Z",
                    "created_at": "2024-04-02T11:59:00Z",
                    "customer": { "id": "cus_oy9V5RkILtoN4O8E" }
                }
            ],
            "paging": { "total": 11, "next": "https://api.pagar.me/core/v5/charges?page=2&size=1" }
        });
        let page = parse_list(&body, 1, parse_charge).unwrap();
        assert_eq!(page.next, Some(PageCursor::Page(2)));

        let charge = page.items[0].as_ref().unwrap();
        assert_eq!(charge.amount, Decimal::from_str("159.90").unwrap());
        assert_eq!(charge.payment_state(), Some(PaymentState::Paid));
        assert_eq!(charge.payment_method(), Some(PaymentMethod::CreditCard));
        assert_eq!(charge.customer_ref(), Some("cus_oy9V5RkILtoN4O8E"));
    }

    #[test]
    fn test_no_next_link_ends_paging() {
        let body = json!({ "data": [{ "id": "cus_1", "name": "Joao", "created_at": "2024-01-01T00:00:00Z" }], "paging": { "total": 1 } });
        let page = parse_list(&body, 3, parse_customer).unwrap();
        assert!(page.next.is_none());
        assert!(page.items[0].is_ok());
    }

    #[test]
    fn test_subscription_amount_sums_items() {
        let sub = parse_subscription(&json!({
            "id": "sub_1",
            "status": "active",
            "interval": "month",
            "interval_count": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "customer": { "id": "cus_1" },
            "items": [
                { "id": "si_1", "quantity": 2, "pricing_scheme": { "price": 1000 } },
                { "id": "si_2", "pricing_scheme": { "price": 550 } }
            ]
        }))
        .unwrap();
        assert_eq!(sub.amount, Decimal::from_str("25.50").unwrap());
    }

    #[test]
    fn test_charge_states() {
        assert_eq!(charge_state("underpaid"), PaymentState::Paid);
        assert_eq!(charge_state("canceled"), PaymentState::Failed);
        assert_eq!(charge_state("chargedback"), PaymentState::Refunded);
        assert_eq!(charge_state("??"), PaymentState::Unknown);
    }
}
