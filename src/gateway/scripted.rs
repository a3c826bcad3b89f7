//! Scripted gateway for tests.
//!
//! Serves pre-built pages and can inject page-level failures, so sync runs
//! can be exercised without network access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    GatewayClient, GatewayError, GatewayId, Page, PageCursor, PaymentMethod, PaymentState,
    RecordDetails, RecordKind, RecordTransformError, RemoteRecord,
};
use crate::window::SyncWindow;

type ScriptedItem = Result<RemoteRecord, RecordTransformError>;

// Poisoned locks are recovered.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScriptedGatewayClient {
    gateway: GatewayId,
    configured: bool,
    pages: Mutex<HashMap<RecordKind, Vec<Vec<ScriptedItem>>>>,
    failures: Mutex<VecDeque<GatewayError>>,
    calls: AtomicUsize,
}

impl ScriptedGatewayClient {
    pub fn new(gateway: GatewayId) -> Self {
        Self {
            gateway,
            configured: true,
            pages: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A client that reports missing credentials.
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// Serve `records` for `kind`, split into pages of `page_size`.
    pub fn with_records(self, kind: RecordKind, records: Vec<RemoteRecord>, page_size: usize) -> Self {
        self.set_records(kind, records, page_size);
        self
    }

    /// Serve explicit pages, including items that failed to normalize.
    pub fn with_pages(self, kind: RecordKind, pages: Vec<Vec<ScriptedItem>>) -> Self {
        lock(&self.pages).insert(kind, pages);
        self
    }

    /// Replace what the gateway returns, e.g. between two sync runs.
    pub fn set_records(&self, kind: RecordKind, records: Vec<RemoteRecord>, page_size: usize) {
        let pages = records
            .chunks(page_size.max(1))
            .map(|chunk| chunk.iter().cloned().map(Ok).collect())
            .collect();
        lock(&self.pages).insert(kind, pages);
    }

    /// Fail the next fetch with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: GatewayError) {
        lock(&self.failures).push_back(error);
    }

    /// Number of page fetches attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn serve(&self, kind: RecordKind, cursor: Option<&PageCursor>) -> Result<Page, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        let index = match cursor {
            None => 0,
            Some(PageCursor::Page(page)) => *page as usize,
            Some(PageCursor::Offset(offset)) => *offset as usize,
        };
        let pages = lock(&self.pages);
        let Some(kind_pages) = pages.get(&kind) else {
            return Ok(Page::default());
        };
        let items = kind_pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < kind_pages.len()).then(|| PageCursor::Page(index as u32 + 1));
        Ok(Page { items, next })
    }
}

#[async_trait]
impl GatewayClient for ScriptedGatewayClient {
    fn gateway(&self) -> GatewayId {
        self.gateway
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn fetch_subscriptions(
        &self,
        _window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.serve(RecordKind::Subscription, cursor)
    }

    async fn fetch_payments(
        &self,
        _window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.serve(RecordKind::Payment, cursor)
    }

    async fn fetch_customers(
        &self,
        _window: &SyncWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GatewayError> {
        self.serve(RecordKind::Customer, cursor)
    }
}

/// A normalized payment as a gateway would return it.
pub fn payment_record(
    external_id: &str,
    amount: Decimal,
    state: PaymentState,
    occurred_at: DateTime<Utc>,
) -> RemoteRecord {
    let status = match state {
        PaymentState::Paid => "paid",
        PaymentState::Pending => "pending",
        PaymentState::Refunded => "refunded",
        PaymentState::Failed => "failed",
        PaymentState::Unknown => "unknown",
    };
    RemoteRecord {
        external_id: external_id.to_string(),
        status: status.to_string(),
        amount,
        currency: "BRL".to_string(),
        occurred_at,
        details: RecordDetails::Payment {
            customer_ref: None,
            subscription_ref: None,
            method: PaymentMethod::Pix,
            state,
        },
        raw_payload: serde_json::Value::Null,
    }
}

/// A normalized customer as a gateway would return it.
pub fn customer_record(external_id: &str, name: &str, occurred_at: DateTime<Utc>) -> RemoteRecord {
    RemoteRecord {
        external_id: external_id.to_string(),
        status: "active".to_string(),
        amount: Decimal::ZERO,
        currency: "BRL".to_string(),
        occurred_at,
        details: RecordDetails::Customer {
            name: Some(name.to_string()),
            email: None,
        },
        raw_payload: serde_json::Value::Null,
    }
}
