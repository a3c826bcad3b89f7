//! The fee ledger.
//!
//! [`LedgerWriter`] turns paid and refunded payments into ledger entries.
//! Every entry satisfies the balance rule (`net = gross - fee`, refunds
//! mirror it), and each economic event is written at most once: the
//! idempotency key is checked up front and enforced again by the store.

mod entry;

pub use entry::{
    EntryStatus, EntryType, LedgerEntry, NewLedgerEntry, adjustment_key, charge_key, fee_key,
    refund_key, settlement_key,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{NoOpAuditLogger, SyncAuditEvent, SyncAuditLogger};
use crate::error::Result;
use crate::fees::{FeeQuote, TierSchedule, month_start};
use crate::gateway::{GatewayId, PaymentMethod};
use crate::money::round_cents;
use crate::storage::{LedgerInsert, SyncStore};

/// Ledger rule violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger: gross amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Ledger: fee must not be negative, got {0}")]
    NegativeFee(Decimal),

    #[error("Ledger: fee {fee} exceeds gross {gross}")]
    FeeExceedsGross { gross: Decimal, fee: Decimal },

    #[error("Ledger: no charge recorded for payment {0}")]
    NoCharge(String),

    #[error("Ledger: refund of {requested} exceeds refundable {remaining} on payment {payment_ref}")]
    RefundExceedsCharge {
        payment_ref: String,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Ledger: status cannot move from {from} to {to}")]
    InvalidTransition { from: EntryStatus, to: EntryStatus },

    #[error("Ledger: store failure: {0}")]
    Store(String),
}

/// How much of the original fee a refund gives back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundFeePolicy {
    /// Reverse the fee in proportion to the refunded amount.
    #[default]
    Proportional,
    /// Keep the whole fee; refunds reverse gross only.
    Retain,
}

impl std::str::FromStr for RefundFeePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proportional" => Ok(Self::Proportional),
            "retain" => Ok(Self::Retain),
            other => Err(format!("unknown refund fee policy: {}", other)),
        }
    }
}

/// A paid payment to record.
#[derive(Clone, Debug, PartialEq)]
pub struct ChargeRequest {
    /// Local payment id.
    pub payment_ref: String,
    /// Gateway payment id.
    pub external_ref: String,
    pub gateway: GatewayId,
    pub gross_amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
    pub occurred_at: DateTime<Utc>,
}

/// Money returned on a previously charged payment.
#[derive(Clone, Debug, PartialEq)]
pub struct RefundRequest {
    pub payment_ref: String,
    /// Distinguishes multiple refunds on one payment.
    pub refund_ref: String,
    /// `None` refunds whatever is still refundable.
    pub amount: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Manual correction with an explicit fee.
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentRequest {
    pub payment_ref: String,
    pub adjustment_ref: String,
    pub gateway: GatewayId,
    pub currency: String,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// A standalone fee on a payment, such as an anticipation or chargeback fee.
#[derive(Clone, Debug, PartialEq)]
pub struct FeeRequest {
    pub payment_ref: String,
    pub fee_ref: String,
    pub gateway: GatewayId,
    pub currency: String,
    pub fee_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// A payout from a gateway: `gross` collected, `fee` kept by the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementRequest {
    /// Gateway payout id.
    pub settlement_ref: String,
    pub gateway: GatewayId,
    pub currency: String,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Result of a post: the entry, and whether this call created it.
#[derive(Clone, Debug, PartialEq)]
pub struct Posting {
    pub entry: LedgerEntry,
    pub created: bool,
}

impl Posting {
    fn from_insert(insert: LedgerInsert) -> Self {
        let created = insert.is_inserted();
        Self {
            entry: insert.into_entry(),
            created,
        }
    }
}

/// Writes ledger entries through a [`SyncStore`].
#[derive(Clone)]
pub struct LedgerWriter<S> {
    store: S,
    schedule: Arc<TierSchedule>,
    refund_policy: RefundFeePolicy,
    audit: Arc<dyn SyncAuditLogger>,
}

impl<S: SyncStore> LedgerWriter<S> {
    pub fn new(store: S, schedule: Arc<TierSchedule>) -> Self {
        Self {
            store,
            schedule,
            refund_policy: RefundFeePolicy::default(),
            audit: Arc::new(NoOpAuditLogger),
        }
    }

    #[must_use]
    pub fn with_refund_policy(mut self, policy: RefundFeePolicy) -> Self {
        self.refund_policy = policy;
        self
    }

    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<dyn SyncAuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn schedule(&self) -> &TierSchedule {
        &self.schedule
    }

    /// Month-to-date GMV before `at`: charges from the first of `at`'s month
    /// up to, not including, `at`.
    pub async fn gmv_before(&self, at: DateTime<Utc>) -> Result<Decimal> {
        self.store.charged_volume(month_start(at), at).await
    }

    /// The tier and rate a charge at `at` would get.
    pub async fn quote(&self, at: DateTime<Utc>) -> Result<FeeQuote> {
        let gmv = self.gmv_before(at).await?;
        Ok(self.schedule.fee_for(gmv))
    }

    /// Record a charge for a paid payment, at most once per payment.
    ///
    /// A replay returns the stored entry unchanged; the fee is never
    /// recomputed, even if GMV has moved since.
    pub async fn post_charge(&self, request: ChargeRequest) -> Result<Posting> {
        let gross = round_cents(request.gross_amount);
        if gross <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(request.gross_amount).into());
        }

        let key = charge_key(&request.payment_ref);
        if let Some(existing) = self.store.find_ledger_by_key(&key).await? {
            self.log_duplicate(&existing).await;
            return Ok(Posting {
                entry: existing,
                created: false,
            });
        }

        let quote = self.quote(request.occurred_at).await?;
        let fee = quote.fee_on(gross);
        let entry = NewLedgerEntry {
            entry_type: EntryType::Charge,
            payment_ref: request.payment_ref,
            external_ref: request.external_ref,
            gateway: request.gateway,
            payment_method: request.payment_method,
            currency: request.currency,
            gross_amount: gross,
            fee_amount: fee,
            net_amount: gross - fee,
            fee_percent: quote.fee_percent,
            tier_number: Some(quote.tier_number),
            status: EntryStatus::Settled,
            idempotency_key: key,
            occurred_at: request.occurred_at,
        };

        let posting = Posting::from_insert(self.store.insert_ledger(&entry).await?);
        if posting.created {
            tracing::info!(
                target: "gatesync::ledger",
                payment_ref = %posting.entry.payment_ref,
                gross = %posting.entry.gross_amount,
                fee = %posting.entry.fee_amount,
                tier = quote.tier_number,
                "Posted charge"
            );
            self.audit
                .log(SyncAuditEvent::LedgerPosted {
                    gateway: posting.entry.gateway,
                    payment_ref: posting.entry.payment_ref.clone(),
                    entry_type: EntryType::Charge,
                    gross: posting.entry.gross_amount,
                    fee: posting.entry.fee_amount,
                })
                .await;
        } else {
            // Lost a race with a concurrent poster; the store kept theirs.
            self.log_duplicate(&posting.entry).await;
        }
        Ok(posting)
    }

    /// Record a (partial or full) refund against an existing charge.
    pub async fn post_refund(&self, request: RefundRequest) -> Result<Posting> {
        let key = refund_key(&request.payment_ref, &request.refund_ref);
        if let Some(existing) = self.store.find_ledger_by_key(&key).await? {
            self.log_duplicate(&existing).await;
            return Ok(Posting {
                entry: existing,
                created: false,
            });
        }

        let history = self.store.ledger_for_payment(&request.payment_ref).await?;
        let charge = history
            .iter()
            .find(|e| e.entry_type == EntryType::Charge)
            .ok_or_else(|| LedgerError::NoCharge(request.payment_ref.clone()))?;
        let prior: Vec<&LedgerEntry> = history
            .iter()
            .filter(|e| e.entry_type == EntryType::Refund)
            .collect();

        let refunded: Decimal = prior.iter().map(|e| -e.gross_amount).sum();
        let fee_returned: Decimal = prior.iter().map(|e| e.fee_amount).sum();
        let remaining = charge.gross_amount - refunded;

        let amount = round_cents(request.amount.unwrap_or(remaining));
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }
        if amount > remaining {
            return Err(LedgerError::RefundExceedsCharge {
                payment_ref: request.payment_ref,
                requested: amount,
                remaining,
            }
            .into());
        }

        let final_refund = amount == remaining;
        let fee_reversed = match self.refund_policy {
            RefundFeePolicy::Retain => Decimal::ZERO,
            // The last refund takes whatever fee is left so totals reverse exactly.
            RefundFeePolicy::Proportional if final_refund => charge.fee_amount - fee_returned,
            RefundFeePolicy::Proportional => {
                round_cents(charge.fee_amount * amount / charge.gross_amount)
            }
        };

        let gross = -amount;
        let entry = NewLedgerEntry {
            entry_type: EntryType::Refund,
            payment_ref: request.payment_ref.clone(),
            external_ref: charge.external_ref.clone(),
            gateway: charge.gateway,
            payment_method: charge.payment_method,
            currency: charge.currency.clone(),
            gross_amount: gross,
            fee_amount: fee_reversed,
            net_amount: gross + fee_reversed,
            fee_percent: charge.fee_percent,
            tier_number: charge.tier_number,
            status: EntryStatus::Settled,
            idempotency_key: key,
            occurred_at: request.occurred_at,
        };

        let posting = Posting::from_insert(self.store.insert_ledger(&entry).await?);
        if !posting.created {
            self.log_duplicate(&posting.entry).await;
            return Ok(posting);
        }

        tracing::info!(
            target: "gatesync::ledger",
            payment_ref = %request.payment_ref,
            amount = %amount,
            fee_reversed = %fee_reversed,
            final_refund,
            "Posted refund"
        );
        self.audit
            .log(SyncAuditEvent::LedgerPosted {
                gateway: charge.gateway,
                payment_ref: request.payment_ref.clone(),
                entry_type: EntryType::Refund,
                gross,
                fee: fee_reversed,
            })
            .await;

        if final_refund {
            self.transition(charge.id, charge.status, EntryStatus::Refunded)
                .await?;
        }
        Ok(posting)
    }

    /// Record a manual adjustment. `net = gross - fee` like a charge.
    pub async fn post_adjustment(&self, request: AdjustmentRequest) -> Result<Posting> {
        let gross = round_cents(request.gross_amount);
        let fee = round_cents(request.fee_amount);
        let entry = NewLedgerEntry {
            entry_type: EntryType::Adjustment,
            idempotency_key: adjustment_key(&request.payment_ref, &request.adjustment_ref),
            payment_ref: request.payment_ref,
            external_ref: request.adjustment_ref,
            gateway: request.gateway,
            payment_method: None,
            currency: request.currency,
            gross_amount: gross,
            fee_amount: fee,
            net_amount: gross - fee,
            fee_percent: Decimal::ZERO,
            tier_number: None,
            status: EntryStatus::Settled,
            occurred_at: request.occurred_at,
        };

        let posting = Posting::from_insert(self.store.insert_ledger(&entry).await?);
        if posting.created {
            tracing::info!(
                target: "gatesync::ledger",
                payment_ref = %posting.entry.payment_ref,
                gross = %gross,
                fee = %fee,
                "Posted adjustment"
            );
        }
        Ok(posting)
    }

    /// Record a fee charged on its own. The entry has zero gross, so its
    /// net is the negated fee.
    pub async fn post_fee(&self, request: FeeRequest) -> Result<Posting> {
        let fee = round_cents(request.fee_amount);
        if fee < Decimal::ZERO {
            return Err(LedgerError::NegativeFee(request.fee_amount).into());
        }
        let entry = NewLedgerEntry {
            entry_type: EntryType::Fee,
            idempotency_key: fee_key(&request.payment_ref, &request.fee_ref),
            payment_ref: request.payment_ref,
            external_ref: request.fee_ref,
            gateway: request.gateway,
            payment_method: None,
            currency: request.currency,
            gross_amount: Decimal::ZERO,
            fee_amount: fee,
            net_amount: -fee,
            fee_percent: Decimal::ZERO,
            tier_number: None,
            status: EntryStatus::Settled,
            occurred_at: request.occurred_at,
        };
        self.insert_and_log(entry).await
    }

    /// Record a gateway payout, at most once per gateway payout id.
    pub async fn post_settlement(&self, request: SettlementRequest) -> Result<Posting> {
        let gross = round_cents(request.gross_amount);
        let fee = round_cents(request.fee_amount);
        if gross <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(request.gross_amount).into());
        }
        if fee < Decimal::ZERO {
            return Err(LedgerError::NegativeFee(request.fee_amount).into());
        }
        if fee > gross {
            return Err(LedgerError::FeeExceedsGross { gross, fee }.into());
        }
        let entry = NewLedgerEntry {
            entry_type: EntryType::Settlement,
            idempotency_key: settlement_key(request.gateway, &request.settlement_ref),
            payment_ref: request.settlement_ref.clone(),
            external_ref: request.settlement_ref,
            gateway: request.gateway,
            payment_method: None,
            currency: request.currency,
            gross_amount: gross,
            fee_amount: fee,
            net_amount: gross - fee,
            fee_percent: Decimal::ZERO,
            tier_number: None,
            status: EntryStatus::Settled,
            occurred_at: request.occurred_at,
        };
        self.insert_and_log(entry).await
    }

    async fn insert_and_log(&self, entry: NewLedgerEntry) -> Result<Posting> {
        let posting = Posting::from_insert(self.store.insert_ledger(&entry).await?);
        if !posting.created {
            self.log_duplicate(&posting.entry).await;
            return Ok(posting);
        }
        tracing::info!(
            target: "gatesync::ledger",
            payment_ref = %posting.entry.payment_ref,
            entry_type = %posting.entry.entry_type,
            gross = %posting.entry.gross_amount,
            fee = %posting.entry.fee_amount,
            "Posted ledger entry"
        );
        self.audit
            .log(SyncAuditEvent::LedgerPosted {
                gateway: posting.entry.gateway,
                payment_ref: posting.entry.payment_ref.clone(),
                entry_type: posting.entry.entry_type,
                gross: posting.entry.gross_amount,
                fee: posting.entry.fee_amount,
            })
            .await;
        Ok(posting)
    }

    /// Move an entry's status forward. Backward moves are rejected.
    pub async fn transition(&self, id: i64, from: EntryStatus, to: EntryStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition { from, to }.into());
        }
        if from == to {
            return Ok(());
        }
        self.store.update_ledger_status(id, to).await?;
        tracing::debug!(
            target: "gatesync::ledger",
            entry_id = id,
            from = %from,
            to = %to,
            "Ledger status changed"
        );
        Ok(())
    }

    async fn log_duplicate(&self, existing: &LedgerEntry) {
        tracing::debug!(
            target: "gatesync::ledger",
            key = %existing.idempotency_key,
            "Ledger entry already exists"
        );
        self.audit
            .log(SyncAuditEvent::LedgerDuplicate {
                gateway: existing.gateway,
                idempotency_key: existing.idempotency_key.clone(),
            })
            .await;
    }
}
