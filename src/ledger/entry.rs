//! Ledger entry types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::gateway::{GatewayId, PaymentMethod};

/// What moved money.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Charge,
    /// A standalone fee with no gross of its own.
    Fee,
    Refund,
    /// Funds paid out by a gateway, net of the gateway's cut.
    Settlement,
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Fee => "fee",
            Self::Refund => "refund",
            Self::Settlement => "settlement",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "charge" => Some(Self::Charge),
            "fee" => Some(Self::Fee),
            "refund" => Some(Self::Refund),
            "settlement" => Some(Self::Settlement),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement status. Only moves forward: pending, settled, refunded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Settled,
    Refunded,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "settled" => Some(Self::Settled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Settled => 1,
            Self::Refunded => 2,
        }
    }

    /// Whether `self -> next` is allowed. Staying put is always allowed.
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger line about to be written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub entry_type: EntryType,
    /// Local payment the entry belongs to.
    pub payment_ref: String,
    /// Gateway-side id of the payment (or refund).
    pub external_ref: String,
    pub gateway: GatewayId,
    pub payment_method: Option<PaymentMethod>,
    pub currency: String,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub fee_percent: Decimal,
    pub tier_number: Option<u32>,
    pub status: EntryStatus,
    /// Unique per economic event; the store refuses a second insert.
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// A persisted ledger line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub entry_type: EntryType,
    pub payment_ref: String,
    pub external_ref: String,
    pub gateway: GatewayId,
    pub payment_method: Option<PaymentMethod>,
    pub currency: String,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub fee_percent: Decimal,
    pub tier_number: Option<u32>,
    pub status: EntryStatus,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(id: i64, entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            entry_type: entry.entry_type,
            payment_ref: entry.payment_ref,
            external_ref: entry.external_ref,
            gateway: entry.gateway,
            payment_method: entry.payment_method,
            currency: entry.currency,
            gross_amount: entry.gross_amount,
            fee_amount: entry.fee_amount,
            net_amount: entry.net_amount,
            fee_percent: entry.fee_percent,
            tier_number: entry.tier_number,
            status: entry.status,
            idempotency_key: entry.idempotency_key,
            occurred_at: entry.occurred_at,
            created_at,
        }
    }

    /// `net == gross - fee` for charges, settlements, fees and adjustments;
    /// refunds carry a negative gross and a reversed fee, so
    /// `net == gross + fee`.
    pub fn balances(&self) -> bool {
        match self.entry_type {
            EntryType::Refund => self.net_amount == self.gross_amount + self.fee_amount,
            EntryType::Charge
            | EntryType::Fee
            | EntryType::Settlement
            | EntryType::Adjustment => self.net_amount == self.gross_amount - self.fee_amount,
        }
    }
}

/// Idempotency key of the charge for a payment.
pub fn charge_key(payment_ref: &str) -> String {
    format!("charge:{}", payment_ref)
}

/// Idempotency key of one refund against a payment.
pub fn refund_key(payment_ref: &str, refund_ref: &str) -> String {
    format!("refund:{}:{}", payment_ref, refund_ref)
}

pub fn adjustment_key(payment_ref: &str, adjustment_ref: &str) -> String {
    format!("adjustment:{}:{}", payment_ref, adjustment_ref)
}

pub fn fee_key(payment_ref: &str, fee_ref: &str) -> String {
    format!("fee:{}:{}", payment_ref, fee_ref)
}

/// Idempotency key of one gateway payout.
pub fn settlement_key(gateway: GatewayId, settlement_ref: &str) -> String {
    format!("settlement:{}:{}", gateway, settlement_ref)
}
