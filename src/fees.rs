//! Tiered fee schedule.
//!
//! The fee charged on a payment depends on the merchant's gross volume (GMV)
//! for the calendar month so far. Tiers are half-open ranges `[gmv_min, gmv_max)`
//! that must tile `[0, ∞)` with no gaps or overlaps, and the fee may never
//! increase as volume grows.
//!
//! ```rust
//! use gatesync::fees::TierSchedule;
//! use rust_decimal::Decimal;
//!
//! let schedule = TierSchedule::builder()
//!     .up_to(Decimal::new(10_000, 0), Decimal::new(199, 2))
//!     .up_to(Decimal::new(50_000, 0), Decimal::new(149, 2))
//!     .rest(Decimal::new(99, 2))
//!     .build()
//!     .unwrap();
//!
//! let quote = schedule.fee_for(Decimal::new(12_000, 0));
//! assert_eq!(quote.tier_number, 2);
//! ```

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GatesyncError, Result};
use crate::money::percent_of;

/// One band of the schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub tier_number: u32,
    pub gmv_min: Decimal,
    /// Exclusive upper bound. `None` means unbounded.
    #[serde(default)]
    pub gmv_max: Option<Decimal>,
    pub fee_percent: Decimal,
}

impl FeeTier {
    #[must_use]
    pub fn contains(&self, gmv: Decimal) -> bool {
        gmv >= self.gmv_min && self.gmv_max.is_none_or(|max| gmv < max)
    }
}

/// The tier and rate that apply at a given GMV.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub tier_number: u32,
    pub fee_percent: Decimal,
}

impl FeeQuote {
    /// Fee on `gross`, rounded to the cent.
    #[must_use]
    pub fn fee_on(&self, gross: Decimal) -> Decimal {
        percent_of(gross, self.fee_percent)
    }
}

/// How far the merchant is into the current tier, for dashboards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TierProgress {
    pub gmv: Decimal,
    pub current: FeeTier,
    pub next: Option<FeeTier>,
    /// GMV still needed to reach the next tier.
    pub remaining_to_next: Option<Decimal>,
    /// Share of the current tier's range already covered, 0..=100.
    pub progress_percent: Option<Decimal>,
}

/// A validated, ordered set of fee tiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeeTier>", into = "Vec<FeeTier>")]
pub struct TierSchedule {
    // Non-empty and sorted by gmv_min once validated.
    tiers: Vec<FeeTier>,
}

impl TierSchedule {
    /// Validate and wrap a list of tiers. Order of the input does not matter.
    pub fn new(mut tiers: Vec<FeeTier>) -> Result<Self> {
        tiers.sort_by(|a, b| a.gmv_min.cmp(&b.gmv_min));
        validate(&tiers)?;
        Ok(Self { tiers })
    }

    #[must_use]
    pub fn builder() -> TierScheduleBuilder {
        TierScheduleBuilder::default()
    }

    /// Parse a JSON array of tiers, e.g. from `GATESYNC_TIER_SCHEDULE`.
    pub fn from_json(json: &str) -> Result<Self> {
        let tiers: Vec<FeeTier> = serde_json::from_str(json)
            .map_err(|e| GatesyncError::InvalidTierSchedule(format!("not a tier list: {}", e)))?;
        Self::new(tiers)
    }

    #[must_use]
    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// The tier whose range contains `gmv`. Negative GMV is treated as zero.
    #[must_use]
    pub fn tier_for(&self, gmv: Decimal) -> &FeeTier {
        let gmv = gmv.max(Decimal::ZERO);
        let last = self.tiers.len() - 1;
        self.tiers
            .iter()
            .find(|tier| tier.contains(gmv))
            .unwrap_or(&self.tiers[last])
    }

    #[must_use]
    pub fn fee_for(&self, gmv: Decimal) -> FeeQuote {
        let tier = self.tier_for(gmv);
        FeeQuote {
            tier_number: tier.tier_number,
            fee_percent: tier.fee_percent,
        }
    }

    #[must_use]
    pub fn next_tier(&self, tier_number: u32) -> Option<&FeeTier> {
        let idx = self.tiers.iter().position(|t| t.tier_number == tier_number)?;
        self.tiers.get(idx + 1)
    }

    #[must_use]
    pub fn progress(&self, gmv: Decimal) -> TierProgress {
        let gmv = gmv.max(Decimal::ZERO);
        let current = self.tier_for(gmv).clone();
        let next = self.next_tier(current.tier_number).cloned();

        let (remaining_to_next, progress_percent) = match current.gmv_max {
            Some(max) => {
                let span = max - current.gmv_min;
                let covered = gmv - current.gmv_min;
                let percent = if span.is_zero() {
                    Decimal::ONE_HUNDRED
                } else {
                    (covered * Decimal::ONE_HUNDRED / span).round_dp(2)
                };
                (Some(max - gmv), Some(percent))
            }
            None => (None, None),
        };

        TierProgress {
            gmv,
            current,
            next,
            remaining_to_next,
            progress_percent,
        }
    }
}

impl Default for TierSchedule {
    /// 1.99% up to 10k, 1.49% up to 50k, 0.99% up to 200k, 0.69% beyond.
    fn default() -> Self {
        let tiers = vec![
            FeeTier {
                tier_number: 1,
                gmv_min: Decimal::ZERO,
                gmv_max: Some(Decimal::new(10_000, 0)),
                fee_percent: Decimal::new(199, 2),
            },
            FeeTier {
                tier_number: 2,
                gmv_min: Decimal::new(10_000, 0),
                gmv_max: Some(Decimal::new(50_000, 0)),
                fee_percent: Decimal::new(149, 2),
            },
            FeeTier {
                tier_number: 3,
                gmv_min: Decimal::new(50_000, 0),
                gmv_max: Some(Decimal::new(200_000, 0)),
                fee_percent: Decimal::new(99, 2),
            },
            FeeTier {
                tier_number: 4,
                gmv_min: Decimal::new(200_000, 0),
                gmv_max: None,
                fee_percent: Decimal::new(69, 2),
            },
        ];
        Self { tiers }
    }
}

impl TryFrom<Vec<FeeTier>> for TierSchedule {
    type Error = GatesyncError;

    fn try_from(tiers: Vec<FeeTier>) -> Result<Self> {
        Self::new(tiers)
    }
}

impl From<TierSchedule> for Vec<FeeTier> {
    fn from(schedule: TierSchedule) -> Self {
        schedule.tiers
    }
}

fn invalid(msg: impl Into<String>) -> GatesyncError {
    GatesyncError::InvalidTierSchedule(msg.into())
}

fn validate(tiers: &[FeeTier]) -> Result<()> {
    let Some(first) = tiers.first() else {
        return Err(invalid("at least one tier is required"));
    };
    if !first.gmv_min.is_zero() {
        return Err(invalid(format!(
            "first tier must start at 0, starts at {}",
            first.gmv_min
        )));
    }

    for tier in tiers {
        if tier.fee_percent < Decimal::ZERO || tier.fee_percent > Decimal::ONE_HUNDRED {
            return Err(invalid(format!(
                "tier {} fee {}% is outside 0..=100",
                tier.tier_number, tier.fee_percent
            )));
        }
        // Rates are stored as whole basis points.
        if tier.fee_percent.normalize().scale() > 2 {
            return Err(invalid(format!(
                "tier {} fee {}% has more than 2 decimal places",
                tier.tier_number, tier.fee_percent
            )));
        }
        if let Some(max) = tier.gmv_max.filter(|max| *max <= tier.gmv_min) {
            return Err(invalid(format!(
                "tier {} has an empty range [{}, {})",
                tier.tier_number, tier.gmv_min, max
            )));
        }
    }

    for pair in tiers.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        let Some(lower_max) = lower.gmv_max else {
            return Err(invalid(format!(
                "tier {} is unbounded but tier {} follows it",
                lower.tier_number, upper.tier_number
            )));
        };
        if lower_max < upper.gmv_min {
            return Err(invalid(format!(
                "gap between {} and {}",
                lower_max, upper.gmv_min
            )));
        }
        if lower_max > upper.gmv_min {
            return Err(invalid(format!(
                "tiers {} and {} overlap",
                lower.tier_number, upper.tier_number
            )));
        }
        if upper.fee_percent > lower.fee_percent {
            return Err(invalid(format!(
                "fee rises from {}% to {}% as volume grows",
                lower.fee_percent, upper.fee_percent
            )));
        }
    }

    let mut numbers: Vec<u32> = tiers.iter().map(|t| t.tier_number).collect();
    numbers.sort_unstable();
    numbers.dedup();
    if numbers.len() != tiers.len() {
        return Err(invalid("tier numbers must be unique"));
    }

    if tiers.last().is_some_and(|t| t.gmv_max.is_some()) {
        return Err(invalid("last tier must be unbounded"));
    }

    Ok(())
}

/// Builder for contiguous schedules. Each call starts where the previous
/// tier ended, so gaps and overlaps cannot be expressed.
#[derive(Debug, Default)]
pub struct TierScheduleBuilder {
    tiers: Vec<FeeTier>,
    floor: Decimal,
}

impl TierScheduleBuilder {
    /// Add a tier from the current floor up to (excluding) `gmv_max`.
    #[must_use]
    pub fn up_to(mut self, gmv_max: Decimal, fee_percent: Decimal) -> Self {
        self.push(Some(gmv_max), fee_percent);
        self.floor = gmv_max;
        self
    }

    /// Add the final, unbounded tier.
    #[must_use]
    pub fn rest(mut self, fee_percent: Decimal) -> Self {
        self.push(None, fee_percent);
        self
    }

    fn push(&mut self, gmv_max: Option<Decimal>, fee_percent: Decimal) {
        let tier_number = self.tiers.len() as u32 + 1;
        self.tiers.push(FeeTier {
            tier_number,
            gmv_min: self.floor,
            gmv_max,
            fee_percent,
        });
    }

    pub fn build(self) -> Result<TierSchedule> {
        TierSchedule::new(self.tiers)
    }
}

/// Midnight UTC on the first day of `at`'s month.
pub fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tier(n: u32, min: &str, max: Option<&str>, fee: &str) -> FeeTier {
        FeeTier {
            tier_number: n,
            gmv_min: dec(min),
            gmv_max: max.map(dec),
            fee_percent: dec(fee),
        }
    }

    #[test]
    fn test_default_schedule_is_valid() {
        let schedule = TierSchedule::default();
        assert!(TierSchedule::new(schedule.tiers().to_vec()).is_ok());
        assert_eq!(schedule.tiers().len(), 4);
    }

    #[test]
    fn test_fee_for_boundaries() {
        let schedule = TierSchedule::default();
        assert_eq!(schedule.fee_for(Decimal::ZERO).tier_number, 1);
        assert_eq!(schedule.fee_for(dec("9999.99")).tier_number, 1);
        // Upper bound is exclusive.
        assert_eq!(schedule.fee_for(dec("10000")).tier_number, 2);
        assert_eq!(schedule.fee_for(dec("199999.99")).tier_number, 3);
        assert_eq!(schedule.fee_for(dec("5000000")).tier_number, 4);
        assert_eq!(schedule.fee_for(dec("-5")).tier_number, 1);
    }

    #[test]
    fn test_fee_never_increases_with_volume() {
        let schedule = TierSchedule::default();
        let mut previous = schedule.fee_for(Decimal::ZERO).fee_percent;
        let mut gmv = Decimal::ZERO;
        while gmv < dec("300000") {
            let fee = schedule.fee_for(gmv).fee_percent;
            assert!(fee <= previous, "fee rose at gmv {}", gmv);
            previous = fee;
            gmv += dec("2500");
        }
    }

    #[test]
    fn test_builder_matches_default() {
        let built = TierSchedule::builder()
            .up_to(dec("10000"), dec("1.99"))
            .up_to(dec("50000"), dec("1.49"))
            .up_to(dec("200000"), dec("0.99"))
            .rest(dec("0.69"))
            .build()
            .unwrap();
        assert_eq!(built, TierSchedule::default());
    }

    #[test]
    fn test_rejects_gap() {
        let err = TierSchedule::new(vec![
            tier(1, "0", Some("100"), "2"),
            tier(2, "150", None, "1"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_rejects_overlap() {
        let err = TierSchedule::new(vec![
            tier(1, "0", Some("100"), "2"),
            tier(2, "50", None, "1"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_rejects_increasing_fee() {
        let err = TierSchedule::new(vec![
            tier(1, "0", Some("100"), "1"),
            tier(2, "100", None, "2"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("rises"));
    }

    #[test]
    fn test_rejects_bounded_last_tier_and_bad_start() {
        assert!(TierSchedule::new(vec![tier(1, "0", Some("100"), "1")]).is_err());
        assert!(TierSchedule::new(vec![tier(1, "10", None, "1")]).is_err());
        assert!(TierSchedule::new(vec![]).is_err());
        assert!(TierSchedule::builder().build().is_err());
    }

    #[test]
    fn test_rejects_sub_basis_point_fee() {
        let err = TierSchedule::new(vec![
            tier(1, "0", Some("100"), "2.345"),
            tier(2, "100", None, "1"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("decimal places"));

        // Trailing zeros are not extra precision.
        assert!(
            TierSchedule::new(vec![
                tier(1, "0", Some("100"), "2.3400"),
                tier(2, "100", None, "1"),
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_from_json_sorts_input() {
        let json = r#"[
            {"tier_number": 2, "gmv_min": "1000", "fee_percent": "1.0"},
            {"tier_number": 1, "gmv_min": "0", "gmv_max": "1000", "fee_percent": "2.5"}
        ]"#;
        let schedule = TierSchedule::from_json(json).unwrap();
        assert_eq!(schedule.tiers()[0].tier_number, 1);
        assert_eq!(schedule.fee_for(dec("1500")).fee_percent, dec("1.0"));
        assert!(TierSchedule::from_json("{}").is_err());
    }

    #[test]
    fn test_progress() {
        let schedule = TierSchedule::default();
        let progress = schedule.progress(dec("30000"));
        assert_eq!(progress.current.tier_number, 2);
        assert_eq!(progress.next.as_ref().map(|t| t.tier_number), Some(3));
        assert_eq!(progress.remaining_to_next, Some(dec("20000")));
        assert_eq!(progress.progress_percent, Some(dec("50")));

        let top = schedule.progress(dec("250000"));
        assert_eq!(top.current.tier_number, 4);
        assert!(top.next.is_none());
        assert!(top.remaining_to_next.is_none());
    }

    #[test]
    fn test_month_start() {
        let at = Utc.with_ymd_and_hms(2024, 3, 17, 15, 4, 5).unwrap();
        assert_eq!(month_start(at), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }
}
