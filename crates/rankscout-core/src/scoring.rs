//! Candidate scoring.
//!
//! Velocity comes from rank through a per-strategy piecewise-linear tier
//! table, stability from price deviation against the 90-day average, and
//! confidence from field coverage, rank source and record age. ROI is a black
//! box behind [`ProfitModel`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{CategoryId, ItemId, Strategy, UtcDateTime};
use crate::parser::{ExtractedProduct, RankSource};

/// Share of the weighted score taken by ROI; velocity takes the rest.
pub const ROI_WEIGHT: f64 = 0.6;

const NEUTRAL_STABILITY: f64 = 50.0;
const FRESH_HOURS: f64 = 24.0;
const STALE_FRESHNESS: f64 = 0.5;

/// Breakpoint of the velocity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityTier {
    pub rank: u64,
    pub score: f64,
}

/// Minimum ROI and velocity for one recommendation tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_roi_percent: f64,
    pub min_velocity: f64,
}

impl TierThreshold {
    const fn new(min_roi_percent: f64, min_velocity: f64) -> Self {
        Self {
            min_roi_percent,
            min_velocity,
        }
    }

    fn admits(&self, roi_percent: f64, velocity: f64) -> bool {
        roi_percent >= self.min_roi_percent && velocity >= self.min_velocity
    }
}

/// Velocity curve and recommendation thresholds of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    /// Sorted by rank ascending.
    pub velocity_tiers: Vec<VelocityTier>,
    pub strong_buy: TierThreshold,
    pub buy: TierThreshold,
    pub consider: TierThreshold,
}

impl StrategyProfile {
    fn from_table(tiers: &[(u64, f64)], thresholds: [TierThreshold; 3]) -> Self {
        let [strong_buy, buy, consider] = thresholds;
        Self {
            velocity_tiers: tiers
                .iter()
                .map(|(rank, score)| VelocityTier {
                    rank: *rank,
                    score: *score,
                })
                .collect(),
            strong_buy,
            buy,
            consider,
        }
    }

    pub fn velocity() -> Self {
        Self::from_table(
            &[
                (1, 100.0),
                (10_000, 85.0),
                (50_000, 60.0),
                (100_000, 35.0),
                (250_000, 10.0),
                (500_000, 0.0),
            ],
            [
                TierThreshold::new(30.0, 70.0),
                TierThreshold::new(20.0, 50.0),
                TierThreshold::new(10.0, 30.0),
            ],
        )
    }

    pub fn balanced() -> Self {
        Self::from_table(
            &[
                (1, 100.0),
                (25_000, 85.0),
                (100_000, 65.0),
                (250_000, 40.0),
                (500_000, 15.0),
                (1_000_000, 0.0),
            ],
            [
                TierThreshold::new(40.0, 60.0),
                TierThreshold::new(25.0, 40.0),
                TierThreshold::new(15.0, 20.0),
            ],
        )
    }

    pub fn patient() -> Self {
        Self::from_table(
            &[
                (1, 100.0),
                (50_000, 90.0),
                (200_000, 70.0),
                (500_000, 45.0),
                (1_000_000, 20.0),
                (2_000_000, 0.0),
            ],
            [
                TierThreshold::new(60.0, 40.0),
                TierThreshold::new(40.0, 25.0),
                TierThreshold::new(25.0, 10.0),
            ],
        )
    }

    /// Interpolated velocity for `rank`; flat beyond either end of the table.
    pub fn velocity_for(&self, rank: u64) -> f64 {
        let tiers = &self.velocity_tiers;
        let (Some(first), Some(last)) = (tiers.first(), tiers.last()) else {
            return 0.0;
        };
        if rank <= first.rank {
            return first.score;
        }
        if rank >= last.rank {
            return last.score;
        }

        tiers
            .windows(2)
            .find(|pair| rank >= pair[0].rank && rank <= pair[1].rank)
            .map_or(last.score, |pair| {
                let (low, high) = (pair[0], pair[1]);
                let width = (high.rank - low.rank) as f64;
                if width == 0.0 {
                    return low.score;
                }
                let fraction = (rank - low.rank) as f64 / width;
                low.score + (high.score - low.score) * fraction
            })
    }
}

/// Injected business parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    pub referral_fee_percent: f64,
    pub fixed_fee: f64,
    pub fulfillment_fee: f64,
    /// Expected purchase cost as a fraction of the sale price.
    pub estimated_cost_ratio: f64,
    /// Records older than this get the lowest freshness factor.
    pub max_record_age_hours: u64,
    pub velocity: StrategyProfile,
    pub balanced: StrategyProfile,
    pub patient: StrategyProfile,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            referral_fee_percent: 15.0,
            fixed_fee: 0.99,
            fulfillment_fee: 3.5,
            estimated_cost_ratio: 0.4,
            max_record_age_hours: 30 * 24,
            velocity: StrategyProfile::velocity(),
            balanced: StrategyProfile::balanced(),
            patient: StrategyProfile::patient(),
        }
    }
}

impl BusinessConfig {
    pub fn profile(&self, strategy: Strategy) -> &StrategyProfile {
        match strategy {
            Strategy::Velocity => &self.velocity,
            Strategy::Balanced => &self.balanced,
            Strategy::Patient => &self.patient,
        }
    }
}

/// Return-on-investment estimate for a sale price.
pub trait ProfitModel: Send + Sync {
    /// ROI in percent, or `None` when it cannot be computed.
    fn roi_percent(&self, sale_price: f64) -> Option<f64>;
}

/// Percentage plus fixed fees against a cost estimated from the sale price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub referral_fee_percent: f64,
    pub fixed_fees: f64,
    pub estimated_cost_ratio: f64,
}

impl From<&BusinessConfig> for FeeSchedule {
    fn from(config: &BusinessConfig) -> Self {
        Self {
            referral_fee_percent: config.referral_fee_percent,
            fixed_fees: config.fixed_fee + config.fulfillment_fee,
            estimated_cost_ratio: config.estimated_cost_ratio,
        }
    }
}

impl ProfitModel for FeeSchedule {
    fn roi_percent(&self, sale_price: f64) -> Option<f64> {
        if !sale_price.is_finite() || sale_price <= 0.0 {
            return None;
        }
        let cost = sale_price * self.estimated_cost_ratio;
        if cost <= 0.0 {
            return None;
        }
        let fees = sale_price * self.referral_fee_percent / 100.0 + self.fixed_fees;
        Some((sale_price - fees - cost) / cost * 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub velocity: f64,
    pub stability: f64,
    pub confidence: f64,
    pub roi_percent: Option<f64>,
}

impl Scores {
    /// Ranking score: ROI clamped to 0..100 blended with velocity.
    pub fn weighted(&self) -> f64 {
        let roi = self.roi_percent.unwrap_or(0.0).clamp(0.0, 100.0);
        ROI_WEIGHT * roi + (1.0 - ROI_WEIGHT) * self.velocity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Consider,
    Skip,
}

/// One scored discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: ItemId,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub rank: Option<u64>,
    pub rank_source: RankSource,
    pub category_id: CategoryId,
    /// Rank segment the item was discovered under, when the run was segmented.
    pub segment: Option<usize>,
    pub scores: Scores,
    pub recommendation: Recommendation,
}

impl Candidate {
    pub fn weighted_score(&self) -> f64 {
        self.scores.weighted()
    }
}

/// Velocity score for a rank reading; unranked items score zero.
pub fn velocity_score(rank: Option<u64>, profile: &StrategyProfile) -> f64 {
    rank.map_or(0.0, |rank| profile.velocity_for(rank).clamp(0.0, 100.0))
}

pub fn stability_score(current: Option<f64>, average: Option<f64>) -> f64 {
    match (current, average) {
        (Some(current), Some(average)) if average > 0.0 => {
            let deviation = ((current - average).abs() / average).min(1.0);
            100.0 * (1.0 - deviation)
        }
        _ => NEUTRAL_STABILITY,
    }
}

pub fn confidence_score(product: &ExtractedProduct, now: UtcDateTime, max_age_hours: u64) -> f64 {
    let expected = [
        product.title.is_some(),
        product.current_price().is_some(),
        product.rank.rank.is_some(),
        product.average_price_90d.is_some(),
        product.competing_sellers.is_some(),
        product.last_update.is_some(),
    ];
    let coverage =
        expected.iter().filter(|present| **present).count() as f64 / expected.len() as f64;

    let source_factor = match product.rank.source {
        RankSource::CategoryHistory => 1.0,
        RankSource::LegacyStats => 0.85,
        RankSource::Unavailable => 0.5,
    };

    let freshness = product.last_update.map_or(1.0, |updated| {
        let age_hours = updated.age_at(now).as_seconds_f64() / 3_600.0;
        let max_hours = (max_age_hours as f64).max(FRESH_HOURS + 1.0);
        if age_hours <= FRESH_HOURS {
            1.0
        } else if age_hours >= max_hours {
            STALE_FRESHNESS
        } else {
            let fraction = (age_hours - FRESH_HOURS) / (max_hours - FRESH_HOURS);
            1.0 - (1.0 - STALE_FRESHNESS) * fraction
        }
    });

    100.0 * coverage * source_factor * freshness
}

pub fn recommend(scores: &Scores, profile: &StrategyProfile) -> Recommendation {
    let Some(roi) = scores.roi_percent else {
        return Recommendation::Skip;
    };
    if profile.strong_buy.admits(roi, scores.velocity) {
        Recommendation::StrongBuy
    } else if profile.buy.admits(roi, scores.velocity) {
        Recommendation::Buy
    } else if profile.consider.admits(roi, scores.velocity) {
        Recommendation::Consider
    } else {
        Recommendation::Skip
    }
}

/// Scores extracted products against a business configuration.
#[derive(Clone)]
pub struct Scorer {
    config: BusinessConfig,
    profit_model: Arc<dyn ProfitModel>,
}

impl Scorer {
    /// Scorer using the [`FeeSchedule`] derived from `config`.
    pub fn new(config: BusinessConfig) -> Self {
        let fees = FeeSchedule::from(&config);
        Self {
            config,
            profit_model: Arc::new(fees),
        }
    }

    pub fn with_profit_model(mut self, profit_model: Arc<dyn ProfitModel>) -> Self {
        self.profit_model = profit_model;
        self
    }

    pub fn config(&self) -> &BusinessConfig {
        &self.config
    }

    pub fn score(&self, product: &ExtractedProduct, strategy: Strategy, now: UtcDateTime) -> Scores {
        let profile = self.config.profile(strategy);
        let price = product.current_price();
        Scores {
            velocity: velocity_score(product.rank.rank, profile),
            stability: stability_score(price, product.average_price_90d),
            confidence: confidence_score(product, now, self.config.max_record_age_hours),
            roi_percent: price.and_then(|price| self.profit_model.roi_percent(price)),
        }
    }

    pub fn candidate(
        &self,
        product: &ExtractedProduct,
        strategy: Strategy,
        category_id: CategoryId,
        segment: Option<usize>,
        now: UtcDateTime,
    ) -> Candidate {
        let scores = self.score(product, strategy, now);
        Candidate {
            item_id: product.item_id.clone(),
            title: product.title.clone(),
            price: product.current_price(),
            rank: product.rank.rank,
            rank_source: product.rank.source,
            category_id,
            segment,
            recommendation: recommend(&scores, self.config.profile(strategy)),
            scores,
        }
    }
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
