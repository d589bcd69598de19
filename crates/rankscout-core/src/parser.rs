//! Typed decoding of provider payloads.
//!
//! Provider records arrive as loosely structured JSON with columnar history
//! arrays. They are deserialized into the `Raw*` structs below and turned into
//! an [`ExtractedProduct`] here; nothing past this module touches raw payloads.
//!
//! | Column | Channel |
//! |--------|---------|
//! | 0 | Provider's own direct-sale price |
//! | 1 | Third-party new price |
//! | 2 | Used price |
//! | 3 | Sales rank |
//!
//! History columns alternate `[minutes, value, minutes, value, ...]` where
//! minutes count from [`PROVIDER_EPOCH_UNIX`](crate::domain::PROVIDER_EPOCH_UNIX).
//! Negative values mean "no data", never zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{CategoryId, ItemId, UtcDateTime};
use crate::ValidationError;

pub const CHANNEL_PROVIDER: usize = 0;
pub const CHANNEL_NEW: usize = 1;
pub const CHANNEL_USED: usize = 2;
pub const CHANNEL_SALES_RANK: usize = 3;
/// Position of the new-offer count in `stats.current`.
pub const STATS_COUNT_NEW: usize = 11;

const TRAILING_WINDOW_MINUTES: i64 = 90 * 24 * 60;

/// One product record from the product endpoint.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    #[serde(rename = "asin")]
    pub item_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub root_category: Option<u64>,
    #[serde(default)]
    pub csv: Vec<Option<Vec<i64>>>,
    /// Rank history per category id (JSON object keys are strings).
    #[serde(default)]
    pub sales_ranks: Option<BTreeMap<String, Vec<i64>>>,
    #[serde(default)]
    pub sales_rank_reference: Option<i64>,
    #[serde(default)]
    pub stats: Option<RawStats>,
    #[serde(default)]
    pub offers: Option<Vec<RawOffer>>,
    /// Indexes into `offers` of the currently live offers.
    #[serde(default)]
    pub live_offers_order: Option<Vec<usize>>,
    #[serde(default)]
    pub last_update: Option<i64>,
}

/// Precomputed statistics block; arrays are indexed by channel.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub current: Vec<Option<i64>>,
    #[serde(default)]
    pub avg90: Vec<Option<i64>>,
}

/// One seller's offer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOffer {
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub condition: Option<i64>,
    #[serde(default)]
    pub is_provider: bool,
    /// `[minutes, price, shipping, ...]` triples.
    #[serde(default, rename = "offerCSV")]
    pub offer_csv: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductResponse {
    #[serde(default)]
    pub products: Vec<RawProduct>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default, rename = "asinList")]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub total_results: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestsellersResponse {
    #[serde(default)]
    pub best_sellers_list: Option<RawBestsellers>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBestsellers {
    #[serde(default, rename = "asinList")]
    pub item_ids: Vec<String>,
}

impl BestsellersResponse {
    pub fn into_item_ids(self) -> Vec<String> {
        self.best_sellers_list
            .map(|list| list.item_ids)
            .unwrap_or_default()
    }
}

/// Token endpoint body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub tokens_left: f64,
    #[serde(default)]
    pub refill_rate: Option<f64>,
    /// Milliseconds until the next refill.
    #[serde(default)]
    pub refill_in: Option<i64>,
}

/// Where a rank reading came from; fallback sources are discounted by scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankSource {
    CategoryHistory,
    LegacyStats,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankReading {
    pub rank: Option<u64>,
    pub source: RankSource,
}

impl RankReading {
    pub const fn unavailable() -> Self {
        Self {
            rank: None,
            source: RankSource::Unavailable,
        }
    }
}

/// Current prices by channel, in currency units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelPrices {
    pub provider: Option<f64>,
    pub new_third_party: Option<f64>,
    pub used: Option<f64>,
}

impl ChannelPrices {
    /// Third-party new price, falling back to the provider's own channel.
    pub fn preferred(&self) -> Option<f64> {
        self.new_third_party.or(self.provider)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
    pub prices: ChannelPrices,
    pub rank: RankReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub at: UtcDateTime,
    pub value: i64,
}

/// Fixed offer-condition taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferCondition {
    New,
    LikeNew,
    Good,
    Acceptable,
}

impl OfferCondition {
    /// Maps provider condition codes; collectible and refurbished codes are ignored.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::New),
            2 => Some(Self::LikeNew),
            3 | 4 => Some(Self::Good),
            5 => Some(Self::Acceptable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferGroup {
    pub condition: OfferCondition,
    pub min_price: Option<f64>,
    pub seller_count: usize,
}

/// Typed record handed to scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedProduct {
    pub item_id: ItemId,
    pub title: Option<String>,
    pub root_category: Option<CategoryId>,
    pub prices: ChannelPrices,
    pub rank: RankReading,
    pub average_price_90d: Option<f64>,
    /// Distinct third-party sellers offering the item new.
    pub competing_sellers: Option<u32>,
    pub provider_is_seller: bool,
    pub offers: Vec<OfferGroup>,
    pub last_update: Option<UtcDateTime>,
}

impl ExtractedProduct {
    pub fn current_price(&self) -> Option<f64> {
        self.prices.preferred()
    }
}

/// Decodes a columnar `[minutes, value, ...]` history. A trailing odd element is ignored.
pub fn decode_series(column: &[i64]) -> Vec<SeriesPoint> {
    column
        .chunks_exact(2)
        .filter_map(|pair| {
            UtcDateTime::from_provider_minutes(pair[0]).map(|at| SeriesPoint {
                at,
                value: pair[1],
            })
        })
        .collect()
}

/// Rank with ordered fallback: per-category history, legacy stats slot, none.
pub fn extract_rank(raw: &RawProduct) -> RankReading {
    if let Some(rank) = category_history_rank(raw) {
        return RankReading {
            rank: Some(rank),
            source: RankSource::CategoryHistory,
        };
    }

    if let Some(rank) = stats_value(raw, CHANNEL_SALES_RANK).and_then(non_sentinel) {
        return RankReading {
            rank: Some(rank),
            source: RankSource::LegacyStats,
        };
    }

    RankReading::unavailable()
}

fn category_history_rank(raw: &RawProduct) -> Option<u64> {
    let ranks = raw.sales_ranks.as_ref()?;
    let preferred = raw
        .sales_rank_reference
        .filter(|reference| *reference > 0)
        .and_then(|reference| u64::try_from(reference).ok())
        .or(raw.root_category);

    let history = preferred
        .and_then(|category| ranks.get(&category.to_string()))
        .or_else(|| ranks.values().next())?;

    history
        .chunks_exact(2)
        .rev()
        .find_map(|pair| non_sentinel(pair[1]))
}

/// Current prices and rank.
pub fn extract_current(raw: &RawProduct) -> CurrentSnapshot {
    CurrentSnapshot {
        prices: ChannelPrices {
            provider: current_price(raw, CHANNEL_PROVIDER),
            new_third_party: current_price(raw, CHANNEL_NEW),
            used: current_price(raw, CHANNEL_USED),
        },
        rank: extract_rank(raw),
    }
}

/// Stats slot first, then the last point of the history column.
fn current_price(raw: &RawProduct, channel: usize) -> Option<f64> {
    stats_value(raw, channel)
        .or_else(|| last_history_value(raw, channel))
        .and_then(non_sentinel)
        .map(cents_to_price)
}

/// 90-day average of the preferred price channel.
///
/// Uses the provider's precomputed average when present, otherwise averages
/// the decoded history over the 90 days before its latest point.
pub fn trailing_average(raw: &RawProduct) -> Option<f64> {
    let precomputed = raw.stats.as_ref().and_then(|stats| {
        [CHANNEL_NEW, CHANNEL_PROVIDER]
            .into_iter()
            .find_map(|channel| stats.avg90.get(channel).copied().flatten().and_then(non_sentinel))
    });
    if let Some(cents) = precomputed {
        return Some(cents_to_price(cents));
    }

    [CHANNEL_NEW, CHANNEL_PROVIDER]
        .into_iter()
        .find_map(|channel| series_average(raw, channel))
}

fn series_average(raw: &RawProduct, channel: usize) -> Option<f64> {
    let column = raw.csv.get(channel)?.as_deref()?;
    let last_minutes = column.chunks_exact(2).last()?[0];
    let window_start = last_minutes - TRAILING_WINDOW_MINUTES;

    let values = column
        .chunks_exact(2)
        .filter(|pair| pair[0] >= window_start)
        .filter_map(|pair| non_sentinel(pair[1]))
        .collect::<Vec<_>>();
    if values.is_empty() {
        return None;
    }
    let total = values.iter().map(|value| *value as f64).sum::<f64>();
    Some(total / values.len() as f64 / 100.0)
}

/// Offers that are live right now; all offers when the live index is absent.
pub fn live_offers(raw: &RawProduct) -> Vec<&RawOffer> {
    let Some(offers) = raw.offers.as_deref() else {
        return Vec::new();
    };
    match raw.live_offers_order.as_deref() {
        Some(order) => order.iter().filter_map(|index| offers.get(*index)).collect(),
        None => offers.iter().collect(),
    }
}

/// Groups offers by condition, reducing each group to its minimum price and
/// distinct seller count. Groups without offers are omitted.
pub fn group_offers<'a>(
    offers: impl IntoIterator<Item = &'a RawOffer>,
    conditions: Option<&[OfferCondition]>,
) -> Vec<OfferGroup> {
    let mut groups: BTreeMap<OfferCondition, (Option<f64>, Vec<&str>)> = BTreeMap::new();

    for offer in offers {
        let Some(condition) = offer.condition.and_then(OfferCondition::from_code) else {
            continue;
        };
        if conditions.is_some_and(|wanted| !wanted.contains(&condition)) {
            continue;
        }

        let (min_price, sellers) = groups.entry(condition).or_default();
        if let Some(price) = offer_price(offer) {
            *min_price = Some(min_price.map_or(price, |current: f64| current.min(price)));
        }
        if let Some(seller) = offer.seller_id.as_deref() {
            if !sellers.contains(&seller) {
                sellers.push(seller);
            }
        }
    }

    groups
        .into_iter()
        .map(|(condition, (min_price, sellers))| OfferGroup {
            condition,
            min_price,
            seller_count: sellers.len(),
        })
        .collect()
}

/// Latest price plus shipping of one offer.
fn offer_price(offer: &RawOffer) -> Option<f64> {
    let triple = offer.offer_csv.chunks_exact(3).last()?;
    let price = non_sentinel(triple[1])?;
    let shipping = non_sentinel(triple[2]).unwrap_or(0);
    Some(cents_to_price(price + shipping))
}

/// Distinct third-party sellers with a live new offer, falling back to the stats count.
pub fn competing_seller_count(raw: &RawProduct) -> Option<u32> {
    if raw.offers.is_some() {
        let mut sellers = live_offers(raw)
            .into_iter()
            .filter(|offer| !offer.is_provider)
            .filter(|offer| offer.condition.and_then(OfferCondition::from_code) == Some(OfferCondition::New))
            .filter_map(|offer| offer.seller_id.as_deref())
            .collect::<Vec<_>>();
        sellers.sort_unstable();
        sellers.dedup();
        return u32::try_from(sellers.len()).ok();
    }

    stats_value(raw, STATS_COUNT_NEW)
        .and_then(non_sentinel)
        .and_then(|count| u32::try_from(count).ok())
}

/// Whether the provider itself sells the item, by live offer or direct-channel price.
pub fn provider_is_seller(raw: &RawProduct) -> bool {
    live_offers(raw).iter().any(|offer| offer.is_provider)
        || current_price(raw, CHANNEL_PROVIDER).is_some()
}

/// Builds the typed record for scoring; fails only on an invalid item id.
pub fn extract_product(raw: &RawProduct) -> Result<ExtractedProduct, ValidationError> {
    let item_id = ItemId::parse(&raw.item_id)?;
    let current = extract_current(raw);

    Ok(ExtractedProduct {
        item_id,
        title: raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_owned),
        root_category: raw.root_category.and_then(|id| CategoryId::new(id).ok()),
        prices: current.prices,
        rank: current.rank,
        average_price_90d: trailing_average(raw),
        competing_sellers: competing_seller_count(raw),
        provider_is_seller: provider_is_seller(raw),
        offers: group_offers(live_offers(raw), None),
        last_update: raw
            .last_update
            .and_then(UtcDateTime::from_provider_minutes),
    })
}

fn stats_value(raw: &RawProduct, index: usize) -> Option<i64> {
    raw.stats
        .as_ref()
        .and_then(|stats| stats.current.get(index).copied().flatten())
}

fn last_history_value(raw: &RawProduct, channel: usize) -> Option<i64> {
    raw.csv
        .get(channel)?
        .as_deref()?
        .chunks_exact(2)
        .last()
        .map(|pair| pair[1])
}

fn non_sentinel(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

fn cents_to_price(cents: u64) -> f64 {
    cents as f64 / 100.0
}
