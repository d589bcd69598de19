use serde::{Deserialize, Serialize};

use crate::domain::{CategoryId, PriceRange, RankRange, Strategy};
use crate::ValidationError;

/// Validated discovery filter. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiscoveryRequest {
    category: CategoryId,
    rank: RankRange,
    price: PriceRange,
    max_results: usize,
    max_competing_sellers: Option<u32>,
    exclude_provider_as_seller: bool,
    strategy: Strategy,
}

impl DiscoveryRequest {
    /// Request excluding provider-sold items, with no seller cap and the default strategy.
    pub fn new(
        category: CategoryId,
        rank: RankRange,
        price: PriceRange,
        max_results: usize,
    ) -> Result<Self, ValidationError> {
        if max_results == 0 {
            return Err(ValidationError::ZeroMaxResults);
        }
        Ok(Self {
            category,
            rank,
            price,
            max_results,
            max_competing_sellers: None,
            exclude_provider_as_seller: true,
            strategy: Strategy::default(),
        })
    }

    pub fn with_max_competing_sellers(mut self, limit: Option<u32>) -> Self {
        self.max_competing_sellers = limit;
        self
    }

    pub fn with_exclude_provider_as_seller(mut self, exclude: bool) -> Self {
        self.exclude_provider_as_seller = exclude;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub const fn category(&self) -> CategoryId {
        self.category
    }

    pub const fn rank(&self) -> RankRange {
        self.rank
    }

    pub const fn price(&self) -> PriceRange {
        self.price
    }

    pub const fn max_results(&self) -> usize {
        self.max_results
    }

    pub const fn max_competing_sellers(&self) -> Option<u32> {
        self.max_competing_sellers
    }

    pub const fn exclude_provider_as_seller(&self) -> bool {
        self.exclude_provider_as_seller
    }

    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Deterministic key for the outer discovery cache.
    pub fn fingerprint(&self) -> String {
        fn bound<T: ToString>(value: Option<T>) -> String {
            value.map_or_else(|| "*".to_owned(), |value| value.to_string())
        }
        let (price_min, price_max) = self.price.to_cents();
        format!(
            "v1|cat={}|rank={}..{}|price={}..{}|max={}|sellers={}|exclude={}|strategy={}",
            self.category,
            bound(self.rank.min),
            bound(self.rank.max),
            bound(price_min),
            bound(price_max),
            self.max_results,
            bound(self.max_competing_sellers),
            self.exclude_provider_as_seller,
            self.strategy
        )
    }
}

/// Wire shape of a discovery request as supplied by callers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequestInput {
    pub category_id: u64,
    #[serde(default)]
    pub rank_min: Option<u64>,
    #[serde(default)]
    pub rank_max: Option<u64>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    pub max_results: usize,
    #[serde(default)]
    pub max_competing_sellers: Option<u32>,
    #[serde(default = "default_exclude")]
    pub exclude_provider_as_seller: bool,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

fn default_exclude() -> bool {
    true
}

impl TryFrom<DiscoveryRequestInput> for DiscoveryRequest {
    type Error = ValidationError;

    fn try_from(input: DiscoveryRequestInput) -> Result<Self, Self::Error> {
        Ok(Self::new(
            CategoryId::new(input.category_id)?,
            RankRange::new(input.rank_min, input.rank_max)?,
            PriceRange::new(input.price_min, input.price_max)?,
            input.max_results,
        )?
        .with_max_competing_sellers(input.max_competing_sellers)
        .with_exclude_provider_as_seller(input.exclude_provider_as_seller)
        .with_strategy(input.strategy.unwrap_or_default()))
    }
}
