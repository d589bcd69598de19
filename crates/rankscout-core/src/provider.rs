//! Typed provider operations on top of [`ProviderGateway`].

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::domain::{CategoryId, ItemId, PriceRange, RankRange};
use crate::gateway::{Endpoint, GatewayError, ProviderError, ProviderGateway};
use crate::parser::{BestsellersResponse, ProductResponse, QueryResponse, RawProduct, TokenStatus};

/// Maximum item ids the product endpoint accepts per call.
pub const PRODUCT_BATCH_LIMIT: usize = 100;
/// Offers requested per product when offer detail is enabled.
const OFFERS_PER_PRODUCT: u32 = 20;

/// Bulk query selection: category plus rank and price filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryFilter {
    pub category: CategoryId,
    pub rank: RankRange,
    pub price: PriceRange,
    pub per_page: usize,
}

impl QueryFilter {
    /// Selection document understood by the query endpoint. Prices travel in cents.
    pub fn selection(&self) -> serde_json::Value {
        let mut selection = json!({
            "rootCategory": self.category.get(),
            "perPage": self.per_page.max(1),
            "page": 0,
            "sort": [["current_SALES", "asc"]],
        });
        let (price_min, price_max) = self.price.to_cents();
        let filters = [
            ("current_SALES_gte", self.rank.min.map(serde_json::Value::from)),
            ("current_SALES_lte", self.rank.max.map(serde_json::Value::from)),
            ("current_NEW_gte", price_min.map(serde_json::Value::from)),
            ("current_NEW_lte", price_max.map(serde_json::Value::from)),
        ];
        if let Some(object) = selection.as_object_mut() {
            for (name, value) in filters {
                if let Some(value) = value {
                    object.insert(name.to_owned(), value);
                }
            }
        }
        selection
    }
}

/// Provider operations returning typed results.
#[derive(Clone)]
pub struct ProviderClient {
    gateway: Arc<ProviderGateway>,
}

impl ProviderClient {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Ids matching a bulk query selection, in provider order.
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<ItemId>, GatewayError> {
        let params = [("selection", filter.selection().to_string())];
        let payload = self.gateway.call(Endpoint::Query, &params).await?;
        let response: QueryResponse = decode(Endpoint::Query, &payload.body)?;
        Ok(parse_ids(response.item_ids))
    }

    /// Category bestseller list; ids only, no filters.
    pub async fn bestsellers(&self, category: CategoryId) -> Result<Vec<ItemId>, GatewayError> {
        let params = [("category", category.to_string())];
        let payload = self.gateway.call(Endpoint::Bestsellers, &params).await?;
        let response: BestsellersResponse = decode(Endpoint::Bestsellers, &payload.body)?;
        Ok(parse_ids(response.into_item_ids()))
    }

    /// Product detail for up to [`PRODUCT_BATCH_LIMIT`] ids per provider call.
    pub async fn products(
        &self,
        ids: &[ItemId],
        offers: bool,
    ) -> Result<Vec<RawProduct>, GatewayError> {
        let mut products = Vec::with_capacity(ids.len());
        for batch in ids.chunks(PRODUCT_BATCH_LIMIT) {
            products.extend(self.product_batch(batch, offers).await?);
        }
        Ok(products)
    }

    async fn product_batch(
        &self,
        ids: &[ItemId],
        offers: bool,
    ) -> Result<Vec<RawProduct>, GatewayError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = Endpoint::Product {
            items: u32::try_from(ids.len()).unwrap_or(u32::MAX),
            offers,
        };
        let joined = ids
            .iter()
            .map(ItemId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![
            ("asin", joined),
            ("stats", "90".to_owned()),
            ("history", "1".to_owned()),
        ];
        if offers {
            params.push(("offers", OFFERS_PER_PRODUCT.to_string()));
        }

        let payload = self.gateway.call(endpoint, &params).await?;
        let response: ProductResponse = decode(endpoint, &payload.body)?;
        Ok(response.products)
    }

    /// Provider-side balance. Free, never cached.
    pub async fn token_status(&self) -> Result<TokenStatus, GatewayError> {
        let payload = self.gateway.call(Endpoint::Token, &[]).await?;
        match serde_json::from_str::<TokenStatus>(&payload.body) {
            Ok(status) => Ok(status),
            Err(error) => payload
                .tokens_left
                .map(|tokens_left| TokenStatus {
                    tokens_left,
                    refill_rate: None,
                    refill_in: None,
                })
                .ok_or_else(|| GatewayError::provider(Endpoint::Token, ProviderError::decode(error))),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(endpoint: Endpoint, body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body)
        .map_err(|error| GatewayError::provider(endpoint, ProviderError::decode(error)))
}

fn parse_ids(raw: Vec<String>) -> Vec<ItemId> {
    raw.into_iter()
        .filter_map(|value| match ItemId::parse(&value) {
            Ok(id) => Some(id),
            Err(error) => {
                debug!(value = %value, error = %error, "skipping malformed item id");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_includes_only_present_filters() {
        let filter = QueryFilter {
            category: CategoryId::new(283_155).expect("category"),
            rank: RankRange::new(Some(1_000), None).expect("rank"),
            price: PriceRange::new(None, Some(25.0)).expect("price"),
            per_page: 40,
        };
        let selection = filter.selection();

        assert_eq!(selection["rootCategory"], 283_155);
        assert_eq!(selection["perPage"], 40);
        assert_eq!(selection["current_SALES_gte"], 1_000);
        assert_eq!(selection["current_NEW_lte"], 2_500);
        assert!(selection.get("current_SALES_lte").is_none());
        assert!(selection.get("current_NEW_gte").is_none());
    }

    #[test]
    fn malformed_ids_are_dropped() {
        let ids = parse_ids(vec!["b000000001".into(), "nope".into(), "B000000002".into()]);
        assert_eq!(
            ids.iter().map(ItemId::as_str).collect::<Vec<_>>(),
            ["B000000001", "B000000002"]
        );
    }
}
