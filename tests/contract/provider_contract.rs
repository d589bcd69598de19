//! Contract tests for provider payload decoding.
//!
//! Fixtures follow the provider's wire shapes: columnar history arrays,
//! `-1` sentinels, per-category rank maps and offer lists with a live index.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use rankscout_core::parser::{
    extract_rank, group_offers, live_offers, OfferCondition, RankReading, TokenStatus,
};
use rankscout_core::{
    extract_product, CategoryId, GatewayError, HttpResponse, ItemId, ProviderClient,
    ProviderError, RankSource, RawProduct,
};

use support::{
    bestsellers_response, endpoint_of, gateway, item_id, product_json, products_response,
    query_response, requested_ids, ScriptedHttpClient,
};

fn raw(json: &str) -> RawProduct {
    serde_json::from_str(json).expect("fixture must deserialize")
}

const FULL_RECORD: &str = r#"{
    "asin": "b00x4whp5e",
    "title": "  Stainless Pour-Over Kettle  ",
    "rootCategory": 7,
    "salesRanks": {
        "7":  [7000000, 5100, 7100000, 4200, 7200000, -1],
        "99": [7000000, 12]
    },
    "stats": {
        "current": [-1, 2450, 1800, 9999, -1, -1, -1, -1, -1, -1, -1, 4],
        "avg90":   [-1, 3000]
    },
    "liveOffersOrder": [0, 1, 3],
    "offers": [
        {"sellerId": "S-ALPHA", "condition": 1, "offerCSV": [7000000, 2600, 0, 7100000, 2450, 0]},
        {"sellerId": "S-BETA",  "condition": 1, "offerCSV": [7100000, 2500, 99]},
        {"sellerId": "S-GONE",  "condition": 1, "offerCSV": [6000000, 1000, 0]},
        {"sellerId": "S-ALPHA", "condition": 3, "offerCSV": [7100000, 1800, 400]}
    ],
    "lastUpdate": 8000000
}"#;

// =============================================================================
// Contract: Product extraction
// =============================================================================

#[test]
fn full_record_extracts_every_field() {
    let product = extract_product(&raw(FULL_RECORD)).expect("valid record");

    assert_eq!(product.item_id.as_str(), "B00X4WHP5E");
    assert_eq!(product.title.as_deref(), Some("Stainless Pour-Over Kettle"));
    assert_eq!(product.root_category, Some(CategoryId::new(7).expect("category")));
    assert_eq!(product.rank.rank, Some(4_200));
    assert_eq!(product.rank.source, RankSource::CategoryHistory);
    assert_eq!(product.prices.provider, None);
    assert_eq!(product.prices.new_third_party, Some(24.5));
    assert_eq!(product.prices.used, Some(18.0));
    assert_eq!(product.current_price(), Some(24.5));
    assert_eq!(product.average_price_90d, Some(30.0));
    // Live offer list wins over the stats count of 4.
    assert_eq!(product.competing_sellers, Some(2));
    assert!(!product.provider_is_seller);
    assert_eq!(
        product
            .last_update
            .map(|at| at.into_inner().unix_timestamp()),
        Some(1_293_840_000 + 8_000_000 * 60)
    );
}

#[test]
fn rank_resolution_follows_the_fallback_order() {
    struct Case {
        name: &'static str,
        json: &'static str,
        expected: RankReading,
    }

    let cases = [
        Case {
            name: "root category history",
            json: FULL_RECORD,
            expected: RankReading {
                rank: Some(4_200),
                source: RankSource::CategoryHistory,
            },
        },
        Case {
            name: "rank reference overrides root category",
            json: r#"{"asin":"B000000001","rootCategory":7,"salesRankReference":99,
                      "salesRanks":{"7":[1,500],"99":[1,12]}}"#,
            expected: RankReading {
                rank: Some(12),
                source: RankSource::CategoryHistory,
            },
        },
        Case {
            name: "first history when no category is known",
            json: r#"{"asin":"B000000001","salesRanks":{"31":[1,880,2,870]}}"#,
            expected: RankReading {
                rank: Some(870),
                source: RankSource::CategoryHistory,
            },
        },
        Case {
            name: "legacy stats slot only",
            json: r#"{"asin":"B000000001","stats":{"current":[-1,2599,-1,48213]}}"#,
            expected: RankReading {
                rank: Some(48_213),
                source: RankSource::LegacyStats,
            },
        },
        Case {
            name: "sentinel-only history falls through to legacy",
            json: r#"{"asin":"B000000001","rootCategory":7,"salesRanks":{"7":[1,-1]},
                      "stats":{"current":[-1,-1,-1,61000]}}"#,
            expected: RankReading {
                rank: Some(61_000),
                source: RankSource::LegacyStats,
            },
        },
        Case {
            name: "nothing usable",
            json: r#"{"asin":"B000000001","salesRanks":{"7":[1,-1]},"stats":{"current":[-1,-1,-1,-1]}}"#,
            expected: RankReading::unavailable(),
        },
    ];

    for case in cases {
        assert_eq!(extract_rank(&raw(case.json)), case.expected, "case '{}'", case.name);
    }
}

#[test]
fn sentinels_never_become_zero_prices() {
    let product = extract_product(&raw(
        r#"{"asin":"B000000001","stats":{"current":[-1,-2,-1,-1,-1,-1,-1,-1,-1,-1,-1,-1],"avg90":[-1,-1]}}"#,
    ))
    .expect("valid record");

    assert_eq!(product.prices.provider, None);
    assert_eq!(product.prices.new_third_party, None);
    assert_eq!(product.prices.used, None);
    assert_eq!(product.current_price(), None);
    assert_eq!(product.average_price_90d, None);
    assert_eq!(product.competing_sellers, None);
    assert_eq!(product.rank, RankReading::unavailable());
}

#[test]
fn history_columns_fill_in_when_stats_are_absent() {
    let product = extract_product(&raw(
        r#"{"asin":"B000000001","csv":[[100,1999,200,1899],[100,2450,200,-1],null,[100,7000,200,6500]]}"#,
    ))
    .expect("valid record");

    assert_eq!(product.prices.provider, Some(18.99));
    assert_eq!(product.prices.new_third_party, None);
    assert_eq!(product.current_price(), Some(18.99));
    assert!(product.provider_is_seller);
}

#[test]
fn provider_offer_marks_the_item_as_provider_sold() {
    let product = extract_product(&raw(
        r#"{"asin":"B000000001","offers":[
              {"sellerId":"PROVIDER","condition":1,"isProvider":true,"offerCSV":[1,2300,0]},
              {"sellerId":"S1","condition":1,"offerCSV":[1,2400,0]},
              {"sellerId":"S1","condition":1,"offerCSV":[1,2410,0]},
              {"sellerId":"S2","condition":2,"offerCSV":[1,2000,0]}
           ]}"#,
    ))
    .expect("valid record");

    assert!(product.provider_is_seller);
    assert_eq!(product.competing_sellers, Some(1));
    assert_eq!(product.offers.len(), 2);
}

#[test]
fn offer_groups_use_live_offers_and_include_shipping() {
    let record = raw(FULL_RECORD);
    let live = live_offers(&record);
    assert_eq!(live.len(), 3);

    let groups = group_offers(live, None);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].condition, OfferCondition::New);
    assert_eq!(groups[0].min_price, Some(24.5));
    assert_eq!(groups[0].seller_count, 2);
    assert_eq!(groups[1].condition, OfferCondition::Good);
    assert_eq!(groups[1].min_price, Some(22.0));
    assert_eq!(groups[1].seller_count, 1);
}

#[test]
fn invalid_item_ids_are_rejected() {
    for id in ["", "B00", "B00X4WHP5E1", "B00X4-HP5E"] {
        let record = RawProduct {
            item_id: id.to_owned(),
            ..RawProduct::default()
        };
        assert!(extract_product(&record).is_err(), "id '{id}' must be rejected");
    }
}

// =============================================================================
// Contract: Typed provider operations
// =============================================================================

#[tokio::test(start_paused = true)]
async fn query_ids_are_normalized_and_malformed_ones_dropped() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[
        "b000000001".to_owned(),
        "not-an-id".to_owned(),
        item_id(2),
    ]))));
    let provider = ProviderClient::new(Arc::new(gateway(client, 1_200.0)));
    let filter = rankscout_core::QueryFilter {
        category: CategoryId::new(7).expect("category"),
        rank: rankscout_core::RankRange::new(Some(1), Some(10)).expect("rank"),
        price: rankscout_core::PriceRange::new(None, None).expect("price"),
        per_page: 5,
    };

    let ids = provider.query(&filter).await.expect("query decodes");

    assert_eq!(
        ids,
        [
            ItemId::parse("B000000001").expect("valid id"),
            ItemId::parse(&item_id(2)).expect("valid id"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn bestsellers_unwrap_the_nested_list() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(bestsellers_response(&[
        item_id(5),
        item_id(6),
    ]))));
    let provider = ProviderClient::new(Arc::new(gateway(client.clone(), 1_200.0)));

    let ids = provider
        .bestsellers(CategoryId::new(7).expect("category"))
        .await
        .expect("bestsellers decode");

    assert_eq!(ids.len(), 2);
    assert_eq!(endpoint_of(&client.requests()[0].url), "bestsellers");
}

#[tokio::test(start_paused = true)]
async fn product_detail_is_split_into_provider_sized_batches() {
    let client = Arc::new(ScriptedHttpClient::new(|request| {
        let products = requested_ids(&request.url)
            .iter()
            .map(|id| product_json(id, 1_000, 1_500, 2, false))
            .collect();
        Ok(products_response(products))
    }));
    let provider = ProviderClient::new(Arc::new(gateway(client.clone(), 1_200.0)));
    let ids = (1..=150)
        .map(|n| ItemId::parse(&item_id(n)).expect("valid id"))
        .collect::<Vec<_>>();

    let products = provider.products(&ids, false).await.expect("detail");

    assert_eq!(products.len(), 150);
    let batches = client
        .requests_to("product")
        .iter()
        .map(|request| requested_ids(&request.url).len())
        .collect::<Vec<_>>();
    assert_eq!(batches, [100, 50]);
    assert_eq!(provider.gateway().budget().peek(), 1_050.0);
}

#[tokio::test(start_paused = true)]
async fn token_status_reads_the_body_or_the_balance_header() {
    let body = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(
        r#"{"tokensLeft": 40, "refillRate": 5, "refillIn": 30000}"#,
    ))));
    let provider = ProviderClient::new(Arc::new(gateway(body, 1_200.0)));
    assert_eq!(
        provider.token_status().await.expect("status"),
        TokenStatus {
            tokens_left: 40.0,
            refill_rate: Some(5.0),
            refill_in: Some(30_000),
        }
    );

    let header = Arc::new(ScriptedHttpClient::always(Ok(
        HttpResponse::ok_json("{}").with_header("X-Tokens-Left", "17"),
    )));
    let provider = ProviderClient::new(Arc::new(gateway(header, 1_200.0)));
    assert_eq!(provider.token_status().await.expect("status").tokens_left, 17.0);
}

#[tokio::test(start_paused = true)]
async fn undecodable_bodies_surface_as_decode_errors() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(
        "<html>maintenance</html>",
    ))));
    let provider = ProviderClient::new(Arc::new(gateway(client, 1_200.0)));

    let error = provider
        .bestsellers(CategoryId::new(7).expect("category"))
        .await
        .expect_err("not JSON");

    assert!(matches!(
        error,
        GatewayError::Provider {
            endpoint: "bestsellers",
            source: ProviderError::Decode { .. },
        }
    ));
}
