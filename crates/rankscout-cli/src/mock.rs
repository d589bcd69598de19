//! Offline provider used by `--mock`.
//!
//! Responses are derived from the request alone, so repeated runs print the
//! same candidates. Mock item ids carry their rank and price: `R` followed by
//! five base-36 rank digits and four base-36 price-in-cents digits.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rankscout_core::gateway::TOKENS_LEFT_HEADER;
use rankscout_core::{Endpoint, HttpClient, HttpError, HttpRequest, HttpResponse, UtcDateTime};
use serde_json::{json, Value};

const STARTING_TOKENS: f64 = 1_200.0;
const REFILL_PER_MINUTE: f64 = 20.0;
const BESTSELLER_COUNT: u64 = 60;
const DEFAULT_PRICE_CENTS: (u64, u64) = (1_500, 6_000);
const RANK_DIGITS: u32 = 5;
const PRICE_DIGITS: u32 = 4;

/// Scripted provider that never touches the network.
#[derive(Debug)]
pub struct MockProvider {
    tokens_left: Mutex<f64>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            tokens_left: Mutex::new(STARTING_TOKENS),
        }
    }
}

impl MockProvider {
    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let (path, params) = split_url(&request.url);
        let body = match path.as_str() {
            "query" => query_body(&params),
            "bestsellers" => bestsellers_body(&params),
            "product" => product_body(&params),
            "category" => json!({ "categories": {} }),
            "token" => json!({}),
            other => {
                return HttpResponse::with_status(404, format!("unknown endpoint '{other}'"));
            }
        };

        let tokens_left = self.charge(&path, &params);
        let mut body = body;
        if let Some(object) = body.as_object_mut() {
            object.insert("tokensLeft".to_owned(), json!(tokens_left));
            if path == "token" {
                object.insert("refillRate".to_owned(), json!(REFILL_PER_MINUTE));
                object.insert("refillIn".to_owned(), json!(60_000));
            }
        }
        HttpResponse::ok_json(body.to_string()).with_header(TOKENS_LEFT_HEADER, format!("{tokens_left}"))
    }

    fn charge(&self, path: &str, params: &BTreeMap<String, String>) -> f64 {
        let endpoint = match path {
            "product" => Endpoint::Product {
                items: params
                    .get("asin")
                    .map_or(0, |ids| ids.split(',').count() as u32),
                offers: params.contains_key("offers"),
            },
            "query" => Endpoint::Query,
            "bestsellers" => Endpoint::Bestsellers,
            "category" => Endpoint::Category,
            _ => Endpoint::Token,
        };
        let mut tokens = self.tokens_left.lock().expect("mock token mutex is not poisoned");
        *tokens = (*tokens - endpoint.cost()).max(0.0);
        *tokens
    }
}

impl HttpClient for MockProvider {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.respond(&request)) })
    }
}

fn split_url(url: &str) -> (String, BTreeMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let endpoint = path.rsplit('/').next().unwrap_or_default().to_owned();
    let params = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| {
            let value = urlencoding::decode(value).map_or_else(|_| value.to_owned(), |v| v.into_owned());
            (name.to_owned(), value)
        })
        .collect();
    (endpoint, params)
}

fn query_body(params: &BTreeMap<String, String>) -> Value {
    let selection: Value = params
        .get("selection")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null);
    let field = |name: &str| selection.get(name).and_then(Value::as_u64);

    let category = field("rootCategory").unwrap_or(1);
    let per_page = field("perPage").unwrap_or(20).clamp(1, 500);
    let rank_min = field("current_SALES_gte").unwrap_or(1).max(1);
    let rank_max = field("current_SALES_lte").unwrap_or(rank_min + 100_000);
    let price_min = field("current_NEW_gte").unwrap_or(DEFAULT_PRICE_CENTS.0);
    let price_max = field("current_NEW_lte").unwrap_or(DEFAULT_PRICE_CENTS.1.max(price_min));

    let ids = spread(rank_min, rank_max, per_page)
        .map(|rank| {
            let seed = seed(category, rank);
            mock_id(rank, price_min + seed % (price_max - price_min + 1))
        })
        .collect::<Vec<_>>();
    json!({ "asinList": ids, "totalResults": ids.len() })
}

fn bestsellers_body(params: &BTreeMap<String, String>) -> Value {
    let category = params
        .get("category")
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(1);
    let (price_min, price_max) = DEFAULT_PRICE_CENTS;
    let ids = spread(1, BESTSELLER_COUNT * 100, BESTSELLER_COUNT)
        .map(|rank| mock_id(rank, price_min + seed(category, rank) % (price_max - price_min + 1)))
        .collect::<Vec<_>>();
    json!({ "bestSellersList": { "asinList": ids } })
}

fn product_body(params: &BTreeMap<String, String>) -> Value {
    let offers = params.contains_key("offers");
    let now = UtcDateTime::now().to_provider_minutes();
    let products = params
        .get("asin")
        .map(|ids| ids.split(',').map(|id| product(id, offers, now)).collect::<Vec<_>>())
        .unwrap_or_default();
    json!({ "products": products })
}

fn product(id: &str, offers: bool, now: i64) -> Value {
    let (rank, price) = decode_mock_id(id).unwrap_or_else(|| {
        let seed = seed(0, id.bytes().map(u64::from).sum());
        (1_000 + seed % 200_000, 1_000 + seed % 5_000)
    });
    let seed = seed(rank, price);
    let rank = rank as i64;
    let price = price as i64;
    let provider_sells = seed % 7 == 0;
    let sellers = (seed % 9) as i64;
    let average = price + (seed % 11) as i64 * 25 - 125;

    let mut current = vec![-1_i64; 12];
    current[0] = if provider_sells { price } else { -1 };
    current[1] = price;
    current[3] = rank;
    current[11] = sellers;

    let mut product = json!({
        "asin": id,
        "title": format!("Mock item {id}"),
        "salesRanks": { "1": [now - 1_440, rank + 500, now, rank] },
        "stats": { "current": current, "avg90": [-1, average] },
        "lastUpdate": now - (seed % 48) as i64 * 60,
    });

    if offers {
        let list = (0..sellers)
            .map(|index| {
                json!({
                    "sellerId": format!("S{index:04}"),
                    "condition": 1,
                    "isProvider": false,
                    "offerCSV": [now, price + index * 10, 0],
                })
            })
            .collect::<Vec<_>>();
        if let Some(object) = product.as_object_mut() {
            object.insert("offers".to_owned(), Value::Array(list));
        }
    }
    product
}

/// `count` evenly spaced ranks strictly inside `[min, max]`.
fn spread(min: u64, max: u64, count: u64) -> impl Iterator<Item = u64> {
    let width = max.saturating_sub(min);
    (1..=count).map(move |step| min + width * step / (count + 1))
}

fn seed(a: u64, b: u64) -> u64 {
    [a, b].iter().flat_map(|value| value.to_le_bytes()).fold(17_u64, |acc, byte| {
        acc.wrapping_mul(31).wrapping_add(u64::from(byte))
    })
}

fn mock_id(rank: u64, price_cents: u64) -> String {
    format!(
        "R{}{}",
        base36(rank, RANK_DIGITS),
        base36(price_cents, PRICE_DIGITS)
    )
}

fn decode_mock_id(id: &str) -> Option<(u64, u64)> {
    let digits = id.strip_prefix('R')?;
    if digits.len() != (RANK_DIGITS + PRICE_DIGITS) as usize {
        return None;
    }
    let (rank, price) = digits.split_at(RANK_DIGITS as usize);
    Some((
        u64::from_str_radix(rank, 36).ok()?,
        u64::from_str_radix(price, 36).ok()?,
    ))
}

fn base36(value: u64, width: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let max = 36_u64.pow(width) - 1;
    let mut value = value.min(max);
    let mut out = vec![b'0'; width as usize];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}
