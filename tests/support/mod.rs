//! Scripted transport shared by the behavior tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rankscout_core::{
    CacheStore, CircuitBreaker, CircuitBreakerConfig, GatewayConfig, HttpClient, HttpError,
    HttpRequest, HttpResponse, ProviderGateway, RetryConfig, TokenBudget, TokenBudgetConfig,
};
use serde_json::{json, Value};

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync;

/// Answers every request through a closure and records what was sent.
pub struct ScriptedHttpClient {
    responder: Box<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedHttpClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Always the same response.
    pub fn always(response: Result<HttpResponse, HttpError>) -> Self {
        Self::new(move |_| response.clone())
    }

    /// Responses in order; the last one repeats.
    pub fn sequence(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
        let responses = Mutex::new(responses.into_iter().collect::<std::collections::VecDeque<_>>());
        Self::new(move |_| {
            let mut responses = responses.lock().expect("script lock is not poisoned");
            if responses.len() > 1 {
                responses.pop_front().expect("non-empty script")
            } else {
                responses.front().cloned().expect("script has a final response")
            }
        })
    }

    /// Sleeps for `delay` on tokio's clock before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .len()
    }

    /// Recorded requests for one endpoint path.
    pub fn requests_to(&self, endpoint: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| endpoint_of(&request.url) == endpoint)
            .collect()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request.clone());
        let response = (self.responder)(&request);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}

/// Gateway config that never waits on the wall-clock burst throttle.
pub fn test_gateway_config() -> GatewayConfig {
    GatewayConfig {
        base_url: "https://provider.test".to_owned(),
        api_key: "test-key".to_owned(),
        requests_per_second: 10_000,
        ..GatewayConfig::default()
    }
}

pub fn budget_with(tokens: f64) -> Arc<TokenBudget> {
    Arc::new(TokenBudget::new(TokenBudgetConfig {
        initial_tokens: Some(tokens),
        ..TokenBudgetConfig::default()
    }))
}

/// Gateway over `client` with the given starting balance and no retries.
pub fn gateway(client: Arc<ScriptedHttpClient>, tokens: f64) -> ProviderGateway {
    ProviderGateway::new(test_gateway_config(), client)
        .with_budget(budget_with(tokens))
        .with_circuit_breaker(Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())))
        .with_cache(CacheStore::default())
        .with_retry(RetryConfig::no_retry())
}

pub fn endpoint_of(url: &str) -> String {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    path.rsplit('/').next().unwrap_or_default().to_owned()
}

pub fn params_of(url: &str) -> BTreeMap<String, String> {
    url.split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| {
            let value = urlencoding::decode(value).expect("valid encoding").into_owned();
            (name.to_owned(), value)
        })
        .collect()
}

/// Decoded query selection document of a `query` request.
pub fn selection_of(url: &str) -> Value {
    params_of(url)
        .get("selection")
        .map(|raw| serde_json::from_str(raw).expect("selection is JSON"))
        .unwrap_or(Value::Null)
}

pub fn item_id(n: u64) -> String {
    format!("B{n:09}")
}

pub fn query_response(ids: &[String]) -> HttpResponse {
    HttpResponse::ok_json(json!({ "asinList": ids, "totalResults": ids.len() }).to_string())
}

pub fn bestsellers_response(ids: &[String]) -> HttpResponse {
    HttpResponse::ok_json(json!({ "bestSellersList": { "asinList": ids } }).to_string())
}

/// Product record with a category-history rank, a new-channel price and a seller count.
pub fn product_json(id: &str, rank: u64, price_cents: i64, sellers: i64, provider_sells: bool) -> Value {
    let mut current = vec![-1_i64; 12];
    current[0] = if provider_sells { price_cents } else { -1 };
    current[1] = price_cents;
    current[3] = rank as i64;
    current[11] = sellers;
    json!({
        "asin": id,
        "title": format!("Item {id}"),
        "salesRanks": { "1": [8_000_000, rank] },
        "stats": { "current": current, "avg90": [-1, price_cents] },
        "lastUpdate": 8_000_000,
    })
}

pub fn products_response(products: Vec<Value>) -> HttpResponse {
    HttpResponse::ok_json(json!({ "products": products }).to_string())
}

/// Ids requested by a `product` call.
pub fn requested_ids(url: &str) -> Vec<String> {
    params_of(url)
        .get("asin")
        .map(|ids| ids.split(',').map(str::to_owned).collect())
        .unwrap_or_default()
}
