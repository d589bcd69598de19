//! Budget-aware request gateway.
//!
//! Every provider call goes through [`ProviderGateway::call`]. The order of
//! checks is fixed: cache, cost estimate, pre-flight balance, token acquire,
//! breaker gate, burst throttle, admission semaphore, dispatch, classification.
//! Acquire through classification repeat inside a bounded retry loop for
//! connection-class failures only.

use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::budget::{BudgetHealth, TokenBudget};
use crate::cache::{cache_key, CacheMode, CacheStats, CacheStore, Volatility};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::retry::RetryConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.productdata.example";
/// Header carrying the provider's remaining-token count.
pub const TOKENS_LEFT_HEADER: &str = "x-tokens-left";

const REJECTION_BODY_LIMIT: usize = 200;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Provider endpoints with their static token costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "endpoint")]
pub enum Endpoint {
    /// Per-item detail; `offers` adds the per-item offer surcharge.
    Product { items: u32, offers: bool },
    /// Bulk selection by category, rank and price filters.
    Query,
    Bestsellers,
    Category,
    /// Balance status; free and never cached.
    Token,
}

impl Endpoint {
    pub const PRODUCT_COST_PER_ITEM: f64 = 1.0;
    pub const OFFERS_COST_PER_ITEM: f64 = 5.0;

    pub const fn path(self) -> &'static str {
        match self {
            Self::Product { .. } => "product",
            Self::Query => "query",
            Self::Bestsellers => "bestsellers",
            Self::Category => "category",
            Self::Token => "token",
        }
    }

    /// Estimated token cost of one call.
    pub fn cost(self) -> f64 {
        match self {
            Self::Product { items, offers } => {
                let per_item = if offers {
                    Self::PRODUCT_COST_PER_ITEM + Self::OFFERS_COST_PER_ITEM
                } else {
                    Self::PRODUCT_COST_PER_ITEM
                };
                f64::from(items.max(1)) * per_item
            }
            Self::Query => 10.0,
            Self::Bestsellers => 50.0,
            Self::Category => 1.0,
            Self::Token => 0.0,
        }
    }

    /// Cache class, or `None` for uncacheable endpoints.
    pub const fn volatility(self) -> Option<Volatility> {
        match self {
            Self::Product { .. } => Some(Volatility::Volatile),
            Self::Query | Self::Bestsellers => Some(Volatility::SemiVolatile),
            Self::Category => Some(Volatility::Stable),
            Self::Token => None,
        }
    }
}

/// Connection, throttle and balance-floor settings for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Marketplace domain id sent with every request.
    pub domain: u8,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
    /// Burst throttle independent of the token budget.
    pub requests_per_second: u32,
    /// Calls are refused while the balance sits below this floor.
    pub min_operating_floor: f64,
    pub balance_refresh_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: String::new(),
            domain: 1,
            request_timeout: Duration::from_secs(30),
            max_in_flight: 4,
            requests_per_second: 5,
            min_operating_floor: 10.0,
            balance_refresh_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Full request URL. The API key is part of the URL but never of the cache key.
    pub fn url(&self, endpoint: Endpoint, params: &[(&str, String)]) -> String {
        let mut url = format!(
            "{}/{}?key={}&domain={}",
            self.base_url.trim_end_matches('/'),
            endpoint.path(),
            urlencoding::encode(&self.api_key),
            self.domain
        );
        for (name, value) in params {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Classified upstream failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider rate limit exceeded (HTTP 429)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider server error (HTTP {status})")]
    ServerError { status: u16 },
    #[error("provider connection failed: {message}")]
    Connection { message: String },
    #[error("provider rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("provider payload could not be decoded: {message}")]
    Decode { message: String },
}

impl ProviderError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "provider_rate_limited",
            Self::ServerError { .. } => "provider_server_error",
            Self::Connection { .. } => "provider_connection",
            Self::Rejected { .. } => "provider_rejected",
            Self::Decode { .. } => "provider_decode",
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Connection { .. }
        )
    }

    pub fn decode(error: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: error.to_string(),
        }
    }
}

impl From<HttpError> for ProviderError {
    fn from(error: HttpError) -> Self {
        Self::Connection {
            message: error.message().to_owned(),
        }
    }
}

/// Gateway failure carrying the structured detail callers need to react.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("insufficient token budget for {endpoint}: balance {balance:.1}, required {required:.1}")]
    InsufficientBudget {
        endpoint: &'static str,
        balance: f64,
        required: f64,
    },
    #[error("provider unavailable for {endpoint}: circuit breaker is open")]
    ProviderUnavailable { endpoint: &'static str },
    #[error("{endpoint}: {source}")]
    Provider {
        endpoint: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl GatewayError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientBudget { .. } => "insufficient_budget",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::Provider { source, .. } => source.code(),
        }
    }

    /// Budget exhaustion and an open breaker end a discovery run.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBudget { .. } | Self::ProviderUnavailable { .. }
        )
    }

    pub const fn retryable(&self) -> bool {
        match self {
            Self::InsufficientBudget { .. } | Self::ProviderUnavailable { .. } => true,
            Self::Provider { source, .. } => source.retryable(),
        }
    }

    pub fn provider(endpoint: Endpoint, source: ProviderError) -> Self {
        Self::Provider {
            endpoint: endpoint.path(),
            source,
        }
    }
}

/// Raw response body plus the metadata the gateway learned while fetching it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload {
    pub body: String,
    pub from_cache: bool,
    pub tokens_left: Option<f64>,
}

/// Point-in-time view of gateway health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStats {
    pub cache: CacheStats,
    pub tokens_available: f64,
    pub budget_health: BudgetHealth,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub calls_dispatched: u64,
}

/// Source of the authoritative remaining balance.
pub trait BalanceProbe: Send + Sync {
    fn remaining_tokens<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<f64, ProviderError>> + Send + 'a>>;
}

/// Probe that asks the provider's free token-status endpoint.
pub struct TokenStatusProbe {
    config: GatewayConfig,
    http_client: Arc<dyn HttpClient>,
}

impl TokenStatusProbe {
    pub fn new(config: GatewayConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

impl BalanceProbe for TokenStatusProbe {
    fn remaining_tokens<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<f64, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let request = HttpRequest::get(self.config.url(Endpoint::Token, &[]))
                .with_timeout_ms(self.config.timeout_ms());
            let response = self.http_client.execute(request).await?;
            if !response.is_success() {
                return Err(ProviderError::Rejected {
                    status: response.status,
                    message: truncate(&response.body),
                });
            }
            balance_hint(&response)
                .ok_or_else(|| ProviderError::decode("token status carried no balance"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct BalanceHintBody {
    #[serde(rename = "tokensLeft")]
    tokens_left: Option<f64>,
}

/// Remaining-balance hint from the header, falling back to the body field.
pub fn balance_hint(response: &HttpResponse) -> Option<f64> {
    response
        .header(TOKENS_LEFT_HEADER)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .or_else(|| {
            serde_json::from_str::<BalanceHintBody>(&response.body)
                .ok()
                .and_then(|body| body.tokens_left)
        })
        .filter(|value| value.is_finite())
}

/// Single choke point for provider traffic.
pub struct ProviderGateway {
    config: GatewayConfig,
    http_client: Arc<dyn HttpClient>,
    budget: Arc<TokenBudget>,
    circuit_breaker: Arc<CircuitBreaker>,
    cache: CacheStore,
    retry: RetryConfig,
    admission: Semaphore,
    throttle: DirectRateLimiter,
    balance_probe: Option<Arc<dyn BalanceProbe>>,
    last_probe: Mutex<Option<Instant>>,
    dispatched: AtomicU64,
}

impl ProviderGateway {
    pub fn new(config: GatewayConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            admission: Semaphore::new(config.max_in_flight.max(1)),
            throttle: RateLimiter::direct(Quota::per_second(rate)),
            config,
            http_client,
            budget: Arc::new(TokenBudget::default()),
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            cache: CacheStore::default(),
            retry: RetryConfig::default(),
            balance_probe: None,
            last_probe: Mutex::new(None),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn with_budget(mut self, budget: Arc<TokenBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_balance_probe(mut self, probe: Arc<dyn BalanceProbe>) -> Self {
        self.balance_probe = Some(probe);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Network dispatches so far, retries included.
    pub fn calls_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache: self.cache.stats().await,
            tokens_available: self.budget.peek(),
            budget_health: self.budget.health(),
            circuit_state: self.circuit_breaker.state(),
            consecutive_failures: self.circuit_breaker.consecutive_failures(),
            calls_dispatched: self.calls_dispatched(),
        }
    }

    pub async fn call(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
    ) -> Result<ProviderPayload, GatewayError> {
        self.call_with_mode(endpoint, params, CacheMode::Use).await
    }

    pub async fn call_with_mode(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
        mode: CacheMode,
    ) -> Result<ProviderPayload, GatewayError> {
        let class = endpoint.volatility();
        let key = cache_key(
            endpoint.path(),
            params.iter().map(|(name, value)| (*name, value.as_str())),
        );

        if class.is_some() && mode == CacheMode::Use {
            if let Some(body) = self.cache.get(&key).await {
                debug!(endpoint = endpoint.path(), "provider cache hit");
                return Ok(ProviderPayload {
                    body,
                    from_cache: true,
                    tokens_left: None,
                });
            }
        }

        let cost = endpoint.cost().min(self.budget.config().capacity);
        if cost > 0.0 {
            let balance = self.preflight_balance().await;
            if balance < self.config.min_operating_floor || balance < cost {
                warn!(
                    endpoint = endpoint.path(),
                    balance,
                    required = cost,
                    floor = self.config.min_operating_floor,
                    "refusing provider call: insufficient token budget"
                );
                return Err(GatewayError::InsufficientBudget {
                    endpoint: endpoint.path(),
                    balance,
                    required: cost,
                });
            }
        }

        let url = self.config.url(endpoint, params);
        let mut attempt = 0_u32;
        loop {
            self.budget.acquire(cost).await;

            if !self.circuit_breaker.can_proceed() {
                return Err(GatewayError::ProviderUnavailable {
                    endpoint: endpoint.path(),
                });
            }

            self.throttle.until_ready().await;

            match self.dispatch(&url).await {
                Ok(response) => {
                    return self.classify(endpoint, response, key, class, mode).await;
                }
                Err(error) => {
                    self.circuit_breaker.record_failure();
                    if self.retry.should_retry(&error, attempt) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            endpoint = endpoint.path(),
                            attempt = attempt + 1,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "provider connection failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    warn!(
                        endpoint = endpoint.path(),
                        attempts = attempt + 1,
                        error = %error,
                        "provider connection failed"
                    );
                    return Err(GatewayError::provider(endpoint, error.into()));
                }
            }
        }
    }

    async fn dispatch(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| HttpError::other("gateway admission closed"))?;

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let request = HttpRequest::get(url).with_timeout_ms(self.config.timeout_ms());
        match tokio::time::timeout(self.config.request_timeout, self.http_client.execute(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HttpError::timeout(format!(
                "request exceeded {} ms",
                self.config.timeout_ms()
            ))),
        }
    }

    async fn classify(
        &self,
        endpoint: Endpoint,
        response: HttpResponse,
        key: String,
        class: Option<Volatility>,
        mode: CacheMode,
    ) -> Result<ProviderPayload, GatewayError> {
        let tokens_left = balance_hint(&response);
        if let Some(balance) = tokens_left {
            self.budget.sync(balance);
        }

        match response.status {
            200..=299 => {
                self.circuit_breaker.record_success();
                if let Some(class) = class {
                    if mode != CacheMode::Bypass {
                        self.cache.set(key, response.body.clone(), class).await;
                    }
                }
                debug!(
                    endpoint = endpoint.path(),
                    tokens_left, "provider call succeeded"
                );
                Ok(ProviderPayload {
                    body: response.body,
                    from_cache: false,
                    tokens_left,
                })
            }
            429 => {
                self.circuit_breaker.record_failure();
                let retry_after_secs = response
                    .header("retry-after")
                    .and_then(|value| value.trim().parse::<u64>().ok());
                warn!(endpoint = endpoint.path(), retry_after_secs, "provider rate limited");
                Err(GatewayError::provider(
                    endpoint,
                    ProviderError::RateLimited { retry_after_secs },
                ))
            }
            status @ 500..=599 => {
                self.circuit_breaker.record_failure();
                warn!(endpoint = endpoint.path(), status, "provider server error");
                Err(GatewayError::provider(
                    endpoint,
                    ProviderError::ServerError { status },
                ))
            }
            status => {
                self.circuit_breaker.record_success();
                Err(GatewayError::provider(
                    endpoint,
                    ProviderError::Rejected {
                        status,
                        message: truncate(&response.body),
                    },
                ))
            }
        }
    }

    /// Authoritative balance when a probe is due, otherwise the local estimate.
    async fn preflight_balance(&self) -> f64 {
        if let Some(probe) = &self.balance_probe {
            let due = {
                let mut last = self
                    .last_probe
                    .lock()
                    .expect("balance probe lock is not poisoned");
                let now = Instant::now();
                let due = last.map_or(true, |at| {
                    now.duration_since(at) >= self.config.balance_refresh_interval
                });
                if due {
                    *last = Some(now);
                }
                due
            };

            if due {
                match probe.remaining_tokens().await {
                    Ok(balance) => self.budget.sync(balance),
                    Err(error) => warn!(
                        error = %error,
                        "balance probe failed; using local token estimate"
                    ),
                }
            }
        }
        self.budget.peek()
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(REJECTION_BODY_LIMIT).collect()
}
