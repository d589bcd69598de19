//! # Rankscout Core
//!
//! Budget-aware product discovery against a metered product-data provider.
//!
//! ## Overview
//!
//! This crate provides the building blocks of a discovery run:
//!
//! - **Token budget** mirroring the provider's refilling token bucket
//! - **Circuit breaker** that stops spending tokens on a failing upstream
//! - **Tiered cache** with per-volatility TTLs
//! - **Provider gateway** composing budget, breaker, cache, retry and throttle
//! - **Parser** turning raw product payloads into extracted snapshots
//! - **Discovery engine** with rank-segmented querying and balanced selection
//! - **Scoring** of candidates by velocity, stability, confidence and ROI
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`budget`] | Local token bucket estimate |
//! | [`cache`] | Tiered response cache |
//! | [`circuit_breaker`] | Three-state circuit breaker |
//! | [`config`] | TOML and environment configuration |
//! | [`discovery`] | Segmented discovery engine |
//! | [`domain`] | Item ids, categories, ranges and timestamps |
//! | [`error`] | Core error types |
//! | [`gateway`] | Budget-aware request gateway |
//! | [`http_client`] | HTTP client abstraction |
//! | [`parser`] | Provider payload decoding and extraction |
//! | [`provider`] | Typed provider operations over the gateway |
//! | [`retry`] | Retry and backoff policy |
//! | [`scoring`] | Candidate scoring and recommendations |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rankscout_core::{
//!     CategoryId, DiscoveryConfig, DiscoveryEngine, DiscoveryRequest, PriceRange,
//!     ProviderClient, ProviderGateway, RankRange, RankscoutConfig, ReqwestHttpClient, Scorer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RankscoutConfig::from_env()?;
//!     let gateway = ProviderGateway::new(config.gateway(), Arc::new(ReqwestHttpClient::default()));
//!     let engine = DiscoveryEngine::new(
//!         ProviderClient::new(Arc::new(gateway)),
//!         Scorer::new(config.business.clone()),
//!         config.discovery(),
//!     );
//!
//!     let request = DiscoveryRequest::new(
//!         CategoryId::new(1055398)?,
//!         RankRange::new(Some(10_000), Some(250_000))?,
//!         PriceRange::new(Some(15.0), Some(60.0))?,
//!         30,
//!     )?;
//!     let outcome = engine.discover(&request).await?;
//!     for candidate in &outcome.candidates {
//!         println!("{} {:.1}", candidate.item_id, candidate.weighted_score());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DiscoveryEngine │──────▶ Scorer
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ProviderClient  │──────▶ Parser
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ ProviderGateway │────▶│ Cache / Budget / │
//! │                 │     │ Circuit Breaker  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ HttpClient      │
//! └─────────────────┘
//! ```
//!
//! ## Security
//!
//! - The provider API key is read from configuration or the environment and never logged
//! - Cache keys and log fields never include the key

pub mod budget;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod parser;
pub mod provider;
pub mod retry;
pub mod scoring;

// Re-export commonly used types at crate root for convenience

// Budget
pub use budget::{BudgetHealth, TokenBudget, TokenBudgetConfig};

// Caching
pub use cache::{cache_key, CacheMode, CacheStats, CacheStore, TtlTable, Volatility};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Configuration
pub use config::{ConfigError, LoggingConfig, RankscoutConfig};

// Discovery
pub use discovery::{
    CancelToken, DiscoveryConfig, DiscoveryEngine, DiscoveryError, DiscoveryOutcome,
    DiscoveryRequest, DiscoveryRequestInput, DiscoveryStore, IdSource, InMemoryDiscoveryStore,
    PartialFailure, StoreError,
};

// Domain models
pub use domain::{CategoryId, ItemId, PriceRange, RankRange, Segment, Strategy, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// Gateway
pub use gateway::{
    BalanceProbe, Endpoint, GatewayConfig, GatewayError, GatewayStats, ProviderError,
    ProviderGateway, ProviderPayload, TokenStatusProbe,
};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Parsing
pub use parser::{extract_product, ExtractedProduct, RankSource, RawProduct};

// Provider operations
pub use provider::{ProviderClient, QueryFilter};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Scoring
pub use scoring::{BusinessConfig, Candidate, Recommendation, Scorer, Scores};
