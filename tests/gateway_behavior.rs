//! Behavior tests for the budget-aware provider gateway.
//!
//! These tests drive the gateway through a scripted transport and check what
//! reaches the network, what the token budget and circuit breaker observe,
//! and which structured errors callers see.

mod support;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rankscout_core::{
    BalanceProbe, CacheMode, CircuitState, Endpoint, GatewayError, HttpError, HttpResponse,
    ProviderError, RetryConfig,
};

use support::{gateway, query_response, ScriptedHttpClient};

fn query_params() -> Vec<(&'static str, String)> {
    vec![("selection", r#"{"rootCategory":7}"#.to_owned())]
}

// =============================================================================
// Gateway: Budget pre-flight
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_balance_is_below_floor_call_is_refused_without_network() {
    // Given: 8 tokens left and the default floor of 10
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[]))));
    let gateway = gateway(client.clone(), 8.0);

    // When: a query is requested
    let error = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect_err("must be refused");

    // Then: the error carries balance and cost and nothing was dispatched
    assert_eq!(
        error,
        GatewayError::InsufficientBudget {
            endpoint: "query",
            balance: 8.0,
            required: 10.0,
        }
    );
    assert_eq!(gateway.calls_dispatched(), 0);
    assert_eq!(client.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn when_balance_covers_floor_but_not_cost_call_is_refused() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[]))));
    let gateway = gateway(client.clone(), 30.0);

    let error = gateway
        .call(Endpoint::Bestsellers, &[("category", "7".to_owned())])
        .await
        .expect_err("must be refused");

    assert!(matches!(
        error,
        GatewayError::InsufficientBudget { required, .. } if required == 50.0
    ));
    assert_eq!(client.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn free_token_status_calls_skip_the_floor() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(
        r#"{"tokensLeft": 3}"#,
    ))));
    let gateway = gateway(client.clone(), 0.0);

    let payload = gateway.call(Endpoint::Token, &[]).await.expect("free call");

    assert_eq!(payload.tokens_left, Some(3.0));
    assert_eq!(client.request_count(), 1);
}

struct CountingProbe {
    balance: f64,
    calls: AtomicUsize,
}

impl BalanceProbe for CountingProbe {
    fn remaining_tokens<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<f64, ProviderError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let balance = self.balance;
        Box::pin(async move { Ok(balance) })
    }
}

#[tokio::test(start_paused = true)]
async fn authoritative_balance_overrides_a_full_local_estimate() {
    // Given: a full local bucket but the provider reports 5 tokens
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[]))));
    let probe = Arc::new(CountingProbe {
        balance: 5.0,
        calls: AtomicUsize::new(0),
    });
    let gateway = gateway(client.clone(), 1_200.0).with_balance_probe(probe.clone());

    // When: two queries are attempted back to back
    let first = gateway.call(Endpoint::Query, &query_params()).await;
    let second = gateway
        .call(Endpoint::Query, &[("selection", "{}".to_owned())])
        .await;

    // Then: both are refused, the probe ran once inside its refresh interval
    assert!(matches!(first, Err(GatewayError::InsufficientBudget { balance, .. }) if balance == 5.0));
    assert!(matches!(second, Err(GatewayError::InsufficientBudget { .. })));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.request_count(), 0);
}

// =============================================================================
// Gateway: Circuit breaker
// =============================================================================

#[tokio::test(start_paused = true)]
async fn five_connection_failures_open_the_circuit_and_block_the_sixth_call() {
    // Given: a transport that always fails to connect and no retries
    let client = Arc::new(ScriptedHttpClient::always(Err(HttpError::connect(
        "connection refused",
    ))));
    let gateway = gateway(client.clone(), 1_200.0);

    // When: five calls fail
    for _ in 0..5 {
        let error = gateway
            .call(Endpoint::Category, &[("category", "7".to_owned())])
            .await
            .expect_err("connection failure");
        assert!(matches!(
            error,
            GatewayError::Provider {
                source: ProviderError::Connection { .. },
                ..
            }
        ));
    }

    // Then: the breaker is open and the sixth call never reaches the network
    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Open);
    let error = gateway
        .call(Endpoint::Category, &[("category", "7".to_owned())])
        .await
        .expect_err("breaker open");
    assert_eq!(error, GatewayError::ProviderUnavailable { endpoint: "category" });
    assert_eq!(client.request_count(), 5);
    assert_eq!(gateway.calls_dispatched(), 5);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_admits_a_trial_after_cooldown_and_closes_on_success() {
    let client = Arc::new(ScriptedHttpClient::sequence(vec![
        Err(HttpError::connect("down")),
        Err(HttpError::connect("down")),
        Err(HttpError::connect("down")),
        Err(HttpError::connect("down")),
        Err(HttpError::connect("down")),
        Ok(query_response(&[])),
    ]));
    let gateway = gateway(client.clone(), 1_200.0);
    for _ in 0..5 {
        let _ = gateway.call(Endpoint::Category, &[("category", "1".to_owned())]).await;
    }
    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(61)).await;
    gateway
        .call(Endpoint::Category, &[("category", "1".to_owned())])
        .await
        .expect("trial call succeeds");

    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(gateway.circuit_breaker().consecutive_failures(), 0);
}

// =============================================================================
// Gateway: Retry scope
// =============================================================================

#[tokio::test(start_paused = true)]
async fn connection_failures_are_retried_with_backoff_until_success() {
    let client = Arc::new(ScriptedHttpClient::sequence(vec![
        Err(HttpError::connect("reset")),
        Err(HttpError::timeout("slow")),
        Ok(query_response(&["B000000001".to_owned()])),
    ]));
    let gateway = gateway(client.clone(), 1_200.0).with_retry(RetryConfig::exponential(3));

    let payload = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect("third attempt succeeds");

    assert!(payload.body.contains("B000000001"));
    assert_eq!(client.request_count(), 3);
    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(gateway.circuit_breaker().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_surfaced_without_retry() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(
        HttpResponse::with_status(429, "slow down").with_header("Retry-After", "7"),
    )));
    let gateway = gateway(client.clone(), 1_200.0).with_retry(RetryConfig::exponential(3));

    let error = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect_err("rate limited");

    assert_eq!(
        error,
        GatewayError::Provider {
            endpoint: "query",
            source: ProviderError::RateLimited {
                retry_after_secs: Some(7)
            },
        }
    );
    assert_eq!(error.code(), "provider_rate_limited");
    assert_eq!(client.request_count(), 1);
    assert_eq!(gateway.circuit_breaker().consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_surfaced_without_retry() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::with_status(
        503,
        "maintenance",
    ))));
    let gateway = gateway(client.clone(), 1_200.0).with_retry(RetryConfig::exponential(3));

    let error = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect_err("server error");

    assert!(matches!(
        error,
        GatewayError::Provider {
            source: ProviderError::ServerError { status: 503 },
            ..
        }
    ));
    assert_eq!(client.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_responses_time_out_as_connection_failures() {
    let client = Arc::new(
        ScriptedHttpClient::always(Ok(query_response(&[]))).with_delay(Duration::from_secs(120)),
    );
    let gateway = gateway(client.clone(), 1_200.0);

    let error = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect_err("timed out");

    assert!(matches!(
        error,
        GatewayError::Provider {
            source: ProviderError::Connection { .. },
            ..
        }
    ));
    assert_eq!(gateway.circuit_breaker().consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn client_rejections_do_not_count_against_the_circuit() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::with_status(
        400,
        "bad selection",
    ))));
    let gateway = gateway(client.clone(), 1_200.0);

    let error = gateway
        .call(Endpoint::Query, &query_params())
        .await
        .expect_err("rejected");

    assert!(matches!(
        error,
        GatewayError::Provider {
            source: ProviderError::Rejected { status: 400, .. },
            ..
        }
    ));
    assert!(!error.retryable());
    assert_eq!(gateway.circuit_breaker().consecutive_failures(), 0);
}

// =============================================================================
// Gateway: Cache and balance hints
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cache_hits_cost_no_tokens_and_no_dispatch() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[
        "B000000001".to_owned(),
    ]))));
    let gateway = gateway(client.clone(), 500.0);

    let first = gateway.call(Endpoint::Query, &query_params()).await.expect("miss");
    let tokens_after_first = gateway.budget().peek();
    let second = gateway.call(Endpoint::Query, &query_params()).await.expect("hit");

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.body, first.body);
    assert_eq!(client.request_count(), 1);
    assert_eq!(gateway.budget().peek(), tokens_after_first);
    assert_eq!(tokens_after_first, 490.0);
}

#[tokio::test(start_paused = true)]
async fn refresh_mode_skips_lookup_and_bypass_mode_skips_store() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[]))));
    let gateway = gateway(client.clone(), 1_200.0);
    let params = query_params();

    gateway
        .call_with_mode(Endpoint::Query, &params, CacheMode::Bypass)
        .await
        .expect("bypass");
    gateway
        .call_with_mode(Endpoint::Query, &params, CacheMode::Refresh)
        .await
        .expect("refresh");
    let cached = gateway.call(Endpoint::Query, &params).await.expect("use");

    assert_eq!(client.request_count(), 2);
    assert!(cached.from_cache);
}

#[tokio::test(start_paused = true)]
async fn balance_hints_resync_the_local_tracker() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(
        query_response(&[]).with_header("x-tokens-left", "321"),
    )));
    let gateway = gateway(client.clone(), 1_200.0);

    let payload = gateway.call(Endpoint::Query, &query_params()).await.expect("call");

    assert_eq!(payload.tokens_left, Some(321.0));
    assert_eq!(gateway.budget().peek(), 321.0);
}

#[tokio::test(start_paused = true)]
async fn stats_reflect_dispatches_and_cache_activity() {
    let client = Arc::new(ScriptedHttpClient::always(Ok(query_response(&[]))));
    let gateway = gateway(client.clone(), 1_200.0);

    gateway.call(Endpoint::Query, &query_params()).await.expect("miss");
    gateway.call(Endpoint::Query, &query_params()).await.expect("hit");
    let stats = gateway.stats().await;

    assert_eq!(stats.calls_dispatched, 1);
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.entries, 1);
    assert_eq!(stats.circuit_state, CircuitState::Closed);
}
