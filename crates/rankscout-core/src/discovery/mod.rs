//! # Discovery Engine
//!
//! Turns a [`DiscoveryRequest`] into scored, rank-balanced [`Candidate`]s.
//!
//! | Stage | Behavior |
//! |-------|----------|
//! | Outer cache | Optional [`DiscoveryStore`] lookup by request fingerprint |
//! | Id query | One bulk query, or three segment queries for wide rank ranges |
//! | Fallback | Category bestsellers when the bulk query fails |
//! | Post-filter | Detail fetch, seller-composition and bound checks |
//! | Selection | Rank-balanced pick, or score truncation without bounds |
//!
//! Budget exhaustion and an open breaker end the run; other failures are
//! recorded as [`PartialFailure`]s and the run continues with what it has.

mod balance;
mod request;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::{ItemId, RankRange, Segment, UtcDateTime};
use crate::gateway::GatewayError;
use crate::parser::{extract_product, ExtractedProduct};
use crate::provider::{ProviderClient, QueryFilter, PRODUCT_BATCH_LIMIT};
use crate::scoring::{Candidate, Scorer};
use crate::ValidationError;

pub use balance::{
    balance_select, dedupe, interleave_segments, sort_by_score, top_by_score, TaggedId,
};
pub use request::{DiscoveryRequest, DiscoveryRequestInput};
pub use store::{DiscoveryStore, InMemoryDiscoveryStore, StoreError};

/// Tuning knobs for discovery runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Rank spans wider than this are split into segments.
    pub segment_width_threshold: u64,
    /// Floor on results requested per segment query.
    pub min_per_segment: usize,
    pub inter_segment_delay: Duration,
    /// Maximum ids that get a detail fetch per run.
    pub detail_batch_ceiling: usize,
    /// Bestseller ids post-filtered on the fallback path.
    pub fallback_prefix: usize,
    /// Fetch per-seller offers with detail; costs extra tokens per item.
    pub detail_offers: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            segment_width_threshold: 50_000,
            min_per_segment: 20,
            inter_segment_delay: Duration::from_secs(1),
            detail_batch_ceiling: 100,
            fallback_prefix: 50,
            detail_offers: false,
        }
    }
}

/// Cooperative cancellation for a discovery run.
///
/// Calls already in flight finish; no new segment or detail calls are issued.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Where the run's id list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    OuterCache,
    Query,
    SegmentedQuery,
    Bestsellers,
}

impl IdSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OuterCache => "outer_cache",
            Self::Query => "query",
            Self::SegmentedQuery => "segmented_query",
            Self::Bestsellers => "bestsellers",
        }
    }
}

/// Stage at which a non-fatal failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum FailureStage {
    Segment { index: usize },
    Query,
    Bestsellers,
    Detail { batch: usize },
}

/// A recorded failure that did not end the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialFailure {
    #[serde(flatten)]
    pub stage: FailureStage,
    pub code: &'static str,
    pub message: String,
}

impl PartialFailure {
    fn new(stage: FailureStage, error: &GatewayError) -> Self {
        Self {
            stage,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryOutcome {
    pub run_id: Uuid,
    pub fingerprint: String,
    pub id_source: IdSource,
    /// Segments the rank range was split into; empty for unsegmented runs.
    pub segments: Vec<Segment>,
    /// Unique ids considered before post-filtering.
    pub ids_considered: usize,
    pub candidates: Vec<Candidate>,
    pub partial_failures: Vec<PartialFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("every discovery path failed ({} failures)", failures.len())]
    TotalFailure { failures: Vec<PartialFailure> },
}

impl DiscoveryError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Gateway(error) => error.code(),
            Self::TotalFailure { .. } => "total_discovery_failure",
        }
    }
}

/// Id list plus run bookkeeping gathered before post-filtering.
struct IdCollection {
    ids: Vec<TaggedId>,
    source: IdSource,
    failures: Vec<PartialFailure>,
    fatal: Option<GatewayError>,
}

/// Runs discovery against the provider through the shared gateway.
pub struct DiscoveryEngine {
    provider: ProviderClient,
    scorer: Scorer,
    config: DiscoveryConfig,
    store: Option<Arc<dyn DiscoveryStore>>,
}

impl DiscoveryEngine {
    pub fn new(provider: ProviderClient, scorer: Scorer, config: DiscoveryConfig) -> Self {
        Self {
            provider,
            scorer,
            config,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DiscoveryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    pub async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryOutcome, DiscoveryError> {
        self.discover_with_cancel(request, &CancelToken::new()).await
    }

    pub async fn discover_with_cancel(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancelToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "discovery",
            %run_id,
            category = request.category().get(),
            strategy = %request.strategy()
        );
        self.run(run_id, request, cancel).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        request: &DiscoveryRequest,
        cancel: &CancelToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let fingerprint = request.fingerprint();
        let segments = self.plan_segments(request);

        let mut collection = match self.cached_ids(&fingerprint).await {
            Some(ids) => IdCollection {
                ids: ids
                    .into_iter()
                    .map(|item_id| TaggedId {
                        item_id,
                        segment: None,
                    })
                    .collect(),
                source: IdSource::OuterCache,
                failures: Vec::new(),
                fatal: None,
            },
            None => {
                let collection = match &segments {
                    Some(segments) => self.collect_segmented(request, segments, cancel).await,
                    None => self.collect_single(request).await,
                };
                self.collect_with_fallback(request, collection, cancel).await
            }
        };

        collection.ids = dedupe(collection.ids);
        if collection.ids.is_empty() {
            if let Some(fatal) = collection.fatal.take() {
                warn!(code = fatal.code(), error = %fatal, "discovery aborted");
                return Err(DiscoveryError::Gateway(fatal));
            }
            if !collection.failures.is_empty() {
                return Err(DiscoveryError::TotalFailure {
                    failures: std::mem::take(&mut collection.failures),
                });
            }
        } else if collection.source != IdSource::OuterCache && collection.fatal.is_none() {
            self.remember(&fingerprint, &collection.ids).await;
        }

        let ids_considered = collection.ids.len();
        let mut failures = collection.failures;
        let mut fatal = collection.fatal;

        let candidates = if fatal.is_some() {
            Vec::new()
        } else {
            let (candidates, detail_fatal) = self
                .fetch_candidates(request, &collection.ids, segments.as_ref(), cancel, &mut failures)
                .await;
            fatal = detail_fatal;
            candidates
        };

        if candidates.is_empty() {
            if let Some(fatal) = fatal {
                warn!(code = fatal.code(), error = %fatal, "discovery aborted");
                return Err(DiscoveryError::Gateway(fatal));
            }
        }

        let candidates = match &segments {
            Some(segments) => balance_select(candidates, segments, request.max_results()),
            None => top_by_score(candidates, request.max_results()),
        };

        info!(
            source = collection.source.as_str(),
            ids_considered,
            candidates = candidates.len(),
            partial_failures = failures.len(),
            cancelled = cancel.is_cancelled(),
            "discovery finished"
        );

        Ok(DiscoveryOutcome {
            run_id,
            fingerprint,
            id_source: collection.source,
            segments: segments.map(Vec::from).unwrap_or_default(),
            ids_considered,
            candidates,
            partial_failures: failures,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// Segments for wide, fully bounded rank ranges.
    fn plan_segments(&self, request: &DiscoveryRequest) -> Option<[Segment; 3]> {
        let span = request.rank().span()?;
        if span <= self.config.segment_width_threshold {
            return None;
        }
        request.rank().segments()
    }

    async fn cached_ids(&self, fingerprint: &str) -> Option<Vec<ItemId>> {
        let store = self.store.as_ref()?;
        match store.get_cached_discovery(fingerprint).await {
            Ok(Some(ids)) if !ids.is_empty() => {
                debug!(ids = ids.len(), "outer discovery cache hit");
                Some(ids)
            }
            Ok(_) => None,
            Err(error) => {
                warn!(error = %error, "discovery store lookup failed; ignoring");
                None
            }
        }
    }

    async fn remember(&self, fingerprint: &str, ids: &[TaggedId]) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let ids = ids.iter().map(|tagged| tagged.item_id.clone()).collect::<Vec<_>>();
        if let Err(error) = store.put_cached_discovery(fingerprint, &ids).await {
            warn!(error = %error, "discovery store write failed; ignoring");
        }
    }

    fn filter(&self, request: &DiscoveryRequest, rank: RankRange, per_page: usize) -> QueryFilter {
        QueryFilter {
            category: request.category(),
            rank,
            price: request.price(),
            per_page,
        }
    }

    async fn collect_single(&self, request: &DiscoveryRequest) -> IdCollection {
        let per_page = request.max_results().max(self.config.min_per_segment);
        let filter = self.filter(request, request.rank(), per_page);
        match self.provider.query(&filter).await {
            Ok(ids) => {
                debug!(ids = ids.len(), "bulk query returned");
                IdCollection {
                    ids: ids
                        .into_iter()
                        .map(|item_id| TaggedId {
                            item_id,
                            segment: None,
                        })
                        .collect(),
                    source: IdSource::Query,
                    failures: Vec::new(),
                    fatal: None,
                }
            }
            Err(error) => {
                warn!(code = error.code(), error = %error, "bulk query failed");
                let fatal = error.is_fatal().then(|| error.clone());
                IdCollection {
                    ids: Vec::new(),
                    source: IdSource::Query,
                    failures: vec![PartialFailure::new(FailureStage::Query, &error)],
                    fatal,
                }
            }
        }
    }

    async fn collect_segmented(
        &self,
        request: &DiscoveryRequest,
        segments: &[Segment; 3],
        cancel: &CancelToken,
    ) -> IdCollection {
        let per_segment = (request.max_results() / segments.len()).max(self.config.min_per_segment);
        let mut collection = IdCollection {
            ids: Vec::new(),
            source: IdSource::SegmentedQuery,
            failures: Vec::new(),
            fatal: None,
        };

        for (position, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }
            if position > 0 && !self.config.inter_segment_delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.inter_segment_delay) => {}
                    () = cancel.cancelled() => {}
                }
            }
            if cancel.is_cancelled() {
                info!(segment = segment.label(), "discovery cancelled; skipping remaining segments");
                break;
            }

            let filter = self.filter(request, segment.rank_range(), per_segment);
            match self.provider.query(&filter).await {
                Ok(ids) => {
                    debug!(segment = segment.label(), ids = ids.len(), "segment query returned");
                    collection.ids.extend(ids.into_iter().map(|item_id| TaggedId {
                        item_id,
                        segment: Some(segment.index),
                    }));
                }
                Err(error) => {
                    warn!(
                        segment = segment.label(),
                        code = error.code(),
                        error = %error,
                        "segment query failed"
                    );
                    collection.failures.push(PartialFailure::new(
                        FailureStage::Segment {
                            index: segment.index,
                        },
                        &error,
                    ));
                    if error.is_fatal() {
                        collection.fatal = Some(error);
                        break;
                    }
                }
            }
        }
        collection
    }

    /// Replaces an empty, non-fatal id collection with the bestseller fallback.
    async fn collect_with_fallback(
        &self,
        request: &DiscoveryRequest,
        collection: IdCollection,
        cancel: &CancelToken,
    ) -> IdCollection {
        if !collection.ids.is_empty()
            || collection.fatal.is_some()
            || collection.failures.is_empty()
            || cancel.is_cancelled()
        {
            return collection;
        }

        info!("falling back to category bestsellers");
        let mut failures = collection.failures;
        match self.provider.bestsellers(request.category()).await {
            Ok(mut ids) => {
                ids.truncate(self.config.fallback_prefix);
                IdCollection {
                    ids: ids
                        .into_iter()
                        .map(|item_id| TaggedId {
                            item_id,
                            segment: None,
                        })
                        .collect(),
                    source: IdSource::Bestsellers,
                    failures,
                    fatal: None,
                }
            }
            Err(error) => {
                warn!(code = error.code(), error = %error, "bestseller fallback failed");
                failures.push(PartialFailure::new(FailureStage::Bestsellers, &error));
                IdCollection {
                    ids: Vec::new(),
                    source: IdSource::Bestsellers,
                    failures,
                    fatal: error.is_fatal().then_some(error),
                }
            }
        }
    }

    /// Detail fetch, post-filter and scoring. Returns a fatal error that stopped the fetch, if any.
    async fn fetch_candidates(
        &self,
        request: &DiscoveryRequest,
        ids: &[TaggedId],
        segments: Option<&[Segment; 3]>,
        cancel: &CancelToken,
        failures: &mut Vec<PartialFailure>,
    ) -> (Vec<Candidate>, Option<GatewayError>) {
        let detail_ids = interleave_segments(ids, self.config.detail_batch_ceiling);
        let now = UtcDateTime::now();
        let mut candidates = Vec::new();

        for (batch, chunk) in detail_ids.chunks(PRODUCT_BATCH_LIMIT).enumerate() {
            if cancel.is_cancelled() {
                info!(batch, "discovery cancelled; skipping remaining detail batches");
                break;
            }

            let batch_ids = chunk.iter().map(|tagged| tagged.item_id.clone()).collect::<Vec<_>>();
            let products = match self.provider.products(&batch_ids, self.config.detail_offers).await {
                Ok(products) => products,
                Err(error) => {
                    warn!(batch, code = error.code(), error = %error, "detail fetch failed");
                    failures.push(PartialFailure::new(FailureStage::Detail { batch }, &error));
                    if error.is_fatal() {
                        return (candidates, Some(error));
                    }
                    continue;
                }
            };

            for raw in &products {
                let product = match extract_product(raw) {
                    Ok(product) => product,
                    Err(error) => {
                        debug!(item = %raw.item_id, error = %error, "skipping unparseable product");
                        continue;
                    }
                };
                if !passes_post_filter(request, &product) {
                    continue;
                }

                let query_segment = chunk
                    .iter()
                    .find(|tagged| tagged.item_id == product.item_id)
                    .and_then(|tagged| tagged.segment);
                let segment = query_segment.or_else(|| {
                    let segments = segments?;
                    let rank = product.rank.rank?;
                    segments.iter().position(|segment| segment.contains(rank))
                });

                candidates.push(self.scorer.candidate(
                    &product,
                    request.strategy(),
                    request.category(),
                    segment,
                    now,
                ));
            }
        }

        (candidates, None)
    }
}

/// Seller-composition rules plus local rank and price bounds.
///
/// Unknown values pass; only contradicting data removes an item.
pub fn passes_post_filter(request: &DiscoveryRequest, product: &ExtractedProduct) -> bool {
    if request.exclude_provider_as_seller() && product.provider_is_seller {
        return false;
    }
    if let (Some(limit), Some(count)) = (request.max_competing_sellers(), product.competing_sellers) {
        if count > limit {
            return false;
        }
    }
    if product.rank.rank.is_some_and(|rank| !request.rank().contains(rank)) {
        return false;
    }
    if product
        .current_price()
        .is_some_and(|price| !request.price().contains(price))
    {
        return false;
    }
    true
}
