//! Engine facade
//!
//! Owns the shared state of a page session: the embedding cache, the
//! promotion store, the active snapshot and its reindex flag.

use std::sync::Arc;

use action_locator::{
    metrics as locator_metrics, ElementResolver, IntentParser, LiveDriver, PromotionStore,
    ResolutionReport, SelfHealingResolver,
};
use embedding_cache::{CacheStats, Embedder, EmbeddingCache, HashingEmbedder};
use locator_core_types::{ContextId, ScopeRef};
use perceiver_structural::{
    metrics as perceiver_metrics, CapturePort, RouteEventSender, RouteWatcher, Sampler, Snapshot,
    SnapshotChange, SnapshotTracker,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigError, EngineConfig};
use crate::errors::EngineError;

#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub capture: perceiver_metrics::MetricSnapshot,
    pub resolve: locator_metrics::ResolveMetrics,
    pub cache: CacheStats,
    pub promotion_records: usize,
}

pub struct LocatorEngineBuilder {
    config: EngineConfig,
    driver: Option<Arc<dyn LiveDriver>>,
    embedder: Option<Arc<dyn Embedder>>,
    parser: Option<Arc<dyn IntentParser>>,
    capture: Option<Arc<dyn CapturePort>>,
}

impl LocatorEngineBuilder {
    pub fn driver(mut self, driver: Arc<dyn LiveDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Defaults to a [`HashingEmbedder`] of the configured dimension.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn IntentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Enables [`LocatorEngine::refresh`] and recapture on reindex.
    pub fn capture_port(mut self, port: Arc<dyn CapturePort>) -> Self {
        self.capture = Some(port);
        self
    }

    pub fn build(self) -> Result<LocatorEngine, EngineError> {
        let mut config = self.config;
        config.validate()?;
        let driver = self
            .driver
            .ok_or_else(|| ConfigError::Invalid("a live driver is required".to_string()))?;
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::new(config.embedding_dimension)));

        let cache = Arc::new(EmbeddingCache::from_config(&config.cache));
        let promotion = Arc::new(PromotionStore::new(config.promotion.clone()));
        let mut resolver = SelfHealingResolver::new(
            driver,
            embedder,
            Arc::clone(&cache),
            Arc::clone(&promotion),
            config.resolver.clone(),
        );
        if let Some(parser) = self.parser {
            resolver = resolver.with_parser(parser);
        }

        let tracker = SnapshotTracker::default();
        let watcher = RouteWatcher::new(tracker.reindex_flag().clone());
        let sampler = self
            .capture
            .map(|port| Sampler::new(port, config.capture.clone()));

        info!(
            budget_ms = config.resolver.budget_ms,
            top_k = config.resolver.rank.top_k,
            cache_capacity = config.cache.capacity,
            durable_cache = config.cache.durable_dir.is_some(),
            capture = sampler.is_some(),
            "locator engine ready"
        );

        Ok(LocatorEngine {
            config,
            resolver,
            cache,
            promotion,
            tracker,
            sampler,
            watcher: Mutex::new(watcher),
        })
    }
}

pub struct LocatorEngine {
    config: EngineConfig,
    resolver: SelfHealingResolver,
    cache: Arc<EmbeddingCache>,
    promotion: Arc<PromotionStore>,
    tracker: SnapshotTracker,
    sampler: Option<Sampler<dyn CapturePort>>,
    watcher: Mutex<RouteWatcher>,
}

impl LocatorEngine {
    pub fn builder(config: EngineConfig) -> LocatorEngineBuilder {
        LocatorEngineBuilder {
            config,
            driver: None,
            embedder: None,
            parser: None,
            capture: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn promotion(&self) -> &Arc<PromotionStore> {
        &self.promotion
    }

    /// Resolves against an explicit snapshot.
    pub async fn resolve(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
    ) -> Result<ResolutionReport, EngineError> {
        Ok(self.resolver.resolve(query, snapshot, context).await?)
    }

    pub async fn resolve_with_cancel(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
        cancel: CancellationToken,
    ) -> Result<ResolutionReport, EngineError> {
        Ok(self
            .resolver
            .resolve_with_cancel(query, snapshot, context, cancel)
            .await?)
    }

    /// Resolves against the session snapshot, recapturing first when none is
    /// held or a route change marked it for reindex.
    pub async fn resolve_current(
        &self,
        query: &str,
        context: &ContextId,
    ) -> Result<ResolutionReport, EngineError> {
        let snapshot = self.current_snapshot().await?;
        self.resolve(query, &snapshot, context).await
    }

    /// Captures the main document and its nested scopes into the session.
    pub async fn refresh(&self) -> Result<SnapshotChange, EngineError> {
        self.refresh_from(ScopeRef::main()).await
    }

    pub async fn refresh_from(&self, root: ScopeRef) -> Result<SnapshotChange, EngineError> {
        let sampler = self
            .sampler
            .as_ref()
            .ok_or_else(|| EngineError::NoSnapshot("no capture port configured".to_string()))?;
        // cleared before capturing so a route change during the capture is kept
        let was_marked = self.tracker.begin_capture();
        let snapshot = match sampler.capture(root).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if was_marked {
                    self.tracker.reindex_flag().mark();
                }
                return Err(err.into());
            }
        };
        Ok(self.install(snapshot))
    }

    /// Hands an externally captured snapshot to the session, clearing any
    /// pending reindex mark.
    pub fn offer(&self, snapshot: Snapshot) -> SnapshotChange {
        self.tracker.begin_capture();
        self.install(snapshot)
    }

    fn install(&self, snapshot: Snapshot) -> SnapshotChange {
        let change = self.tracker.offer(snapshot);
        debug!(
            changed = change.is_changed(),
            descriptors = change.snapshot().len(),
            "session snapshot offered"
        );
        change
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.tracker.current()
    }

    pub fn needs_reindex(&self) -> bool {
        self.tracker.needs_capture()
    }

    /// Marks the session snapshot stale without dropping it.
    pub fn mark_reindex(&self) -> bool {
        self.tracker.reindex_flag().mark()
    }

    /// Listens for route changes on `sender`; a previous listener is replaced.
    pub async fn watch_routes(&self, sender: &RouteEventSender) {
        self.watcher.lock().await.start(sender);
    }

    pub async fn stop_watching(&self) {
        self.watcher.lock().await.stop().await;
    }

    /// Forgets cached vectors and promotion records of one context. Returns
    /// the number of cache entries and promotion records removed.
    pub fn clear_context(&self, context: &ContextId) -> (usize, usize) {
        let vectors = self.cache.clear_context(context);
        let records = self.promotion.clear_context(context);
        info!(context = %context, vectors, records, "context cleared");
        (vectors, records)
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            capture: perceiver_metrics::snapshot(),
            resolve: locator_metrics::snapshot(),
            cache: self.cache.stats(),
            promotion_records: self.promotion.len(),
        }
    }

    async fn current_snapshot(&self) -> Result<Arc<Snapshot>, EngineError> {
        if self.tracker.needs_capture() && self.sampler.is_some() {
            let change = self.refresh().await?;
            return Ok(Arc::clone(change.snapshot()));
        }
        self.tracker
            .current()
            .ok_or_else(|| EngineError::NoSnapshot("nothing captured yet".to_string()))
    }
}
