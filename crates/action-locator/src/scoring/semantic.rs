//! Embedding similarity between the query and each element

use std::sync::Arc;

use embedding_cache::{
    cosine_similarity, fingerprint_element, fingerprint_text, CacheOutcome, Embedder,
    EmbeddingCache, Vector,
};
use locator_core_types::ContextId;
use perceiver_structural::ElementDescriptor;
use tracing::warn;

/// Embeds through the shared cache. An embedding failure leaves the
/// semantic signal at zero instead of failing the resolution.
#[derive(Clone)]
pub struct SemanticScorer {
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl SemanticScorer {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { embedder, cache }
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn embed_query(&self, text: &str, context: Option<&ContextId>) -> (Option<Vector>, CacheOutcome) {
        let fingerprint = fingerprint_text(self.embedder.model_id(), text);
        match self
            .cache
            .get_or_embed(&fingerprint, context, || self.embedder.embed(text))
        {
            Ok((vector, outcome)) => (Some(vector), outcome),
            Err(err) => {
                warn!(
                    target: "locator.events",
                    event = "semantic.embed_failed",
                    subject = "query",
                    error = %err,
                    "embedding failed; semantic signal disabled"
                );
                (None, CacheOutcome::Miss)
            }
        }
    }

    pub fn embed_element(
        &self,
        descriptor: &ElementDescriptor,
        context: Option<&ContextId>,
    ) -> (Option<Vector>, CacheOutcome) {
        let fingerprint = fingerprint_element(self.embedder.model_id(), descriptor);
        match self
            .cache
            .get_or_embed(&fingerprint, context, || self.embedder.embed_element(descriptor))
        {
            Ok((vector, outcome)) => (Some(vector), outcome),
            Err(err) => {
                warn!(
                    target: "locator.events",
                    event = "semantic.embed_failed",
                    subject = %descriptor.id,
                    error = %err,
                    "embedding failed; semantic signal disabled"
                );
                (None, CacheOutcome::Miss)
            }
        }
    }

    /// Cosine similarity clamped to [0, 1]; opposite directions carry no
    /// more evidence than orthogonal ones.
    pub fn similarity(query: Option<&Vector>, element: Option<&Vector>) -> f32 {
        match (query, element) {
            (Some(query), Some(element)) => cosine_similarity(query, element).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}
