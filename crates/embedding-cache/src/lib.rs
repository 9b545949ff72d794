//! Embedding cache for element resolution.
//!
//! Vectors are keyed by content [`Fingerprint`](locator_core_types::Fingerprint)
//! and served from a bounded LRU first, then from a durable record store.

pub mod cache;
pub mod durable;
pub mod embedder;
pub mod errors;
pub mod memory;

pub use cache::{CacheConfig, CacheOutcome, CacheStats, EmbeddingCache};
pub use durable::{DurableRecord, DurableTier, FsDurableTier, NullDurableTier};
pub use embedder::{
    cosine_similarity, element_text, fingerprint_element, fingerprint_text, tokenize, Embedder,
    HashingEmbedder,
};
pub use errors::CacheError;
pub use memory::{CacheEntry, ContextTags, MemoryTier, Vector};
