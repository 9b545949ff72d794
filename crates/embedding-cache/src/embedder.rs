use std::collections::BTreeSet;

use locator_core_types::{normalize_text, Fingerprint};
use perceiver_structural::stability::is_volatile_value;
use perceiver_structural::ElementDescriptor;

use crate::errors::CacheError;

/// Port to the embedding runtime. Implementations must be deterministic and
/// return vectors of a fixed dimension.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError>;

    fn embed_element(&self, descriptor: &ElementDescriptor) -> Result<Vec<f32>, CacheError> {
        self.embed(&element_text(descriptor))
    }

    /// Namespaces fingerprints so vectors from different models never mix.
    fn model_id(&self) -> &str;
}

/// Text an element is embedded as: tag, role, accessible name, rendered text
/// and stable identifying attribute values.
pub fn element_text(descriptor: &ElementDescriptor) -> String {
    let mut parts: Vec<&str> = vec![descriptor.tag.as_str()];
    if let Some(role) = descriptor.role.as_deref() {
        parts.push(role);
    }
    if let Some(name) = descriptor.name.as_deref() {
        parts.push(name);
    }
    if descriptor.name.as_deref() != Some(descriptor.text.as_str()) {
        parts.push(descriptor.text.as_str());
    }
    for attr in ["id", "name", "placeholder", "title", "alt", "aria-label"] {
        if let Some(value) = descriptor.attr(attr) {
            if !is_volatile_value(value) {
                parts.push(value);
            }
        }
    }
    if let Some((_, value)) = descriptor.test_id() {
        parts.push(value);
    }
    normalize_text(&parts.join(" "))
}

pub fn fingerprint_text(model: &str, text: &str) -> Fingerprint {
    let normalized = normalize_text(text);
    Fingerprint::from_bytes("txt", format!("{model}\u{1f}{normalized}").as_bytes())
}

pub fn fingerprint_element(model: &str, descriptor: &ElementDescriptor) -> Fingerprint {
    let text = element_text(descriptor);
    Fingerprint::from_bytes("el", format!("{model}\u{1f}{text}").as_bytes())
}

/// Splits on anything that is not alphanumeric; `form2-submit` yields
/// `form2` and `submit`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Deterministic feature-hashing embedder over the set of tokens.
///
/// Stands in for a model runtime offline and in tests: identical text always
/// yields a bit-identical unit vector.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dim: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        let dim = dim.max(16);
        Self {
            dim,
            model_id: format!("hashing-{dim}"),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        let mut vector = vec![0.0f32; self.dim];
        let tokens: BTreeSet<String> = tokenize(text).into_iter().collect();
        for token in &tokens {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(slot) % self.dim as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Cosine similarity; zero when either side is empty, zero-length or the
/// dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceiver_structural::{snapshot_from_tree, CapturedTree, RawDomNode};

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Sign in to your account").unwrap();
        let b = embedder.embed("Sign in to your account").unwrap();
        assert_eq!(a.len(), HashingEmbedder::DEFAULT_DIM);
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("form2 submit").unwrap();
        let right = embedder.embed("button submit form2").unwrap();
        let wrong = embedder.embed("button submit form1").unwrap();
        assert!(cosine_similarity(&query, &right) > cosine_similarity(&query, &wrong));
    }

    #[test]
    fn empty_text_has_zero_similarity() {
        let embedder = HashingEmbedder::default();
        let empty = embedder.embed("  ").unwrap();
        let other = embedder.embed("submit").unwrap();
        assert_eq!(cosine_similarity(&empty, &other), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn element_text_skips_volatile_ids() {
        let snapshot = snapshot_from_tree(&CapturedTree::new(
            vec![RawDomNode::new(1, "button")
                .text("Log in")
                .attr("id", "a1b2c3")
                .attr("data-testid", "login-btn")],
            vec![],
        ));
        let text = element_text(&snapshot.descriptors[0]);
        assert!(text.contains("login-btn"));
        assert!(text.contains("log in"));
        assert!(!text.contains("a1b2c3"));
    }

    #[test]
    fn fingerprints_are_namespaced_by_model() {
        assert_eq!(fingerprint_text("m", "Submit "), fingerprint_text("m", "submit"));
        assert_ne!(fingerprint_text("m", "submit"), fingerprint_text("n", "submit"));
    }
}
