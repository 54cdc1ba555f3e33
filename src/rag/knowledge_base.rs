//! Document store with word-window chunking and hashed embeddings.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::error::RagError;
use crate::macros::string_enum;

/// Dimension of the hashed bag-of-words embedding.
pub const EMBEDDING_DIM: usize = 64;

string_enum! {
    /// Knowledge document category.
    pub enum KnowledgeCategory {
        FraudPattern = "fraud_pattern",
        InvestigationProcedure = "investigation_procedure",
        RiskIndicator = "risk_indicator",
        ThreatIntelligence = "threat_intelligence",
        Regulatory = "regulatory",
        General = "general",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub category: KnowledgeCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        category: KnowledgeCategory,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            content: content.into(),
            category,
            tags: Vec::new(),
            added_at: Utc::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A retrievable slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub text: String,
    pub category: KnowledgeCategory,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
}

/// Lowercased alphanumeric tokens of two or more characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Placeholder embedding: BLAKE3 bucket per token, L2-normalised.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for token in tokenize(text) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(head) % EMBEDDING_DIM as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    f64::from(dot / (na * nb))
}

/// Split into windows of `size` words overlapping by `overlap` words.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[derive(Default)]
struct Store {
    documents: BTreeMap<String, KnowledgeDocument>,
    chunks: BTreeMap<String, Vec<DocumentChunk>>,
}

/// In-memory knowledge base.
pub struct KnowledgeBase {
    chunk_size: usize,
    chunk_overlap: usize,
    store: RwLock<Store>,
}

impl KnowledgeBase {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            store: RwLock::new(Store::default()),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Add or replace a document. Returns the number of chunks produced.
    pub fn add_document(&self, document: KnowledgeDocument) -> Result<usize, RagError> {
        if document.content.trim().is_empty() {
            return Err(RagError::EmptyDocument {
                document_id: document.document_id,
            });
        }

        let chunks: Vec<DocumentChunk> =
            chunk_words(&document.content, self.chunk_size, self.chunk_overlap)
                .into_iter()
                .enumerate()
                .map(|(index, text)| DocumentChunk {
                    chunk_id: format!("{}#{}", document.document_id, index),
                    document_id: document.document_id.clone(),
                    document_title: document.title.clone(),
                    chunk_index: index,
                    embedding: embed(&format!("{} {}", document.title, text)),
                    text,
                    category: document.category,
                    tags: document.tags.clone(),
                })
                .collect();
        let count = chunks.len();

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.chunks.insert(document.document_id.clone(), chunks);
        debug!(document_id = %document.document_id, chunks = count, "Knowledge document indexed");
        store.documents.insert(document.document_id.clone(), document);
        Ok(count)
    }

    pub fn remove_document(&self, document_id: &str) -> Result<KnowledgeDocument, RagError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.chunks.remove(document_id);
        store
            .documents
            .remove(document_id)
            .ok_or_else(|| RagError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    pub fn get_document(&self, document_id: &str) -> Option<KnowledgeDocument> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .documents
            .get(document_id)
            .cloned()
    }

    pub fn document_count(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Visit every chunk under the read lock.
    pub fn for_each_chunk(&self, mut f: impl FnMut(&DocumentChunk)) {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        for chunk in store.chunks.values().flatten() {
            f(chunk);
        }
    }

    /// Load the built-in reference documents, one per investigation domain.
    pub fn load_defaults(&self) -> Result<usize, RagError> {
        let mut total = 0;
        for document in default_documents() {
            total += self.add_document(document)?;
        }
        info!(documents = self.document_count(), chunks = total, "Default knowledge loaded");
        Ok(total)
    }
}

fn default_documents() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::new(
            "network-indicators",
            "Network risk indicators",
            "Traffic from TOR exit nodes, anonymising proxies, VPN providers and hosting ASNs \
             is a strong network risk signal. Rapid IP rotation across countries, datacenter \
             IP addresses used for consumer logins and shared IP addresses across unrelated \
             accounts suggest automation or account takeover.",
            KnowledgeCategory::RiskIndicator,
        )
        .with_tags(["network", "ip_address", "proxy"]),
        KnowledgeDocument::new(
            "device-fingerprinting",
            "Device fingerprint analysis",
            "A single device fingerprint linked to many accounts indicates shared device fraud \
             or farming. Emulators, rooted devices, inconsistent user agents and browser \
             fingerprints that change on every session are common device risk signals.",
            KnowledgeCategory::FraudPattern,
        )
        .with_tags(["device", "fingerprint", "browser"]),
        KnowledgeDocument::new(
            "impossible-travel",
            "Location and impossible travel",
            "Logins from distant locations within a short time window imply impossible travel. \
             Compare geolocation of consecutive sessions, billing address and shipping address \
             distance, and timezone mismatch between device and location.",
            KnowledgeCategory::FraudPattern,
        )
        .with_tags(["location", "travel", "geolocation"]),
        KnowledgeDocument::new(
            "log-review-procedure",
            "Authentication log review",
            "Review authentication logs for bursts of failed logins, password resets followed \
             by new device logins, MFA fatigue patterns and session activity at unusual hours. \
             Correlate log timestamps with transaction activity.",
            KnowledgeCategory::InvestigationProcedure,
        )
        .with_tags(["logs", "login", "authentication"]),
        KnowledgeDocument::new(
            "risk-aggregation",
            "Risk aggregation guidance",
            "Aggregate risk across network, device, location and log findings. Corroborating \
             signals from independent domains raise confidence more than repeated signals from \
             one domain. Escalate when several linked entities show high risk together.",
            KnowledgeCategory::InvestigationProcedure,
        )
        .with_tags(["risk", "aggregation", "confidence"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_words_overlap() {
        let text = (0..10).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_words(&text, 4, 2);
        assert_eq!(chunks, vec!["w0 w1 w2 w3", "w2 w3 w4 w5", "w4 w5 w6 w7", "w6 w7 w8 w9"]);
        assert_eq!(chunk_words("a b", 200, 40), vec!["a b"]);
        assert!(chunk_words("   ", 4, 2).is_empty());
        // Overlap >= size still advances.
        assert_eq!(chunk_words("a b c", 2, 5).len(), 2);
    }

    #[test]
    fn test_embedding_is_normalised_and_stable() {
        let a = embed("shared device fingerprint");
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(a, embed("Shared DEVICE fingerprint!"));
        assert!(embed("").iter().all(|v| *v == 0.0));
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&a, &embed("")), 0.0);
    }

    #[test]
    fn test_add_replace_remove() {
        let kb = KnowledgeBase::new(3, 1);
        let doc = KnowledgeDocument::new("d1", "Title", "one two three four five", KnowledgeCategory::General);
        assert_eq!(kb.add_document(doc.clone()).unwrap(), 2);
        assert_eq!(kb.add_document(doc).unwrap(), 2);
        assert_eq!(kb.document_count(), 1);
        assert_eq!(kb.chunk_count(), 2);

        let empty = KnowledgeDocument::new("d2", "Empty", "  ", KnowledgeCategory::General);
        assert!(matches!(kb.add_document(empty), Err(RagError::EmptyDocument { .. })));

        kb.remove_document("d1").unwrap();
        assert_eq!(kb.chunk_count(), 0);
        assert!(matches!(kb.remove_document("d1"), Err(RagError::DocumentNotFound { .. })));
    }

    #[test]
    fn test_defaults_load() {
        let kb = KnowledgeBase::new(200, 40);
        assert!(kb.load_defaults().unwrap() >= 5);
        assert_eq!(kb.document_count(), 5);
    }
}
