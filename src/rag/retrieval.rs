//! Similarity retrieval over the knowledge base.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::knowledge_base::{
    cosine_similarity, embed, tokenize, DocumentChunk, KnowledgeBase, KnowledgeCategory,
};

const EMBEDDING_WEIGHT: f64 = 0.7;
const KEYWORD_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub top_k: usize,
    /// Blended score floor
    pub min_similarity: f64,
    /// Restrict to these categories; empty means all
    #[serde(default)]
    pub categories: Vec<KnowledgeCategory>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.1,
            categories: Vec::new(),
        }
    }
}

/// A chunk with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub similarity: f64,
    pub keyword_overlap: f64,
    pub score: f64,
}

pub struct RetrievalEngine {
    knowledge_base: Arc<KnowledgeBase>,
}

impl RetrievalEngine {
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self { knowledge_base }
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge_base
    }

    /// Rank chunks by `0.7 * cosine + 0.3 * keyword overlap`, best first.
    pub fn retrieve(&self, query: &str, options: &RetrievalOptions) -> Vec<RetrievedChunk> {
        let query_embedding = embed(query);
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() || options.top_k == 0 {
            return Vec::new();
        }

        let mut hits = Vec::new();
        self.knowledge_base.for_each_chunk(|chunk| {
            if !options.categories.is_empty() && !options.categories.contains(&chunk.category) {
                return;
            }
            let similarity = cosine_similarity(&query_embedding, &chunk.embedding);
            let chunk_tokens: HashSet<String> = tokenize(&chunk.text)
                .into_iter()
                .chain(chunk.tags.iter().flat_map(|t| tokenize(t)))
                .collect();
            let keyword_overlap =
                query_tokens.intersection(&chunk_tokens).count() as f64 / query_tokens.len() as f64;
            let score = EMBEDDING_WEIGHT * similarity + KEYWORD_WEIGHT * keyword_overlap;
            if score >= options.min_similarity {
                hits.push(RetrievedChunk {
                    chunk: chunk.clone(),
                    similarity,
                    keyword_overlap,
                    score,
                });
            }
        });

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(options.top_k);
        debug!(query = query, hits = hits.len(), "Knowledge retrieval");
        hits
    }
}
