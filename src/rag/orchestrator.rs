//! Entry point for domain agents requesting knowledge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::augmentor::{AugmentedContext, ContextAugmentor};
use super::knowledge_base::KnowledgeBase;
use super::retrieval::{RetrievalEngine, RetrievalOptions};
use crate::config::RagConfig;
use crate::domain::AgentDomain;
use crate::entity::EntityType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub disabled_queries: u64,
    /// Mean chunks returned per answered query
    pub average_chunks: f64,
}

/// Caches augmented contexts per `(domain, entity_type)` query.
pub struct RagOrchestrator {
    enabled: bool,
    knowledge_base: Arc<KnowledgeBase>,
    augmentor: ContextAugmentor,
    cache: Mutex<HashMap<(AgentDomain, EntityType), AugmentedContext>>,
    queries: AtomicU64,
    cache_hits: AtomicU64,
    disabled_queries: AtomicU64,
    chunks_returned: AtomicU64,
}

impl RagOrchestrator {
    pub fn new(knowledge_base: Arc<KnowledgeBase>, config: &RagConfig) -> Self {
        let options = RetrievalOptions {
            top_k: config.top_k,
            min_similarity: config.min_similarity,
            categories: Vec::new(),
        };
        let augmentor = ContextAugmentor::new(
            RetrievalEngine::new(Arc::clone(&knowledge_base)),
            options,
            config.max_context_chars,
        );
        Self {
            enabled: config.enabled,
            knowledge_base,
            augmentor,
            cache: Mutex::new(HashMap::new()),
            queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            disabled_queries: AtomicU64::new(0),
            chunks_returned: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge_base
    }

    /// Knowledge context for one agent run. Empty when RAG is disabled.
    pub fn augment_domain_context(
        &self,
        domain: AgentDomain,
        entity_id: &str,
        entity_type: EntityType,
    ) -> AugmentedContext {
        if !self.enabled {
            self.disabled_queries.fetch_add(1, Ordering::Relaxed);
            return AugmentedContext::empty(domain, entity_id, entity_type);
        }
        self.queries.fetch_add(1, Ordering::Relaxed);

        let key = (domain, entity_type);
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let mut context = match cached {
            Some(ctx) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(domain = %domain, entity_type = %entity_type, "RAG cache hit");
                ctx
            }
            None => {
                let ctx = self.augmentor.augment(domain, entity_id, entity_type);
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, ctx.clone());
                ctx
            }
        };

        context.entity_id = entity_id.to_string();
        self.chunks_returned
            .fetch_add(context.chunks.len() as u64, Ordering::Relaxed);
        context
    }

    /// Drop cached contexts, e.g. after the knowledge base changes.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stats(&self) -> RagStats {
        let queries = self.queries.load(Ordering::Relaxed);
        let chunks = self.chunks_returned.load(Ordering::Relaxed);
        RagStats {
            queries,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            disabled_queries: self.disabled_queries.load(Ordering::Relaxed),
            average_chunks: if queries == 0 {
                0.0
            } else {
                chunks as f64 / queries as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(enabled: bool) -> RagOrchestrator {
        let kb = Arc::new(KnowledgeBase::new(200, 40));
        kb.load_defaults().unwrap();
        let config = RagConfig {
            enabled,
            ..RagConfig::default()
        };
        RagOrchestrator::new(kb, &config)
    }

    #[test]
    fn test_cache_reuses_context_per_entity() {
        let rag = orchestrator(true);
        let first = rag.augment_domain_context(AgentDomain::Network, "ent_a", EntityType::IpAddress);
        let second = rag.augment_domain_context(AgentDomain::Network, "ent_b", EntityType::IpAddress);

        assert_eq!(first.knowledge_section, second.knowledge_section);
        assert_eq!(second.entity_id, "ent_b");

        let stats = rag.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.cache_hits, 1);
        assert!(stats.average_chunks > 0.0);

        rag.clear_cache();
        rag.augment_domain_context(AgentDomain::Network, "ent_c", EntityType::IpAddress);
        assert_eq!(rag.stats().cache_hits, 1);
    }

    #[test]
    fn test_disabled_returns_empty() {
        let rag = orchestrator(false);
        let ctx = rag.augment_domain_context(AgentDomain::Risk, "ent_a", EntityType::Account);
        assert!(ctx.is_empty());
        assert_eq!(rag.stats().queries, 0);
        assert_eq!(rag.stats().disabled_queries, 1);
    }
}
