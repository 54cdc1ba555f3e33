//! Domain-aware prompt context built from retrieved knowledge.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::retrieval::{RetrievalEngine, RetrievalOptions, RetrievedChunk};
use crate::domain::AgentDomain;
use crate::entity::EntityType;

/// Knowledge to splice into an agent prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedContext {
    pub domain: AgentDomain,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    /// Formatted section, at most `max_context_chars` characters
    pub knowledge_section: String,
    /// `title (document_id)` per chunk used, in order
    pub sources: Vec<String>,
    pub truncated: bool,
}

impl AugmentedContext {
    pub fn empty(domain: AgentDomain, entity_id: &str, entity_type: EntityType) -> Self {
        Self {
            domain,
            entity_id: entity_id.to_string(),
            entity_type,
            query: String::new(),
            chunks: Vec::new(),
            knowledge_section: String::new(),
            sources: Vec::new(),
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn domain_keywords(domain: AgentDomain) -> &'static str {
    match domain {
        AgentDomain::Network => "network ip address proxy vpn tor asn",
        AgentDomain::Device => "device fingerprint browser emulator user agent",
        AgentDomain::Location => "location geolocation impossible travel address",
        AgentDomain::Logs => "logs authentication login session activity",
        AgentDomain::Risk => "risk aggregation confidence escalate indicators",
    }
}

pub struct ContextAugmentor {
    engine: RetrievalEngine,
    options: RetrievalOptions,
    max_context_chars: usize,
}

impl ContextAugmentor {
    pub fn new(engine: RetrievalEngine, options: RetrievalOptions, max_context_chars: usize) -> Self {
        Self {
            engine,
            options,
            max_context_chars,
        }
    }

    pub fn build_query(domain: AgentDomain, entity_type: EntityType) -> String {
        format!(
            "{} {} fraud investigation",
            domain_keywords(domain),
            entity_type.as_str().replace('_', " ")
        )
    }

    pub fn augment(
        &self,
        domain: AgentDomain,
        entity_id: &str,
        entity_type: EntityType,
    ) -> AugmentedContext {
        let query = Self::build_query(domain, entity_type);
        let retrieved = self.engine.retrieve(&query, &self.options);

        let mut section = String::new();
        let mut chunks = Vec::new();
        let mut sources = Vec::new();
        let mut truncated = false;

        if !retrieved.is_empty() {
            let _ = writeln!(section, "## Relevant {} knowledge\n", domain);
        }
        for hit in retrieved {
            let mut block = String::new();
            let _ = writeln!(
                block,
                "[{}] {} ({})\n{}\n",
                chunks.len() + 1,
                hit.chunk.document_title,
                hit.chunk.category,
                hit.chunk.text
            );
            if section.chars().count() + block.chars().count() > self.max_context_chars {
                truncated = true;
                break;
            }
            section.push_str(&block);
            sources.push(format!("{} ({})", hit.chunk.document_title, hit.chunk.document_id));
            chunks.push(hit);
        }
        if chunks.is_empty() {
            section.clear();
        }

        AugmentedContext {
            domain,
            entity_id: entity_id.to_string(),
            entity_type,
            query,
            chunks,
            knowledge_section: section,
            sources,
            truncated,
        }
    }
}
