//! Retrieval-augmented knowledge for domain agents.
//!
//! ```text
//! KnowledgeBase ─► RetrievalEngine ─► ContextAugmentor ─► RagOrchestrator
//! ```
//!
//! Embeddings are hashed bag-of-words placeholders, good enough for keyword-ish
//! ranking without a model dependency.

mod augmentor;
mod knowledge_base;
mod orchestrator;
mod retrieval;

pub use augmentor::{AugmentedContext, ContextAugmentor};
pub use knowledge_base::{
    chunk_words, cosine_similarity, embed, tokenize, DocumentChunk, KnowledgeBase,
    KnowledgeCategory, KnowledgeDocument, EMBEDDING_DIM,
};
pub use orchestrator::{RagOrchestrator, RagStats};
pub use retrieval::{RetrievalEngine, RetrievalOptions, RetrievedChunk};
