//! Entity registry and relationship graph.

mod graph;
mod manager;
mod types;

pub use graph::{Edge, EntityGraph};
pub use manager::{EntityManager, EntityStatistics};
pub use types::{Entity, EntityRelationship, EntityType, RelationshipType};
