//! Thread-safe entity registry over [`EntityGraph`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::graph::EntityGraph;
use super::types::{Entity, EntityRelationship, EntityType, RelationshipType};
use crate::error::{EntityError, EntityResult};

/// Registry counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStatistics {
    pub total_entities: usize,
    pub active_entities: usize,
    pub total_relationships: usize,
    pub investigations: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_relationship_type: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Inner {
    graph: EntityGraph,
    by_type: HashMap<EntityType, BTreeSet<String>>,
    by_investigation: HashMap<String, BTreeSet<String>>,
}

/// Creates entities and relationships and answers graph queries.
#[derive(Default)]
pub struct EntityManager {
    inner: RwLock<Inner>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity and return its id. Never fails.
    pub fn create_entity(
        &self,
        entity_type: EntityType,
        name: impl Into<String>,
        attributes: BTreeMap<String, serde_json::Value>,
        investigation_id: Option<&str>,
    ) -> String {
        let entity_id = format!("ent_{}", Uuid::new_v4().simple());
        let mut entity = Entity::new(entity_id.clone(), entity_type, name);
        entity.attributes = attributes;
        if let Some(inv) = investigation_id {
            entity.investigations.insert(inv.to_string());
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_type
            .entry(entity_type)
            .or_default()
            .insert(entity_id.clone());
        if let Some(inv) = investigation_id {
            inner
                .by_investigation
                .entry(inv.to_string())
                .or_default()
                .insert(entity_id.clone());
        }
        inner.graph.add_entity(entity);

        debug!(entity_id = %entity_id, entity_type = %entity_type, "Entity created");
        entity_id
    }

    /// Link two entities.
    ///
    /// Re-observing an existing `(source, target, type)` link bumps its
    /// observation count, keeps the stronger strength and returns the
    /// existing id.
    pub fn create_relationship(
        &self,
        source_entity_id: &str,
        target_entity_id: &str,
        relationship_type: RelationshipType,
        strength: f64,
        bidirectional: bool,
    ) -> EntityResult<String> {
        if source_entity_id == target_entity_id {
            return Err(EntityError::InvalidRelationship {
                message: format!("self-relationship on {}", source_entity_id),
            });
        }
        if !strength.is_finite() {
            return Err(EntityError::InvalidRelationship {
                message: format!("strength must be finite, got {}", strength),
            });
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for id in [source_entity_id, target_entity_id] {
            if !inner.graph.contains(id) {
                return Err(not_found(id));
            }
        }

        let existing = inner
            .graph
            .find_relationship(source_entity_id, target_entity_id, relationship_type)
            .map(|r| r.relationship_id.clone());
        if let Some(relationship_id) = existing {
            if let Some(rel) = inner.graph.get_relationship_mut(&relationship_id) {
                rel.observation_count += 1;
                rel.strength = rel.strength.max(strength.clamp(0.0, 1.0));
                rel.last_observed = Utc::now();
                debug!(
                    relationship_id = %relationship_id,
                    observations = rel.observation_count,
                    "Relationship re-observed"
                );
            }
            return Ok(relationship_id);
        }

        let relationship_id = format!("rel_{}", Uuid::new_v4().simple());
        inner.graph.add_relationship(EntityRelationship::new(
            relationship_id.clone(),
            source_entity_id,
            target_entity_id,
            relationship_type,
            strength,
            bidirectional,
        ));
        debug!(
            relationship_id = %relationship_id,
            source = source_entity_id,
            target = target_entity_id,
            relationship_type = %relationship_type,
            "Relationship created"
        );
        Ok(relationship_id)
    }

    pub fn get_entity(&self, entity_id: &str) -> EntityResult<Entity> {
        self.read(|g| g.graph.get_entity(entity_id).cloned())
            .ok_or_else(|| not_found(entity_id))
    }

    pub fn get_entities_by_type(&self, entity_type: EntityType) -> Vec<Entity> {
        self.read(|inner| {
            inner
                .by_type
                .get(&entity_type)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.graph.get_entity(id).cloned())
                .collect()
        })
    }

    pub fn get_investigation_entities(&self, investigation_id: &str) -> Vec<Entity> {
        self.read(|inner| {
            inner
                .by_investigation
                .get(investigation_id)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.graph.get_entity(id).cloned())
                .collect()
        })
    }

    /// Relationships among the given entities.
    pub fn get_relationships_between(&self, entity_ids: &[String]) -> Vec<EntityRelationship> {
        let ids: BTreeSet<&str> = entity_ids.iter().map(String::as_str).collect();
        self.read(|inner| {
            let mut rels: Vec<_> = inner
                .graph
                .relationships()
                .filter(|r| {
                    ids.contains(r.source_entity_id.as_str()) && ids.contains(r.target_entity_id.as_str())
                })
                .cloned()
                .collect();
            rels.sort_by(|a, b| a.relationship_id.cmp(&b.relationship_id));
            rels
        })
    }

    pub fn add_entity_to_investigation(
        &self,
        entity_id: &str,
        investigation_id: &str,
    ) -> EntityResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entity = inner
            .graph
            .get_entity_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        entity.investigations.insert(investigation_id.to_string());
        entity.updated_at = Utc::now();
        inner
            .by_investigation
            .entry(investigation_id.to_string())
            .or_default()
            .insert(entity_id.to_string());
        Ok(())
    }

    /// Deactivate an entity. It stays in the graph.
    pub fn mark_inactive(&self, entity_id: &str) -> EntityResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entity = inner
            .graph
            .get_entity_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        entity.is_active = false;
        entity.updated_at = Utc::now();
        info!(entity_id = entity_id, "Entity marked inactive");
        Ok(())
    }

    /// Entities reachable within `max_depth` hops, nearest first.
    pub fn get_related_entities(
        &self,
        entity_id: &str,
        max_depth: usize,
        relationship_types: Option<&[RelationshipType]>,
    ) -> EntityResult<Vec<Entity>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if !inner.graph.contains(entity_id) {
            return Err(not_found(entity_id));
        }
        Ok(inner
            .graph
            .reachable(entity_id, max_depth, relationship_types)
            .into_iter()
            .filter_map(|(id, _)| inner.graph.get_entity(&id).cloned())
            .collect())
    }

    /// Copy of the neighbourhood around `entity_ids`.
    pub fn get_subgraph(&self, entity_ids: &[String], max_depth: usize) -> EntityGraph {
        self.read(|inner| inner.graph.subgraph(entity_ids, max_depth))
    }

    /// Connected components of at least `min_size` entities.
    pub fn find_entity_clusters(&self, min_size: usize) -> Vec<Vec<String>> {
        self.read(|inner| inner.graph.components(min_size))
    }

    pub fn find_paths(
        &self,
        source_entity_id: &str,
        target_entity_id: &str,
        max_depth: usize,
    ) -> EntityResult<Vec<Vec<String>>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for id in [source_entity_id, target_entity_id] {
            if !inner.graph.contains(id) {
                return Err(not_found(id));
            }
        }
        Ok(inner.graph.find_paths(source_entity_id, target_entity_id, max_depth))
    }

    /// Fold a new risk observation into the entity's score.
    ///
    /// `risk = (old_risk*old_conf + risk*conf) / (old_conf + conf)` and
    /// `confidence = min(1, old_conf + conf)`.
    pub fn update_risk_score(
        &self,
        entity_id: &str,
        risk_score: f64,
        confidence: f64,
    ) -> EntityResult<Entity> {
        if !risk_score.is_finite() || !confidence.is_finite() {
            return Err(EntityError::InvalidScore {
                entity_id: entity_id.to_string(),
                risk_score,
                confidence,
            });
        }
        let risk_score = risk_score.clamp(0.0, 1.0);
        let confidence = confidence.clamp(0.0, 1.0);

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entity = inner
            .graph
            .get_entity_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;

        let total = entity.confidence_score + confidence;
        if total > 0.0 {
            entity.risk_score =
                (entity.risk_score * entity.confidence_score + risk_score * confidence) / total;
        }
        entity.risk_score = entity.risk_score.clamp(0.0, 1.0);
        entity.confidence_score = total.min(1.0);
        entity.updated_at = Utc::now();

        debug!(
            entity_id = entity_id,
            risk_score = entity.risk_score,
            confidence = entity.confidence_score,
            "Risk score updated"
        );
        Ok(entity.clone())
    }

    pub fn statistics(&self) -> EntityStatistics {
        self.read(|inner| {
            let mut by_type = BTreeMap::new();
            let mut active = 0;
            for entity in inner.graph.entities() {
                *by_type.entry(entity.entity_type.as_str().to_string()).or_insert(0) += 1;
                if entity.is_active {
                    active += 1;
                }
            }
            EntityStatistics {
                total_entities: inner.graph.entity_count(),
                active_entities: active,
                total_relationships: inner.graph.relationship_count(),
                investigations: inner.by_investigation.len(),
                by_type,
                by_relationship_type: inner.graph.relationship_type_counts(),
            }
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn not_found(entity_id: &str) -> EntityError {
    EntityError::NotFound {
        entity_id: entity_id.to_string(),
    }
}
