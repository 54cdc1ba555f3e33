//! Adjacency-indexed entity graph.
//!
//! Every relationship is indexed as `source → target` in `outgoing` and
//! `target ← source` in `incoming`. Bidirectional relationships are also
//! indexed in the mirror direction. Directed traversals (related entities,
//! subgraphs, paths) follow `outgoing`; component search treats the graph as
//! undirected.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::types::{Entity, EntityRelationship, RelationshipType};

/// One adjacency entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub neighbor: String,
    pub relationship_id: String,
}

/// In-memory entity graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityGraph {
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, EntityRelationship>,
    outgoing: HashMap<String, BTreeSet<Edge>>,
    incoming: HashMap<String, BTreeSet<Edge>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.entity_id.clone(), entity);
    }

    /// Insert a relationship and index it. Both endpoints must exist.
    ///
    /// Returns `false` (and does nothing) if an endpoint is missing.
    pub fn add_relationship(&mut self, relationship: EntityRelationship) -> bool {
        let src = relationship.source_entity_id.clone();
        let dst = relationship.target_entity_id.clone();
        if !self.entities.contains_key(&src) || !self.entities.contains_key(&dst) {
            return false;
        }
        let rid = relationship.relationship_id.clone();

        self.index(&src, &dst, &rid);
        if relationship.bidirectional {
            self.index(&dst, &src, &rid);
        }

        if let Some(e) = self.entities.get_mut(&src) {
            e.related_entities.insert(dst.clone());
        }
        if let Some(e) = self.entities.get_mut(&dst) {
            e.related_entities.insert(src.clone());
        }
        self.relationships.insert(rid, relationship);
        true
    }

    fn index(&mut self, from: &str, to: &str, rid: &str) {
        self.outgoing.entry(from.to_string()).or_default().insert(Edge {
            neighbor: to.to_string(),
            relationship_id: rid.to_string(),
        });
        self.incoming.entry(to.to_string()).or_default().insert(Edge {
            neighbor: from.to_string(),
            relationship_id: rid.to_string(),
        });
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn get_entity_mut(&mut self, entity_id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(entity_id)
    }

    pub fn get_relationship(&self, relationship_id: &str) -> Option<&EntityRelationship> {
        self.relationships.get(relationship_id)
    }

    pub fn get_relationship_mut(&mut self, relationship_id: &str) -> Option<&mut EntityRelationship> {
        self.relationships.get_mut(relationship_id)
    }

    /// Existing relationship with the same endpoints and type.
    pub fn find_relationship(
        &self,
        source: &str,
        target: &str,
        relationship_type: RelationshipType,
    ) -> Option<&EntityRelationship> {
        self.outgoing.get(source)?.iter().find_map(|edge| {
            let rel = self.relationships.get(&edge.relationship_id)?;
            (edge.neighbor == target
                && rel.source_entity_id == source
                && rel.relationship_type == relationship_type)
                .then_some(rel)
        })
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &EntityRelationship> {
        self.relationships.values()
    }

    /// Outgoing adjacency of an entity.
    pub fn outgoing(&self, entity_id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing.get(entity_id).into_iter().flatten()
    }

    /// Incoming adjacency of an entity.
    pub fn incoming(&self, entity_id: &str) -> impl Iterator<Item = &Edge> {
        self.incoming.get(entity_id).into_iter().flatten()
    }

    /// Relationships touching an entity in either direction.
    pub fn relationships_of(&self, entity_id: &str) -> Vec<&EntityRelationship> {
        let ids: BTreeSet<&str> = self
            .outgoing(entity_id)
            .chain(self.incoming(entity_id))
            .map(|e| e.relationship_id.as_str())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.relationships.get(id))
            .collect()
    }

    // ========================================================================
    // Traversals
    // ========================================================================

    /// Entities reachable from `entity_id` within `max_depth` hops along
    /// outgoing edges, with their hop distance. The source is excluded.
    pub fn reachable(
        &self,
        entity_id: &str,
        max_depth: usize,
        relationship_types: Option<&[RelationshipType]>,
    ) -> Vec<(String, usize)> {
        let mut visited: HashSet<&str> = HashSet::from([entity_id]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(entity_id, 0)]);
        let mut found = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.outgoing(current) {
                if !self.edge_allowed(edge, relationship_types) {
                    continue;
                }
                if visited.insert(edge.neighbor.as_str()) {
                    found.push((edge.neighbor.clone(), depth + 1));
                    queue.push_back((edge.neighbor.as_str(), depth + 1));
                }
            }
        }
        found
    }

    /// Induced subgraph over the seeds and everything reachable from them
    /// within `max_depth` hops. Unknown seeds are ignored.
    pub fn subgraph(&self, seeds: &[String], max_depth: usize) -> EntityGraph {
        let mut keep: BTreeSet<String> = BTreeSet::new();
        for seed in seeds.iter().filter(|s| self.contains(s)) {
            keep.insert(seed.clone());
            keep.extend(self.reachable(seed, max_depth, None).into_iter().map(|(id, _)| id));
        }

        let mut sub = EntityGraph::new();
        for id in &keep {
            if let Some(entity) = self.entities.get(id) {
                let mut entity = entity.clone();
                entity.related_entities.clear();
                sub.add_entity(entity);
            }
        }
        let mut rels: Vec<&EntityRelationship> = self
            .relationships
            .values()
            .filter(|r| keep.contains(&r.source_entity_id) && keep.contains(&r.target_entity_id))
            .collect();
        rels.sort_by(|a, b| a.relationship_id.cmp(&b.relationship_id));
        for rel in rels {
            sub.add_relationship(rel.clone());
        }
        sub
    }

    /// All simple directed paths from `source` to `target` of at most
    /// `max_depth` edges, shortest first.
    pub fn find_paths(&self, source: &str, target: &str, max_depth: usize) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        if !self.contains(source) || !self.contains(target) || source == target {
            return paths;
        }
        let mut path = vec![source.to_string()];
        let mut on_path: HashSet<String> = HashSet::from([source.to_string()]);
        self.dfs_paths(source, target, max_depth, &mut path, &mut on_path, &mut paths);
        paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        paths
    }

    fn dfs_paths(
        &self,
        current: &str,
        target: &str,
        remaining: usize,
        path: &mut Vec<String>,
        on_path: &mut HashSet<String>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if remaining == 0 {
            return;
        }
        let neighbors: BTreeSet<&str> = self.outgoing(current).map(|e| e.neighbor.as_str()).collect();
        for next in neighbors {
            if next == target {
                let mut found = path.clone();
                found.push(next.to_string());
                paths.push(found);
                continue;
            }
            if on_path.contains(next) {
                continue;
            }
            path.push(next.to_string());
            on_path.insert(next.to_string());
            self.dfs_paths(next, target, remaining - 1, path, on_path, paths);
            on_path.remove(next);
            path.pop();
        }
    }

    /// Connected components (undirected) with at least `min_size` members,
    /// largest first. Members are sorted.
    pub fn components(&self, min_size: usize) -> Vec<Vec<String>> {
        let mut ids: Vec<&String> = self.entities.keys().collect();
        ids.sort();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();
        for start in ids {
            if !seen.insert(start.as_str()) {
                continue;
            }
            let mut component = vec![start.clone()];
            let mut queue = VecDeque::from([start.as_str()]);
            while let Some(current) = queue.pop_front() {
                for edge in self.outgoing(current).chain(self.incoming(current)) {
                    if seen.insert(edge.neighbor.as_str()) {
                        component.push(edge.neighbor.clone());
                        queue.push_back(edge.neighbor.as_str());
                    }
                }
            }
            if component.len() >= min_size {
                component.sort();
                components.push(component);
            }
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    /// Relationship counts by type.
    pub fn relationship_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rel in self.relationships.values() {
            *counts
                .entry(rel.relationship_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    fn edge_allowed(&self, edge: &Edge, types: Option<&[RelationshipType]>) -> bool {
        match types {
            None => true,
            Some(types) => self
                .relationships
                .get(&edge.relationship_id)
                .map(|r| types.contains(&r.relationship_type))
                .unwrap_or(false),
        }
    }
}
