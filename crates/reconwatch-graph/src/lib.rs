//! C10 — Domain Graph / Entity Index, plus the beaconing/tunnel detector
//! named in spec.md §1 as one of the orchestrator's correlation structures
//! (folded in here per SPEC_FULL.md §1, grounded on
//! `examples/original_source/backend/app/collectors/tunnel_detector.py`).
//!
//! Node/edge shape is grounded on
//! `frontend/phantom-mitre-core/src/modules/attack_path_analyzer.rs`'s
//! node/edge structs; BFS neighbor/path/cluster operations use `petgraph`,
//! which the teacher's `phantom-xdr-core` Cargo.toml already depends on.

pub mod beacon;

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Directed;
use reconwatch_types::{GraphEdge, GraphEntity};

const MAX_DEPTH: usize = 5;

struct Inner {
    graph: Graph<GraphEntity, GraphEdge, Directed>,
    node_index: HashMap<String, NodeIndex>,
    dedup_index: HashMap<(Option<String>, String, String), String>,
    edge_set: HashSet<(String, String, String)>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            graph: Graph::new(),
            node_index: HashMap::new(),
            dedup_index: HashMap::new(),
            edge_set: HashSet::new(),
        }
    }
}

/// C10. All reads filter by owning user unless the caller is an admin
/// (enforced by `reconwatch-storage`, which backs the persisted copy); this
/// in-memory index is the fast path the orchestrator queries during a run.
#[derive(Default)]
pub struct DomainGraph {
    inner: Mutex<Inner>,
}

impl DomainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by id; duplicate entities for the same (owner, type, value)
    /// are coalesced onto the first node's id.
    pub fn save_entity(&self, entity: GraphEntity) -> String {
        let mut inner = self.inner.lock();
        let dedup_key = (entity.owner_user_id.clone(), entity.entity_type.clone(), entity.value.clone());

        if let Some(existing_id) = inner.dedup_index.get(&dedup_key).cloned() {
            if let Some(&idx) = inner.node_index.get(&existing_id) {
                inner.graph[idx] = GraphEntity { id: existing_id.clone(), ..entity };
                return existing_id;
            }
        }

        if let Some(&idx) = inner.node_index.get(&entity.id) {
            inner.graph[idx] = entity.clone();
        } else {
            let id = entity.id.clone();
            let idx = inner.graph.add_node(entity.clone());
            inner.node_index.insert(id, idx);
        }
        inner.dedup_index.insert(dedup_key, entity.id.clone());
        entity.id
    }

    pub fn get_entity(&self, id: &str) -> Option<GraphEntity> {
        let inner = self.inner.lock();
        inner.node_index.get(id).map(|&idx| inner.graph[idx].clone())
    }

    pub fn get_by_type(&self, entity_type: &str) -> Vec<GraphEntity> {
        let inner = self.inner.lock();
        inner.graph.node_weights().filter(|e| e.entity_type == entity_type).cloned().collect()
    }

    pub fn get_entity_by_value(&self, entity_type: &str, value: &str) -> Option<GraphEntity> {
        let inner = self.inner.lock();
        inner.graph.node_weights().find(|e| e.entity_type == entity_type && e.value == value).cloned()
    }

    /// Idempotent on `(src, tgt, relation)`. Both endpoints must already exist.
    pub fn add_relationship(&self, edge: GraphEdge) -> Result<(), &'static str> {
        let mut inner = self.inner.lock();
        let key = edge.key();
        if inner.edge_set.contains(&key) {
            return Ok(());
        }
        let Some(&src) = inner.node_index.get(&edge.source_entity_id) else {
            return Err("source entity does not exist");
        };
        let Some(&tgt) = inner.node_index.get(&edge.target_entity_id) else {
            return Err("target entity does not exist");
        };
        inner.graph.add_edge(src, tgt, edge.clone());
        inner.edge_set.insert(key);
        Ok(())
    }

    /// BFS up to `depth`, returns ids in BFS order. Clamps at `MAX_DEPTH`.
    pub fn get_neighbors(&self, id: &str, depth: usize) -> Vec<String> {
        let depth = depth.min(MAX_DEPTH);
        if depth == 0 {
            return Vec::new();
        }
        let inner = self.inner.lock();
        let Some(&start) = inner.node_index.get(id) else { return Vec::new() };

        let mut visited = HashSet::new();
        visited.insert(start);
        let mut frontier = vec![start];
        let mut order = Vec::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for node in frontier {
                for neighbor in inner.graph.neighbors(node) {
                    if visited.insert(neighbor) {
                        order.push(inner.graph[neighbor].id.clone());
                        next.push(neighbor);
                    }
                }
            }
            frontier = next;
        }
        order
    }

    /// Unweighted shortest path by BFS. `find_path(a, a)` is `[a]`.
    pub fn find_path(&self, src: &str, tgt: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let Some(&start) = inner.node_index.get(src) else { return Vec::new() };
        let Some(&end) = inner.node_index.get(tgt) else { return Vec::new() };

        if start == end {
            return vec![src.to_string()];
        }

        let mut visited = HashSet::new();
        visited.insert(start);
        let mut parent = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            for neighbor in inner.graph.neighbors(node) {
                if visited.insert(neighbor) {
                    parent.insert(neighbor, node);
                    if neighbor == end {
                        queue.clear();
                        break;
                    }
                    queue.push_back(neighbor);
                }
            }
        }

        if !visited.contains(&end) {
            return Vec::new();
        }

        let mut path = vec![end];
        let mut cur = end;
        while cur != start {
            cur = parent[&cur];
            path.push(cur);
        }
        path.reverse();
        path.into_iter().map(|idx| inner.graph[idx].id.clone()).collect()
    }

    /// Connected components (size >= `min_size`) on the undirected projection.
    pub fn find_clusters(&self, min_size: usize) -> Vec<Vec<String>> {
        let inner = self.inner.lock();
        let mut visited = HashSet::new();
        let mut clusters = Vec::new();

        for node in inner.graph.node_indices() {
            if visited.contains(&node) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(node);
            visited.insert(node);

            while let Some(cur) = queue.pop_front() {
                component.push(inner.graph[cur].id.clone());
                let out = inner.graph.neighbors_directed(cur, petgraph::Direction::Outgoing);
                let inc = inner.graph.neighbors_directed(cur, petgraph::Direction::Incoming);
                for neighbor in out.chain(inc) {
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }

            if component.len() >= min_size {
                clusters.push(component);
            }
        }
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reconwatch_types::Severity;

    fn entity(id: &str, entity_type: &str, value: &str) -> GraphEntity {
        GraphEntity {
            id: id.to_string(),
            entity_type: entity_type.to_string(),
            value: value.to_string(),
            severity: Severity::Info,
            metadata: Default::default(),
            discovered_at: Utc::now(),
            owner_user_id: None,
        }
    }

    fn edge(src: &str, tgt: &str, relation: &str) -> GraphEdge {
        GraphEdge {
            source_entity_id: src.to_string(),
            target_entity_id: tgt.to_string(),
            relation: relation.to_string(),
            weight: 1.0,
            metadata: Default::default(),
        }
    }

    #[test]
    fn duplicate_relationship_leaves_exactly_one_edge() {
        let graph = DomainGraph::new();
        graph.save_entity(entity("a", "domain", "example.com"));
        graph.save_entity(entity("b", "ip_address", "1.2.3.4"));
        graph.add_relationship(edge("a", "b", "resolves_to")).unwrap();
        graph.add_relationship(edge("a", "b", "resolves_to")).unwrap();

        assert_eq!(graph.get_neighbors("a", 1), vec!["b".to_string()]);
    }

    #[test]
    fn get_neighbors_zero_depth_is_empty_one_is_direct_successors() {
        let graph = DomainGraph::new();
        graph.save_entity(entity("a", "domain", "example.com"));
        graph.save_entity(entity("b", "ip_address", "1.2.3.4"));
        graph.add_relationship(edge("a", "b", "resolves_to")).unwrap();

        assert!(graph.get_neighbors("a", 0).is_empty());
        assert_eq!(graph.get_neighbors("a", 1), vec!["b".to_string()]);
    }

    #[test]
    fn find_path_to_self_is_single_element() {
        let graph = DomainGraph::new();
        graph.save_entity(entity("a", "domain", "example.com"));
        assert_eq!(graph.find_path("a", "a"), vec!["a".to_string()]);
    }

    #[test]
    fn find_path_returns_shortest_hop_chain() {
        let graph = DomainGraph::new();
        graph.save_entity(entity("a", "domain", "example.com"));
        graph.save_entity(entity("b", "ip_address", "1.2.3.4"));
        graph.save_entity(entity("c", "website", "http://example.com"));
        graph.add_relationship(edge("a", "b", "resolves_to")).unwrap();
        graph.add_relationship(edge("b", "c", "hosts")).unwrap();

        assert_eq!(graph.find_path("a", "c"), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn find_clusters_groups_connected_components() {
        let graph = DomainGraph::new();
        graph.save_entity(entity("a", "domain", "a.com"));
        graph.save_entity(entity("b", "domain", "b.com"));
        graph.save_entity(entity("c", "domain", "c.com"));
        graph.add_relationship(edge("a", "b", "associated_with")).unwrap();

        let clusters = graph.find_clusters(2);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn dedup_coalesces_same_type_value_entities() {
        let graph = DomainGraph::new();
        let first = graph.save_entity(entity("a", "domain", "example.com"));
        let second = graph.save_entity(entity("a-dup", "domain", "example.com"));
        assert_eq!(first, second);
        assert_eq!(graph.get_by_type("domain").len(), 1);
    }
}
