//! Topology graph and shortest-path queries

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Kind of a topology node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    AccessPoint,
    Client,
}

/// One device in the topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
}

/// One link in the topology
///
/// Edges live in a flat list keyed by node ids; nodes never embed
/// each other, so cyclic link sets are harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub from: String,
    pub to: String,
    /// Link quality in [0, 1]
    pub quality: f64,
}

impl TopologyEdge {
    /// Path cost of traversing this edge
    pub fn weight(&self) -> f64 {
        1.0 / (self.quality + 0.1)
    }
}

/// Graph of devices and links, rebuilt on topology events
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    pub nodes: HashMap<String, TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

struct QueueEntry {
    cost: f64,
    node: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

impl TopologyGraph {
    pub fn add_node(&mut self, id: &str, kind: NodeKind, label: &str) {
        self.nodes.insert(
            id.to_string(),
            TopologyNode {
                id: id.to_string(),
                kind,
                label: label.to_string(),
            },
        );
    }

    pub fn add_edge(&mut self, from: &str, to: &str, quality: f64) {
        self.edges.push(TopologyEdge {
            from: from.to_string(),
            to: to.to_string(),
            quality: quality.clamp(0.0, 1.0),
        });
    }

    /// Undirected adjacency computed on demand
    fn adjacency(&self) -> HashMap<&str, Vec<(&str, f64)>> {
        let mut adjacency: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push((edge.to.as_str(), edge.weight()));
            adjacency
                .entry(edge.to.as_str())
                .or_default()
                .push((edge.from.as_str(), edge.weight()));
        }
        adjacency
    }

    /// Dijkstra shortest path by link cost
    ///
    /// Returns the node sequence and total cost, or `None` when no
    /// path exists.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<(Vec<String>, f64)> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return None;
        }
        let adjacency = self.adjacency();

        let mut dist: HashMap<&str, f64> = HashMap::new();
        let mut prev: HashMap<&str, &str> = HashMap::new();
        let mut heap = BinaryHeap::new();
        dist.insert(from, 0.0);
        heap.push(QueueEntry {
            cost: 0.0,
            node: from.to_string(),
        });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            // Edges naming unknown nodes are skipped rather than failing
            // the query.
            let Some((node_key, _)) = self.nodes.get_key_value(node.as_str()) else {
                continue;
            };
            let node_key = node_key.as_str();
            if cost > *dist.get(node_key).unwrap_or(&f64::INFINITY) {
                continue;
            }
            let Some(neighbors) = adjacency.get(node.as_str()) else {
                continue;
            };
            for (neighbor, weight) in neighbors {
                let next_cost = cost + weight;
                if next_cost < *dist.get(neighbor).unwrap_or(&f64::INFINITY) {
                    dist.insert(neighbor, next_cost);
                    prev.insert(neighbor, node_key);
                    heap.push(QueueEntry {
                        cost: next_cost,
                        node: neighbor.to_string(),
                    });
                }
            }
        }

        let total = *dist.get(to)?;
        let mut path = vec![to.to_string()];
        let mut cursor = to;
        while let Some(previous) = prev.get(cursor) {
            path.push(previous.to_string());
            cursor = previous;
        }
        if path.last().map(String::as_str) != Some(from) {
            return None;
        }
        path.reverse();
        Some((path, total))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> TopologyGraph {
        let mut graph = TopologyGraph::default();
        graph.add_node("ap-1", NodeKind::AccessPoint, "AP 1");
        graph.add_node("ap-2", NodeKind::AccessPoint, "AP 2");
        graph.add_node("ap-3", NodeKind::AccessPoint, "AP 3");
        graph
    }

    #[test]
    fn better_quality_wins_over_hop_count() {
        let mut graph = triangle();
        // Direct link is poor; the two-hop path has excellent links.
        graph.add_edge("ap-1", "ap-3", 0.05);
        graph.add_edge("ap-1", "ap-2", 0.9);
        graph.add_edge("ap-2", "ap-3", 0.9);

        let (path, cost) = graph.shortest_path("ap-1", "ap-3").unwrap();
        assert_eq!(path, vec!["ap-1", "ap-2", "ap-3"]);
        // Two hops at weight 1.0 beat one hop at weight ~6.67.
        assert!(cost < 1.0 / 0.15);
    }

    #[test]
    fn disconnected_nodes_have_no_path() {
        let mut graph = triangle();
        graph.add_edge("ap-1", "ap-2", 0.9);
        assert!(graph.shortest_path("ap-1", "ap-3").is_none());
        assert!(graph.shortest_path("ap-1", "missing").is_none());
    }

    #[test]
    fn cycles_are_handled() {
        let mut graph = triangle();
        graph.add_edge("ap-1", "ap-2", 0.5);
        graph.add_edge("ap-2", "ap-3", 0.5);
        graph.add_edge("ap-3", "ap-1", 0.5);

        let (path, _) = graph.shortest_path("ap-1", "ap-2").unwrap();
        assert_eq!(path, vec!["ap-1", "ap-2"]);
    }

    #[test]
    fn trivial_path_is_self() {
        let graph = triangle();
        let (path, cost) = graph.shortest_path("ap-1", "ap-1").unwrap();
        assert_eq!(path, vec!["ap-1"]);
        assert_eq!(cost, 0.0);
    }
}
