// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The crawl graph: nodes keyed by URL, directed edges between them.
//!
//! The web is cyclic, so the graph is stored as nodes-by-id plus an edge
//! list, never as parent/child object references. Duplicate (source, target)
//! pairs are suppressed as a global invariant above every edge strategy.

pub mod dto;

use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use serde_json::Value;
use uuid::Uuid;

use crate::node::{Node, NodeId};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct EdgeId(Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for EdgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A directed link. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            id: EdgeId::new(),
            source,
            target,
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Collision policy for binary graph operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the left node verbatim.
    #[default]
    First,
    /// Take the right node's fields.
    Last,
    /// Field-wise shallow union of metadata/user_data; right wins conflicts.
    Merge,
    /// Keep whichever node was created later.
    Newest,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub scanned_nodes: usize,
    pub unscanned_nodes: usize,
    pub total_edges: usize,
    pub avg_depth: f64,
    pub max_depth: u32,
}

#[derive(Default, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    by_url: HashMap<String, NodeId>,
    order: Vec<NodeId>,
    edges: Vec<Edge>,
    edge_pairs: HashSet<(NodeId, NodeId)>,
    incoming: HashMap<NodeId, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Admit a node. On URL collision the existing node is returned
    /// untouched, unless `overwrite` is set, in which case the new node
    /// replaces it while adopting the existing id.
    pub fn add_node(&mut self, mut node: Node, overwrite: bool) -> NodeId {
        let url = node.url().to_string();

        if let Some(&existing) = self.by_url.get(&url) {
            if overwrite {
                node.set_id(existing);
                self.nodes.insert(existing, node);
            }
            return existing;
        }

        let id = node.id();
        self.by_url.insert(url, id);
        self.order.push(id);
        self.nodes.insert(id, node);
        id
    }

    /// Admit an edge. Both endpoints must resolve and duplicate
    /// (source, target) pairs are rejected.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            return false;
        }

        if !self.edge_pairs.insert((edge.source, edge.target)) {
            return false;
        }

        *self.incoming.entry(edge.target).or_insert(0) += 1;
        self.edges.push(edge);
        true
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn get_node_by_url(&self, url: &str) -> Option<&Node> {
        self.by_url.get(url).and_then(|id| self.nodes.get(id))
    }

    pub fn node_id_for_url(&self, url: &str) -> Option<NodeId> {
        self.by_url.get(url).copied()
    }

    pub fn has_url(&self, url: &str) -> bool {
        self.by_url.contains_key(url)
    }

    /// Remove a node and every incident edge, through the edge list, not by
    /// reference traversal.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;

        self.by_url.remove(node.url().as_str());
        self.order.retain(|other| other != id);

        let edge_pairs = &mut self.edge_pairs;
        let incoming = &mut self.incoming;
        self.edges.retain(|edge| {
            let keep = edge.source != *id && edge.target != *id;
            if !keep {
                edge_pairs.remove(&(edge.source, edge.target));
                if let Some(count) = incoming.get_mut(&edge.target) {
                    *count = count.saturating_sub(1);
                }
            }
            keep
        });
        self.incoming.remove(id);

        Some(node)
    }

    pub fn in_degree(&self, id: &NodeId) -> usize {
        self.incoming.get(id).copied().unwrap_or(0)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.edge_pairs.contains(&(source, target))
    }

    pub fn get_stats(&self) -> GraphStats {
        let scanned = self.nodes.values().filter(|node| node.scanned).count();
        let max_depth = self.nodes.values().map(|node| node.depth).max().unwrap_or(0);
        let avg_depth = if self.nodes.is_empty() {
            0.0
        } else {
            self.nodes.values().map(|node| node.depth as f64).sum::<f64>()
                / self.nodes.len() as f64
        };

        GraphStats {
            total_nodes: self.nodes.len(),
            scanned_nodes: scanned,
            unscanned_nodes: self.nodes.len() - scanned,
            total_edges: self.edges.len(),
            avg_depth,
            max_depth,
        }
    }

    fn merge_node_into(left: &mut Node, right: &Node, strategy: MergeStrategy) {
        match strategy {
            MergeStrategy::First => {}
            MergeStrategy::Last => {
                Self::overwrite_fields(left, right);
            }
            MergeStrategy::Merge => {
                for (key, value) in &right.metadata {
                    left.metadata.insert(key.clone(), value.clone());
                }
                for (key, value) in &right.user_data {
                    left.user_data.insert(key.clone(), value.clone());
                }
                if right.scanned && !left.scanned {
                    left.absorb_scan(right);
                }
            }
            MergeStrategy::Newest => {
                if right.created_at > left.created_at {
                    Self::overwrite_fields(left, right);
                }
            }
        }
    }

    fn overwrite_fields(left: &mut Node, right: &Node) {
        let id = left.id();
        *left = right.clone();
        left.set_id(id);
    }

    /// Union under a merge strategy. Node identity is by URL; a colliding
    /// right node folds into the left node, which keeps its id so edges from
    /// both sides stay resolvable.
    pub fn union(&self, other: &Graph, strategy: MergeStrategy) -> Graph {
        let mut out = self.clone();
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();

        for rnode in other.nodes() {
            match out.by_url.get(rnode.url().as_str()).copied() {
                Some(lid) => {
                    remap.insert(rnode.id(), lid);
                    let left = out.nodes.get_mut(&lid).unwrap();
                    Self::merge_node_into(left, rnode, strategy);
                }
                None => {
                    out.add_node(rnode.clone(), false);
                }
            }
        }

        for redge in other.edges() {
            let source = remap.get(&redge.source).copied().unwrap_or(redge.source);
            let target = remap.get(&redge.target).copied().unwrap_or(redge.target);

            let mut edge = redge.clone();
            edge.source = source;
            edge.target = target;
            out.add_edge(edge);
        }

        out
    }

    /// Nodes and edges of the left graph that do not appear in the right one,
    /// compared by id.
    pub fn difference(&self, other: &Graph) -> Graph {
        let right_edge_ids: HashSet<EdgeId> = other.edges.iter().map(|edge| edge.id).collect();

        let mut out = Graph::new();

        for node in self.nodes() {
            if !other.nodes.contains_key(&node.id()) {
                out.add_node(node.clone(), false);
            }
        }

        for edge in self.edges() {
            if !right_edge_ids.contains(&edge.id) {
                out.add_edge(edge.clone());
            }
        }

        out
    }

    /// Nodes present in both graphs (by id), with the left graph's content,
    /// and the edges both graphs agree on.
    pub fn intersection(&self, other: &Graph) -> Graph {
        let mut out = Graph::new();

        for node in self.nodes() {
            if other.nodes.contains_key(&node.id()) {
                out.add_node(node.clone(), false);
            }
        }

        for edge in self.edges() {
            if other.edge_pairs.contains(&(edge.source, edge.target)) {
                out.add_edge(edge.clone());
            }
        }

        out
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}
