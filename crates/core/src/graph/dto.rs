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

//! Serialization-only mirrors of Node / Edge / Graph.
//!
//! DTOs never carry live references (plugin manager, tree adapter, hash
//! strategy); those are dropped on save and supplied again on load through
//! [`NodeDeps`]. Node records keep insertion order so persisted files diff
//! cleanly.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::graph::{Edge, EdgeId, Graph, GraphStats, MergeStrategy};
use crate::node::{Node, NodeDeps, NodeId, NodeLifecycle};
use crate::Result;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeDto {
    pub node_id: NodeId,
    pub url: String,
    pub depth: u32,
    pub should_scan: bool,
    pub can_create_edges: bool,
    pub scanned: bool,
    pub response_status: Option<u16>,
    pub metadata: serde_json::Map<String, Value>,
    pub user_data: serde_json::Map<String, Value>,
    pub content_hash: Option<String>,
    pub priority: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub lifecycle_stage: NodeLifecycle,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EdgeDto {
    pub edge_id: EdgeId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
    pub stats: GraphStats,
}

impl From<&Node> for NodeDto {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id(),
            url: node.url().to_string(),
            depth: node.depth,
            should_scan: node.should_scan,
            can_create_edges: node.can_create_edges,
            scanned: node.scanned,
            response_status: node.response_status,
            metadata: node.metadata.clone(),
            user_data: node.user_data.clone(),
            content_hash: node.content_hash_opt().map(str::to_string),
            priority: node.priority,
            created_at: node.created_at,
            lifecycle_stage: node.stage(),
        }
    }
}

impl NodeDto {
    pub fn into_node(self, deps: Option<Arc<NodeDeps>>) -> Result<Node> {
        let url = Url::parse(&self.url)?;

        let mut node = Node::from_parts(
            self.node_id,
            url,
            self.depth,
            self.should_scan,
            self.can_create_edges,
            self.scanned,
            self.response_status,
            self.priority,
            self.created_at,
            self.lifecycle_stage,
            self.metadata,
            self.user_data,
            self.content_hash,
        );

        if let Some(deps) = deps {
            node.restore_dependencies(deps);
        }

        Ok(node)
    }
}

impl From<&Edge> for EdgeDto {
    fn from(edge: &Edge) -> Self {
        Self {
            edge_id: edge.id,
            source_node_id: edge.source,
            target_node_id: edge.target,
            metadata: edge.metadata.clone(),
            created_at: edge.created_at,
        }
    }
}

impl From<EdgeDto> for Edge {
    fn from(dto: EdgeDto) -> Self {
        Self {
            id: dto.edge_id,
            source: dto.source_node_id,
            target: dto.target_node_id,
            metadata: dto.metadata,
            created_at: dto.created_at,
        }
    }
}

impl GraphDto {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            nodes: graph.nodes().map(NodeDto::from).collect(),
            edges: graph.edges().map(EdgeDto::from).collect(),
            stats: graph.get_stats(),
        }
    }

    /// Rebuild a live graph, re-attaching dependencies to every node.
    pub fn into_graph(self, deps: Option<Arc<NodeDeps>>) -> Result<Graph> {
        let mut graph = Graph::new();

        for node_dto in self.nodes {
            let node = node_dto.into_node(deps.clone())?;
            graph.add_node(node, false);
        }

        for edge_dto in self.edges {
            graph.add_edge(Edge::from(edge_dto));
        }

        Ok(graph)
    }

    /// Fold another partial graph into this one; used when a dispatcher
    /// merges worker results. Returns the merged live graph.
    pub fn merge_into(
        master: &mut Graph,
        partial: GraphDto,
        strategy: MergeStrategy,
        deps: Option<Arc<NodeDeps>>,
    ) -> Result<()> {
        let partial = partial.into_graph(deps)?;
        *master = master.union(&partial, strategy);
        Ok(())
    }
}
