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

//! The scanner turns one node into `(links, response)`: fetch through the
//! transport, then run the node's plugin pipeline over the HTML. It knows
//! nothing about the graph, the scheduler or the filters.

use std::sync::Arc;

use url::Url;

use crate::node::Node;
use crate::transport::{FetchResponse, Transport};
use crate::urls;

pub struct NodeScanner {
    transport: Arc<dyn Transport>,
}

impl NodeScanner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Fetch and process one node. The node always ends up marked scanned;
    /// failures yield an empty link list.
    pub async fn scan_node(&self, node: &mut Node) -> (Vec<String>, FetchResponse) {
        let response = self.transport.fetch(node.url()).await;
        let links = Self::drive_pipeline(node, &response).await;
        (links, response)
    }

    /// Batch variant: one `fetch_many` round trip, then each node's pipeline
    /// in input order.
    pub async fn scan_batch(&self, nodes: &mut [Node]) -> Vec<(Vec<String>, FetchResponse)> {
        if nodes.is_empty() {
            return Vec::new();
        }

        let targets: Vec<Url> = nodes.iter().map(|node| node.url().clone()).collect();
        let responses = self.transport.fetch_many(&targets).await;

        let mut results = Vec::with_capacity(nodes.len());
        for (node, response) in nodes.iter_mut().zip(responses) {
            let links = Self::drive_pipeline(node, &response).await;
            results.push((links, response));
        }

        results
    }

    async fn drive_pipeline(node: &mut Node, response: &FetchResponse) -> Vec<String> {
        node.response_status = response.status_code;

        if let Some(error) = &response.error {
            tracing::warn!(url = %urls::redact(node.url().as_str()), "fetch failed: {error}");
            node.mark_scanned();
            return Vec::new();
        }

        let Some(html) = &response.html else {
            node.mark_scanned();
            return Vec::new();
        };

        let links = match node.process_html(html).await {
            Ok(links) => links,
            Err(err) => {
                tracing::warn!(url = %node.url(), "pipeline failed: {err:#}");
                Vec::new()
            }
        };

        node.mark_scanned();

        if response.is_redirect() {
            tracing::debug!(
                url = %response.url,
                final_url = %response.final_url.as_ref().unwrap(),
                "scanned through redirect"
            );
        }

        links
    }
}
