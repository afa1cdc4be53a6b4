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

//! Incremental re-crawl: pages whose content hash matches the previous
//! crawl are skipped after scanning, so their links are not reprocessed.

use hashbrown::HashMap;

use crate::graph::dto::GraphDto;
use crate::node::Node;

#[derive(Default)]
pub struct ContentHashIndex {
    hashes: HashMap<String, String>,
}

impl ContentHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the previous crawl's hashes by URL.
    pub fn from_dto(dto: &GraphDto) -> Self {
        let hashes = dto
            .nodes
            .iter()
            .filter_map(|node| {
                node.content_hash
                    .as_ref()
                    .map(|hash| (node.url.clone(), hash.clone()))
            })
            .collect();

        Self { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// True when the node's freshly computed hash matches the stored one:
    /// the content did not change since the last crawl.
    pub fn should_skip(&self, node: &Node) -> bool {
        let Some(current) = node.content_hash_opt() else {
            return false;
        };

        self.hashes
            .get(node.url().as_str())
            .is_some_and(|previous| previous == current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn unchanged_content_is_skipped() {
        let html = "<html><body>stable</body></html>";

        let mut previous = Node::new(Url::parse("https://example.com/").unwrap(), 0, None);
        previous.process_html(html).await.unwrap();
        previous.mark_scanned();

        let mut graph = crate::graph::Graph::new();
        graph.add_node(previous, false);
        let index = ContentHashIndex::from_dto(&GraphDto::from_graph(&graph));

        let mut unchanged = Node::new(Url::parse("https://example.com/").unwrap(), 0, None);
        unchanged.process_html(html).await.unwrap();
        assert!(index.should_skip(&unchanged));

        let mut changed = Node::new(Url::parse("https://example.com/").unwrap(), 0, None);
        changed
            .process_html("<html><body>different</body></html>")
            .await
            .unwrap();
        assert!(!index.should_skip(&changed));
    }

    #[test]
    fn url_stage_nodes_are_never_skipped() {
        let index = ContentHashIndex::new();
        let node = Node::new(Url::parse("https://example.com/").unwrap(), 0, None);
        assert!(!index.should_skip(&node));
    }
}
