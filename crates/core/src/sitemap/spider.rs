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

//! Sitemap traversal sub-engine.
//!
//! robots.txt is the root of the produced graph, sitemap files hang off it
//! (or off their containing index), URL entries are leaves. A sitemap that
//! fails to download or parse becomes an error node at its position and the
//! traversal continues.

use std::sync::Arc;

use hashbrown::HashSet;
use serde_json::Value;
use url::Url;

use super::{parse_sitemap, sitemaps_in_robots, SitemapEntry};
use crate::events::{Event, EventBus, EventKind};
use crate::graph::{Edge, Graph};
use crate::node::{Node, NodeId};
use crate::transport::Transport;
use crate::Result;

/// Recursion guard for sitemap indexes pointing at each other.
const MAX_SITEMAP_DEPTH: u32 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SitemapStats {
    pub sitemaps_processed: usize,
    pub urls_extracted: usize,
    pub errors: usize,
}

pub struct SitemapSpider {
    transport: Arc<dyn Transport>,
    include_urls: bool,
    max_urls: Option<usize>,
    events: EventBus,
    stats: SitemapStats,
}

impl SitemapSpider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            include_urls: true,
            max_urls: None,
            events: EventBus::new(),
            stats: SitemapStats::default(),
        }
    }

    /// `false` keeps only the robots/sitemap structure, dropping URL leaves.
    pub fn with_include_urls(mut self, include_urls: bool) -> Self {
        self.include_urls = include_urls;
        self
    }

    pub fn with_max_urls(mut self, max_urls: Option<usize>) -> Self {
        self.max_urls = max_urls;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn stats(&self) -> SitemapStats {
        self.stats
    }

    fn typed_node(url: Url, depth: u32, node_type: &str) -> Node {
        let mut node = Node::new(url, depth, None);
        node.should_scan = false;
        node.metadata
            .insert("node_type".to_string(), Value::String(node_type.to_string()));
        node
    }

    async fn fetch_body(&self, url: &Url) -> Result<String, String> {
        let response = self.transport.fetch(url).await;

        if let Some(error) = response.error {
            return Err(error);
        }

        response.html.ok_or_else(|| "empty body".to_string())
    }

    /// Walk robots.txt and every reachable sitemap, building the graph.
    pub async fn crawl(&mut self, base_url: &Url) -> Result<Graph> {
        self.events
            .publish(
                Event::new(EventKind::SitemapCrawlStarted).with("url", base_url.as_str()),
            )
            .await;

        let mut graph = Graph::new();

        let robots_url = base_url.join("/robots.txt")?;
        let mut robots = Self::typed_node(robots_url.clone(), 0, "robots_txt");

        let sitemaps = match self.fetch_body(&robots_url).await {
            Ok(body) => {
                robots.mark_scanned();
                robots.response_status = Some(200);
                sitemaps_in_robots(&body)
            }
            Err(error) => {
                tracing::warn!("robots.txt unavailable: {error}");
                robots
                    .metadata
                    .insert("error".to_string(), Value::String(error));
                Vec::new()
            }
        };

        let root_id = graph.add_node(robots, false);

        // no Sitemap lines: try the conventional locations
        let sitemaps = if sitemaps.is_empty() {
            ["/sitemap.xml", "/sitemap_index.xml"]
                .iter()
                .filter_map(|path| base_url.join(path).ok())
                .collect()
        } else {
            sitemaps
        };

        let mut queue: Vec<(Url, NodeId, u32)> = sitemaps
            .into_iter()
            .map(|url| (url, root_id, 1))
            .collect();
        let mut visited: HashSet<Url> = HashSet::new();

        while let Some((sitemap_url, parent_id, depth)) = queue.pop() {
            if depth > MAX_SITEMAP_DEPTH || !visited.insert(sitemap_url.clone()) {
                continue;
            }

            let mut node = Self::typed_node(sitemap_url.clone(), depth, "sitemap");

            let body = self.fetch_body(&sitemap_url).await;

            let entries = match body {
                Ok(body) => {
                    node.mark_scanned();
                    node.response_status = Some(200);
                    parse_sitemap(&body)
                }
                Err(error) => {
                    self.stats.errors += 1;
                    node.metadata
                        .insert("error".to_string(), Value::String(error));
                    Vec::new()
                }
            };

            let node_id = graph.add_node(node, false);
            graph.add_edge(Edge::new(parent_id, node_id));
            self.stats.sitemaps_processed += 1;

            for entry in entries {
                match entry {
                    SitemapEntry::Sitemap(url) => {
                        queue.push((url, node_id, depth + 1));
                    }
                    SitemapEntry::Url(dated) => {
                        if !self.include_urls {
                            continue;
                        }

                        if self
                            .max_urls
                            .is_some_and(|max| self.stats.urls_extracted >= max)
                        {
                            continue;
                        }

                        let mut leaf = Self::typed_node(dated.url, depth + 1, "url");
                        leaf.should_scan = true;

                        if let Some(lastmod) = dated.last_modified {
                            leaf.metadata.insert(
                                "last_modified".to_string(),
                                Value::String(lastmod.to_rfc3339()),
                            );
                        }

                        let leaf_id = graph.add_node(leaf, false);
                        if graph.add_edge(Edge::new(node_id, leaf_id)) {
                            self.stats.urls_extracted += 1;
                        }
                    }
                }
            }
        }

        self.events
            .publish(
                Event::new(EventKind::SitemapCrawlCompleted)
                    .with("sitemaps_processed", self.stats.sitemaps_processed)
                    .with("urls_extracted", self.stats.urls_extracted)
                    .with("errors", self.stats.errors),
            )
            .await;

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const ROBOTS: &str = "User-agent: *\nSitemap: https://example.com/sitemap-a.xml\nSitemap: https://example.com/sitemap-b.xml\n";

    fn urlset(paths: &[&str]) -> String {
        let urls: String = paths
            .iter()
            .map(|p| format!("<url><loc>https://example.com{p}</loc></url>"))
            .collect();
        format!("<urlset>{urls}</urlset>")
    }

    fn two_sitemap_transport() -> MemoryTransport {
        let mut transport = MemoryTransport::new();
        transport.insert("https://example.com/robots.txt", ROBOTS);
        transport.insert(
            "https://example.com/sitemap-a.xml",
            &urlset(&["/a1", "/a2", "/a3"]),
        );
        transport.insert(
            "https://example.com/sitemap-b.xml",
            &urlset(&["/b1", "/b2", "/b3"]),
        );
        transport
    }

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn robots_root_with_sitemaps_and_urls() {
        let mut spider = SitemapSpider::new(Arc::new(two_sitemap_transport()));
        let graph = spider.crawl(&base()).await.unwrap();

        // 1 robots + 2 sitemaps + 6 urls
        assert_eq!(graph.node_count(), 9);
        assert_eq!(spider.stats().sitemaps_processed, 2);
        assert_eq!(spider.stats().urls_extracted, 6);

        let root = graph
            .get_node_by_url("https://example.com/robots.txt")
            .unwrap();
        assert_eq!(root.depth, 0);
        assert_eq!(
            root.metadata["node_type"],
            Value::String("robots_txt".into())
        );

        // every url leaf sits one level under its sitemap
        for node in graph.nodes() {
            if node.metadata.get("node_type") == Some(&Value::String("url".into())) {
                assert_eq!(node.depth, 2);
            }
        }
    }

    #[tokio::test]
    async fn include_urls_false_keeps_structure_only() {
        let mut spider =
            SitemapSpider::new(Arc::new(two_sitemap_transport())).with_include_urls(false);
        let graph = spider.crawl(&base()).await.unwrap();

        assert_eq!(graph.node_count(), 3);
    }

    #[tokio::test]
    async fn max_urls_caps_the_harvest() {
        let mut spider =
            SitemapSpider::new(Arc::new(two_sitemap_transport())).with_max_urls(Some(4));
        let graph = spider.crawl(&base()).await.unwrap();

        assert_eq!(spider.stats().urls_extracted, 4);
        assert_eq!(graph.node_count(), 1 + 2 + 4);
    }

    #[tokio::test]
    async fn sitemap_index_recursion() {
        let mut transport = MemoryTransport::new();
        transport.insert(
            "https://example.com/robots.txt",
            "Sitemap: https://example.com/index.xml\n",
        );
        transport.insert(
            "https://example.com/index.xml",
            r#"<sitemapindex><sitemap><loc>https://example.com/posts.xml</loc></sitemap></sitemapindex>"#,
        );
        transport.insert("https://example.com/posts.xml", &urlset(&["/p1"]));

        let mut spider = SitemapSpider::new(Arc::new(transport));
        let graph = spider.crawl(&base()).await.unwrap();

        // robots -> index -> posts -> url
        assert_eq!(graph.node_count(), 4);
        let leaf = graph.get_node_by_url("https://example.com/p1").unwrap();
        assert_eq!(leaf.depth, 3);
    }

    #[tokio::test]
    async fn broken_sitemap_becomes_error_node() {
        let mut transport = MemoryTransport::new();
        transport.insert("https://example.com/robots.txt", ROBOTS);
        transport.insert(
            "https://example.com/sitemap-a.xml",
            &urlset(&["/a1"]),
        );
        // sitemap-b has no fixture: download fails

        let mut spider = SitemapSpider::new(Arc::new(transport));
        let graph = spider.crawl(&base()).await.unwrap();

        assert_eq!(spider.stats().errors, 1);
        let broken = graph
            .get_node_by_url("https://example.com/sitemap-b.xml")
            .unwrap();
        assert!(broken.metadata.contains_key("error"));
        // structure survives around the failure
        assert!(graph.has_url("https://example.com/a1"));
    }

    #[tokio::test]
    async fn missing_robots_falls_back_to_conventional_paths() {
        let mut transport = MemoryTransport::new();
        transport.insert("https://example.com/sitemap.xml", &urlset(&["/x"]));

        let mut spider = SitemapSpider::new(Arc::new(transport));
        let graph = spider.crawl(&base()).await.unwrap();

        assert!(graph.has_url("https://example.com/robots.txt"));
        assert!(graph.has_url("https://example.com/x"));
    }
}
