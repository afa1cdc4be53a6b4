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

//! The crawl coordinator: one async task that owns the graph and the
//! scheduler, drives the transport and the scanner, runs post-scan hooks
//! and hands links to the link processor until a termination condition
//! fires. No locks are involved; everything mutable lives on this task.

pub mod dead_letter;
pub mod incremental;
pub mod scanner;
pub mod throttle;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use url::Url;

use crate::events::{Event, EventBus, EventKind};
use crate::graph::{Graph, GraphStats};
use crate::link_processor::LinkProcessor;
use crate::node::{Node, NodeDeps, NodeId};
use crate::scheduler::Scheduler;
use crate::urls;
use crate::Result;

pub use dead_letter::{DeadLetterQueue, FailedUrl};
pub use incremental::ContentHashIndex;
pub use scanner::NodeScanner;
pub use throttle::{AdaptiveThrottler, ThrottleSummary};

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub max_depth: u32,
    pub max_pages: Option<usize>,
    pub timeout: Option<Duration>,
    pub request_delay: Duration,
    /// Nodes pulled per transport round trip when the transport supports
    /// batch fetching. 1 disables batch mode.
    pub fetch_batch_size: usize,
    pub adaptive_throttle: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: Some(100),
            timeout: None,
            request_delay: Duration::from_millis(500),
            fetch_batch_size: 1,
            adaptive_throttle: false,
        }
    }
}

/// User-supplied async rewrite of a node's links, run after HTML parsing
/// and before link processing. Hooks run in array order, each awaited.
#[async_trait]
pub trait PostScanHook: Send + Sync {
    async fn run(&self, node: &Node, links: Vec<String>) -> Result<Vec<String>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    SchedulerExhausted,
    MaxPages,
    Timeout,
    Cancelled,
}

pub struct CrawlResult {
    pub graph: Graph,
    pub stats: GraphStats,
    pub pages_crawled: usize,
    pub termination: Termination,
    pub dead_letters: Vec<FailedUrl>,
    pub throttle: ThrottleSummary,
}

/// Cooperative shutdown signal; cloneable and usable from any task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct CrawlCoordinator {
    config: CoordinatorConfig,
    graph: Graph,
    scheduler: Scheduler,
    scanner: NodeScanner,
    link_processor: LinkProcessor,
    events: EventBus,
    throttler: AdaptiveThrottler,
    dead_letter: DeadLetterQueue,
    incremental: Option<ContentHashIndex>,
    post_scan_hooks: Vec<Arc<dyn PostScanHook>>,
    deps: Arc<NodeDeps>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_handle: ShutdownHandle,
    /// A dequeued node held over for the next batch (depth-bucket overflow).
    carry: Option<NodeId>,
}

impl CrawlCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        scanner: NodeScanner,
        link_processor: LinkProcessor,
        scheduler: Scheduler,
        deps: Arc<NodeDeps>,
    ) -> Self {
        let throttler = AdaptiveThrottler::new(config.request_delay);
        let (tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            graph: Graph::new(),
            scheduler,
            scanner,
            link_processor,
            events: EventBus::new(),
            throttler,
            dead_letter: DeadLetterQueue::new(),
            incremental: None,
            post_scan_hooks: Vec::new(),
            deps,
            shutdown_rx,
            shutdown_handle: ShutdownHandle { tx: Arc::new(tx) },
            carry: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_incremental(mut self, index: ContentHashIndex) -> Self {
        self.incremental = Some(index);
        self
    }

    pub fn with_post_scan_hooks(mut self, hooks: Vec<Arc<dyn PostScanHook>>) -> Self {
        self.post_scan_hooks = hooks;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    fn cancelled(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn sleep_or_cancel(&mut self, delay: Duration) {
        if delay.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown_rx.changed() => {}
        }
    }

    fn effective_delay(&self) -> Duration {
        if self.config.adaptive_throttle {
            return self.throttler.current_delay();
        }

        // the driver-level delay shadows the crawl-level value
        self.scanner
            .transport()
            .request_delay()
            .unwrap_or(self.config.request_delay)
    }

    /// Run the crawl from one seed to completion and hand the graph back.
    pub async fn crawl(mut self, seed: Url) -> Result<CrawlResult> {
        // configuration errors surface before any fetch happens
        urls::validate_security(&seed, false).map_err(anyhow::Error::from)?;

        let mut seed = seed;
        urls::normalize_in_place(&mut seed);

        let mut root = Node::new(seed.clone(), 0, Some(self.deps.clone()));
        self.scheduler.add_node(&mut root);
        self.graph.add_node(root, false);

        self.events
            .publish(Event::new(EventKind::CrawlStarted).with("url", seed.as_str()))
            .await;

        let started = Instant::now();
        let mut pages_crawled = 0usize;

        let termination = loop {
            if self.scheduler.is_empty() && self.carry.is_none() {
                break Termination::SchedulerExhausted;
            }

            if self.cancelled() {
                break Termination::Cancelled;
            }

            if self
                .config
                .max_pages
                .is_some_and(|max| pages_crawled >= max)
            {
                break Termination::MaxPages;
            }

            if self
                .config
                .timeout
                .is_some_and(|timeout| started.elapsed() > timeout)
            {
                break Termination::Timeout;
            }

            let crawled = if self.batch_mode() {
                self.step_batch(&mut pages_crawled).await
            } else {
                self.step_single(&mut pages_crawled).await
            };

            if crawled {
                self.sleep_or_cancel(self.effective_delay()).await;
            }
        };

        if termination == Termination::Cancelled {
            // drain pending work; results of in-flight fetches are dropped
            // with the scheduler entries
            while self.scheduler.get_next().is_some() {}
        }

        let stats = self.graph.get_stats();
        self.events
            .publish(
                Event::new(EventKind::CrawlCompleted)
                    .with("pages_crawled", pages_crawled)
                    .with("total_nodes", stats.total_nodes)
                    .with("total_edges", stats.total_edges),
            )
            .await;

        if let Some(manager) = &self.deps.plugin_manager {
            manager.teardown().await;
        }
        self.scanner.transport().close().await;

        Ok(CrawlResult {
            stats,
            pages_crawled,
            termination,
            dead_letters: self.dead_letter.entries().to_vec(),
            throttle: self.throttler.summary(),
            graph: self.graph,
        })
    }

    fn batch_mode(&self) -> bool {
        self.config.fetch_batch_size > 1
            && self.scanner.transport().supports_batch_fetching()
    }

    /// Dequeue one node, decide whether it gets fetched at all.
    /// Returns the node id when the node should be scanned.
    fn next_scannable(&mut self) -> Option<NodeId> {
        let id = match self.carry.take() {
            Some(id) => id,
            None => self.scheduler.get_next()?,
        };

        let node = self.graph.get_node(&id)?;

        if node.depth > self.config.max_depth || node.scanned {
            return None;
        }

        if !node.should_scan {
            // rules or filters forbid the fetch; the node stays in the
            // graph as an unscanned leaf
            return None;
        }

        Some(id)
    }

    /// Scan one node end to end. Returns true when a page was crawled.
    async fn step_single(&mut self, pages_crawled: &mut usize) -> bool {
        let Some(id) = self.next_scannable() else {
            return false;
        };

        let url = self
            .graph
            .get_node(&id)
            .map(|node| node.url().to_string())
            .unwrap_or_default();

        self.events
            .publish(Event::new(EventKind::NodeScanStarted).with("url", url.clone()))
            .await;

        let fetch_started = Instant::now();

        let (links, response) = {
            let Some(node) = self.graph.get_node_mut(&id) else {
                return false;
            };
            self.scanner.scan_node(node).await
        };

        let elapsed = fetch_started.elapsed();
        if response.error.is_some() {
            self.throttler.record_failure(elapsed);
            let reason = response.error.as_deref().unwrap_or("unknown");
            self.dead_letter.add_failed_url(&url, reason, 0);
            self.events
                .publish(
                    Event::new(EventKind::ErrorOccurred)
                        .with("url", url.clone())
                        .with("error", urls::redact(reason)),
                )
                .await;
        } else {
            self.throttler.record_success(elapsed);
        }

        self.events
            .publish(
                Event::new(EventKind::NodeScanned)
                    .with("url", url.clone())
                    .with("links", links.len()),
            )
            .await;

        self.finish_page(id, links, pages_crawled).await;
        true
    }

    /// Pull up to `fetch_batch_size` ready nodes of the same depth and drive
    /// them through one `fetch_many` round trip.
    async fn step_batch(&mut self, pages_crawled: &mut usize) -> bool {
        let mut ids = Vec::with_capacity(self.config.fetch_batch_size);
        let mut batch_depth = None;

        while ids.len() < self.config.fetch_batch_size {
            let Some(id) = self.next_scannable() else {
                if self.scheduler.is_empty() {
                    break;
                }
                continue;
            };

            let depth = self.graph.get_node(&id).map(|node| node.depth);
            match (batch_depth, depth) {
                (None, Some(depth)) => batch_depth = Some(depth),
                (Some(expected), Some(depth)) if depth == expected => {}
                // different depth bucket: hold it over for the next batch
                (_, Some(_)) => {
                    self.carry = Some(id);
                    break;
                }
                _ => continue,
            }

            ids.push(id);
        }

        if ids.is_empty() {
            return false;
        }

        let mut nodes: Vec<Node> = ids
            .iter()
            .filter_map(|id| self.graph.get_node(id).cloned())
            .collect();

        let fetch_started = Instant::now();
        let results = self.scanner.scan_batch(&mut nodes).await;
        let elapsed = fetch_started.elapsed();

        for ((id, node), (links, response)) in
            ids.into_iter().zip(nodes).zip(results)
        {
            let url = node.url().to_string();

            if let Some(slot) = self.graph.get_node_mut(&id) {
                *slot = node;
                slot.set_id(id);
            }

            if response.error.is_some() {
                self.throttler.record_failure(elapsed);
                let reason = response.error.as_deref().unwrap_or("unknown");
                self.dead_letter.add_failed_url(&url, reason, 0);
            } else {
                self.throttler.record_success(elapsed);
            }

            self.events
                .publish(
                    Event::new(EventKind::NodeScanned)
                        .with("url", url)
                        .with("links", links.len()),
                )
                .await;

            self.finish_page(id, links, pages_crawled).await;

            if self
                .config
                .max_pages
                .is_some_and(|max| *pages_crawled >= max)
            {
                break;
            }
        }

        true
    }

    /// Post-scan hooks, incremental skip, link processing, bookkeeping.
    async fn finish_page(&mut self, id: NodeId, links: Vec<String>, pages_crawled: &mut usize) {
        let node_snapshot = match self.graph.get_node(&id) {
            Some(node) => node.clone(),
            None => return,
        };

        if let Some(index) = &self.incremental {
            if index.should_skip(&node_snapshot) {
                tracing::debug!(url = %node_snapshot.url(), "content unchanged, skipping links");
                return;
            }
        }

        let mut links = links;
        for hook in &self.post_scan_hooks {
            // a failing hook keeps the current links; the remaining hooks
            // still run
            match hook.run(&node_snapshot, links.clone()).await {
                Ok(rewritten) => links = rewritten,
                Err(err) => {
                    tracing::warn!(url = %node_snapshot.url(), "post-scan hook failed: {err:#}");
                }
            }
        }

        let admitted = self
            .link_processor
            .process_links_async(id, &links, &mut self.graph, &mut self.scheduler)
            .await;

        *pages_crawled += 1;

        let stats = self.graph.get_stats();
        self.events
            .publish(
                Event::new(EventKind::PageCrawled)
                    .with("url", node_snapshot.url().as_str())
                    .with("pages_crawled", *pages_crawled)
                    .with("new_nodes", admitted)
                    .with("total_nodes", stats.total_nodes)
                    .with("queued", self.scheduler.size()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{DomainFilter, PathFilter, UrlRule, UrlRules};
    use crate::link_processor::EdgeStrategy;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::Mutex;

    fn page_with_links(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!(r#"<a href="{href}">x</a>"#))
            .collect();
        format!("<html><body>{anchors}</body></html>")
    }

    struct Builder {
        transport: MemoryTransport,
        config: CoordinatorConfig,
        rules: Vec<UrlRule>,
        strategy: EdgeStrategy,
        hooks: Vec<Arc<dyn PostScanHook>>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                transport: MemoryTransport::new(),
                config: CoordinatorConfig {
                    request_delay: Duration::ZERO,
                    ..CoordinatorConfig::default()
                },
                rules: Vec::new(),
                strategy: EdgeStrategy::All,
                hooks: Vec::new(),
            }
        }

        fn build(self) -> CrawlCoordinator {
            let base = Url::parse("https://example.com/").unwrap();
            let rules = Arc::new(UrlRules::new(self.rules));
            let deps = NodeDeps::standard();

            let transport: Arc<dyn Transport> = Arc::new(self.transport);
            let link_processor = LinkProcessor::new(
                DomainFilter::same_domain(&base),
                PathFilter::default(),
                rules.clone(),
                Vec::new(),
                self.strategy,
                deps.clone(),
            );

            CrawlCoordinator::new(
                self.config,
                NodeScanner::new(transport),
                link_processor,
                Scheduler::new(rules),
                deps,
            )
            .with_post_scan_hooks(self.hooks)
        }
    }

    fn seed() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn max_depth_zero_scans_only_the_seed() {
        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&["/a", "/b"]));
        b.config.max_depth = 0;
        b.config.max_pages = Some(1);

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.stats.scanned_nodes, 1);
        assert_eq!(result.stats.unscanned_nodes, 2);
        assert_eq!(result.stats.total_edges, 2);
        assert_eq!(result.pages_crawled, 1);
    }

    #[tokio::test]
    async fn crawl_follows_links_to_depth() {
        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&["/a"]));
        b.transport
            .insert("https://example.com/a", &page_with_links(&["/b"]));
        b.transport
            .insert("https://example.com/b", &page_with_links(&[]));
        b.config.max_depth = 2;

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.stats.total_nodes, 3);
        assert_eq!(result.stats.scanned_nodes, 3);
        assert_eq!(result.stats.max_depth, 2);
        assert_eq!(result.termination, Termination::SchedulerExhausted);
    }

    #[tokio::test]
    async fn clique_under_new_only_is_a_forest() {
        let mut b = Builder::new();
        let all: Vec<String> = (0..10)
            .map(|i| format!("https://example.com/p{i}"))
            .collect();
        let hrefs: Vec<&str> = all.iter().map(String::as_str).collect();

        b.transport
            .insert("https://example.com/", &page_with_links(&hrefs));
        for url in &all {
            b.transport.insert(url, &page_with_links(&hrefs));
        }
        b.config.max_depth = 2;
        b.config.max_pages = Some(100);
        b.strategy = EdgeStrategy::NewOnly;

        let result = b.build().crawl(seed()).await.unwrap();

        // seed + 10 pages, every edge points at a freshly created node
        assert_eq!(result.stats.total_nodes, 11);
        assert!(result.stats.total_edges <= result.stats.total_nodes - 1);
    }

    #[tokio::test]
    async fn http_404_is_recorded_not_fatal() {
        let mut b = Builder::new();
        b.transport.insert_status("https://example.com/", 404);
        b.config.max_depth = 0;
        b.config.max_pages = Some(1);

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.stats.total_nodes, 1);
        let node = result.graph.get_node_by_url("https://example.com/").unwrap();
        assert!(node.scanned);
        assert_eq!(node.response_status, Some(404));
        assert_eq!(result.stats.total_edges, 0);
        assert!(!result.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn unreachable_seed_is_an_empty_crawl_not_an_error() {
        let b = Builder::new();

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.stats.total_nodes, 1);
        assert_eq!(result.stats.scanned_nodes, 1);
        assert_eq!(result.pages_crawled, 1);
        assert_eq!(result.dead_letters.len(), 1);
    }

    #[tokio::test]
    async fn internal_seed_is_rejected_up_front() {
        let b = Builder::new();
        let result = b
            .build()
            .crawl(Url::parse("http://127.0.0.1/").unwrap())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rule_blocked_page_is_never_fetched() {
        let mut b = Builder::new();
        b.transport.insert(
            "https://example.com/",
            &page_with_links(&["/admin/login", "/public"]),
        );
        b.transport
            .insert("https://example.com/public", &page_with_links(&[]));
        // the admin page intentionally has no fixture: fetching it would
        // count as a dead letter
        b.rules = vec![UrlRule::new("/admin/").unwrap().with_should_scan(false)];

        let result = b.build().crawl(seed()).await.unwrap();

        assert!(result
            .graph
            .get_node_by_url("https://example.com/admin/login")
            .is_none());
        assert!(result.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn rule_with_create_edge_admits_unscanned_node() {
        let mut b = Builder::new();
        b.transport.insert(
            "https://example.com/",
            &page_with_links(&["/admin/login"]),
        );
        b.rules = vec![UrlRule::new("/admin/")
            .unwrap()
            .with_should_scan(false)
            .with_create_edge(true)];

        let result = b.build().crawl(seed()).await.unwrap();

        let node = result
            .graph
            .get_node_by_url("https://example.com/admin/login")
            .unwrap();
        assert!(!node.scanned);
        assert_eq!(result.stats.total_edges, 1);
        assert!(result.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn post_scan_hooks_run_in_order_and_survive_failures() {
        struct Rewrite(&'static str);

        #[async_trait]
        impl PostScanHook for Rewrite {
            async fn run(&self, _node: &Node, mut links: Vec<String>) -> Result<Vec<String>> {
                links.push(self.0.to_string());
                Ok(links)
            }
        }

        struct Failing;

        #[async_trait]
        impl PostScanHook for Failing {
            async fn run(&self, _node: &Node, _links: Vec<String>) -> Result<Vec<String>> {
                anyhow::bail!("hook exploded")
            }
        }

        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&[]));
        b.config.max_depth = 0;
        b.hooks = vec![
            Arc::new(Rewrite("/from-hook-1")),
            Arc::new(Failing),
            Arc::new(Rewrite("/from-hook-2")),
        ];

        let result = b.build().crawl(seed()).await.unwrap();

        // both rewrites landed even though the middle hook failed
        assert!(result.graph.has_url("https://example.com/from-hook-1"));
        assert!(result.graph.has_url("https://example.com/from-hook-2"));
    }

    #[tokio::test]
    async fn max_pages_terminates_early() {
        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&["/a", "/b", "/c"]));
        for path in ["/a", "/b", "/c"] {
            b.transport.insert(
                &format!("https://example.com{path}"),
                &page_with_links(&[]),
            );
        }
        b.config.max_pages = Some(1);

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.pages_crawled, 1);
        assert_eq!(result.stats.scanned_nodes, 1);
        assert_eq!(result.stats.unscanned_nodes, 3);
        assert_eq!(result.termination, Termination::MaxPages);
    }

    #[tokio::test]
    async fn incremental_skips_unchanged_pages() {
        let page = page_with_links(&["/child"]);

        // first crawl records the content hashes
        let mut b = Builder::new();
        b.transport.insert("https://example.com/", &page);
        b.transport
            .insert("https://example.com/child", &page_with_links(&[]));
        let first = b.build().crawl(seed()).await.unwrap();

        let index = ContentHashIndex::from_dto(&crate::graph::dto::GraphDto::from_graph(
            &first.graph,
        ));

        // second crawl over identical content: the seed's links are skipped
        let mut b = Builder::new();
        b.transport.insert("https://example.com/", &page);
        let coordinator = b.build().with_incremental(index);
        let second = coordinator.crawl(seed()).await.unwrap();

        assert_eq!(second.stats.total_nodes, 1);
    }

    #[tokio::test]
    async fn batch_mode_crawls_everything() {
        let mut b = Builder::new();
        let children: Vec<String> = (0..8).map(|i| format!("/c{i}")).collect();
        let hrefs: Vec<&str> = children.iter().map(String::as_str).collect();

        b.transport
            .insert("https://example.com/", &page_with_links(&hrefs));
        for path in &children {
            b.transport.insert(
                &format!("https://example.com{path}"),
                &page_with_links(&[]),
            );
        }
        b.config.fetch_batch_size = 4;

        let result = b.build().crawl(seed()).await.unwrap();

        assert_eq!(result.stats.total_nodes, 9);
        assert_eq!(result.stats.scanned_nodes, 9);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&["/a"]));
        b.transport
            .insert("https://example.com/a", &page_with_links(&[]));

        let coordinator = b.build();
        let handle = coordinator.shutdown_handle();
        handle.shutdown();

        let result = coordinator.crawl(seed()).await.unwrap();

        assert_eq!(result.termination, Termination::Cancelled);
    }

    #[tokio::test]
    async fn events_fire_in_lifecycle_order() {
        let log: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));

        let mut b = Builder::new();
        b.transport
            .insert("https://example.com/", &page_with_links(&[]));
        b.config.max_depth = 0;

        let mut events = EventBus::new();
        let sink = Arc::clone(&log);
        events.subscribe(move |event| sink.lock().unwrap().push(event.kind));

        let coordinator = b.build().with_events(events);
        coordinator.crawl(seed()).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.first(), Some(&EventKind::CrawlStarted));
        assert_eq!(log.last(), Some(&EventKind::CrawlCompleted));
        assert!(log.contains(&EventKind::NodeScanStarted));
        assert!(log.contains(&EventKind::NodeScanned));
        assert!(log.contains(&EventKind::PageCrawled));
    }
}
