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

//! High-level entry points: wire a [`CrawlConfig`] into transport, filters,
//! scheduler and coordinator, run the crawl and persist the result.

use std::sync::Arc;

use url::Url;

use crate::config::{CrawlConfig, DriverKind, StorageKind};
use crate::coordinator::{
    ContentHashIndex, CoordinatorConfig, CrawlCoordinator, CrawlResult, NodeScanner, PostScanHook,
};
use crate::dom;
use crate::events::EventBus;
use crate::filters::{DomainFilter, PathFilter, UrlRules};
use crate::graph::dto::GraphDto;
use crate::graph::Graph;
use crate::link_processor::LinkProcessor;
use crate::node::{NodeDeps, Sha256ContentHash};
use crate::plugins::PluginManager;
use crate::scheduler::Scheduler;
use crate::sitemap::{SitemapSpider, SitemapStats};
use crate::storage::{JsonStorage, MemoryStorage, SqliteStorage, Storage};
use crate::transport::http::HttpTransport;
use crate::transport::Transport;
use crate::urls;
use crate::{Error, Result};

/// Unbounded crawls get a Bloom filter in front of the seen-set.
const BLOOM_ESTIMATED_URLS: u64 = 10_000_000;
const BLOOM_FP_RATE: f64 = 0.001;

/// Injection points for callers that go beyond the plain config: custom
/// plugins, a browser transport, post-scan hooks, event subscribers, an
/// external storage backend.
#[derive(Default)]
pub struct CrawlOptions {
    pub plugins: Option<PluginManager>,
    pub transport: Option<Arc<dyn Transport>>,
    pub post_scan_hooks: Vec<Arc<dyn PostScanHook>>,
    pub events: Option<EventBus>,
    pub storage: Option<Box<dyn Storage>>,
}

pub fn build_storage(config: &CrawlConfig) -> Result<Box<dyn Storage>> {
    match config.storage {
        StorageKind::Memory => Ok(Box::new(MemoryStorage::new())),
        StorageKind::Json => {
            let path = config
                .storage_config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("json storage requires storage_config.path"))?;
            Ok(Box::new(JsonStorage::new(path)))
        }
        StorageKind::Sqlite => {
            let path = config
                .storage_config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("sqlite storage requires storage_config.path"))?;
            Ok(Box::new(SqliteStorage::open(path)?))
        }
        StorageKind::Postgresql | StorageKind::Mongodb => Err(anyhow::anyhow!(
            "{:?} is an external backend; inject a Storage implementation",
            config.storage
        )),
    }
}

pub fn build_transport(
    config: &CrawlConfig,
    plugins: Arc<PluginManager>,
) -> Result<Arc<dyn Transport>> {
    match config.driver {
        DriverKind::Http | DriverKind::Async => Ok(Arc::new(HttpTransport::new(
            config.driver_config.http_config(config.allow_internal),
            plugins,
        )?)),
        DriverKind::Playwright | DriverKind::Stealth => Err(anyhow::anyhow!(
            "{:?} requires an injected browser transport",
            config.driver
        )),
    }
}

fn build_domain_filter(config: &CrawlConfig, seed: &Url) -> DomainFilter {
    let allowed = if !config.allowed_domains.is_empty() {
        config.allowed_domains.clone()
    } else if config.same_domain {
        vec!["domain+subdomains".to_string()]
    } else {
        vec!["*".to_string()]
    };

    DomainFilter::new(seed, allowed, config.blocked_domains.clone())
}

/// Run a crawl with everything built from the config.
pub async fn crawl(config: &CrawlConfig) -> Result<CrawlResult> {
    crawl_with(config, CrawlOptions::default()).await
}

pub async fn crawl_with(config: &CrawlConfig, options: CrawlOptions) -> Result<CrawlResult> {
    let seed = Url::parse(&config.url)
        .map_err(|_| Error::InvalidUrl(urls::redact(&config.url)))?;

    let plugins = Arc::new(options.plugins.unwrap_or_default());

    let deps = Arc::new(NodeDeps::new(
        Some(Arc::clone(&plugins)),
        dom::default_adapter(),
        Arc::new(Sha256ContentHash),
    ));

    let transport = match options.transport {
        Some(transport) => transport,
        None => build_transport(config, Arc::clone(&plugins))?,
    };

    let url_rules = Arc::new(UrlRules::new(
        config
            .url_rules
            .iter()
            .map(|rule| rule.build())
            .collect::<Result<Vec<_>>>()?,
    ));

    let edge_rules = config
        .edge_rules
        .iter()
        .map(|rule| rule.build())
        .collect::<Result<Vec<_>>>()?;

    let link_processor = LinkProcessor::new(
        build_domain_filter(config, &seed),
        PathFilter::new(&config.included_paths, &config.excluded_paths)?,
        Arc::clone(&url_rules),
        edge_rules,
        config.edge_strategy,
        Arc::clone(&deps),
    )
    .with_batch_size(config.link_batch_size)
    .with_allow_internal(config.allow_internal);

    let mut scheduler = Scheduler::new(url_rules);
    if config.max_pages.is_none() {
        scheduler = scheduler.with_bloom(BLOOM_ESTIMATED_URLS, BLOOM_FP_RATE);
    }

    let coordinator_config = CoordinatorConfig {
        max_depth: config.max_depth,
        max_pages: config.max_pages,
        timeout: config.timeout_secs.map(std::time::Duration::from_secs),
        request_delay: std::time::Duration::from_millis(config.request_delay_ms),
        fetch_batch_size: config.fetch_batch_size,
        adaptive_throttle: config.adaptive_throttle,
    };

    let mut storage = match options.storage {
        Some(storage) => Some(storage),
        None if config.incremental || config.storage != StorageKind::Memory => {
            Some(build_storage(config)?)
        }
        None => None,
    };

    let mut coordinator = CrawlCoordinator::new(
        coordinator_config,
        NodeScanner::new(transport),
        link_processor,
        scheduler,
        deps,
    )
    .with_post_scan_hooks(options.post_scan_hooks);

    if let Some(events) = options.events {
        coordinator = coordinator.with_events(events);
    }

    if config.incremental {
        if let Some(storage) = storage.as_mut() {
            if let Some(previous) = storage.load_graph()? {
                coordinator = coordinator.with_incremental(ContentHashIndex::from_dto(&previous));
            }
        }
    }

    let result = coordinator.crawl(seed).await?;

    if let Some(storage) = storage.as_mut() {
        storage.save_graph(&GraphDto::from_graph(&result.graph))?;
        storage.close()?;
    }

    Ok(result)
}

/// Traverse robots.txt and sitemaps instead of following hyperlinks.
pub async fn crawl_sitemap(
    config: &CrawlConfig,
    include_urls: bool,
    max_urls: Option<usize>,
) -> Result<(Graph, SitemapStats)> {
    let base = Url::parse(&config.url)
        .map_err(|_| Error::InvalidUrl(urls::redact(&config.url)))?;
    urls::validate_security(&base, config.allow_internal).map_err(anyhow::Error::from)?;

    let plugins = Arc::new(PluginManager::new());
    let transport = build_transport(config, plugins)?;

    let mut spider = SitemapSpider::new(transport)
        .with_include_urls(include_urls)
        .with_max_urls(max_urls);

    let graph = spider.crawl(&base).await?;
    Ok((graph, spider.stats()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn options_with(transport: MemoryTransport) -> CrawlOptions {
        CrawlOptions {
            transport: Some(Arc::new(transport)),
            ..CrawlOptions::default()
        }
    }

    #[tokio::test]
    async fn config_driven_crawl_end_to_end() {
        let mut transport = MemoryTransport::new();
        transport.insert(
            "https://example.com/",
            r#"<html><body><a href="/a">a</a></body></html>"#,
        );
        transport.insert("https://example.com/a", "<html><body>leaf</body></html>");

        let mut config = CrawlConfig::new("https://example.com/");
        config.request_delay_ms = 0;

        let result = crawl_with(&config, options_with(transport)).await.unwrap();

        assert_eq!(result.stats.total_nodes, 2);
        assert_eq!(result.stats.scanned_nodes, 2);
        assert_eq!(result.stats.total_edges, 1);
    }

    #[tokio::test]
    async fn invalid_seed_is_a_config_error() {
        let config = CrawlConfig::new("not a url");
        let result = crawl(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn browser_drivers_require_injection() {
        let mut config = CrawlConfig::new("https://example.com/");
        config.driver = DriverKind::Playwright;

        assert!(crawl(&config).await.is_err());
    }

    #[tokio::test]
    async fn incremental_round_trips_through_storage() {
        let page = r#"<html><body><a href="/a">a</a></body></html>"#;

        let mut config = CrawlConfig::new("https://example.com/");
        config.request_delay_ms = 0;
        config.storage = StorageKind::Json;
        config.storage_config.path = Some(crate::gen_temp_path().with_extension("json"));
        config.incremental = true;

        let mut transport = MemoryTransport::new();
        transport.insert("https://example.com/", page);
        transport.insert("https://example.com/a", "<html><body>leaf</body></html>");
        let first = crawl_with(&config, options_with(transport)).await.unwrap();
        assert_eq!(first.stats.total_nodes, 2);

        // same content again: links of unchanged pages are not reprocessed
        let mut transport = MemoryTransport::new();
        transport.insert("https://example.com/", page);
        let second = crawl_with(&config, options_with(transport)).await.unwrap();
        assert_eq!(second.stats.total_nodes, 1);

        std::fs::remove_file(config.storage_config.path.unwrap()).ok();
    }
}
