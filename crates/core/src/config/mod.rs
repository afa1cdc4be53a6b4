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

pub mod defaults;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::distributed::TaskConfig;
use crate::filters::{EdgeAction, EdgeRule, UrlRule};
use crate::link_processor::EdgeStrategy;
use crate::transport::http::HttpTransportConfig;
use crate::Result;

pub fn load<T: DeserializeOwned>(path: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Http,
    /// Alias kept for configs written against the two-driver split; both
    /// resolve to the pooled async HTTP transport.
    Async,
    /// Requires an injected browser transport.
    Playwright,
    /// Requires an injected browser transport.
    Stealth,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DriverConfig {
    #[serde(default = "defaults::Driver::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::Driver::timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::Driver::max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "defaults::Driver::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::Driver::max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Shadows the crawl-level `request_delay_ms` when set.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::Driver::user_agent(),
            timeout_secs: defaults::Driver::timeout_secs(),
            max_redirects: defaults::Driver::max_redirects(),
            max_retries: defaults::Driver::max_retries(),
            max_concurrent_requests: defaults::Driver::max_concurrent_requests(),
            request_delay_ms: None,
        }
    }
}

impl DriverConfig {
    pub fn http_config(&self, allow_internal: bool) -> HttpTransportConfig {
        HttpTransportConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            max_retries: self.max_retries,
            max_concurrent_requests: self.max_concurrent_requests,
            request_delay: self.request_delay_ms.map(Duration::from_millis),
            allow_internal,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    Json,
    Sqlite,
    /// External backend; inject a `Storage` implementation.
    Postgresql,
    /// External backend; inject a `Storage` implementation.
    Mongodb,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct UrlRuleConfig {
    pub pattern: String,

    #[serde(default = "defaults::Rule::priority")]
    pub priority: u8,

    #[serde(default)]
    pub should_scan: Option<bool>,

    #[serde(default)]
    pub should_follow_links: Option<bool>,

    #[serde(default)]
    pub create_edge: Option<bool>,
}

impl UrlRuleConfig {
    pub fn build(&self) -> Result<UrlRule> {
        let mut rule = UrlRule::new(&self.pattern)?.with_priority(self.priority);

        if let Some(should_scan) = self.should_scan {
            rule = rule.with_should_scan(should_scan);
        }
        if let Some(follow) = self.should_follow_links {
            rule = rule.with_should_follow_links(follow);
        }
        if let Some(create) = self.create_edge {
            rule = rule.with_create_edge(create);
        }

        Ok(rule)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EdgeRuleConfig {
    pub source_pattern: String,
    pub target_pattern: String,

    #[serde(default)]
    pub max_depth_diff: Option<u32>,

    pub action: EdgeAction,
}

impl EdgeRuleConfig {
    pub fn build(&self) -> Result<EdgeRule> {
        EdgeRule::new(
            &self.source_pattern,
            &self.target_pattern,
            self.max_depth_diff,
            self.action,
        )
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CrawlConfig {
    pub url: String,

    #[serde(default = "defaults::Crawl::max_depth")]
    pub max_depth: u32,

    #[serde(default = "defaults::Crawl::max_pages")]
    pub max_pages: Option<usize>,

    #[serde(default = "defaults::Crawl::same_domain")]
    pub same_domain: bool,

    #[serde(default)]
    pub allowed_domains: Vec<String>,

    #[serde(default)]
    pub blocked_domains: Vec<String>,

    #[serde(default)]
    pub included_paths: Vec<String>,

    #[serde(default)]
    pub excluded_paths: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "defaults::Crawl::request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default)]
    pub driver: DriverKind,

    #[serde(default)]
    pub driver_config: DriverConfig,

    #[serde(default)]
    pub storage: StorageKind,

    #[serde(default)]
    pub storage_config: StorageConfig,

    #[serde(default)]
    pub url_rules: Vec<UrlRuleConfig>,

    #[serde(default)]
    pub edge_rules: Vec<EdgeRuleConfig>,

    #[serde(default)]
    pub edge_strategy: EdgeStrategy,

    #[serde(default = "defaults::Crawl::link_batch_size")]
    pub link_batch_size: usize,

    #[serde(default = "defaults::Crawl::fetch_batch_size")]
    pub fetch_batch_size: usize,

    #[serde(default)]
    pub adaptive_throttle: bool,

    #[serde(default)]
    pub incremental: bool,

    #[serde(default)]
    pub allow_internal: bool,
}

impl CrawlConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: defaults::Crawl::max_depth(),
            max_pages: defaults::Crawl::max_pages(),
            same_domain: defaults::Crawl::same_domain(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            included_paths: Vec::new(),
            excluded_paths: Vec::new(),
            timeout_secs: None,
            request_delay_ms: defaults::Crawl::request_delay_ms(),
            driver: DriverKind::default(),
            driver_config: DriverConfig::default(),
            storage: StorageKind::default(),
            storage_config: StorageConfig::default(),
            url_rules: Vec::new(),
            edge_rules: Vec::new(),
            edge_strategy: EdgeStrategy::default(),
            link_batch_size: defaults::Crawl::link_batch_size(),
            fetch_batch_size: defaults::Crawl::fetch_batch_size(),
            adaptive_throttle: false,
            incremental: false,
            allow_internal: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// The in-repo queue service over framed TCP.
    #[default]
    Queue,
    /// External; plug in behind the `Broker` trait.
    Redis,
    /// External; plug in behind the `Broker` trait.
    Rabbitmq,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,

    #[serde(default = "defaults::Broker::host")]
    pub host: String,

    #[serde(default = "defaults::Broker::port")]
    pub port: u16,

    #[serde(default)]
    pub db: u32,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            host: defaults::Broker::host(),
            port: defaults::Broker::port(),
            db: 0,
            password: None,
        }
    }
}

impl BrokerConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        let mut addrs = (self.host.as_str(), self.port).to_socket_addrs()?;
        addrs
            .next()
            .ok_or_else(|| anyhow::anyhow!("broker host does not resolve: {}", self.host))
    }
}

/// Result database for distributed crawls. Memory, JSON and SQLite are
/// served in-repo; the connection fields carry through to external
/// backends plugged in behind the `Storage` trait.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub kind: StorageKind,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DistributedConfig {
    /// Seed URL; required by the dispatcher, unused by workers.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default = "defaults::Distributed::workers")]
    pub workers: usize,

    #[serde(default)]
    pub task_time_limit_secs: Option<u64>,

    #[serde(default = "defaults::Distributed::worker_prefetch_multiplier")]
    pub worker_prefetch_multiplier: usize,

    #[serde(default = "defaults::Distributed::batch_size")]
    pub batch_size: usize,

    #[serde(default = "defaults::Crawl::max_depth")]
    pub max_depth: u32,

    #[serde(default = "defaults::Crawl::max_pages")]
    pub max_pages: Option<usize>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub driver_config: DriverConfig,

    #[serde(default)]
    pub allow_internal: bool,
}

impl DistributedConfig {
    pub fn task_config(&self) -> TaskConfig {
        TaskConfig {
            user_agent: self.driver_config.user_agent.clone(),
            timeout_secs: self.driver_config.timeout_secs,
            request_delay_ms: self.driver_config.request_delay_ms.unwrap_or(0),
            max_depth: self.max_depth,
            allow_internal: self.allow_internal,
        }
    }

    pub fn dispatcher_config(&self) -> crate::distributed::DispatcherConfig {
        crate::distributed::DispatcherConfig {
            batch_size: self.batch_size.max(1),
            worker_prefetch_multiplier: self.worker_prefetch_multiplier.max(1),
            workers: self.workers.max(1),
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            timeout: self.timeout_secs.map(Duration::from_secs),
            task_time_limit: self.task_time_limit_secs.map(Duration::from_secs),
            poll_interval: Duration::from_millis(100),
            task_config: self.task_config(),
        }
    }
}
