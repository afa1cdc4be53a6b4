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

//! A node is a page, or a URL known to exist. It starts at the URL stage and
//! moves to the HTML stage exactly once, when [`Node::process_html`] runs the
//! plugin pipeline over the fetched document.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::dom::{self, TreeAdapter};
use crate::plugins::{NodeContext, NodeStage, PluginManager};
use crate::{Error, Result};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycle {
    UrlStage,
    HtmlStage,
}

/// Inputs available to a content-hash strategy after the plugin pipeline ran.
pub struct HashInput<'a> {
    pub html: &'a str,
    pub text_content: Option<&'a str>,
    pub metadata: &'a serde_json::Map<String, Value>,
}

/// Content-hash strategies drive incremental re-crawl, so they must be
/// deterministic for equal inputs and produce 64 lowercase hex chars.
pub trait HashStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn digest(&self, input: &HashInput<'_>) -> String;
}

/// SHA-256 over the extracted text content, falling back to the raw HTML
/// when no text was extracted.
pub struct Sha256ContentHash;

impl HashStrategy for Sha256ContentHash {
    fn name(&self) -> &'static str {
        "sha256-text"
    }

    fn digest(&self, input: &HashInput<'_>) -> String {
        let bytes = input.text_content.unwrap_or(input.html).as_bytes();
        format!("{:x}", Sha256::digest(bytes))
    }
}

const HASH_UNVERIFIED: u8 = 0;
const HASH_OK: u8 = 1;
const HASH_BROKEN: u8 = 2;

/// Long-lived references a node uses but never owns: the plugin registry,
/// the tree adapter and the hash strategy. Dropped on serialization and
/// supplied again on load.
pub struct NodeDeps {
    pub plugin_manager: Option<Arc<PluginManager>>,
    pub tree_adapter: Arc<dyn TreeAdapter>,
    pub hash_strategy: Arc<dyn HashStrategy>,
    hash_state: AtomicU8,
}

impl NodeDeps {
    pub fn new(
        plugin_manager: Option<Arc<PluginManager>>,
        tree_adapter: Arc<dyn TreeAdapter>,
        hash_strategy: Arc<dyn HashStrategy>,
    ) -> Self {
        Self {
            plugin_manager,
            tree_adapter,
            hash_strategy,
            hash_state: AtomicU8::new(HASH_UNVERIFIED),
        }
    }

    /// Default adapter, default hash strategy, no plugins.
    pub fn standard() -> Arc<Self> {
        Arc::new(Self::new(
            None,
            dom::default_adapter(),
            Arc::new(Sha256ContentHash),
        ))
    }

    pub fn with_plugins(plugin_manager: Arc<PluginManager>) -> Arc<Self> {
        Arc::new(Self::new(
            Some(plugin_manager),
            dom::default_adapter(),
            Arc::new(Sha256ContentHash),
        ))
    }

    /// Digest with the fail-fast determinism check on first use. Catches
    /// strategies that consult the clock or a random source.
    fn checked_digest(&self, input: &HashInput<'_>) -> Result<String, Error> {
        let strategy = &self.hash_strategy;

        match self.hash_state.load(Ordering::Acquire) {
            HASH_OK => {}
            HASH_BROKEN => {
                return Err(Error::NonDeterministicHash(strategy.name().to_string()))
            }
            _ => {
                let first = strategy.digest(input);
                let second = strategy.digest(input);

                if first != second {
                    self.hash_state.store(HASH_BROKEN, Ordering::Release);
                    return Err(Error::NonDeterministicHash(strategy.name().to_string()));
                }

                self.hash_state.store(HASH_OK, Ordering::Release);
            }
        }

        let digest = strategy.digest(input);

        let well_formed =
            digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(Error::MalformedHash(digest));
        }

        Ok(digest)
    }
}

pub struct Node {
    id: NodeId,
    url: Url,
    pub depth: u32,
    pub should_scan: bool,
    pub can_create_edges: bool,
    pub scanned: bool,
    pub response_status: Option<u16>,
    pub priority: Option<u8>,
    pub created_at: DateTime<Utc>,
    stage: NodeLifecycle,
    pub metadata: serde_json::Map<String, Value>,
    pub user_data: serde_json::Map<String, Value>,
    content_hash: Option<String>,
    deps: Option<Arc<NodeDeps>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("depth", &self.depth)
            .field("scanned", &self.scanned)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node at the URL stage. If a plugin manager is attached the
    /// synchronous creation hooks run here.
    pub fn new(url: Url, depth: u32, deps: Option<Arc<NodeDeps>>) -> Self {
        let mut node = Self {
            id: NodeId::new(),
            url,
            depth,
            should_scan: true,
            can_create_edges: true,
            scanned: false,
            response_status: None,
            priority: None,
            created_at: Utc::now(),
            stage: NodeLifecycle::UrlStage,
            metadata: serde_json::Map::new(),
            user_data: serde_json::Map::new(),
            content_hash: None,
            deps,
        };

        if let Some(manager) = node.plugin_manager() {
            let mut ctx = node.make_context();
            manager.run_node_created(&mut ctx);
            node.update_from_context(ctx);
        }

        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Graph-internal: an overwriting node adopts the id it replaces so
    /// existing edges keep resolving.
    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    /// Graph-internal: take over scan results from a node that fetched the
    /// same URL (merge of a worker's partial graph into the master).
    pub(crate) fn absorb_scan(&mut self, other: &Node) {
        self.scanned = true;
        self.response_status = other.response_status;
        self.content_hash = other.content_hash.clone();
        self.stage = other.stage;
        self.depth = self.depth.min(other.depth);
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn stage(&self) -> NodeLifecycle {
        self.stage
    }

    pub fn mark_scanned(&mut self) {
        self.scanned = true;
    }

    fn plugin_manager(&self) -> Option<Arc<PluginManager>> {
        self.deps.as_ref()?.plugin_manager.clone()
    }

    /// Re-attach live references after deserialization.
    pub fn restore_dependencies(&mut self, deps: Arc<NodeDeps>) {
        self.deps = Some(deps);
    }

    /// Content hash of the page. Requires the HTML stage.
    pub fn content_hash(&self) -> Result<&str, Error> {
        match (&self.content_hash, self.stage) {
            (Some(hash), _) => Ok(hash),
            (None, actual) => Err(Error::Lifecycle {
                required: NodeLifecycle::HtmlStage,
                actual,
            }),
        }
    }

    pub fn content_hash_opt(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    fn make_context(&self) -> NodeContext {
        NodeContext {
            url: self.url.clone(),
            depth: self.depth,
            should_scan: self.should_scan,
            can_create_edges: self.can_create_edges,
            html: None,
            tree: None,
            metadata: self.metadata.clone(),
            user_data: self.user_data.clone(),
            extracted_links: Vec::new(),
        }
    }

    fn update_from_context(&mut self, ctx: NodeContext) {
        self.should_scan = ctx.should_scan;
        self.can_create_edges = ctx.can_create_edges;
        self.metadata = ctx.metadata;
        self.user_data = ctx.user_data;
    }

    /// The single URL-stage to HTML-stage mutator.
    ///
    /// Parses off-thread, extracts links and standard metadata, threads the
    /// plugin context through `before_scan` / `html_parsed` / `after_scan`,
    /// computes the content hash and drops the document again. A second call
    /// logs and returns no links.
    pub async fn process_html(&mut self, html: &str) -> Result<Vec<String>> {
        if self.stage == NodeLifecycle::HtmlStage {
            tracing::warn!(url = %self.url, "process_html called twice, ignoring");
            return Ok(Vec::new());
        }

        let deps = match &self.deps {
            Some(deps) => Arc::clone(deps),
            None => NodeDeps::standard(),
        };

        let tree = match dom::parse_offloaded(deps.tree_adapter.clone(), html.to_string()).await
        {
            Ok(tree) => Arc::new(tree),
            Err(err) => {
                tracing::warn!(url = %self.url, "html parse failed: {err:#}");
                self.stage = NodeLifecycle::HtmlStage;
                return Ok(Vec::new());
            }
        };

        let mut ctx = self.make_context();
        ctx.html = Some(Arc::from(html));
        ctx.tree = Some(Arc::clone(&tree));
        ctx.extracted_links = extract_links(&tree);

        let manager = self.plugin_manager();

        if let Some(manager) = &manager {
            manager.run_node_stage(NodeStage::BeforeScan, &mut ctx).await;
            manager.run_node_stage(NodeStage::HtmlParsed, &mut ctx).await;
        }

        extract_metadata(&tree, &mut ctx.metadata);
        if !ctx.user_data.contains_key("text_content") {
            let text = tree
                .find("body")
                .map(|body| body.text())
                .unwrap_or_default();
            ctx.user_data
                .insert("text_content".to_string(), Value::String(text));
        }

        if let Some(manager) = &manager {
            manager.run_node_stage(NodeStage::AfterScan, &mut ctx).await;
        }

        let links = std::mem::take(&mut ctx.extracted_links);

        let text_content = ctx
            .user_data
            .get("text_content")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.update_from_context(ctx);

        let input = HashInput {
            html,
            text_content: text_content.as_deref(),
            metadata: &self.metadata,
        };
        self.content_hash = Some(deps.checked_digest(&input)?);

        // tree and html go out of scope here; the node keeps only the
        // extracted data
        self.stage = NodeLifecycle::HtmlStage;

        Ok(links)
    }

    fn metadata_str(&self, key: &str) -> String {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn get_title(&self) -> String {
        self.metadata_str("title")
    }

    pub fn get_description(&self) -> String {
        self.metadata_str("description")
    }

    pub fn get_h1(&self) -> String {
        self.metadata_str("h1")
    }

    pub fn get_keywords(&self) -> Vec<String> {
        self.metadata
            .get("keywords")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_canonical_url(&self) -> String {
        self.metadata_str("canonical_url")
    }

    pub fn get_language(&self) -> String {
        self.metadata_str("language")
    }

    pub fn get_meta_value(&self, name: &str) -> Option<String> {
        self.metadata
            .get("meta")
            .and_then(Value::as_object)
            .and_then(|meta| meta.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Used by DTO mapping; regular construction goes through [`Node::new`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: NodeId,
        url: Url,
        depth: u32,
        should_scan: bool,
        can_create_edges: bool,
        scanned: bool,
        response_status: Option<u16>,
        priority: Option<u8>,
        created_at: DateTime<Utc>,
        stage: NodeLifecycle,
        metadata: serde_json::Map<String, Value>,
        user_data: serde_json::Map<String, Value>,
        content_hash: Option<String>,
    ) -> Self {
        Self {
            id,
            url,
            depth,
            should_scan,
            can_create_edges,
            scanned,
            response_status,
            priority,
            created_at,
            stage,
            metadata,
            user_data,
            content_hash,
            deps: None,
        }
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            url: self.url.clone(),
            depth: self.depth,
            should_scan: self.should_scan,
            can_create_edges: self.can_create_edges,
            scanned: self.scanned,
            response_status: self.response_status,
            priority: self.priority,
            created_at: self.created_at,
            stage: self.stage,
            metadata: self.metadata.clone(),
            user_data: self.user_data.clone(),
            content_hash: self.content_hash.clone(),
            deps: self.deps.clone(),
        }
    }
}

fn extract_links(tree: &crate::dom::HtmlTree) -> Vec<String> {
    tree.find_all("a[href]")
        .into_iter()
        .filter_map(|a| a.attribute("href"))
        .filter(|href| !href.is_empty() && !crate::urls::is_special_link(href))
        .map(str::to_string)
        .collect()
}

fn extract_metadata(
    tree: &crate::dom::HtmlTree,
    metadata: &mut serde_json::Map<String, Value>,
) {
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            let value = value.trim().to_string();
            if !value.is_empty() {
                metadata.insert(key.to_string(), Value::String(value));
            }
        }
    };

    put("title", tree.find("title").map(|el| el.text()));
    put(
        "description",
        tree.find("meta[name=description]")
            .and_then(|el| el.attribute("content").map(str::to_string)),
    );
    put("h1", tree.find("h1").map(|el| el.text()));
    put(
        "canonical_url",
        tree.find("link[rel=canonical]")
            .and_then(|el| el.attribute("href").map(str::to_string)),
    );
    put(
        "language",
        tree.find("html")
            .and_then(|el| el.attribute("lang").map(str::to_string)),
    );

    if let Some(raw) = tree
        .find("meta[name=keywords]")
        .and_then(|el| el.attribute("content"))
    {
        let keywords: Vec<Value> = raw
            .split(',')
            .map(str::trim)
            .filter(|kw| !kw.is_empty())
            .map(|kw| Value::String(kw.to_string()))
            .collect();
        if !keywords.is_empty() {
            metadata.insert("keywords".to_string(), Value::Array(keywords));
        }
    }

    let mut meta = serde_json::Map::new();
    for el in tree.find_all("meta[name]") {
        if let (Some(name), Some(content)) = (el.attribute("name"), el.attribute("content")) {
            meta.insert(name.to_string(), Value::String(content.to_string()));
        }
    }
    if !meta.is_empty() {
        metadata.insert("meta".to_string(), Value::Object(meta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html lang="en"><head>
        <title>Example</title>
        <meta name="description" content="A page">
        <meta name="keywords" content="alpha, beta">
        <link rel="canonical" href="https://example.com/">
    </head><body>
        <h1>Welcome</h1>
        <a href="/about">About</a>
        <a href="https://other.com/x">Other</a>
        <a href="mailto:x@example.com">Mail</a>
    </body></html>"#;

    fn node() -> Node {
        Node::new(Url::parse("https://example.com/").unwrap(), 0, None)
    }

    #[tokio::test]
    async fn process_html_extracts_links_and_metadata() {
        let mut node = node();
        let links = node.process_html(PAGE).await.unwrap();

        assert_eq!(links, vec!["/about", "https://other.com/x"]);
        assert_eq!(node.get_title(), "Example");
        assert_eq!(node.get_description(), "A page");
        assert_eq!(node.get_h1(), "Welcome");
        assert_eq!(node.get_keywords(), vec!["alpha", "beta"]);
        assert_eq!(node.get_canonical_url(), "https://example.com/");
        assert_eq!(node.get_language(), "en");
        assert_eq!(node.get_meta_value("description").unwrap(), "A page");
        assert_eq!(node.stage(), NodeLifecycle::HtmlStage);
    }

    #[tokio::test]
    async fn second_process_html_is_a_noop() {
        let mut node = node();
        let first = node.process_html(PAGE).await.unwrap();
        assert!(!first.is_empty());

        let second = node.process_html(PAGE).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn content_hash_is_deterministic() {
        let mut a = node();
        let mut b = node();

        a.process_html(PAGE).await.unwrap();
        b.process_html(PAGE).await.unwrap();

        let ha = a.content_hash().unwrap();
        let hb = b.content_hash().unwrap();

        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);
        assert!(ha.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn content_hash_before_html_stage_is_a_lifecycle_error() {
        let node = node();
        assert!(matches!(
            node.content_hash(),
            Err(Error::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn non_deterministic_strategy_fails_fast() {
        struct CountingHash(std::sync::atomic::AtomicU64);

        impl HashStrategy for CountingHash {
            fn name(&self) -> &'static str {
                "counting"
            }

            fn digest(&self, _input: &HashInput<'_>) -> String {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                format!("{:064x}", n)
            }
        }

        let deps = Arc::new(NodeDeps::new(
            None,
            dom::default_adapter(),
            Arc::new(CountingHash(std::sync::atomic::AtomicU64::new(0))),
        ));

        let mut node = Node::new(
            Url::parse("https://example.com/").unwrap(),
            0,
            Some(deps),
        );

        let res = node.process_html(PAGE).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn plugin_writes_survive_into_user_data() {
        use crate::plugins::{NodePlugin, PluginManager};
        use async_trait::async_trait;

        struct Tagger(&'static str);

        #[async_trait]
        impl NodePlugin for Tagger {
            fn name(&self) -> &'static str {
                "tagger"
            }

            fn stages(&self) -> &'static [NodeStage] {
                &[NodeStage::AfterScan]
            }

            async fn on_stage(
                &self,
                _stage: NodeStage,
                ctx: &mut crate::plugins::NodeContext,
            ) -> crate::Result<()> {
                ctx.user_data
                    .insert("tag".to_string(), Value::String(self.0.to_string()));
                Ok(())
            }
        }

        let mut manager = PluginManager::new();
        manager.register_node(Arc::new(Tagger("a")));
        manager.register_node(Arc::new(Tagger("b")));

        let deps = NodeDeps::with_plugins(Arc::new(manager));
        let mut node = Node::new(
            Url::parse("https://example.com/").unwrap(),
            0,
            Some(deps),
        );

        node.process_html(PAGE).await.unwrap();

        assert_eq!(node.user_data["tag"], Value::String("b".to_string()));
    }
}
