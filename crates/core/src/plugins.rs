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

//! Plugin registry and dispatch.
//!
//! Two plugin universes share one manager: node plugins hook into the page
//! lifecycle (creation through post-scan), driver plugins hook into the
//! per-request transport lifecycle. Plugins of a stage run in registration
//! order and a failing plugin never terminates the crawl: the manager logs
//! the failure, restores the context and moves on to the next plugin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::dom::HtmlTree;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStage {
    /// Synchronous, fired at node construction. HTML is never available.
    NodeCreated,
    BeforeScan,
    HtmlParsed,
    AfterScan,
}

/// Per-request transport lifecycle, in order. One of the terminal pair fires
/// exactly once per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStage {
    SessionReused,
    SessionCreating,
    SessionCreated,
    PreparingRequest,
    SendingRequest,
    ResponseReceived,
    ProcessingResponse,
    RequestCompleted,
    RequestFailed,
}

/// Context threaded through node plugins of one stage. Plugins mutate it in
/// place; the node copies the relevant fields back after the stage ran.
#[derive(Clone, Debug)]
pub struct NodeContext {
    pub url: Url,
    pub depth: u32,
    pub should_scan: bool,
    pub can_create_edges: bool,
    pub html: Option<Arc<str>>,
    pub tree: Option<Arc<HtmlTree>>,
    pub metadata: serde_json::Map<String, Value>,
    pub user_data: serde_json::Map<String, Value>,
    pub extracted_links: Vec<String>,
}

impl NodeContext {
    pub fn new(url: Url, depth: u32) -> Self {
        Self {
            url,
            depth,
            should_scan: true,
            can_create_edges: true,
            html: None,
            tree: None,
            metadata: serde_json::Map::new(),
            user_data: serde_json::Map::new(),
            extracted_links: Vec::new(),
        }
    }
}

/// Context threaded through driver plugins across the request lifecycle.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub status: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub html: Option<String>,
    pub error: Option<String>,
    /// Free-form scratch shared between plugins of one request.
    pub data: serde_json::Map<String, Value>,
    /// Set to short-circuit the request with a `Cancelled: <reason>` error.
    pub cancelled: Option<String>,
    pub should_retry: bool,
    pub retry_delay: Option<Duration>,
}

impl RequestContext {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            timeout: None,
            status: None,
            response_headers: HashMap::new(),
            html: None,
            error: None,
            data: serde_json::Map::new(),
            cancelled: None,
            should_retry: false,
            retry_delay: None,
        }
    }
}

#[async_trait]
pub trait NodePlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn stages(&self) -> &'static [NodeStage];

    /// Synchronous hook for [`NodeStage::NodeCreated`].
    fn on_node_created(&self, _ctx: &mut NodeContext) -> Result<()> {
        Ok(())
    }

    async fn on_stage(&self, stage: NodeStage, ctx: &mut NodeContext) -> Result<()>;

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DriverPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn stages(&self) -> &'static [DriverStage];

    async fn on_stage(&self, stage: DriverStage, ctx: &mut RequestContext) -> Result<()>;

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// Ordered plugin registry shared by one crawl. Nodes and transports hold a
/// reference; the registry owns nothing beyond the plugins themselves.
#[derive(Default)]
pub struct PluginManager {
    node_plugins: Vec<Arc<dyn NodePlugin>>,
    driver_plugins: Vec<Arc<dyn DriverPlugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&mut self, plugin: Arc<dyn NodePlugin>) {
        self.node_plugins.push(plugin);
    }

    pub fn register_driver(&mut self, plugin: Arc<dyn DriverPlugin>) {
        self.driver_plugins.push(plugin);
    }

    pub fn has_node_plugins(&self) -> bool {
        !self.node_plugins.is_empty()
    }

    /// Run the synchronous creation hooks in registration order.
    pub fn run_node_created(&self, ctx: &mut NodeContext) {
        for plugin in &self.node_plugins {
            if !plugin.stages().contains(&NodeStage::NodeCreated) {
                continue;
            }

            let snapshot = ctx.clone();
            if let Err(err) = plugin.on_node_created(ctx) {
                tracing::warn!(
                    plugin = plugin.name(),
                    "node plugin failed at node_created: {err:#}"
                );
                *ctx = snapshot;
            }
        }
    }

    /// Run all node plugins registered for `stage`, threading the context
    /// through each in registration order. A failing plugin is skipped and
    /// the context it saw is handed unchanged to the next one.
    pub async fn run_node_stage(&self, stage: NodeStage, ctx: &mut NodeContext) {
        debug_assert_ne!(stage, NodeStage::NodeCreated);

        for plugin in &self.node_plugins {
            if !plugin.stages().contains(&stage) {
                continue;
            }

            let snapshot = ctx.clone();
            if let Err(err) = plugin.on_stage(stage, ctx).await {
                tracing::warn!(
                    plugin = plugin.name(),
                    ?stage,
                    "node plugin failed: {err:#}"
                );
                *ctx = snapshot;
            }
        }
    }

    pub async fn run_driver_stage(&self, stage: DriverStage, ctx: &mut RequestContext) {
        for plugin in &self.driver_plugins {
            if !plugin.stages().contains(&stage) {
                continue;
            }

            let snapshot = ctx.clone();
            if let Err(err) = plugin.on_stage(stage, ctx).await {
                tracing::warn!(
                    plugin = plugin.name(),
                    ?stage,
                    "driver plugin failed: {err:#}"
                );
                *ctx = snapshot;
            }
        }
    }

    /// Release every plugin. Failures are logged; teardown always visits all
    /// plugins.
    pub async fn teardown(&self) {
        for plugin in &self.node_plugins {
            if let Err(err) = plugin.teardown().await {
                tracing::warn!(plugin = plugin.name(), "teardown failed: {err:#}");
            }
        }

        for plugin in &self.driver_plugins {
            if let Err(err) = plugin.teardown().await {
                tracing::warn!(plugin = plugin.name(), "teardown failed: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct TagPlugin {
        name: &'static str,
        value: &'static str,
    }

    #[async_trait]
    impl NodePlugin for TagPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        fn stages(&self) -> &'static [NodeStage] {
            &[NodeStage::AfterScan]
        }

        async fn on_stage(&self, _stage: NodeStage, ctx: &mut NodeContext) -> Result<()> {
            ctx.user_data
                .insert("tag".to_string(), Value::String(self.value.to_string()));
            Ok(())
        }
    }

    struct FailingPlugin;

    #[async_trait]
    impl NodePlugin for FailingPlugin {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn stages(&self) -> &'static [NodeStage] {
            &[NodeStage::AfterScan]
        }

        async fn on_stage(&self, _stage: NodeStage, ctx: &mut NodeContext) -> Result<()> {
            ctx.user_data
                .insert("partial".to_string(), Value::Bool(true));
            Err(anyhow!("boom"))
        }
    }

    fn ctx() -> NodeContext {
        NodeContext::new(Url::parse("https://example.com/").unwrap(), 0)
    }

    #[tokio::test]
    async fn registration_order_last_write_wins() {
        let mut manager = PluginManager::new();
        manager.register_node(Arc::new(TagPlugin {
            name: "first",
            value: "a",
        }));
        manager.register_node(Arc::new(TagPlugin {
            name: "second",
            value: "b",
        }));

        let mut ctx = ctx();
        manager.run_node_stage(NodeStage::AfterScan, &mut ctx).await;

        assert_eq!(ctx.user_data["tag"], Value::String("b".to_string()));
    }

    #[tokio::test]
    async fn failing_plugin_is_skipped_and_context_restored() {
        let mut manager = PluginManager::new();
        manager.register_node(Arc::new(FailingPlugin));
        manager.register_node(Arc::new(TagPlugin {
            name: "after",
            value: "ok",
        }));

        let mut ctx = ctx();
        manager.run_node_stage(NodeStage::AfterScan, &mut ctx).await;

        // the failing plugin's partial write was rolled back, the next
        // plugin still ran
        assert!(!ctx.user_data.contains_key("partial"));
        assert_eq!(ctx.user_data["tag"], Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn driver_stage_dispatch() {
        struct HeaderPlugin;

        #[async_trait]
        impl DriverPlugin for HeaderPlugin {
            fn name(&self) -> &'static str {
                "header"
            }

            fn stages(&self) -> &'static [DriverStage] {
                &[DriverStage::PreparingRequest]
            }

            async fn on_stage(
                &self,
                _stage: DriverStage,
                ctx: &mut RequestContext,
            ) -> Result<()> {
                ctx.headers
                    .insert("x-test".to_string(), "1".to_string());
                Ok(())
            }
        }

        let mut manager = PluginManager::new();
        manager.register_driver(Arc::new(HeaderPlugin));

        let mut ctx = RequestContext::new(Url::parse("https://example.com/").unwrap());
        manager
            .run_driver_stage(DriverStage::SendingRequest, &mut ctx)
            .await;
        assert!(ctx.headers.is_empty());

        manager
            .run_driver_stage(DriverStage::PreparingRequest, &mut ctx)
            .await;
        assert_eq!(ctx.headers["x-test"], "1");
    }
}
