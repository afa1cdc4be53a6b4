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

//! A worker is a mini-coordinator: it pulls a task off the broker, fetches
//! every URL in it through its own pipeline and returns a partial graph
//! plus the discovered child URLs. Every error except shutdown becomes a
//! serializable failure record in the result.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashSet;
use url::Url;

use super::{check_version, Broker, CrawlTask, QueueKind, TaskFailure, TaskResult};
use crate::coordinator::NodeScanner;
use crate::graph::dto::GraphDto;
use crate::graph::{Edge, Graph};
use crate::node::{Node, NodeDeps};
use crate::transport::Transport;
use crate::urls;
use crate::Result;

const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct CrawlWorker {
    broker: Arc<dyn Broker>,
    scanner: NodeScanner,
    deps: Arc<NodeDeps>,
}

impl CrawlWorker {
    pub fn new(broker: Arc<dyn Broker>, transport: Arc<dyn Transport>) -> Self {
        Self {
            broker,
            scanner: NodeScanner::new(transport),
            deps: NodeDeps::standard(),
        }
    }

    pub fn with_deps(mut self, deps: Arc<NodeDeps>) -> Self {
        self.deps = deps;
        self
    }

    /// Poll both queues until shutdown. Batch tasks take precedence.
    pub async fn run(&self) {
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_POLL).await,
                Err(err) => {
                    tracing::warn!("worker step failed: {err:#}");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
    }

    /// Process at most one task. Returns false when both queues were empty.
    pub async fn step(&self) -> Result<bool> {
        let task = match self.broker.fetch_task(QueueKind::Batch).await? {
            Some(task) => Some(task),
            None => self.broker.fetch_task(QueueKind::Page).await?,
        };

        let Some(task) = task else {
            return Ok(false);
        };

        let result = self.process_task(task).await;
        self.broker.put_result(result).await?;

        Ok(true)
    }

    /// Run one task end to end. Duplicate URLs within the task collapse
    /// (idempotency key is the normalized URL).
    pub async fn process_task(&self, task: CrawlTask) -> TaskResult {
        let task_id = task.task_id;

        if let Err(err) = check_version(task.version) {
            let failures = task
                .urls
                .iter()
                .map(|url| TaskFailure {
                    url: urls::redact(url),
                    reason: err.to_string(),
                    retry_count: 0,
                })
                .collect();

            return TaskResult {
                version: super::PROTOCOL_VERSION,
                task_id,
                graph: GraphDto::default(),
                discovered_urls: Vec::new(),
                failures,
            };
        }

        let mut graph = Graph::new();
        let mut discovered: Vec<String> = Vec::new();
        let mut discovered_seen: HashSet<String> = HashSet::new();
        let mut failures: Vec<TaskFailure> = Vec::new();

        let mut task_seen: HashSet<String> = HashSet::new();
        let request_delay = Duration::from_millis(task.config.request_delay_ms);

        for raw in &task.urls {
            let Some(normalized) = urls::normalize(raw) else {
                failures.push(TaskFailure {
                    url: urls::redact(raw),
                    reason: "invalid url".to_string(),
                    retry_count: 0,
                });
                continue;
            };

            if !task_seen.insert(normalized.clone()) {
                continue;
            }

            let url = match Url::parse(&normalized) {
                Ok(url) => url,
                Err(err) => {
                    failures.push(TaskFailure {
                        url: urls::redact(&normalized),
                        reason: err.to_string(),
                        retry_count: 0,
                    });
                    continue;
                }
            };

            if let Err(err) = urls::validate_security(&url, task.config.allow_internal) {
                failures.push(TaskFailure {
                    url: urls::redact(&normalized),
                    reason: err.to_string(),
                    retry_count: 0,
                });
                continue;
            }

            let mut node = Node::new(url.clone(), task.depth, Some(self.deps.clone()));
            let (links, response) = self.scanner.scan_node(&mut node).await;

            if let Some(error) = &response.error {
                failures.push(TaskFailure {
                    url: urls::redact(&normalized),
                    reason: error.clone(),
                    retry_count: 0,
                });
            }

            let parent_id = graph.add_node(node, false);

            for link in links {
                let Some(mut child_url) = urls::make_absolute(&url, &link) else {
                    continue;
                };
                urls::normalize_in_place(&mut child_url);

                if !matches!(child_url.scheme(), "http" | "https")
                    || child_url.host_str().is_none()
                    || urls::validate_security(&child_url, task.config.allow_internal).is_err()
                {
                    continue;
                }

                let child_str = child_url.to_string();

                let child_id = match graph.node_id_for_url(&child_str) {
                    Some(existing) => existing,
                    None => {
                        let mut child =
                            Node::new(child_url, task.depth + 1, Some(self.deps.clone()));
                        child.should_scan = false;
                        graph.add_node(child, false)
                    }
                };

                graph.add_edge(Edge::new(parent_id, child_id));

                if discovered_seen.insert(child_str.clone()) {
                    discovered.push(child_str);
                }
            }

            if !request_delay.is_zero() {
                tokio::time::sleep(request_delay).await;
            }
        }

        TaskResult {
            version: super::PROTOCOL_VERSION,
            task_id,
            graph: GraphDto::from_graph(&graph),
            discovered_urls: discovered,
            failures,
        }
    }
}
