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

//! The dispatcher: the distributed counterpart of the crawl coordinator.
//!
//! It keeps the master graph and the central scheduler (whose seen-set
//! deduplicates across tasks), submits same-depth batches to the broker,
//! merges partial graphs back under the merge strategy and feeds each
//! task's discovered URLs into the scheduler. A failed task counts as a
//! fetch failure for every URL in its batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use url::Url;
use uuid::Uuid;

use super::{
    check_version, Broker, CrawlTask, TaskConfig, DEFAULT_TASK_BATCH_SIZE,
    DEFAULT_WORKER_PREFETCH_MULTIPLIER,
};
use crate::coordinator::{DeadLetterQueue, FailedUrl, Termination};
use crate::filters::UrlRules;
use crate::graph::{Graph, GraphStats, MergeStrategy};
use crate::node::{Node, NodeDeps, NodeId};
use crate::scheduler::Scheduler;
use crate::urls;
use crate::Result;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub batch_size: usize,
    pub worker_prefetch_multiplier: usize,
    pub workers: usize,
    pub max_depth: u32,
    pub max_pages: Option<usize>,
    pub timeout: Option<Duration>,
    /// A task with no result after this long is written off as failed.
    pub task_time_limit: Option<Duration>,
    pub poll_interval: Duration,
    pub task_config: TaskConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_TASK_BATCH_SIZE,
            worker_prefetch_multiplier: DEFAULT_WORKER_PREFETCH_MULTIPLIER,
            workers: 1,
            max_depth: 3,
            max_pages: Some(100),
            timeout: None,
            task_time_limit: None,
            poll_interval: Duration::from_millis(100),
            task_config: TaskConfig::default(),
        }
    }
}

pub struct DistributedResult {
    pub graph: Graph,
    pub stats: GraphStats,
    pub pages_crawled: usize,
    pub termination: Termination,
    pub dead_letters: Vec<FailedUrl>,
}

pub struct DistributedCoordinator {
    broker: Arc<dyn Broker>,
    config: DispatcherConfig,
    graph: Graph,
    scheduler: Scheduler,
    dead_letter: DeadLetterQueue,
    deps: Arc<NodeDeps>,
    carry: Option<NodeId>,
}

impl DistributedCoordinator {
    pub fn new(broker: Arc<dyn Broker>, config: DispatcherConfig) -> Self {
        Self {
            broker,
            config,
            graph: Graph::new(),
            scheduler: Scheduler::new(Arc::new(UrlRules::default())),
            dead_letter: DeadLetterQueue::new(),
            deps: NodeDeps::standard(),
            carry: None,
        }
    }

    pub fn with_rules(mut self, rules: Arc<UrlRules>) -> Self {
        self.scheduler = Scheduler::new(rules);
        self
    }

    fn max_in_flight(&self) -> usize {
        (self.config.workers * self.config.worker_prefetch_multiplier / self.config.batch_size)
            .max(1)
    }

    /// Pop up to `batch_size` ready nodes of one depth bucket.
    fn next_batch(&mut self) -> (Vec<String>, u32) {
        let mut selected: Vec<String> = Vec::with_capacity(self.config.batch_size);
        let mut batch_depth = 0;

        while selected.len() < self.config.batch_size {
            let id = match self.carry.take() {
                Some(id) => id,
                None => match self.scheduler.get_next() {
                    Some(id) => id,
                    None => break,
                },
            };

            let Some(node) = self.graph.get_node(&id) else {
                continue;
            };

            if node.scanned || !node.should_scan || node.depth > self.config.max_depth {
                continue;
            }

            if selected.is_empty() {
                batch_depth = node.depth;
            } else if node.depth != batch_depth {
                self.carry = Some(id);
                break;
            }

            selected.push(node.url().to_string());
        }

        (selected, batch_depth)
    }

    fn fail_task(&mut self, task_urls: &[String], reason: &str) {
        for url in task_urls {
            self.dead_letter.add_failed_url(url, reason, 0);
        }
    }

    pub async fn crawl(mut self, seed: Url) -> Result<DistributedResult> {
        urls::validate_security(&seed, self.config.task_config.allow_internal)
            .map_err(anyhow::Error::from)?;

        let mut seed = seed;
        urls::normalize_in_place(&mut seed);

        let mut root = Node::new(seed, 0, Some(self.deps.clone()));
        self.scheduler.add_node(&mut root);
        self.graph.add_node(root, false);

        let mut in_flight: HashMap<Uuid, (Vec<String>, Instant)> = HashMap::new();
        let mut pages_crawled = 0usize;
        let started = Instant::now();

        let termination = loop {
            if self.scheduler.is_empty() && self.carry.is_none() && in_flight.is_empty() {
                break Termination::SchedulerExhausted;
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

            // keep the workers saturated
            while in_flight.len() < self.max_in_flight() {
                let (urls, depth) = self.next_batch();
                if urls.is_empty() {
                    break;
                }

                let task = CrawlTask::new(urls.clone(), depth, self.config.task_config.clone());
                let queue = task.queue();
                let task_id = task.task_id;

                if let Err(err) = self.broker.submit_task(queue, task).await {
                    self.fail_task(&urls, &format!("submit failed: {err:#}"));
                    continue;
                }

                in_flight.insert(task_id, (urls, Instant::now()));
            }

            // write off tasks that blew their time limit
            if let Some(limit) = self.config.task_time_limit {
                let expired: Vec<Uuid> = in_flight
                    .iter()
                    .filter(|(_, (_, submitted))| submitted.elapsed() > limit)
                    .map(|(task_id, _)| *task_id)
                    .collect();

                for task_id in expired {
                    if let Some((urls, _)) = in_flight.remove(&task_id) {
                        self.fail_task(&urls, "task time limit exceeded");
                    }
                }
            }

            // fold finished tasks back into the master graph
            let pending: Vec<Uuid> = in_flight.keys().copied().collect();
            let mut progressed = false;

            for task_id in pending {
                let Some(result) = self.broker.take_result(task_id).await? else {
                    continue;
                };

                let Some((task_urls, _)) = in_flight.remove(&task_id) else {
                    continue;
                };
                progressed = true;

                if check_version(result.version).is_err() {
                    self.fail_task(
                        &task_urls,
                        &format!("protocol version mismatch ({})", result.version),
                    );
                    continue;
                }

                for failure in &result.failures {
                    self.dead_letter.add_failed_url(
                        &failure.url,
                        &failure.reason,
                        failure.retry_count,
                    );
                }

                pages_crawled += result
                    .graph
                    .nodes
                    .iter()
                    .filter(|node| node.scanned)
                    .count();

                let discovered = result.discovered_urls.clone();

                let partial = result.graph.into_graph(Some(self.deps.clone()))?;
                self.graph = self.graph.union(&partial, MergeStrategy::Merge);

                for url in discovered {
                    self.admit_discovered(&url);
                }
            }

            if !progressed {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        Ok(DistributedResult {
            stats: self.graph.get_stats(),
            pages_crawled,
            termination,
            dead_letters: self.dead_letter.entries().to_vec(),
            graph: self.graph,
        })
    }

    /// Admit one URL a task discovered. The scheduler's seen-set performs
    /// the cross-task deduplication.
    fn admit_discovered(&mut self, url: &str) {
        if self.scheduler.has_url(url) {
            return;
        }

        let Some(id) = self.graph.node_id_for_url(url) else {
            return;
        };

        let Some(node) = self.graph.get_node_mut(&id) else {
            return;
        };

        if node.scanned || node.depth > self.config.max_depth {
            return;
        }

        node.should_scan = true;
        self.scheduler.add_node(node);
    }
}
