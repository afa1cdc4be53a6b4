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

//! Distributed crawl mode.
//!
//! The dispatcher keeps the central scheduler and graph, farms batches of
//! URLs out over the broker and folds partial graphs back in. Workers are
//! independent processes; they coordinate only through the broker's two
//! queues and its result backend.

pub mod broker;
pub mod dispatcher;
pub mod retry;
pub mod rpc;
pub mod worker;

use uuid::Uuid;

use crate::graph::dto::GraphDto;
use crate::Error;

pub use broker::{Broker, InProcessBroker, QueueServer, TcpBroker};
pub use dispatcher::{DispatcherConfig, DistributedCoordinator};
pub use worker::CrawlWorker;

/// Dispatcher and worker must agree on this; mismatching payloads are
/// rejected rather than half-interpreted.
pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_TASK_BATCH_SIZE: usize = 12;
pub const DEFAULT_WORKER_PREFETCH_MULTIPLIER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Multi-URL `crawl_batch` tasks.
    Batch,
    /// Single-URL `crawl_page` tasks.
    Page,
}

/// The slice of crawl configuration a worker needs to process one task.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
    pub max_depth: u32,
    pub allow_internal: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::transport::http::DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            request_delay_ms: 0,
            max_depth: 3,
            allow_internal: false,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CrawlTask {
    pub version: u32,
    pub task_id: Uuid,
    pub urls: Vec<String>,
    pub depth: u32,
    pub config: TaskConfig,
}

impl CrawlTask {
    pub fn new(urls: Vec<String>, depth: u32, config: TaskConfig) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            task_id: Uuid::new_v4(),
            urls,
            depth,
            config,
        }
    }

    pub fn queue(&self) -> QueueKind {
        if self.urls.len() > 1 {
            QueueKind::Batch
        } else {
            QueueKind::Page
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskFailure {
    pub url: String,
    pub reason: String,
    pub retry_count: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskResult {
    pub version: u32,
    pub task_id: Uuid,
    pub graph: GraphDto,
    pub discovered_urls: Vec<String>,
    pub failures: Vec<TaskFailure>,
}

pub fn check_version(theirs: u32) -> Result<(), Error> {
    if theirs != PROTOCOL_VERSION {
        return Err(Error::ProtocolVersion {
            ours: PROTOCOL_VERSION,
            theirs,
        });
    }

    Ok(())
}
