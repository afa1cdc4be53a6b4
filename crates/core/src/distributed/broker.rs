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

//! The broker contract: two named task queues plus a result backend keyed
//! by task id. [`InProcessBroker`] backs single-process runs and tests;
//! [`QueueServer`] exposes the same state over the framed RPC so workers in
//! other processes reach it through [`TcpBroker`]. External brokers
//! (redis, rabbitmq) plug in behind the same trait.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::retry::ExponentialBackoff;
use super::rpc::{Connection, Server};
use super::{CrawlTask, QueueKind, TaskResult};
use crate::Result;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit_task(&self, queue: QueueKind, task: CrawlTask) -> Result<()>;
    async fn fetch_task(&self, queue: QueueKind) -> Result<Option<CrawlTask>>;
    async fn put_result(&self, result: TaskResult) -> Result<()>;
    async fn take_result(&self, task_id: Uuid) -> Result<Option<TaskResult>>;
}

#[derive(Default)]
struct BrokerState {
    batch: VecDeque<CrawlTask>,
    page: VecDeque<CrawlTask>,
    results: HashMap<Uuid, TaskResult>,
}

impl BrokerState {
    fn queue_mut(&mut self, queue: QueueKind) -> &mut VecDeque<CrawlTask> {
        match queue {
            QueueKind::Batch => &mut self.batch,
            QueueKind::Page => &mut self.page,
        }
    }
}

#[derive(Default)]
pub struct InProcessBroker {
    state: Mutex<BrokerState>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_tasks(&self) -> usize {
        let state = self.state.lock().await;
        state.batch.len() + state.page.len()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn submit_task(&self, queue: QueueKind, task: CrawlTask) -> Result<()> {
        self.state.lock().await.queue_mut(queue).push_back(task);
        Ok(())
    }

    async fn fetch_task(&self, queue: QueueKind) -> Result<Option<CrawlTask>> {
        Ok(self.state.lock().await.queue_mut(queue).pop_front())
    }

    async fn put_result(&self, result: TaskResult) -> Result<()> {
        self.state
            .lock()
            .await
            .results
            .insert(result.task_id, result);
        Ok(())
    }

    async fn take_result(&self, task_id: Uuid) -> Result<Option<TaskResult>> {
        Ok(self.state.lock().await.results.remove(&task_id))
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum BrokerRequest {
    Submit {
        queue: QueueKind,
        task: Box<CrawlTask>,
    },
    Fetch {
        queue: QueueKind,
    },
    PutResult {
        result: Box<TaskResult>,
    },
    TakeResult {
        task_id: Uuid,
    },
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum BrokerResponse {
    Ack,
    Task(Option<Box<CrawlTask>>),
    TaskResult(Option<Box<TaskResult>>),
}

/// Serves an [`InProcessBroker`] over TCP, one task per connection.
pub struct QueueServer {
    broker: Arc<InProcessBroker>,
    server: Server<BrokerRequest, BrokerResponse>,
}

impl QueueServer {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            broker: Arc::new(InProcessBroker::new()),
            server: Server::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    pub fn broker(&self) -> Arc<InProcessBroker> {
        Arc::clone(&self.broker)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let mut conn = self.server.accept().await?;
            let broker = Arc::clone(&self.broker);

            tokio::spawn(async move {
                loop {
                    let request = match conn.request().await {
                        Ok(Some(request)) => request,
                        Ok(None) => break,
                        Err(err) => {
                            tracing::debug!("queue connection failed: {err}");
                            break;
                        }
                    };

                    let response = match Self::handle(&broker, request).await {
                        Ok(response) => response,
                        Err(err) => {
                            tracing::warn!("queue request failed: {err:#}");
                            break;
                        }
                    };

                    if let Err(err) = conn.respond(&response).await {
                        tracing::debug!("queue response failed: {err}");
                        break;
                    }
                }
            });
        }
    }

    async fn handle(
        broker: &InProcessBroker,
        request: BrokerRequest,
    ) -> Result<BrokerResponse> {
        Ok(match request {
            BrokerRequest::Submit { queue, task } => {
                broker.submit_task(queue, *task).await?;
                BrokerResponse::Ack
            }
            BrokerRequest::Fetch { queue } => {
                BrokerResponse::Task(broker.fetch_task(queue).await?.map(Box::new))
            }
            BrokerRequest::PutResult { result } => {
                broker.put_result(*result).await?;
                BrokerResponse::Ack
            }
            BrokerRequest::TakeResult { task_id } => {
                BrokerResponse::TaskResult(broker.take_result(task_id).await?.map(Box::new))
            }
        })
    }
}

/// Client side of [`QueueServer`]; one connection per request with retry,
/// so a restarting queue only delays work instead of failing it.
pub struct TcpBroker {
    addr: SocketAddr,
}

impl TcpBroker {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse> {
        let retry = ExponentialBackoff::from_millis(500)
            .with_limit(Duration::from_secs(10))
            .with_jitter()
            .take(5);

        let mut conn: Connection<BrokerRequest, BrokerResponse> =
            Connection::connect_with_retry(self.addr, Duration::from_secs(30), retry).await?;

        Ok(conn.send(&request).await?)
    }
}

#[async_trait]
impl Broker for TcpBroker {
    async fn submit_task(&self, queue: QueueKind, task: CrawlTask) -> Result<()> {
        self.call(BrokerRequest::Submit {
            queue,
            task: Box::new(task),
        })
        .await?;
        Ok(())
    }

    async fn fetch_task(&self, queue: QueueKind) -> Result<Option<CrawlTask>> {
        match self.call(BrokerRequest::Fetch { queue }).await? {
            BrokerResponse::Task(task) => Ok(task.map(|task| *task)),
            _ => Ok(None),
        }
    }

    async fn put_result(&self, result: TaskResult) -> Result<()> {
        self.call(BrokerRequest::PutResult {
            result: Box::new(result),
        })
        .await?;
        Ok(())
    }

    async fn take_result(&self, task_id: Uuid) -> Result<Option<TaskResult>> {
        match self.call(BrokerRequest::TakeResult { task_id }).await? {
            BrokerResponse::TaskResult(result) => Ok(result.map(|result| *result)),
            _ => Ok(None),
        }
    }
}
