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

//! Progress events. Dispatch is serialized: sync subscribers run first, then
//! each async subscriber is awaited in turn, so subscribers may safely
//! schedule graph work back onto the coordinator task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CrawlStarted,
    NodeCreated,
    NodeScanStarted,
    NodeScanned,
    PageCrawled,
    ErrorOccurred,
    CrawlCompleted,
    SitemapCrawlStarted,
    SitemapCrawlCompleted,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, event: &Event);
}

type SyncSubscriber = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    sync_subscribers: Vec<SyncSubscriber>,
    async_subscribers: Vec<Arc<dyn Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.sync_subscribers.push(Box::new(subscriber));
    }

    pub fn subscribe_async(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.async_subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sync_subscribers.len() + self.async_subscribers.len()
    }

    pub async fn publish(&self, event: Event) {
        for subscriber in &self.sync_subscribers {
            subscriber(&event);
        }

        for subscriber in &self.async_subscribers {
            subscriber.on_event(&event).await;
        }
    }
}
