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

//! Main library for Trawler.
//!
//! Trawler explores a website by following hyperlinks and builds a directed
//! graph of pages (nodes) and links (edges). The crawl is driven by a
//! single-task coordinator over a priority scheduler, with pluggable
//! transports, node plugins and edge-creation strategies. An alternate
//! dispatcher farms batches of URLs out to broker-backed workers.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

use thiserror::Error;

pub mod api;
pub mod config;
pub mod coordinator;
pub mod distributed;
pub mod dom;
pub mod events;
pub mod filters;
pub mod graph;
pub mod link_processor;
pub mod node;
pub mod plugins;
pub mod scheduler;
pub mod sitemap;
pub mod storage;
pub mod transport;
pub mod urls;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("url blocked by security policy: {0}")]
    UnsafeUrl(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("failed to parse html")]
    ParseFailed,

    #[error("content hash strategy '{0}' is not deterministic")]
    NonDeterministicHash(String),

    #[error("content hash must be 64 lowercase hex chars: {0:?}")]
    MalformedHash(String),

    #[error("operation requires {required:?} but node is at {actual:?}")]
    Lifecycle {
        required: node::NodeLifecycle,
        actual: node::NodeLifecycle,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crawl cancelled")]
    Cancelled,

    #[error("incompatible protocol version {theirs} (expected {ours})")]
    ProtocolVersion { ours: u32, theirs: u32 },
}

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

pub fn gen_temp_path() -> std::path::PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    static SALT_COUNTER: AtomicUsize = AtomicUsize::new(0);

    let seed = SALT_COUNTER.fetch_add(1, Ordering::SeqCst) as u128;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
        << 48;

    let pid = u128::from(std::process::id());

    let salt = (pid << 16) + now + seed;

    if cfg!(target_os = "linux") {
        std::path::PathBuf::from(format!("/dev/shm/pagecache.tmp.{salt}"))
    } else {
        std::env::temp_dir().join(format!("pagecache.tmp.{salt}"))
    }
}

#[cfg(test)]
pub(crate) fn free_socket_addr() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
