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

pub struct Crawl;

impl Crawl {
    pub fn max_depth() -> u32 {
        3
    }

    pub fn max_pages() -> Option<usize> {
        Some(100)
    }

    pub fn same_domain() -> bool {
        true
    }

    pub fn request_delay_ms() -> u64 {
        500
    }

    pub fn link_batch_size() -> usize {
        crate::link_processor::DEFAULT_LINK_BATCH_SIZE
    }

    pub fn fetch_batch_size() -> usize {
        1
    }
}

pub struct Driver;

impl Driver {
    pub fn user_agent() -> String {
        crate::transport::http::DEFAULT_USER_AGENT.to_string()
    }

    pub fn timeout_secs() -> u64 {
        30
    }

    pub fn max_redirects() -> usize {
        10
    }

    pub fn max_retries() -> u32 {
        2
    }

    pub fn max_concurrent_requests() -> usize {
        crate::transport::DEFAULT_MAX_CONCURRENT_REQUESTS
    }
}

pub struct Rule;

impl Rule {
    pub fn priority() -> u8 {
        crate::node::DEFAULT_PRIORITY
    }
}

pub struct Broker;

impl Broker {
    pub fn host() -> String {
        "localhost".to_string()
    }

    pub fn port() -> u16 {
        7799
    }
}

pub struct Distributed;

impl Distributed {
    pub fn workers() -> usize {
        4
    }

    pub fn worker_prefetch_multiplier() -> usize {
        crate::distributed::DEFAULT_WORKER_PREFETCH_MULTIPLIER
    }

    pub fn batch_size() -> usize {
        crate::distributed::DEFAULT_TASK_BATCH_SIZE
    }
}
