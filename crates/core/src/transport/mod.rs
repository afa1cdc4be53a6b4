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

//! Pluggable fetch layer.
//!
//! A transport fetches one URL or many in parallel and reports failure
//! through the response value, never by error return. Concrete transports
//! (HTTP here, headless browsers injected from outside) share the
//! per-request lifecycle stages that driver plugins hook into.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use url::Url;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 24;

#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Option<Url>,
    pub redirect_chain: Vec<Url>,
    pub status_code: Option<u16>,
    pub headers: HashMap<String, String>,
    pub html: Option<String>,
    pub error: Option<String>,
    pub fetch_time_ms: u64,
}

impl FetchResponse {
    pub fn failure(url: Url, error: impl Into<String>) -> Self {
        Self {
            url,
            final_url: None,
            redirect_chain: Vec::new(),
            status_code: None,
            headers: HashMap::new(),
            html: None,
            error: Some(error.into()),
            fetch_time_ms: 0,
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.final_url
            .as_ref()
            .map_or(false, |final_url| final_url != &self.url)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .status_code
                .map_or(false, |status| (200..300).contains(&status))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url) -> FetchResponse;

    /// Fetch a batch; the returned list mirrors the input order regardless
    /// of completion order.
    async fn fetch_many(&self, urls: &[Url]) -> Vec<FetchResponse> {
        fetch_many_bounded(self, urls, DEFAULT_MAX_CONCURRENT_REQUESTS).await
    }

    fn supports_batch_fetching(&self) -> bool {
        true
    }

    /// Driver-level delay; shadows the crawl-level `request_delay` when set.
    fn request_delay(&self) -> Option<Duration> {
        None
    }

    async fn close(&self) {}
}

/// Fan-out-fan-in over a semaphore: up to `max_concurrent` fetches run at
/// once, results come back in input order.
pub async fn fetch_many_bounded<T: Transport + ?Sized>(
    transport: &T,
    urls: &[Url],
    max_concurrent: usize,
) -> Vec<FetchResponse> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let fetches = urls.iter().map(|url| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await;
            transport.fetch(url).await
        }
    });

    futures::future::join_all(fetches).await
}

/// Serves pages from a fixed map. Used by tests and dry runs; unknown URLs
/// fail the way an unreachable host would.
#[derive(Default)]
pub struct MemoryTransport {
    pages: HashMap<String, StaticPage>,
    request_delay: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct StaticPage {
    pub status: u16,
    pub html: Option<String>,
    pub final_url: Option<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = Some(delay);
        self
    }

    pub fn insert(&mut self, url: &str, html: &str) {
        self.pages.insert(
            url.to_string(),
            StaticPage {
                status: 200,
                html: Some(html.to_string()),
                final_url: None,
            },
        );
    }

    pub fn insert_page(&mut self, url: &str, page: StaticPage) {
        self.pages.insert(url.to_string(), page);
    }

    pub fn insert_status(&mut self, url: &str, status: u16) {
        self.pages.insert(
            url.to_string(),
            StaticPage {
                status,
                html: None,
                final_url: None,
            },
        );
    }

    pub fn insert_redirect(&mut self, url: &str, to: &str) {
        self.pages.insert(
            url.to_string(),
            StaticPage {
                status: 200,
                html: Some(String::new()),
                final_url: Some(to.to_string()),
            },
        );
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &Url) -> FetchResponse {
        let Some(page) = self.pages.get(url.as_str()) else {
            return FetchResponse::failure(url.clone(), "connection refused");
        };

        let final_url = page
            .final_url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok());

        let redirect_chain = match &final_url {
            Some(_) => vec![url.clone()],
            None => Vec::new(),
        };

        let error = if (200..300).contains(&page.status) {
            None
        } else {
            Some(format!("http status {}", page.status))
        };

        FetchResponse {
            url: url.clone(),
            final_url,
            redirect_chain,
            status_code: Some(page.status),
            headers: HashMap::new(),
            html: if error.is_none() { page.html.clone() } else { None },
            error,
            fetch_time_ms: 0,
        }
    }

    fn request_delay(&self) -> Option<Duration> {
        self.request_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_many_mirrors_input_order() {
        let mut transport = MemoryTransport::new();
        for i in 0..50 {
            transport.insert(
                &format!("https://example.com/{i}"),
                &format!("<html><title>{i}</title></html>"),
            );
        }

        let urls: Vec<Url> = (0..50)
            .map(|i| Url::parse(&format!("https://example.com/{i}")).unwrap())
            .collect();

        let responses = transport.fetch_many(&urls).await;

        assert_eq!(responses.len(), urls.len());
        for (url, response) in urls.iter().zip(&responses) {
            assert_eq!(&response.url, url);
            assert!(response.is_success());
        }
    }

    #[tokio::test]
    async fn failures_are_values_not_errors() {
        let transport = MemoryTransport::new();
        let url = Url::parse("https://nowhere.example/").unwrap();

        let response = transport.fetch(&url).await;

        assert!(response.error.is_some());
        assert_eq!(response.status_code, None);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn redirect_reporting() {
        let mut transport = MemoryTransport::new();
        transport.insert_redirect("https://example.com/old", "https://example.com/new");

        let url = Url::parse("https://example.com/old").unwrap();
        let response = transport.fetch(&url).await;

        assert!(response.is_redirect());
        assert_eq!(
            response.final_url.unwrap().as_str(),
            "https://example.com/new"
        );
        assert_eq!(response.redirect_chain.len(), 1);
    }
}
