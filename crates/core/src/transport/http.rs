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

//! HTTP transport over a pooled reqwest client.
//!
//! Redirects are followed manually so the redirect chain can be recorded
//! hop by hop, with the security validator re-run on every hop. Driver
//! plugins see each lifecycle stage and may cancel the request or ask for a
//! retry, which re-enters the preparing stage up to the configured maximum.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::{fetch_many_bounded, FetchResponse, Transport, DEFAULT_MAX_CONCURRENT_REQUESTS};
use crate::plugins::{DriverStage, PluginManager, RequestContext};
use crate::urls;
use crate::Result;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; trawlerbot/0.1)";

#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_retries: u32,
    pub max_concurrent_requests: usize,
    pub request_delay: Option<Duration>,
    pub allow_internal: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            max_retries: 2,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_delay: None,
            allow_internal: false,
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    plugins: Arc<PluginManager>,
    session_used: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig, plugins: Arc<PluginManager>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            config,
            plugins,
            session_used: AtomicBool::new(false),
        })
    }

    fn header_map(ctx: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (key, value) in &ctx.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        if !ctx.cookies.is_empty() {
            let cookie = ctx
                .cookies
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.insert(reqwest::header::COOKIE, value);
            }
        }

        headers
    }

    fn is_redirect_status(status: u16) -> bool {
        matches!(status, 301 | 302 | 303 | 307 | 308)
    }

    /// Follow redirects manually, recording every hop. Ends on the first
    /// non-redirect response.
    async fn send_following_redirects(
        &self,
        ctx: &RequestContext,
    ) -> Result<(reqwest::Response, Vec<Url>), String> {
        let mut current = ctx.url.clone();
        let mut chain: Vec<Url> = Vec::new();

        loop {
            if chain.len() > self.config.max_redirects {
                return Err(format!(
                    "too many redirects (> {})",
                    self.config.max_redirects
                ));
            }

            let mut request = self.client.get(current.clone()).headers(Self::header_map(ctx));
            if let Some(timeout) = ctx.timeout {
                request = request.timeout(timeout);
            }

            let response = request
                .send()
                .await
                .map_err(|err| urls::redact(&err.to_string()))?;

            let status = response.status().as_u16();
            if Self::is_redirect_status(status) {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| urls::make_absolute(&current, location));

                let Some(next) = location else {
                    return Ok((response, chain));
                };

                if let Err(err) = urls::validate_security(&next, self.config.allow_internal) {
                    return Err(err.to_string());
                }

                chain.push(current);
                current = next;
                continue;
            }

            return Ok((response, chain));
        }
    }

    async fn fail(&self, ctx: &mut RequestContext, error: String) -> FetchResponse {
        ctx.error = Some(error.clone());
        self.plugins
            .run_driver_stage(DriverStage::RequestFailed, ctx)
            .await;

        FetchResponse::failure(ctx.url.clone(), error)
    }

    async fn fetch_once(&self, ctx: &mut RequestContext) -> Result<FetchResponse, FetchAttempt> {
        self.plugins
            .run_driver_stage(DriverStage::PreparingRequest, ctx)
            .await;

        if let Some(reason) = ctx.cancelled.take() {
            return Err(FetchAttempt::Cancelled(reason));
        }

        // plugins may rewrite the target; re-check before touching the wire
        if let Err(err) = urls::validate_security(&ctx.url, self.config.allow_internal) {
            return Err(FetchAttempt::Fatal(err.to_string()));
        }

        self.plugins
            .run_driver_stage(DriverStage::SendingRequest, ctx)
            .await;

        let (response, chain) = match self.send_following_redirects(ctx).await {
            Ok(pair) => pair,
            Err(error) => return Err(FetchAttempt::Failed(error)),
        };

        let status = response.status().as_u16();
        let final_url = response.url().clone();

        ctx.status = Some(status);
        ctx.response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        self.plugins
            .run_driver_stage(DriverStage::ResponseReceived, ctx)
            .await;

        if !(200..300).contains(&status) {
            return Err(FetchAttempt::HttpStatus {
                status,
                headers: ctx.response_headers.clone(),
            });
        }

        let textual = ctx
            .response_headers
            .get("content-type")
            .map_or(true, |ct| {
                ct.contains("text/") || ct.contains("xml") || ct.contains("json")
            });

        if textual {
            match response.text().await {
                Ok(body) => ctx.html = Some(body),
                Err(err) => {
                    return Err(FetchAttempt::Failed(urls::redact(&err.to_string())))
                }
            }
        }

        self.plugins
            .run_driver_stage(DriverStage::ProcessingResponse, ctx)
            .await;

        if let Some(reason) = ctx.cancelled.take() {
            return Err(FetchAttempt::Cancelled(reason));
        }

        self.plugins
            .run_driver_stage(DriverStage::RequestCompleted, ctx)
            .await;

        Ok(FetchResponse {
            url: ctx.url.clone(),
            final_url: Some(final_url),
            redirect_chain: chain,
            status_code: Some(status),
            headers: ctx.response_headers.clone(),
            html: ctx.html.take(),
            error: None,
            fetch_time_ms: 0,
        })
    }
}

enum FetchAttempt {
    /// Transport-level failure (DNS, TLS, timeout, too many redirects).
    Failed(String),
    /// Non-2xx response.
    HttpStatus {
        status: u16,
        headers: HashMap<String, String>,
    },
    /// A plugin cancelled the request.
    Cancelled(String),
    /// Security rejection; retrying cannot help.
    Fatal(String),
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url) -> FetchResponse {
        let started = Instant::now();

        let mut ctx = RequestContext::new(url.clone());
        ctx.timeout = Some(self.config.timeout);

        if self.session_used.swap(true, Ordering::AcqRel) {
            self.plugins
                .run_driver_stage(DriverStage::SessionReused, &mut ctx)
                .await;
        } else {
            self.plugins
                .run_driver_stage(DriverStage::SessionCreating, &mut ctx)
                .await;
            self.plugins
                .run_driver_stage(DriverStage::SessionCreated, &mut ctx)
                .await;
        }

        let mut attempts = 0u32;

        let mut response = loop {
            match self.fetch_once(&mut ctx).await {
                Ok(response) => break response,
                Err(FetchAttempt::Cancelled(reason)) => {
                    return self.fail(&mut ctx, format!("Cancelled: {reason}")).await;
                }
                Err(FetchAttempt::Fatal(error)) => {
                    return self.fail(&mut ctx, error).await;
                }
                Err(attempt) => {
                    let error = match &attempt {
                        FetchAttempt::Failed(error) => error.clone(),
                        FetchAttempt::HttpStatus { status, .. } => {
                            format!("http status {status}")
                        }
                        _ => unreachable!(),
                    };

                    ctx.error = Some(error.clone());
                    self.plugins
                        .run_driver_stage(DriverStage::RequestFailed, &mut ctx)
                        .await;

                    // a plugin may ask for another attempt (e.g. after 429)
                    if ctx.should_retry && attempts < self.config.max_retries {
                        attempts += 1;
                        ctx.should_retry = false;
                        ctx.error = None;
                        ctx.status = None;
                        ctx.html = None;

                        if let Some(delay) = ctx.retry_delay.take() {
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    let mut response = FetchResponse::failure(ctx.url.clone(), error);
                    if let FetchAttempt::HttpStatus { status, headers } = attempt {
                        response.status_code = Some(status);
                        response.headers = headers;
                    }
                    response.fetch_time_ms = started.elapsed().as_millis() as u64;
                    return response;
                }
            }
        };

        response.fetch_time_ms = started.elapsed().as_millis() as u64;
        response
    }

    async fn fetch_many(&self, urls: &[Url]) -> Vec<FetchResponse> {
        fetch_many_bounded(self, urls, self.config.max_concurrent_requests).await
    }

    fn request_delay(&self) -> Option<Duration> {
        self.config.request_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::DriverPlugin;

    fn transport(plugins: PluginManager) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig::default(), Arc::new(plugins)).unwrap()
    }

    #[tokio::test]
    async fn cancelling_plugin_short_circuits() {
        struct CancelEverything;

        #[async_trait]
        impl DriverPlugin for CancelEverything {
            fn name(&self) -> &'static str {
                "cancel-everything"
            }

            fn stages(&self) -> &'static [DriverStage] {
                &[DriverStage::PreparingRequest]
            }

            async fn on_stage(
                &self,
                _stage: DriverStage,
                ctx: &mut RequestContext,
            ) -> Result<()> {
                ctx.cancelled = Some("blocked by policy".to_string());
                Ok(())
            }
        }

        let mut plugins = PluginManager::new();
        plugins.register_driver(Arc::new(CancelEverything));
        let transport = transport(plugins);

        let response = transport
            .fetch(&Url::parse("https://example.com/").unwrap())
            .await;

        assert_eq!(
            response.error.as_deref(),
            Some("Cancelled: blocked by policy")
        );
        assert_eq!(response.status_code, None);
    }

    #[tokio::test]
    async fn internal_hosts_are_rejected_before_the_wire() {
        let transport = transport(PluginManager::new());

        let response = transport
            .fetch(&Url::parse("http://127.0.0.1:1/").unwrap())
            .await;

        assert!(response
            .error
            .as_deref()
            .unwrap()
            .contains("internal address"));
    }

    #[test]
    fn redirect_statuses() {
        for status in [301, 302, 303, 307, 308] {
            assert!(HttpTransport::is_redirect_status(status));
        }
        assert!(!HttpTransport::is_redirect_status(200));
        assert!(!HttpTransport::is_redirect_status(404));
    }
}
