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

//! Adaptive request throttling.
//!
//! A sliding window of (response time, outcome) samples drives the delay:
//! on every Kth sample, an error rate above 10% multiplies the delay by 1.5;
//! otherwise a mean response time under 500 ms multiplies it by 0.8. Errors
//! override fast-response signals. The delay stays clamped to
//! [min_delay, max_delay].

use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_WINDOW_SIZE: usize = 100;
const DEFAULT_ADJUSTMENT_INTERVAL: usize = 10;

const ERROR_RATE_THRESHOLD: f64 = 0.10;
const FAST_RESPONSE: Duration = Duration::from_millis(500);
const SLOWDOWN_FACTOR: f64 = 1.5;
const SPEEDUP_FACTOR: f64 = 0.8;

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct ThrottleSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_ms: f64,
    pub current_delay_ms: u64,
    pub adjustments: u64,
}

pub struct AdaptiveThrottler {
    delay: Duration,
    min_delay: Duration,
    max_delay: Duration,
    window: VecDeque<(Duration, bool)>,
    window_size: usize,
    adjustment_interval: usize,
    samples_since_adjustment: usize,
    total: u64,
    successful: u64,
    failed: u64,
    adjustments: u64,
}

impl AdaptiveThrottler {
    pub fn new(initial_delay: Duration) -> Self {
        Self::with_bounds(initial_delay, DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_bounds(initial_delay: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay: initial_delay.clamp(min_delay, max_delay),
            min_delay,
            max_delay,
            window: VecDeque::with_capacity(DEFAULT_WINDOW_SIZE),
            window_size: DEFAULT_WINDOW_SIZE,
            adjustment_interval: DEFAULT_ADJUSTMENT_INTERVAL,
            samples_since_adjustment: 0,
            total: 0,
            successful: 0,
            failed: 0,
            adjustments: 0,
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        self.record(response_time, true);
    }

    pub fn record_failure(&mut self, response_time: Duration) {
        self.record(response_time, false);
    }

    fn record(&mut self, response_time: Duration, ok: bool) {
        self.total += 1;
        if ok {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((response_time, ok));

        self.samples_since_adjustment += 1;
        if self.samples_since_adjustment >= self.adjustment_interval {
            self.samples_since_adjustment = 0;
            self.adjust();
        }
    }

    fn window_error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }

        let failed = self.window.iter().filter(|(_, ok)| !ok).count();
        failed as f64 / self.window.len() as f64
    }

    fn window_mean_response(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }

        let total: Duration = self.window.iter().map(|(rt, _)| *rt).sum();
        total / self.window.len() as u32
    }

    fn adjust(&mut self) {
        let before = self.delay;

        if self.window_error_rate() > ERROR_RATE_THRESHOLD {
            self.delay = self.delay.mul_f64(SLOWDOWN_FACTOR);
        } else if self.window_mean_response() < FAST_RESPONSE {
            self.delay = self.delay.mul_f64(SPEEDUP_FACTOR);
        }

        self.delay = self.delay.clamp(self.min_delay, self.max_delay);

        if self.delay != before {
            self.adjustments += 1;
            tracing::debug!(
                delay_ms = self.delay.as_millis() as u64,
                "throttle adjusted"
            );
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn summary(&self) -> ThrottleSummary {
        let avg_response_ms = if self.window.is_empty() {
            0.0
        } else {
            self.window
                .iter()
                .map(|(rt, _)| rt.as_secs_f64() * 1_000.0)
                .sum::<f64>()
                / self.window.len() as f64
        };

        ThrottleSummary {
            total_requests: self.total,
            successful_requests: self.successful,
            failed_requests: self.failed,
            avg_response_ms,
            current_delay_ms: self.delay.as_millis() as u64,
            adjustments: self.adjustments,
        }
    }
}
