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

use rand::Rng;
use std::time::Duration;

/// Doubling back-off with optional cap and jitter, used for reconnecting to
/// the queue service.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: u64,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn from_millis(base: u64) -> Self {
        Self {
            current: base.max(1),
            max_delay: None,
            jitter: false,
        }
    }

    pub fn with_limit(mut self, limit: Duration) -> Self {
        self.max_delay = Some(limit);
        self
    }

    /// Spread reconnect storms out a little.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let cap = self.max_delay.map(|max| max.as_millis() as u64);

        let mut millis = self.current;
        if let Some(cap) = cap {
            millis = millis.min(cap);
        }

        self.current = self.current.saturating_mul(2);

        if self.jitter && millis > 1 {
            millis += rand::thread_rng().gen_range(0..millis / 2 + 1);
            if let Some(cap) = cap {
                millis = millis.min(cap);
            }
        }

        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_without_limit() {
        let mut backoff = ExponentialBackoff::from_millis(100);

        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn saturates_at_limit() {
        let mut backoff =
            ExponentialBackoff::from_millis(100).with_limit(Duration::from_millis(250));

        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn jitter_stays_bounded() {
        let backoff = ExponentialBackoff::from_millis(100)
            .with_limit(Duration::from_millis(500))
            .with_jitter();

        for delay in backoff.take(10) {
            assert!(delay <= Duration::from_millis(500));
        }
    }
}
