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

//! Priority queue over not-yet-visited URLs.
//!
//! A binary heap keyed by (effective priority, insertion counter): higher
//! priority first, FIFO within a tie. The seen-set maps normalized URL to
//! node id and prevents re-enqueue; an optional Bloom filter fronts it for
//! memory-bounded crawls (the seen-set stays authoritative).

use std::collections::BinaryHeap;
use std::sync::Arc;

use bloom::UrlBloomFilter;
use hashbrown::HashMap;

use crate::filters::UrlRules;
use crate::node::{clamp_priority, Node, NodeId, DEFAULT_PRIORITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: u8,
    counter: u64,
    id: NodeId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // max-heap: higher priority first, then earlier insertion
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.counter.cmp(&self.counter))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct MemoryStats {
    pub queued: usize,
    pub seen_urls: usize,
    pub bloom_bytes: Option<usize>,
    pub bloom_estimated_urls: Option<u64>,
}

pub struct Scheduler {
    heap: BinaryHeap<QueueEntry>,
    seen: HashMap<String, NodeId>,
    bloom: Option<UrlBloomFilter>,
    counter: u64,
    rules: Arc<UrlRules>,
}

impl Scheduler {
    pub fn new(rules: Arc<UrlRules>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            seen: HashMap::new(),
            bloom: None,
            counter: 0,
            rules,
        }
    }

    /// Front the seen-set with a Bloom filter sized for `estimated_urls`.
    pub fn with_bloom(mut self, estimated_urls: u64, fp: f64) -> Self {
        self.bloom = Some(UrlBloomFilter::new(estimated_urls, fp));
        self
    }

    /// Admit a node for scanning. Returns false when the URL was already
    /// seen or the first matching rule forbids the scan. Applies the
    /// matching rule's tri-states to the node either way.
    pub fn add_node(&mut self, node: &mut Node) -> bool {
        let url = node.url().as_str().to_string();

        // bloom is a cheap pre-check; on a hit the exact set decides
        let maybe_seen = self
            .bloom
            .as_ref()
            .map_or(true, |bloom| bloom.contains(&url));
        if maybe_seen && self.seen.contains_key(&url) {
            return false;
        }

        let rule = self.rules.first_match(&url);

        let priority = match node.priority {
            Some(priority) => clamp_priority(priority),
            None => match rule {
                Some(rule) if rule.should_scan == Some(false) => {
                    rule.apply_to_node(node);
                    self.mark_seen(url, node.id());
                    return false;
                }
                Some(rule) => rule.priority,
                None => DEFAULT_PRIORITY,
            },
        };

        if let Some(rule) = rule {
            rule.apply_to_node(node);
        }

        self.mark_seen(url, node.id());

        self.counter += 1;
        self.heap.push(QueueEntry {
            priority,
            counter: self.counter,
            id: node.id(),
        });

        true
    }

    /// Enqueue a node whose admission was already decided by the link
    /// processor. Skips rule evaluation (the caller has applied explicit
    /// overrides that may contradict the rules) but still dedupes on the
    /// seen-set. `rule_priority` is the matched rule's priority, if any;
    /// the node's own priority wins over it.
    pub fn add_decided(&mut self, node: &Node, rule_priority: Option<u8>) -> bool {
        let url = node.url().as_str().to_string();

        if self.seen.contains_key(&url) {
            return false;
        }

        let priority = clamp_priority(
            node.priority
                .or(rule_priority)
                .unwrap_or(DEFAULT_PRIORITY),
        );

        self.mark_seen(url, node.id());

        self.counter += 1;
        self.heap.push(QueueEntry {
            priority,
            counter: self.counter,
            id: node.id(),
        });

        true
    }

    fn mark_seen(&mut self, url: String, id: NodeId) {
        if let Some(bloom) = &mut self.bloom {
            bloom.insert(&url);
        }
        self.seen.insert(url, id);
    }

    pub fn get_next(&mut self) -> Option<NodeId> {
        self.heap.pop().map(|entry| entry.id)
    }

    pub fn size(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn has_url(&self, url: &str) -> bool {
        if let Some(bloom) = &self.bloom {
            if !bloom.contains(url) {
                return false;
            }
        }

        self.seen.contains_key(url)
    }

    pub fn get_memory_statistics(&self) -> MemoryStats {
        MemoryStats {
            queued: self.heap.len(),
            seen_urls: self.seen.len(),
            bloom_bytes: self.bloom.as_ref().map(UrlBloomFilter::memory_bytes),
            bloom_estimated_urls: self.bloom.as_ref().map(UrlBloomFilter::estimate_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::UrlRule;
    use url::Url;

    fn node(url: &str) -> Node {
        Node::new(Url::parse(url).unwrap(), 0, None)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(UrlRules::default()))
    }

    #[test]
    fn higher_priority_first_fifo_within_tie() {
        let mut scheduler = scheduler();

        let mut low = node("https://example.com/low");
        low.priority = Some(2);
        let mut first = node("https://example.com/first");
        let mut second = node("https://example.com/second");
        let mut high = node("https://example.com/high");
        high.priority = Some(9);

        assert!(scheduler.add_node(&mut low));
        assert!(scheduler.add_node(&mut first));
        assert!(scheduler.add_node(&mut second));
        assert!(scheduler.add_node(&mut high));

        assert_eq!(scheduler.get_next(), Some(high.id()));
        assert_eq!(scheduler.get_next(), Some(first.id()));
        assert_eq!(scheduler.get_next(), Some(second.id()));
        assert_eq!(scheduler.get_next(), Some(low.id()));
        assert_eq!(scheduler.get_next(), None);
    }

    #[test]
    fn seen_urls_are_rejected() {
        let mut scheduler = scheduler();

        let mut a = node("https://example.com/");
        let mut b = node("https://example.com/");

        assert!(scheduler.add_node(&mut a));
        assert!(!scheduler.add_node(&mut b));
        assert_eq!(scheduler.size(), 1);
        assert!(scheduler.has_url("https://example.com/"));
    }

    #[test]
    fn rule_forbidding_scan_rejects() {
        let rules = UrlRules::new(vec![UrlRule::new("/admin/")
            .unwrap()
            .with_should_scan(false)]);
        let mut scheduler = Scheduler::new(Arc::new(rules));

        let mut admin = node("https://example.com/admin/login");
        assert!(!scheduler.add_node(&mut admin));
        assert!(!admin.should_scan);
        assert!(scheduler.is_empty());

        // rejected urls still count as seen
        let mut again = node("https://example.com/admin/login");
        assert!(!scheduler.add_node(&mut again));
    }

    #[test]
    fn rule_priority_applies_when_node_has_none() {
        let rules = UrlRules::new(vec![UrlRule::new("/hot/").unwrap().with_priority(9)]);
        let mut scheduler = Scheduler::new(Arc::new(rules));

        let mut plain = node("https://example.com/plain");
        let mut hot = node("https://example.com/hot/item");

        scheduler.add_node(&mut plain);
        scheduler.add_node(&mut hot);

        assert_eq!(scheduler.get_next(), Some(hot.id()));
    }

    #[test]
    fn node_priority_beats_rule_priority() {
        let rules = UrlRules::new(vec![UrlRule::new("/hot/").unwrap().with_priority(9)]);
        let mut scheduler = Scheduler::new(Arc::new(rules));

        let mut hot = node("https://example.com/hot/item");
        let mut pinned = node("https://example.com/pinned");
        pinned.priority = Some(10);

        scheduler.add_node(&mut hot);
        scheduler.add_node(&mut pinned);

        assert_eq!(scheduler.get_next(), Some(pinned.id()));
    }

    #[test]
    fn out_of_range_priority_is_clamped() {
        let mut scheduler = scheduler();

        let mut wild = node("https://example.com/wild");
        wild.priority = Some(250);
        let mut ten = node("https://example.com/ten");
        ten.priority = Some(10);

        scheduler.add_node(&mut wild);
        scheduler.add_node(&mut ten);

        // clamped to 10, so FIFO decides
        assert_eq!(scheduler.get_next(), Some(wild.id()));
        assert_eq!(scheduler.get_next(), Some(ten.id()));
    }

    proptest::proptest! {
        #[test]
        fn pops_follow_priority_then_insertion_order(
            priorities in proptest::collection::vec(0u8..=255, 1..40)
        ) {
            let mut scheduler = Scheduler::new(Arc::new(UrlRules::default()));
            let mut expected: Vec<(u8, usize, NodeId)> = Vec::new();

            for (i, priority) in priorities.iter().enumerate() {
                let mut n = node(&format!("https://example.com/{i}"));
                n.priority = Some(*priority);
                assert!(scheduler.add_node(&mut n));
                expected.push((crate::node::clamp_priority(*priority), i, n.id()));
            }

            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            for (_, _, id) in expected {
                proptest::prop_assert_eq!(scheduler.get_next(), Some(id));
            }
            proptest::prop_assert_eq!(scheduler.get_next(), None);
        }
    }

    #[test]
    fn bloom_backed_memory_statistics() {
        let mut scheduler = scheduler().with_bloom(10_000, 0.01);

        for i in 0..100 {
            let mut n = node(&format!("https://example.com/{i}"));
            scheduler.add_node(&mut n);
        }

        let stats = scheduler.get_memory_statistics();
        assert_eq!(stats.queued, 100);
        assert_eq!(stats.seen_urls, 100);
        assert!(stats.bloom_bytes.unwrap() > 0);
        assert!(stats.bloom_estimated_urls.unwrap() > 50);
    }
}
