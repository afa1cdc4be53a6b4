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

//! Bloom filter used as a memory-bounded pre-check in front of the
//! scheduler's seen-set during very large crawls.

use bitvec::vec::BitVec;

const XXH3_SECRET: &[u8] = &xxhash_rust::const_xxh3::const_custom_default_secret(71);

fn stable_hash_128(bytes: &[u8]) -> (u64, u64) {
    let h = xxhash_rust::xxh3::xxh3_128_with_secret(bytes, XXH3_SECRET);
    ((h >> 64) as u64, h as u64)
}

/// Number of bits for a target of `items` elements at false-positive rate `fp`.
#[inline]
fn optimal_bits(items: u64, fp: f64) -> u64 {
    (((items as f64) * fp.ln()) / (-(2.0_f64.ln().powi(2)))).ceil() as u64
}

#[inline]
fn optimal_hashes(bits: u64, items: u64) -> u32 {
    ((bits as f64 / items as f64 * 2.0_f64.ln()).round() as u32).max(1)
}

/// A Bloom filter over URL strings (or any byte keys).
///
/// False positives are possible; false negatives are not. The seen-set that
/// this filter fronts stays authoritative, so a false positive only costs an
/// extra exact lookup.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct UrlBloomFilter {
    #[bincode(with_serde)]
    bits: BitVec,
    num_hashes: u32,
    inserts: u64,
}

impl UrlBloomFilter {
    pub fn new(estimated_items: u64, fp: f64) -> Self {
        let num_bits = optimal_bits(estimated_items.max(1), fp).max(64);
        Self {
            bits: BitVec::repeat(false, num_bits as usize),
            num_hashes: optimal_hashes(num_bits, estimated_items.max(1)),
            inserts: 0,
        }
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = stable_hash_128(key);
        let len = self.bits.len() as u64;

        (0..self.num_hashes as u64)
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % len) as usize)
    }

    pub fn insert(&mut self, key: &str) {
        for pos in self.positions(key.as_bytes()).collect::<Vec<_>>() {
            self.bits.set(pos, true);
        }
        self.inserts += 1;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions(key.as_bytes()).all(|pos| self.bits[pos])
    }

    /// Approximate count of distinct inserted keys.
    pub fn estimate_len(&self) -> u64 {
        let ones = self.bits.count_ones() as f64;
        let m = self.bits.len() as f64;

        if ones == 0.0 {
            return 0;
        }

        if ones >= m {
            return u64::MAX;
        }

        let est = -(m / self.num_hashes as f64) * (1.0 - ones / m).ln();
        est.round() as u64
    }

    pub fn union(&mut self, other: &Self) {
        debug_assert_eq!(self.bits.len(), other.bits.len());
        debug_assert_eq!(self.num_hashes, other.num_hashes);

        self.bits |= other.bits.clone();
        self.inserts += other.inserts;
    }

    pub fn memory_bytes(&self) -> usize {
        self.bits.len() / 8
    }

    pub fn inserts(&self) -> u64 {
        self.inserts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let mut filter = UrlBloomFilter::new(1_000, 0.01);

        filter.insert("https://example.com/");
        filter.insert("https://example.com/about");

        assert!(filter.contains("https://example.com/"));
        assert!(filter.contains("https://example.com/about"));
    }

    #[test]
    fn unseen_keys_mostly_absent() {
        let mut filter = UrlBloomFilter::new(10_000, 0.01);

        for i in 0..1_000 {
            filter.insert(&format!("https://example.com/page/{i}"));
        }

        let false_positives = (0..1_000)
            .filter(|i| filter.contains(&format!("https://other.com/page/{i}")))
            .count();

        // 1% target rate over 1000 probes; allow generous slack.
        assert!(false_positives < 100, "{false_positives} false positives");
    }

    #[test]
    fn cardinality_estimate_is_close() {
        let mut filter = UrlBloomFilter::new(10_000, 0.01);

        for i in 0..5_000 {
            filter.insert(&format!("https://example.com/{i}"));
        }

        let est = filter.estimate_len();
        assert!((4_000..6_000).contains(&est), "estimate {est}");
    }

    #[test]
    fn bincode_round_trip() {
        let mut filter = UrlBloomFilter::new(1_000, 0.01);
        filter.insert("https://example.com/");

        let bytes = bincode::encode_to_vec(&filter, bincode::config::standard()).unwrap();
        let (back, _): (UrlBloomFilter, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();

        assert_eq!(filter, back);
        assert!(back.contains("https://example.com/"));
    }

    #[test]
    fn union_contains_both_sides() {
        let mut a = UrlBloomFilter::new(1_000, 0.01);
        let mut b = UrlBloomFilter::new(1_000, 0.01);

        a.insert("https://a.com/");
        b.insert("https://b.com/");

        a.union(&b);

        assert!(a.contains("https://a.com/"));
        assert!(a.contains("https://b.com/"));
    }
}
