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

//! Admission filters and pattern rules.
//!
//! The domain and path filters answer the default scan question; a matching
//! URL rule overrides them, and the first rule whose pattern matches wins.

use regex::Regex;
use url::Url;

use crate::node::{clamp_priority, Node, DEFAULT_PRIORITY};
use crate::urls;
use crate::Result;

/// Sentinel entries understood in `allowed_domains`.
const ANY: &str = "*";
const DOMAIN: &str = "domain";
const SUBDOMAINS: &str = "subdomains";
const DOMAIN_AND_SUBDOMAINS: &str = "domain+subdomains";

#[derive(Clone, Debug)]
pub struct DomainFilter {
    base_domain: String,
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl DomainFilter {
    /// `base_url` anchors the `domain` / `subdomains` sentinels; the root
    /// domain strips a leading `www.` only.
    pub fn new(base_url: &Url, allowed: Vec<String>, blocked: Vec<String>) -> Self {
        let base_domain = base_url
            .host_str()
            .map(|host| urls::strip_www(&host.to_lowercase()).to_string())
            .unwrap_or_default();

        Self {
            base_domain,
            allowed: allowed.into_iter().map(|d| d.to_lowercase()).collect(),
            blocked: blocked.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    /// The `same_domain` default: base domain plus its subdomains.
    pub fn same_domain(base_url: &Url) -> Self {
        Self::new(
            base_url,
            vec![DOMAIN_AND_SUBDOMAINS.to_string()],
            Vec::new(),
        )
    }

    pub fn any_domain(base_url: &Url) -> Self {
        Self::new(base_url, vec![ANY.to_string()], Vec::new())
    }

    fn is_subdomain_of_base(&self, root: &str) -> bool {
        root == self.base_domain || root.ends_with(&format!(".{}", self.base_domain))
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        let root = urls::strip_www(&host).to_string();

        if self.blocked.iter().any(|b| *b == host || *b == root) {
            return false;
        }

        for entry in &self.allowed {
            let hit = match entry.as_str() {
                ANY => true,
                DOMAIN => root == self.base_domain,
                SUBDOMAINS => root != self.base_domain && self.is_subdomain_of_base(&root),
                DOMAIN_AND_SUBDOMAINS => self.is_subdomain_of_base(&root),
                literal => *literal == host || *literal == root,
            };

            if hit {
                return true;
            }
        }

        false
    }
}

#[derive(Clone, Debug, Default)]
pub struct PathFilter {
    included: Vec<Regex>,
    excluded: Vec<Regex>,
}

impl PathFilter {
    pub fn new(included: &[String], excluded: &[String]) -> Result<Self> {
        Ok(Self {
            included: included
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
            excluded: excluded
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Exclusions win; then a non-empty include list requires a match.
    pub fn is_allowed(&self, url: &Url) -> bool {
        let target = url.as_str();

        if self.excluded.iter().any(|re| re.is_match(target)) {
            return false;
        }

        if !self.included.is_empty() && !self.included.iter().any(|re| re.is_match(target)) {
            return false;
        }

        true
    }
}

/// Regex-plus-policy override for matching URLs. `None` tri-states defer to
/// the filters (or to the edge strategy, for `create_edge`).
#[derive(Clone, Debug)]
pub struct UrlRule {
    pattern: Regex,
    pub priority: u8,
    pub should_scan: Option<bool>,
    pub should_follow_links: Option<bool>,
    pub create_edge: Option<bool>,
}

impl UrlRule {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            priority: DEFAULT_PRIORITY,
            should_scan: None,
            should_follow_links: None,
            create_edge: None,
        })
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_should_scan(mut self, should_scan: bool) -> Self {
        self.should_scan = Some(should_scan);
        self
    }

    pub fn with_should_follow_links(mut self, follow: bool) -> Self {
        self.should_follow_links = Some(follow);
        self
    }

    pub fn with_create_edge(mut self, create: bool) -> Self {
        self.create_edge = Some(create);
        self
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Write the explicit tri-states onto the node.
    pub fn apply_to_node(&self, node: &mut Node) {
        if let Some(should_scan) = self.should_scan {
            node.should_scan = should_scan;
        }

        if let Some(follow) = self.should_follow_links {
            node.can_create_edges = follow;
        }
    }
}

/// Ordered rule list; the first match wins.
#[derive(Clone, Debug, Default)]
pub struct UrlRules {
    rules: Vec<UrlRule>,
}

impl UrlRules {
    pub fn new(rules: Vec<UrlRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn first_match(&self, url: &str) -> Option<&UrlRule> {
        self.rules.iter().find(|rule| rule.matches(url))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeAction {
    Create,
    Skip,
}

/// Narrower rule over a (source, target) pair, consulted by the link
/// processor in addition to URL rules.
#[derive(Clone, Debug)]
pub struct EdgeRule {
    source_pattern: Regex,
    target_pattern: Regex,
    pub max_depth_diff: Option<u32>,
    pub action: EdgeAction,
}

impl EdgeRule {
    pub fn new(
        source_pattern: &str,
        target_pattern: &str,
        max_depth_diff: Option<u32>,
        action: EdgeAction,
    ) -> Result<Self> {
        Ok(Self {
            source_pattern: Regex::new(source_pattern)?,
            target_pattern: Regex::new(target_pattern)?,
            max_depth_diff,
            action,
        })
    }

    pub fn matches(&self, source_url: &str, target_url: &str, depth_diff: u32) -> bool {
        if let Some(max_diff) = self.max_depth_diff {
            if depth_diff > max_diff {
                return false;
            }
        }

        self.source_pattern.is_match(source_url) && self.target_pattern.is_match(target_url)
    }
}
