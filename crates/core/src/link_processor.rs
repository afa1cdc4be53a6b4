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

//! Link admission and edge creation.
//!
//! Given a parent node and the links it extracted, decide which links become
//! nodes, which children get scheduled and which edges are created under the
//! configured strategy. Runs on the coordinator task; all graph and
//! scheduler mutations happen here.

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::filters::{DomainFilter, EdgeAction, EdgeRule, PathFilter, UrlRules};
use crate::graph::{Edge, Graph};
use crate::node::{clamp_priority, Node, NodeDeps, NodeId};
use crate::scheduler::Scheduler;
use crate::urls;

/// Upper bound on links taken from one page. Pages with more are almost
/// always link farms or infinite calendars.
pub const MAX_OUTGOING_LINKS_PER_PAGE: usize = 200;

pub const DEFAULT_LINK_BATCH_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStrategy {
    /// Always create the edge.
    #[default]
    All,
    /// Only to children created in this step.
    NewOnly,
    /// Only while the target's in-degree is below the bound.
    MaxInDegree(usize),
    /// Only between nodes of equal depth (re-crawl merges).
    SameDepthOnly,
    /// Only when the child is deeper than the parent.
    DeeperOnly,
    /// Only to targets with no incoming edge yet.
    FirstEncounterOnly,
}

pub struct LinkProcessor {
    domain_filter: DomainFilter,
    path_filter: PathFilter,
    url_rules: Arc<UrlRules>,
    edge_rules: Vec<EdgeRule>,
    strategy: EdgeStrategy,
    batch_size: usize,
    deps: Arc<NodeDeps>,
    allow_internal: bool,
}

struct ParentView {
    id: NodeId,
    url: Url,
    depth: u32,
    can_create_edges: bool,
    explicit_scan: serde_json::Map<String, Value>,
    child_priorities: serde_json::Map<String, Value>,
}

impl LinkProcessor {
    pub fn new(
        domain_filter: DomainFilter,
        path_filter: PathFilter,
        url_rules: Arc<UrlRules>,
        edge_rules: Vec<EdgeRule>,
        strategy: EdgeStrategy,
        deps: Arc<NodeDeps>,
    ) -> Self {
        Self {
            domain_filter,
            path_filter,
            url_rules,
            edge_rules,
            strategy,
            batch_size: DEFAULT_LINK_BATCH_SIZE,
            deps,
            allow_internal: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_allow_internal(mut self, allow: bool) -> Self {
        self.allow_internal = allow;
        self
    }

    fn parent_view(graph: &Graph, parent_id: NodeId) -> Option<ParentView> {
        let parent = graph.get_node(&parent_id)?;

        let map_of = |key: &str| {
            parent
                .user_data
                .get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };

        Some(ParentView {
            id: parent_id,
            url: parent.url().clone(),
            depth: parent.depth,
            can_create_edges: parent.can_create_edges,
            explicit_scan: map_of("explicit_scan_decisions"),
            child_priorities: map_of("child_priorities"),
        })
    }

    /// Process the links of one scanned parent. Returns the number of newly
    /// admitted nodes.
    pub fn process_links(
        &self,
        parent_id: NodeId,
        links: &[String],
        graph: &mut Graph,
        scheduler: &mut Scheduler,
    ) -> usize {
        let Some(parent) = Self::parent_view(graph, parent_id) else {
            return 0;
        };

        if !parent.can_create_edges {
            return 0;
        }

        links
            .iter()
            .take(MAX_OUTGOING_LINKS_PER_PAGE)
            .map(|link| self.process_one(&parent, link, graph, scheduler))
            .filter(|new| *new)
            .count()
    }

    /// Batched async variant: identical admission semantics, but yields back
    /// to the runtime between chunks so a link-heavy page cannot starve the
    /// coordinator loop.
    pub async fn process_links_async(
        &self,
        parent_id: NodeId,
        links: &[String],
        graph: &mut Graph,
        scheduler: &mut Scheduler,
    ) -> usize {
        let Some(parent) = Self::parent_view(graph, parent_id) else {
            return 0;
        };

        if !parent.can_create_edges {
            return 0;
        }

        let mut admitted = 0;

        for chunk in links
            .iter()
            .take(MAX_OUTGOING_LINKS_PER_PAGE)
            .collect::<Vec<_>>()
            .chunks(self.batch_size)
        {
            for link in chunk {
                if self.process_one(&parent, link, graph, scheduler) {
                    admitted += 1;
                }
            }

            tokio::task::yield_now().await;
        }

        admitted
    }

    /// Returns true when a new node was admitted to the graph.
    fn process_one(
        &self,
        parent: &ParentView,
        link: &str,
        graph: &mut Graph,
        scheduler: &mut Scheduler,
    ) -> bool {
        if urls::is_special_link(link) {
            return false;
        }

        let Some(mut target_url) = urls::make_absolute(&parent.url, link) else {
            return false;
        };
        urls::normalize_in_place(&mut target_url);

        if !matches!(target_url.scheme(), "http" | "https") || target_url.host_str().is_none() {
            return false;
        }

        if let Err(err) = urls::validate_security(&target_url, self.allow_internal) {
            tracing::debug!("dropping link: {err}");
            return false;
        }

        let target_str = target_url.to_string();
        let rule = self.url_rules.first_match(&target_str);

        let should_scan = self
            .explicit_decision(parent, link, &target_str)
            .or(rule.and_then(|rule| rule.should_scan))
            .unwrap_or_else(|| {
                self.domain_filter.is_allowed(&target_url)
                    && self.path_filter.is_allowed(&target_url)
            });

        let rule_create_edge = rule.and_then(|rule| rule.create_edge);

        if !should_scan {
            // a rule may still want the edge (and therefore the node) even
            // though the target is never fetched
            if rule_create_edge == Some(true) {
                let (child_id, created) =
                    self.get_or_create_child(parent, link, &target_url, false, graph, scheduler);
                graph.add_edge(Edge::new(parent.id, child_id));
                return created;
            }

            return false;
        }

        let (child_id, created) =
            self.get_or_create_child(parent, link, &target_url, true, graph, scheduler);

        let child_depth = graph
            .get_node(&child_id)
            .map(|child| child.depth)
            .unwrap_or(parent.depth + 1);

        if self.edge_allowed(
            parent,
            &target_str,
            child_id,
            child_depth,
            created,
            rule_create_edge,
            graph,
        ) {
            graph.add_edge(Edge::new(parent.id, child_id));
        }

        created
    }

    fn explicit_decision(
        &self,
        parent: &ParentView,
        raw_link: &str,
        normalized: &str,
    ) -> Option<bool> {
        parent
            .explicit_scan
            .get(raw_link)
            .or_else(|| parent.explicit_scan.get(normalized))
            .and_then(Value::as_bool)
    }

    fn child_priority(&self, parent: &ParentView, raw_link: &str, normalized: &str) -> Option<u8> {
        parent
            .child_priorities
            .get(raw_link)
            .or_else(|| parent.child_priorities.get(normalized))
            .and_then(Value::as_u64)
            .map(|p| clamp_priority(p.min(u8::MAX as u64) as u8))
    }

    fn get_or_create_child(
        &self,
        parent: &ParentView,
        raw_link: &str,
        target_url: &Url,
        should_scan: bool,
        graph: &mut Graph,
        scheduler: &mut Scheduler,
    ) -> (NodeId, bool) {
        let target_str = target_url.as_str();

        if let Some(existing) = graph.node_id_for_url(target_str) {
            return (existing, false);
        }

        let mut child = Node::new(target_url.clone(), parent.depth + 1, Some(self.deps.clone()));

        let rule = self.url_rules.first_match(target_str);
        if let Some(rule) = rule {
            rule.apply_to_node(&mut child);
        }

        // the resolved admission decision wins over whatever the rule wrote
        child.should_scan = should_scan;

        if let Some(priority) = self.child_priority(parent, raw_link, target_str) {
            child.priority = Some(priority);
        }

        if should_scan {
            scheduler.add_decided(&child, rule.map(|rule| rule.priority));
        }

        let id = graph.add_node(child, false);
        (id, true)
    }

    /// Precedence: `create_edge` on a URL rule, then edge rules, then the
    /// configured strategy. Pair-deduplication in the graph sits above all
    /// of them.
    #[allow(clippy::too_many_arguments)]
    fn edge_allowed(
        &self,
        parent: &ParentView,
        target_str: &str,
        child_id: NodeId,
        child_depth: u32,
        just_created: bool,
        rule_create_edge: Option<bool>,
        graph: &Graph,
    ) -> bool {
        if let Some(forced) = rule_create_edge {
            return forced;
        }

        let depth_diff = child_depth.abs_diff(parent.depth);
        for edge_rule in &self.edge_rules {
            if edge_rule.matches(parent.url.as_str(), target_str, depth_diff) {
                return edge_rule.action == EdgeAction::Create;
            }
        }

        match self.strategy {
            EdgeStrategy::All => true,
            EdgeStrategy::NewOnly => just_created,
            EdgeStrategy::MaxInDegree(bound) => graph.in_degree(&child_id) < bound,
            EdgeStrategy::SameDepthOnly => parent.depth == child_depth,
            EdgeStrategy::DeeperOnly => parent.depth < child_depth,
            EdgeStrategy::FirstEncounterOnly => graph.in_degree(&child_id) == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::UrlRule;

    struct Fixture {
        graph: Graph,
        scheduler: Scheduler,
        processor: LinkProcessor,
        root: NodeId,
    }

    fn fixture_with(
        rules: Vec<UrlRule>,
        edge_rules: Vec<EdgeRule>,
        strategy: EdgeStrategy,
    ) -> Fixture {
        let base = Url::parse("https://example.com/").unwrap();
        let url_rules = Arc::new(UrlRules::new(rules));

        let processor = LinkProcessor::new(
            DomainFilter::same_domain(&base),
            PathFilter::default(),
            url_rules.clone(),
            edge_rules,
            strategy,
            NodeDeps::standard(),
        );

        let mut graph = Graph::new();
        let mut scheduler = Scheduler::new(url_rules);

        let mut root = Node::new(base, 0, None);
        scheduler.add_node(&mut root);
        let root_id = graph.add_node(root, false);
        // root is being scanned, so it is no longer queued
        let _ = scheduler.get_next();

        Fixture {
            graph,
            scheduler,
            processor,
            root: root_id,
        }
    }

    fn fixture(strategy: EdgeStrategy) -> Fixture {
        fixture_with(Vec::new(), Vec::new(), strategy)
    }

    fn links(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn admits_internal_links_and_creates_edges() {
        let mut f = fixture(EdgeStrategy::All);

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/a", "/b", "https://elsewhere.org/x"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        // external link rejected by the domain filter
        assert_eq!(admitted, 2);
        assert_eq!(f.graph.node_count(), 3);
        assert_eq!(f.graph.edge_count(), 2);
        assert_eq!(f.scheduler.size(), 2);

        let child = f.graph.get_node_by_url("https://example.com/a").unwrap();
        assert_eq!(child.depth, 1);
        assert!(!child.scanned);
    }

    #[test]
    fn special_and_invalid_links_are_dropped() {
        let mut f = fixture(EdgeStrategy::All);

        let admitted = f.processor.process_links(
            f.root,
            &links(&["mailto:x@example.com", "javascript:void(0)", "#frag"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 0);
        assert_eq!(f.graph.node_count(), 1);
    }

    #[test]
    fn ssrf_targets_never_enter_the_scheduler() {
        let mut f = fixture(EdgeStrategy::All);

        // the domain filter wildcard is irrelevant; the security check runs
        // before anything else admits the url
        let admitted = f.processor.process_links(
            f.root,
            &links(&["http://169.254.169.254/latest/meta-data"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 0);
        assert!(!f.scheduler.has_url("http://169.254.169.254/latest/meta-data"));
    }

    #[test]
    fn parent_without_edge_permission_is_inert() {
        let mut f = fixture(EdgeStrategy::All);
        f.graph.get_node_mut(&f.root).unwrap().can_create_edges = false;

        let admitted =
            f.processor
                .process_links(f.root, &links(&["/a"]), &mut f.graph, &mut f.scheduler);

        assert_eq!(admitted, 0);
        assert_eq!(f.graph.node_count(), 1);
    }

    #[test]
    fn duplicate_links_collapse() {
        let mut f = fixture(EdgeStrategy::All);

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/a", "/a", "/a#section"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 1);
        assert_eq!(f.graph.node_count(), 2);
        assert_eq!(f.graph.edge_count(), 1);
    }

    #[test]
    fn rule_should_scan_false_without_create_edge_drops_link() {
        let mut f = fixture_with(
            vec![UrlRule::new("/admin/").unwrap().with_should_scan(false)],
            Vec::new(),
            EdgeStrategy::All,
        );

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/admin/login"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 0);
        assert!(f.graph.get_node_by_url("https://example.com/admin/login").is_none());
    }

    #[test]
    fn rule_create_edge_keeps_unscanned_node() {
        let mut f = fixture_with(
            vec![UrlRule::new("/admin/")
                .unwrap()
                .with_should_scan(false)
                .with_create_edge(true)],
            Vec::new(),
            EdgeStrategy::All,
        );

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/admin/login"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 1);
        let node = f
            .graph
            .get_node_by_url("https://example.com/admin/login")
            .unwrap();
        assert!(!node.should_scan);
        assert!(!node.scanned);
        assert_eq!(f.graph.edge_count(), 1);
        // never fetched
        assert_eq!(f.scheduler.size(), 0);
    }

    #[test]
    fn rule_create_edge_false_overrides_strategy() {
        let mut f = fixture_with(
            vec![UrlRule::new("/no-edge/").unwrap().with_create_edge(false)],
            Vec::new(),
            EdgeStrategy::All,
        );

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/no-edge/a"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        // node admitted and scheduled, but no edge
        assert_eq!(admitted, 1);
        assert_eq!(f.graph.edge_count(), 0);
        assert_eq!(f.scheduler.size(), 1);
    }

    #[test]
    fn explicit_scan_decisions_override_rules_and_filters() {
        let mut f = fixture_with(
            vec![UrlRule::new("/blocked").unwrap().with_should_scan(false)],
            Vec::new(),
            EdgeStrategy::All,
        );

        let root = f.graph.get_node_mut(&f.root).unwrap();
        let mut decisions = serde_json::Map::new();
        decisions.insert("/blocked".to_string(), Value::Bool(true));
        decisions.insert(
            "https://elsewhere.org/x".to_string(),
            Value::Bool(true),
        );
        root.user_data
            .insert("explicit_scan_decisions".to_string(), Value::Object(decisions));

        let admitted = f.processor.process_links(
            f.root,
            &links(&["/blocked", "https://elsewhere.org/x"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(admitted, 2);
        assert!(f.graph.has_url("https://example.com/blocked"));
        assert!(f.graph.has_url("https://elsewhere.org/x"));
    }

    #[test]
    fn child_priorities_are_honored() {
        let mut f = fixture(EdgeStrategy::All);

        let root = f.graph.get_node_mut(&f.root).unwrap();
        let mut priorities = serde_json::Map::new();
        priorities.insert("/vip".to_string(), Value::from(9u64));
        root.user_data
            .insert("child_priorities".to_string(), Value::Object(priorities));

        f.processor.process_links(
            f.root,
            &links(&["/plain", "/vip"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        let vip_id = f.graph.node_id_for_url("https://example.com/vip").unwrap();
        assert_eq!(f.scheduler.get_next(), Some(vip_id));
    }

    #[test]
    fn new_only_forms_a_forest_on_a_clique() {
        let mut f = fixture(EdgeStrategy::NewOnly);

        // every page links to every page: process the same ten links from
        // several parents
        let all: Vec<String> = (0..10)
            .map(|i| format!("https://example.com/p{i}"))
            .collect();

        f.processor
            .process_links(f.root, &all, &mut f.graph, &mut f.scheduler);

        let ids: Vec<NodeId> = (0..10)
            .map(|i| {
                f.graph
                    .node_id_for_url(&format!("https://example.com/p{i}"))
                    .unwrap()
            })
            .collect();

        for id in ids {
            f.processor
                .process_links(id, &all, &mut f.graph, &mut f.scheduler);
        }

        // forest property: |edges| <= |nodes| - 1
        assert!(f.graph.edge_count() <= f.graph.node_count() - 1);
    }

    #[test]
    fn first_encounter_only_caps_in_degree_at_one() {
        let mut f = fixture(EdgeStrategy::FirstEncounterOnly);

        f.processor
            .process_links(f.root, &links(&["/a", "/b"]), &mut f.graph, &mut f.scheduler);

        let a = f.graph.node_id_for_url("https://example.com/a").unwrap();
        f.processor
            .process_links(a, &links(&["/b"]), &mut f.graph, &mut f.scheduler);

        let b = f.graph.node_id_for_url("https://example.com/b").unwrap();
        assert_eq!(f.graph.in_degree(&b), 1);
    }

    #[test]
    fn max_in_degree_bounds_edges() {
        let mut f = fixture(EdgeStrategy::MaxInDegree(2));

        f.processor.process_links(
            f.root,
            &links(&["/a", "/b", "/c"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        let target = "https://example.com/shared";
        for parent_path in ["/a", "/b", "/c"] {
            let parent = f
                .graph
                .node_id_for_url(&format!("https://example.com{parent_path}"))
                .unwrap();
            f.processor.process_links(
                parent,
                &links(&[target]),
                &mut f.graph,
                &mut f.scheduler,
            );
        }

        let shared = f.graph.node_id_for_url(target).unwrap();
        assert_eq!(f.graph.in_degree(&shared), 2);
    }

    #[test]
    fn deeper_only_suppresses_back_edges() {
        let mut f = fixture(EdgeStrategy::DeeperOnly);

        f.processor
            .process_links(f.root, &links(&["/a"]), &mut f.graph, &mut f.scheduler);
        let a = f.graph.node_id_for_url("https://example.com/a").unwrap();

        // a -> root points shallower, so no edge
        f.processor.process_links(
            a,
            &links(&["https://example.com/"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(f.graph.edge_count(), 1);
    }

    #[test]
    fn edge_rule_skip_wins_over_strategy() {
        let mut f = fixture_with(
            Vec::new(),
            vec![EdgeRule::new(".*", "/tracked", None, EdgeAction::Skip).unwrap()],
            EdgeStrategy::All,
        );

        f.processor.process_links(
            f.root,
            &links(&["/tracked", "/plain"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(f.graph.node_count(), 3);
        assert_eq!(f.graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn async_variant_matches_sync_semantics() {
        let mut f = fixture(EdgeStrategy::All);

        let many: Vec<String> = (0..120)
            .map(|i| format!("/page/{i}"))
            .collect();

        let admitted = f
            .processor
            .process_links_async(f.root, &many, &mut f.graph, &mut f.scheduler)
            .await;

        assert_eq!(admitted, 120);
        assert_eq!(f.graph.edge_count(), 120);
    }

    #[test]
    fn circular_references_do_not_duplicate() {
        let mut f = fixture(EdgeStrategy::All);

        f.processor
            .process_links(f.root, &links(&["/a"]), &mut f.graph, &mut f.scheduler);
        let a = f.graph.node_id_for_url("https://example.com/a").unwrap();

        f.processor.process_links(
            a,
            &links(&["https://example.com/"]),
            &mut f.graph,
            &mut f.scheduler,
        );

        assert_eq!(f.graph.node_count(), 2);
        // back edge exists, but the root was not re-queued
        assert_eq!(f.graph.edge_count(), 2);
        assert_eq!(f.scheduler.size(), 1);
    }
}
