//! Conversational turn records and the per-session memory graph.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{Ambiguity, Assertion, Entities, TimelineEvent};

lazy_static! {
    /// Session identifiers: 1-255 characters, no whitespace or path separators.
    static ref SESSION_ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.:-]{1,255}$").unwrap();
}

/// Check a session identifier before it reaches a store or cache key.
pub fn is_valid_session_id(session_id: &str) -> bool {
    SESSION_ID_PATTERN.is_match(session_id)
}

/// One tracked conversational turn.
///
/// Unique on `(session_id, turn_number)`. Re-tracking a turn overwrites the
/// annotations and `updated_at` but keeps `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub ambiguities: Vec<Ambiguity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Context {
    /// A fresh, unannotated turn stamped with the current time.
    pub fn new(session_id: impl Into<String>, turn_number: u32, user_input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            session_id: session_id.into(),
            turn_number,
            user_input: user_input.into(),
            entities: Entities::new(),
            topics: Vec::new(),
            timeline: Vec::new(),
            assertions: Vec::new(),
            ambiguities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the turn's annotations.
    pub fn with_annotations(mut self, annotations: TurnAnnotations) -> Self {
        self.entities = annotations.entities;
        self.topics = annotations.topics;
        self.timeline = annotations.timeline;
        self.assertions = annotations.assertions;
        self.ambiguities = annotations.ambiguities;
        self
    }
}

/// Annotations produced by an external extraction service for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnAnnotations {
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub ambiguities: Vec<Ambiguity>,
}

/// Kind of a memory graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Entity,
    Topic,
}

/// An entity or topic seen in at least one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub mentions: u32,
    pub first_turn: u32,
    pub last_turn: u32,
}

/// Weighted, undirected relation between two nodes. `from <= to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub weight: f64,
}

/// Edge type linking nodes mentioned in the same turn.
pub const CO_OCCURRENCE: &str = "co_occurrence";

/// Accumulated entity/topic graph for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryGraph {
    pub session_id: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, GraphNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Turn numbers already folded into the graph
    #[serde(default)]
    pub turns: BTreeSet<u32>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryGraph {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            turns: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a graph from scratch out of a session's stored turns.
    pub fn from_turns<'a>(
        session_id: impl Into<String>,
        turns: impl IntoIterator<Item = &'a Context>,
    ) -> Self {
        let mut graph = Self::new(session_id);
        for turn in turns {
            graph.absorb(turn);
        }
        graph
    }

    pub fn has_turn(&self, turn_number: u32) -> bool {
        self.turns.contains(&turn_number)
    }

    /// Fold one turn into the graph.
    ///
    /// Returns `false` without touching the graph when the turn was already
    /// absorbed; callers rebuild with [`MemoryGraph::from_turns`] in that case.
    pub fn absorb(&mut self, turn: &Context) -> bool {
        if !self.turns.insert(turn.turn_number) {
            return false;
        }

        let keys = node_keys(turn);
        let t = turn.turn_number;

        for (key, kind) in &keys {
            let node = self.nodes.entry(key.clone()).or_insert(GraphNode {
                kind: *kind,
                mentions: 0,
                first_turn: t,
                last_turn: t,
            });
            node.mentions += 1;
            node.first_turn = node.first_turn.min(t);
            node.last_turn = node.last_turn.max(t);
        }

        for (i, (a, _)) in keys.iter().enumerate() {
            for (b, _) in &keys[i + 1..] {
                self.bump_edge(a, b);
            }
        }

        self.updated_at = Utc::now();
        true
    }

    /// Weight of the co-occurrence edge between two nodes, in either order.
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let (from, to) = ordered(a, b);
        self.edges
            .iter()
            .find(|e| e.from == from && e.to == to && e.edge_type == CO_OCCURRENCE)
            .map(|e| e.weight)
    }

    fn bump_edge(&mut self, a: &str, b: &str) {
        let (from, to) = ordered(a, b);
        match self
            .edges
            .iter_mut()
            .find(|e| e.from == from && e.to == to && e.edge_type == CO_OCCURRENCE)
        {
            Some(edge) => edge.weight += 1.0,
            None => self.edges.push(Edge {
                from: from.to_string(),
                to: to.to_string(),
                edge_type: CO_OCCURRENCE.to_string(),
                weight: 1.0,
            }),
        }
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Distinct node keys of a turn: entities first, then topics.
fn node_keys(turn: &Context) -> Vec<(String, NodeKind)> {
    let mut seen = BTreeSet::new();
    let entities = turn.entities.keys().map(|k| (k, NodeKind::Entity));
    let topics = turn.topics.iter().map(|t| (t, NodeKind::Topic));

    entities
        .chain(topics)
        .filter(|(key, _)| !key.is_empty() && seen.insert(*key))
        .map(|(key, kind)| (key.clone(), kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn turn(n: u32, entities: &[&str], topics: &[&str]) -> Context {
        let mut ctx = Context::new("session-1", n, "input");
        for e in entities {
            ctx.entities.insert(e.to_string(), Value::Bool(true));
        }
        ctx.topics = topics.iter().map(|t| t.to_string()).collect();
        ctx
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("user-42:chat_1.a"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id(&"a".repeat(256)));
    }

    #[test]
    fn test_absorb_creates_nodes_and_edges() {
        let mut graph = MemoryGraph::new("session-1");
        assert!(graph.absorb(&turn(1, &["paris"], &["travel", "hotels"])));

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes["paris"].kind, NodeKind::Entity);
        assert_eq!(graph.nodes["travel"].kind, NodeKind::Topic);
        assert_eq!(graph.edges.len(), 3);
        assert_eq!(graph.edge_weight("travel", "paris"), Some(1.0));
    }

    #[test]
    fn test_co_occurrence_weight_accumulates() {
        let mut graph = MemoryGraph::new("session-1");
        graph.absorb(&turn(1, &["paris"], &["travel"]));
        graph.absorb(&turn(2, &["paris"], &["travel"]));
        graph.absorb(&turn(4, &["paris"], &[]));

        let node = &graph.nodes["paris"];
        assert_eq!(node.mentions, 3);
        assert_eq!(node.first_turn, 1);
        assert_eq!(node.last_turn, 4);
        assert_eq!(graph.edge_weight("paris", "travel"), Some(2.0));
    }

    #[test]
    fn test_absorb_same_turn_twice_is_refused() {
        let mut graph = MemoryGraph::new("session-1");
        assert!(graph.absorb(&turn(1, &["paris"], &[])));
        assert!(!graph.absorb(&turn(1, &["london"], &[])));
        assert!(!graph.nodes.contains_key("london"));
    }

    #[test]
    fn test_duplicate_keys_in_one_turn_count_once() {
        let mut graph = MemoryGraph::new("session-1");
        graph.absorb(&turn(1, &["rust"], &["rust", "rust"]));
        assert_eq!(graph.nodes["rust"].mentions, 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_from_turns_matches_incremental() {
        let turns = vec![turn(1, &["a"], &["x"]), turn(2, &["a", "b"], &[])];
        let rebuilt = MemoryGraph::from_turns("session-1", &turns);

        let mut incremental = MemoryGraph::new("session-1");
        for t in &turns {
            incremental.absorb(t);
        }

        assert_eq!(rebuilt.nodes, incremental.nodes);
        assert_eq!(rebuilt.edges, incremental.edges);
        assert_eq!(rebuilt.turns, incremental.turns);
    }
}
