use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::fact::Fact;
use crate::network::NodeId;

/// A constraint set: attribute/value pairs a fact must carry to enter an
/// alpha memory. Kept sorted by attribute name so its serialization is
/// canonical.
pub type ConstraintSet = Vec<(String, String)>;

pub fn normalize_constraints(mut constraints: ConstraintSet) -> ConstraintSet {
    constraints.sort();
    constraints.dedup();
    constraints
}

pub fn constraint_key(constraints: &[(String, String)]) -> String {
    let mut key = String::new();
    for (attr, value) in constraints {
        key.push_str(attr);
        key.push('\u{1}');
        key.push_str(value);
        key.push('\u{2}');
    }
    key
}

/// Above this many candidate attributes the 2^k subset enumeration would
/// cost more than a scan, so dispatch falls back to testing every memory.
const MAX_SUBSET_ATTRS: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphaStats {
    pub lookups: u64,
    pub hits: u64,
    pub fallback_scans: u64,
}

#[derive(Debug, Clone)]
struct AlphaEntry {
    constraints: ConstraintSet,
    node: NodeId,
}

/// Dispatch index over all live alpha memories. Memories are keyed by the
/// canonical serialization of their constraint set; routing a fact
/// enumerates the subsets of the fact's constraint-relevant attributes and
/// probes each key, so the cost is independent of how many memories exist.
#[derive(Debug, Clone, Default)]
pub struct AlphaIndex {
    by_key: HashMap<String, AlphaEntry>,
    /// Attribute name -> number of live constraint sets mentioning it.
    /// Only these attributes can influence dispatch.
    constraint_attrs: HashMap<String, usize>,
    pub stats: AlphaStats,
}

impl AlphaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, constraints: &[(String, String)]) -> Option<NodeId> {
        self.by_key
            .get(&constraint_key(constraints))
            .map(|entry| entry.node)
    }

    pub fn register(&mut self, constraints: ConstraintSet, node: NodeId) {
        let key = constraint_key(&constraints);
        if self.by_key.contains_key(&key) {
            return;
        }
        for (attr, _) in &constraints {
            *self.constraint_attrs.entry(attr.clone()).or_insert(0) += 1;
        }
        self.by_key.insert(key, AlphaEntry { constraints, node });
    }

    pub fn unregister(&mut self, constraints: &[(String, String)]) {
        let key = constraint_key(constraints);
        if self.by_key.remove(&key).is_none() {
            return;
        }
        for (attr, _) in constraints {
            if let Some(count) = self.constraint_attrs.get_mut(attr) {
                *count -= 1;
                if *count == 0 {
                    self.constraint_attrs.remove(attr);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Every alpha memory whose constraint set is satisfied by `fact`.
    pub fn matching(&mut self, fact: &Fact) -> Vec<NodeId> {
        self.stats.lookups += 1;

        let selected: Vec<(&str, &str)> = fact
            .iter()
            .filter(|(attr, _)| self.constraint_attrs.contains_key(*attr))
            .collect();

        if selected.len() > MAX_SUBSET_ATTRS {
            return self.matching_by_scan(fact);
        }

        let mut matches = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let subset_count: u32 = 1 << selected.len();
        let mut key = String::new();
        for mask in 0..subset_count {
            key.clear();
            for (bit, (attr, value)) in selected.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    key.push_str(attr);
                    key.push('\u{1}');
                    key.push_str(value);
                    key.push('\u{2}');
                }
            }
            if let Some(entry) = self.by_key.get(&key) {
                if seen.insert(entry.node) {
                    matches.push(entry.node);
                }
            }
        }
        self.stats.hits += matches.len() as u64;
        matches
    }

    fn matching_by_scan(&mut self, fact: &Fact) -> Vec<NodeId> {
        self.stats.fallback_scans += 1;
        let mut matches: Vec<NodeId> = self
            .by_key
            .values()
            .filter(|entry| fact.satisfies(&entry.constraints))
            .map(|entry| entry.node)
            .collect();
        matches.sort_by_key(|n| n.index());
        matches.dedup();
        self.stats.hits += matches.len() as u64;
        matches
    }
}
