use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::fact::Signature;

/// Tracks which facts were introduced by which named source. A source is
/// any caller-chosen label (file path, URL, string id). Multiple sources
/// may introduce the same fact; the fact stays asserted until every source
/// that introduced it has been removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    by_source: HashMap<String, HashSet<Signature>>,
    by_signature: HashMap<Signature, HashSet<String>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source` introduced `signature`. Returns true when this
    /// is the first source holding a reference to the signature. A repeat
    /// (signature, source) pair is a no-op returning false.
    pub fn record(&mut self, signature: Signature, source: &str) -> bool {
        let sources = self.by_signature.entry(signature).or_default();
        let first_ref = sources.is_empty();
        if sources.insert(source.to_string()) {
            self.by_source
                .entry(source.to_string())
                .or_default()
                .insert(signature);
        }
        first_ref
    }

    /// Drop every reference held by `source`. Returns the signatures whose
    /// reference count reached zero, i.e. the facts that must now be
    /// retracted from the network. Unknown sources yield nothing.
    pub fn drop_source(&mut self, source: &str) -> Vec<Signature> {
        let Some(signatures) = self.by_source.remove(source) else {
            return Vec::new();
        };
        let mut orphaned = Vec::new();
        for sig in signatures {
            if let Some(holders) = self.by_signature.get_mut(&sig) {
                holders.remove(source);
                if holders.is_empty() {
                    self.by_signature.remove(&sig);
                    orphaned.push(sig);
                }
            }
        }
        orphaned
    }

    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_source.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn facts_of(&self, source: &str) -> Vec<Signature> {
        let mut sigs: Vec<Signature> = self
            .by_source
            .get(source)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        sigs.sort();
        sigs
    }

    pub fn sources_of(&self, signature: Signature) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_signature
            .get(&signature)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// True when at least one source still references the signature.
    pub fn is_asserted(&self, signature: Signature) -> bool {
        self.by_signature.contains_key(&signature)
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.by_source.contains_key(source)
    }
}
