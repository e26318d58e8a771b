use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

/// Content-addressed identity of a fact: FNV-1a over the canonical
/// (sorted) attribute/value pairs. Stable across processes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Signature(pub u64);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A working-memory element: an unordered attribute/value map with a
/// distinguished `type` attribute. All values are strings at this layer;
/// numeric and boolean semantics live in the builtin predicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fact {
    attrs: BTreeMap<String, String>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fact of the given type from attribute/value pairs.
    pub fn of(fact_type: &str, pairs: &[(&str, &str)]) -> Self {
        let mut fact = Self::new();
        fact.set("type", fact_type);
        for (k, v) in pairs {
            fact.set(*k, *v);
        }
        fact
    }

    pub fn set(&mut self, attr: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(attr.into(), value.into());
    }

    pub fn get(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr).map(String::as_str)
    }

    pub fn fact_type(&self) -> Option<&str> {
        self.get("type")
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Attribute/value pairs in canonical (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// True when every (attr, value) constraint is present in this fact.
    /// Unmentioned attributes are ignored, so a fact with extra attributes
    /// still matches.
    pub fn satisfies(&self, constraints: &[(String, String)]) -> bool {
        constraints
            .iter()
            .all(|(k, v)| self.get(k) == Some(v.as_str()))
    }

    pub fn signature(&self) -> Signature {
        let mut hasher = FnvHasher::default();
        for (k, v) in &self.attrs {
            hasher.write_usize(k.len());
            hasher.write(k.as_bytes());
            hasher.write_usize(v.len());
            hasher.write(v.as_bytes());
        }
        Signature(hasher.finish())
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.attrs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

/// Split a comma-separated list attribute (`chain`, `keys`) into items.
/// Identifiers never contain commas, so no quoting is needed.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join identifiers into the list encoding used by `chain`/`keys`.
pub fn join_list(items: &[String]) -> String {
    items.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_independent() {
        let mut a = Fact::new();
        a.set("type", "subsumption");
        a.set("sub", "Dog");
        a.set("sup", "Mammal");

        let mut b = Fact::new();
        b.set("sup", "Mammal");
        b.set("sub", "Dog");
        b.set("type", "subsumption");

        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_distinguishes_attribute_boundaries() {
        let mut a = Fact::new();
        a.set("ab", "c");
        let mut b = Fact::new();
        b.set("a", "bc");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn satisfies_ignores_extra_attributes() {
        let fact = Fact::of("role_assertion", &[
            ("subject", "alice"),
            ("role", "hasParent"),
            ("object", "bob"),
        ]);
        let constraints = vec![("type".to_string(), "role_assertion".to_string())];
        assert!(fact.satisfies(&constraints));
        let wrong = vec![("role".to_string(), "hasChild".to_string())];
        assert!(!fact.satisfies(&wrong));
    }

    #[test]
    fn list_round_trip() {
        let items = vec!["hasParent".to_string(), "hasParent".to_string()];
        assert_eq!(split_list(&join_list(&items)), items);
    }
}
