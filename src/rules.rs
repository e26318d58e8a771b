use serde::{Deserialize, Serialize};

use crate::alpha::{ConstraintSet, normalize_constraints};
use crate::builtins::{CmpOp, Expr};
use crate::fact::Fact;

/// One attribute slot of a left-hand-side pattern: either a concrete value
/// (becomes an alpha constraint) or a variable binding (`?`-prefixed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Const(String),
    Var(String),
}

/// A single LHS pattern over one fact shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub attrs: Vec<(String, Slot)>,
}

impl Pattern {
    pub fn of(fact_type: &str) -> Self {
        Self {
            attrs: vec![("type".to_string(), Slot::Const(fact_type.to_string()))],
        }
    }

    pub fn with(mut self, attr: &str, slot: Slot) -> Self {
        self.attrs.push((attr.to_string(), slot));
        self
    }

    pub fn bind(self, attr: &str, var: &str) -> Self {
        self.with(attr, Slot::Var(var.to_string()))
    }

    pub fn lit(self, attr: &str, value: &str) -> Self {
        self.with(attr, Slot::Const(value.to_string()))
    }

    /// The concrete attribute/value pairs, i.e. the alpha constraint set.
    pub fn constraints(&self) -> ConstraintSet {
        normalize_constraints(
            self.attrs
                .iter()
                .filter_map(|(attr, slot)| match slot {
                    Slot::Const(v) => Some((attr.clone(), v.clone())),
                    Slot::Var(_) => None,
                })
                .collect(),
        )
    }

    pub fn vars(&self) -> Vec<String> {
        let mut vars: Vec<String> = self
            .attrs
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Var(v) => Some(v.clone()),
                Slot::Const(_) => None,
            })
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Extract variable bindings from a fact already known to satisfy the
    /// constraint set. Returns None when a variable attribute is absent or
    /// a repeated variable binds two different values.
    pub fn bindings(&self, fact: &Fact) -> Option<Vec<(String, String)>> {
        let mut out: Vec<(String, String)> = Vec::new();
        for (attr, slot) in &self.attrs {
            match slot {
                Slot::Const(v) => {
                    if fact.get(attr) != Some(v.as_str()) {
                        return None;
                    }
                }
                Slot::Var(name) => {
                    let value = fact.get(attr)?;
                    if let Some((_, bound)) = out.iter().find(|(n, _)| n == name) {
                        if bound != value {
                            return None;
                        }
                    } else {
                        out.push((name.clone(), value.to_string()));
                    }
                }
            }
        }
        Some(out)
    }
}

/// RHS fact template: constants plus variables substituted from the firing
/// token's bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactTemplate {
    pub attrs: Vec<(String, Slot)>,
}

impl FactTemplate {
    pub fn of(fact_type: &str) -> Self {
        Self {
            attrs: vec![("type".to_string(), Slot::Const(fact_type.to_string()))],
        }
    }

    pub fn set(mut self, attr: &str, value: &str) -> Self {
        self.attrs
            .push((attr.to_string(), Slot::Const(value.to_string())));
        self
    }

    pub fn subst(mut self, attr: &str, var: &str) -> Self {
        self.attrs
            .push((attr.to_string(), Slot::Var(var.to_string())));
        self
    }

    /// None when a referenced variable is unbound; such a firing silently
    /// produces nothing, matching the malformed-axiom policy.
    pub fn instantiate(&self, bindings: &dyn Fn(&str) -> Option<String>) -> Option<Fact> {
        let mut fact = Fact::new();
        for (attr, slot) in &self.attrs {
            match slot {
                Slot::Const(v) => fact.set(attr.clone(), v.clone()),
                Slot::Var(name) => fact.set(attr.clone(), bindings(name)?),
            }
        }
        Some(fact)
    }
}

/// What a production does on a full match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleAction {
    /// Assert the instantiated facts with the firing token as support.
    Assert(Vec<FactTemplate>),
    /// Template meta-rules: install a specialized production generated
    /// from the firing bindings.
    InstallChain,
    InstallHasKey,
    InstallIntersection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    pub patterns: Vec<Pattern>,
    pub filters: Vec<Expr>,
    pub action: RuleAction,
}

impl RuleDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            patterns: Vec::new(),
            filters: Vec::new(),
            action: RuleAction::Assert(Vec::new()),
        }
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn assert(mut self, template: FactTemplate) -> Self {
        match &mut self.action {
            RuleAction::Assert(templates) => templates.push(template),
            _ => self.action = RuleAction::Assert(vec![template]),
        }
        self
    }

    pub fn action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }
}

fn ne(a: &str, b: &str) -> Expr {
    Expr::Cmp(
        CmpOp::Ne,
        Box::new(Expr::Var(a.to_string())),
        Box::new(Expr::Var(b.to_string())),
    )
}

/// The built-in OWL 2 RL rule set. Templates for list-valued axioms
/// (property chains, hasKey, intersection membership) install specialized
/// productions at runtime; everything else is an ordinary production whose
/// first pattern matches the axiom fact.
pub fn owl_rules() -> Vec<RuleDef> {
    let mut rules = Vec::new();

    // Class hierarchy.
    rules.push(
        RuleDef::new("scm-sco")
            .pattern(Pattern::of("subsumption").bind("sub", "?a").bind("sup", "?b"))
            .pattern(Pattern::of("subsumption").bind("sub", "?b").bind("sup", "?c"))
            .filter(ne("?a", "?c"))
            .assert(FactTemplate::of("subsumption").subst("sub", "?a").subst("sup", "?c")),
    );
    rules.push(
        RuleDef::new("cax-sco")
            .pattern(Pattern::of("subsumption").bind("sub", "?a").bind("sup", "?b"))
            .pattern(Pattern::of("instance_of").bind("individual", "?x").bind("concept", "?a"))
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?b")),
    );
    rules.push(
        RuleDef::new("scm-eqc1")
            .pattern(
                Pattern::of("equivalence")
                    .bind("concept1", "?a")
                    .bind("concept2", "?b"),
            )
            .assert(FactTemplate::of("subsumption").subst("sub", "?a").subst("sup", "?b"))
            .assert(FactTemplate::of("subsumption").subst("sub", "?b").subst("sup", "?a")),
    );
    rules.push(
        RuleDef::new("scm-eqc2")
            .pattern(Pattern::of("subsumption").bind("sub", "?a").bind("sup", "?b"))
            .pattern(Pattern::of("subsumption").bind("sub", "?b").bind("sup", "?a"))
            .filter(ne("?a", "?b"))
            .assert(
                FactTemplate::of("equivalence")
                    .subst("concept1", "?a")
                    .subst("concept2", "?b"),
            ),
    );

    // Property hierarchy.
    rules.push(
        RuleDef::new("prp-spo1")
            .pattern(Pattern::of("sub_property").bind("sub", "?p").bind("sup", "?q"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(
                FactTemplate::of("role_assertion")
                    .subst("subject", "?x")
                    .subst("role", "?q")
                    .subst("object", "?y"),
            ),
    );
    for (name, from, to) in [("prp-eqp1", "?p", "?q"), ("prp-eqp2", "?q", "?p")] {
        rules.push(
            RuleDef::new(name)
                .pattern(
                    Pattern::of("equivalent_property")
                        .bind("property1", "?p")
                        .bind("property2", "?q"),
                )
                .pattern(
                    Pattern::of("role_assertion")
                        .bind("subject", "?x")
                        .bind("role", from)
                        .bind("object", "?y"),
                )
                .assert(
                    FactTemplate::of("role_assertion")
                        .subst("subject", "?x")
                        .subst("role", to)
                        .subst("object", "?y"),
                ),
        );
    }

    // Property characteristics.
    rules.push(
        RuleDef::new("prp-trp")
            .pattern(Pattern::of("transitive_property").bind("property", "?p"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?y")
                    .bind("role", "?p")
                    .bind("object", "?z"),
            )
            .filter(ne("?x", "?z"))
            .assert(
                FactTemplate::of("role_assertion")
                    .subst("subject", "?x")
                    .subst("role", "?p")
                    .subst("object", "?z"),
            ),
    );
    rules.push(
        RuleDef::new("prp-symp")
            .pattern(Pattern::of("symmetric_property").bind("property", "?p"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(
                FactTemplate::of("role_assertion")
                    .subst("subject", "?y")
                    .subst("role", "?p")
                    .subst("object", "?x"),
            ),
    );
    for (name, match_prop, out_prop) in [("prp-inv1", "?p", "?q"), ("prp-inv2", "?q", "?p")] {
        rules.push(
            RuleDef::new(name)
                .pattern(
                    Pattern::of("inverse_properties")
                        .bind("property1", "?p")
                        .bind("property2", "?q"),
                )
                .pattern(
                    Pattern::of("role_assertion")
                        .bind("subject", "?x")
                        .bind("role", match_prop)
                        .bind("object", "?y"),
                )
                .assert(
                    FactTemplate::of("role_assertion")
                        .subst("subject", "?y")
                        .subst("role", out_prop)
                        .subst("object", "?x"),
                ),
        );
    }
    rules.push(
        RuleDef::new("prp-fp")
            .pattern(Pattern::of("functional").bind("property", "?p"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y1"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y2"),
            )
            .filter(ne("?y1", "?y2"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?y1").subst("ind2", "?y2")),
    );
    rules.push(
        RuleDef::new("prp-ifp")
            .pattern(Pattern::of("inverse_functional").bind("property", "?p"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x1")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x2")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .filter(ne("?x1", "?x2"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?x1").subst("ind2", "?x2")),
    );

    // Domain and range, closed under the hierarchies.
    rules.push(
        RuleDef::new("prp-dom")
            .pattern(
                Pattern::of("property_domain")
                    .bind("property", "?p")
                    .bind("domain", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("prp-rng")
            .pattern(
                Pattern::of("property_range")
                    .bind("property", "?p")
                    .bind("range", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?y").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("scm-dom1")
            .pattern(
                Pattern::of("property_domain")
                    .bind("property", "?p")
                    .bind("domain", "?c"),
            )
            .pattern(Pattern::of("subsumption").bind("sub", "?c").bind("sup", "?d"))
            .assert(
                FactTemplate::of("property_domain")
                    .subst("property", "?p")
                    .subst("domain", "?d"),
            ),
    );
    rules.push(
        RuleDef::new("scm-dom2")
            .pattern(
                Pattern::of("property_domain")
                    .bind("property", "?q")
                    .bind("domain", "?c"),
            )
            .pattern(Pattern::of("sub_property").bind("sub", "?p").bind("sup", "?q"))
            .assert(
                FactTemplate::of("property_domain")
                    .subst("property", "?p")
                    .subst("domain", "?c"),
            ),
    );
    rules.push(
        RuleDef::new("scm-rng1")
            .pattern(
                Pattern::of("property_range")
                    .bind("property", "?p")
                    .bind("range", "?c"),
            )
            .pattern(Pattern::of("subsumption").bind("sub", "?c").bind("sup", "?d"))
            .assert(FactTemplate::of("property_range").subst("property", "?p").subst("range", "?d")),
    );
    rules.push(
        RuleDef::new("scm-rng2")
            .pattern(
                Pattern::of("property_range")
                    .bind("property", "?q")
                    .bind("range", "?c"),
            )
            .pattern(Pattern::of("sub_property").bind("sub", "?p").bind("sup", "?q"))
            .assert(FactTemplate::of("property_range").subst("property", "?p").subst("range", "?c")),
    );

    // Individual equality.
    rules.push(
        RuleDef::new("eq-sym")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?y").subst("ind2", "?x")),
    );
    rules.push(
        RuleDef::new("eq-trans")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .pattern(Pattern::of("same_as").bind("ind1", "?y").bind("ind2", "?z"))
            .filter(ne("?x", "?z"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?x").subst("ind2", "?z")),
    );
    rules.push(
        RuleDef::new("eq-rep-s")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?o"),
            )
            .assert(
                FactTemplate::of("role_assertion")
                    .subst("subject", "?y")
                    .subst("role", "?p")
                    .subst("object", "?o"),
            ),
    );
    rules.push(
        RuleDef::new("eq-rep-o")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?s")
                    .bind("role", "?p")
                    .bind("object", "?x"),
            )
            .assert(
                FactTemplate::of("role_assertion")
                    .subst("subject", "?s")
                    .subst("role", "?p")
                    .subst("object", "?y"),
            ),
    );
    rules.push(
        RuleDef::new("eq-rep-type")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?y").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("eq-diff1")
            .pattern(Pattern::of("same_as").bind("ind1", "?x").bind("ind2", "?y"))
            .pattern(
                Pattern::of("different_from")
                    .bind("ind1", "?x")
                    .bind("ind2", "?y"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "individuals asserted distinct and inferred equal")
                    .subst("ind1", "?x")
                    .subst("ind2", "?y"),
            ),
    );

    // Disjointness and complement.
    rules.push(
        RuleDef::new("cax-dw")
            .pattern(
                Pattern::of("disjoint_classes")
                    .bind("class1", "?c1")
                    .bind("class2", "?c2"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c1"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c2"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "individual belongs to disjoint classes")
                    .subst("individual", "?x")
                    .subst("class1", "?c1")
                    .subst("class2", "?c2"),
            ),
    );
    rules.push(
        RuleDef::new("cls-com")
            .pattern(
                Pattern::of("complement")
                    .bind("class", "?c")
                    .bind("complement_of", "?d"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?d"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "individual belongs to a class and its complement")
                    .subst("individual", "?x")
                    .subst("class1", "?c")
                    .subst("class2", "?d"),
            ),
    );

    // Restrictions.
    rules.push(
        RuleDef::new("cls-svf1")
            .pattern(
                Pattern::of("some_values_from")
                    .bind("restriction_class", "?c")
                    .bind("property", "?p")
                    .bind("filler", "?f"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?y")
                    .bind("concept", "?f"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("cls-svf2")
            .pattern(
                Pattern::of("some_values_from")
                    .bind("restriction_class", "?c")
                    .bind("property", "?p")
                    .lit("filler", "Thing"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("cls-avf")
            .pattern(
                Pattern::of("all_values_from")
                    .bind("restriction_class", "?c")
                    .bind("property", "?p")
                    .bind("filler", "?f"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?y").subst("concept", "?f")),
    );

    // Union and intersection membership over the decomposed member facts
    // the loader emits alongside the list-valued axiom.
    rules.push(
        RuleDef::new("cls-uni")
            .pattern(
                Pattern::of("union_member")
                    .bind("class", "?c")
                    .bind("member", "?m"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?m"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?c")),
    );
    rules.push(
        RuleDef::new("cls-int2")
            .pattern(
                Pattern::of("intersection_member")
                    .bind("class", "?c")
                    .bind("member", "?m"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .assert(FactTemplate::of("instance_of").subst("individual", "?x").subst("concept", "?m")),
    );

    // Max cardinality, unqualified.
    rules.push(
        RuleDef::new("cls-maxc1")
            .pattern(
                Pattern::of("max_cardinality")
                    .lit("cardinality", "0")
                    .bind("on_property", "?p")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "max cardinality 0 violated")
                    .subst("individual", "?x")
                    .subst("property", "?p"),
            ),
    );
    rules.push(
        RuleDef::new("cls-maxc2")
            .pattern(
                Pattern::of("max_cardinality")
                    .lit("cardinality", "1")
                    .bind("on_property", "?p")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y1"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y2"),
            )
            .filter(ne("?y1", "?y2"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?y1").subst("ind2", "?y2")),
    );

    // Max cardinality, qualified by on_class. The on_class=Thing variants
    // skip the filler membership check.
    rules.push(
        RuleDef::new("cls-maxqc1")
            .pattern(
                Pattern::of("max_qualified_cardinality")
                    .lit("cardinality", "0")
                    .bind("on_property", "?p")
                    .bind("on_class", "?q")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?y")
                    .bind("concept", "?q"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "max qualified cardinality 0 violated")
                    .subst("individual", "?x")
                    .subst("property", "?p"),
            ),
    );
    rules.push(
        RuleDef::new("cls-maxqc2")
            .pattern(
                Pattern::of("max_qualified_cardinality")
                    .lit("cardinality", "0")
                    .bind("on_property", "?p")
                    .lit("on_class", "Thing")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y"),
            )
            .assert(
                FactTemplate::of("inconsistency")
                    .set("message", "max qualified cardinality 0 violated")
                    .subst("individual", "?x")
                    .subst("property", "?p"),
            ),
    );
    rules.push(
        RuleDef::new("cls-maxqc3")
            .pattern(
                Pattern::of("max_qualified_cardinality")
                    .lit("cardinality", "1")
                    .bind("on_property", "?p")
                    .bind("on_class", "?q")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y1"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?y1")
                    .bind("concept", "?q"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y2"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?y2")
                    .bind("concept", "?q"),
            )
            .filter(ne("?y1", "?y2"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?y1").subst("ind2", "?y2")),
    );
    rules.push(
        RuleDef::new("cls-maxqc4")
            .pattern(
                Pattern::of("max_qualified_cardinality")
                    .lit("cardinality", "1")
                    .bind("on_property", "?p")
                    .lit("on_class", "Thing")
                    .bind("restriction_class", "?c"),
            )
            .pattern(
                Pattern::of("instance_of")
                    .bind("individual", "?x")
                    .bind("concept", "?c"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y1"),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .bind("role", "?p")
                    .bind("object", "?y2"),
            )
            .filter(ne("?y1", "?y2"))
            .assert(FactTemplate::of("same_as").subst("ind1", "?y1").subst("ind2", "?y2")),
    );

    // Template meta-rules: list-valued axioms become specialized
    // productions, one per axiom.
    rules.push(
        RuleDef::new("prp-spo2")
            .pattern(
                Pattern::of("property_chain")
                    .bind("chain", "?chain")
                    .bind("super", "?super"),
            )
            .action(RuleAction::InstallChain),
    );
    rules.push(
        RuleDef::new("prp-key")
            .pattern(Pattern::of("has_key").bind("class", "?class").bind("keys", "?keys"))
            .action(RuleAction::InstallHasKey),
    );
    rules.push(
        RuleDef::new("cls-int1")
            .pattern(
                Pattern::of("intersection")
                    .bind("class", "?class")
                    .bind("members", "?members"),
            )
            .action(RuleAction::InstallIntersection),
    );

    rules
}

/// Specialized production for one property-chain axiom. A chain of n
/// properties becomes n role patterns joined subject-to-object.
pub fn chain_rule(chain: &[String], sup: &str) -> Option<RuleDef> {
    if chain.is_empty() || sup.is_empty() {
        return None;
    }
    let mut name = String::from("prp-spo2");
    for link in chain {
        name.push('-');
        name.push_str(link);
    }
    name.push('-');
    name.push_str(sup);

    let mut rule = RuleDef::new(&name);
    for (i, link) in chain.iter().enumerate() {
        rule = rule.pattern(
            Pattern::of("role_assertion")
                .bind("subject", &format!("?v{i}"))
                .lit("role", link)
                .bind("object", &format!("?v{}", i + 1)),
        );
    }
    let rule = rule.assert(
        FactTemplate::of("role_assertion")
            .subst("subject", "?v0")
            .set("role", sup)
            .subst("object", &format!("?v{}", chain.len())),
    );
    Some(rule)
}

/// Specialized production for one hasKey axiom: two instances of the class
/// agreeing on every key property are the same individual.
pub fn has_key_rule(class: &str, keys: &[String]) -> Option<RuleDef> {
    if class.is_empty() || keys.is_empty() {
        return None;
    }
    let mut name = format!("prp-key-{class}");
    for key in keys {
        name.push('-');
        name.push_str(key);
    }

    let mut rule = RuleDef::new(&name)
        .pattern(Pattern::of("instance_of").bind("individual", "?x").lit("concept", class))
        .pattern(Pattern::of("instance_of").bind("individual", "?y").lit("concept", class));
    for (i, key) in keys.iter().enumerate() {
        let value_var = format!("?k{i}");
        rule = rule
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?x")
                    .lit("role", key)
                    .bind("object", &value_var),
            )
            .pattern(
                Pattern::of("role_assertion")
                    .bind("subject", "?y")
                    .lit("role", key)
                    .bind("object", &value_var),
            );
    }
    let rule = rule
        .filter(ne("?x", "?y"))
        .assert(FactTemplate::of("same_as").subst("ind1", "?x").subst("ind2", "?y"));
    Some(rule)
}

/// Specialized production for one intersection axiom: membership in every
/// member class implies membership in the defined class.
pub fn intersection_rule(class: &str, members: &[String]) -> Option<RuleDef> {
    if class.is_empty() || members.is_empty() {
        return None;
    }
    let mut rule = RuleDef::new(&format!("cls-int1-{class}"));
    for member in members {
        rule = rule.pattern(
            Pattern::of("instance_of")
                .bind("individual", "?x")
                .lit("concept", member),
        );
    }
    let rule = rule.assert(
        FactTemplate::of("instance_of")
            .subst("individual", "?x")
            .set("concept", class),
    );
    Some(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_constraints_are_the_const_slots() {
        let p = Pattern::of("role_assertion")
            .bind("subject", "?x")
            .lit("role", "hasParent")
            .bind("object", "?y");
        assert_eq!(
            p.constraints(),
            vec![
                ("role".to_string(), "hasParent".to_string()),
                ("type".to_string(), "role_assertion".to_string()),
            ]
        );
        assert_eq!(p.vars(), vec!["?x".to_string(), "?y".to_string()]);
    }

    #[test]
    fn repeated_variable_requires_equal_values() {
        let p = Pattern::of("role_assertion")
            .bind("subject", "?x")
            .bind("role", "?r")
            .bind("object", "?x");
        let reflexive = Fact::of("role_assertion", &[
            ("subject", "a"),
            ("role", "knows"),
            ("object", "a"),
        ]);
        let plain = Fact::of("role_assertion", &[
            ("subject", "a"),
            ("role", "knows"),
            ("object", "b"),
        ]);
        assert!(p.bindings(&reflexive).is_some());
        assert!(p.bindings(&plain).is_none());
    }

    #[test]
    fn chain_rule_names_are_stable() {
        let rule = chain_rule(
            &["hasParent".to_string(), "hasParent".to_string()],
            "hasGrandparent",
        )
        .expect("chain rule");
        assert_eq!(rule.name, "prp-spo2-hasParent-hasParent-hasGrandparent");
        assert_eq!(rule.patterns.len(), 2);
    }

    #[test]
    fn malformed_templates_install_nothing() {
        assert!(chain_rule(&[], "sup").is_none());
        assert!(has_key_rule("Person", &[]).is_none());
        assert!(intersection_rule("", &["A".to_string()]).is_none());
    }
}
