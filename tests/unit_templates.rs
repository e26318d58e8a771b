use retort::{Fact, ReteNetwork};

fn role(s: &str, r: &str, o: &str) -> Fact {
    Fact::of("role_assertion", &[("subject", s), ("role", r), ("object", o)])
}

fn inst(x: &str, c: &str) -> Fact {
    Fact::of("instance_of", &[("individual", x), ("concept", c)])
}

fn chain_axiom(chain: &str, sup: &str) -> Fact {
    Fact::of("property_chain", &[("chain", chain), ("super", sup)])
}

#[test]
fn two_link_property_chain() {
    let mut net = ReteNetwork::new();
    net.add_fact(chain_axiom("hasParent,hasParent", "hasGrandparent"), "t");
    net.add_fact(role("alice", "hasParent", "bob"), "a");
    net.add_fact(role("bob", "hasParent", "charlie"), "a");
    assert!(net.contains(&role("alice", "hasGrandparent", "charlie")));

    // The axiom became its own specialized production.
    let stats = net.stats();
    assert!(
        stats
            .production_firings
            .contains_key("prp-spo2-hasParent-hasParent-hasGrandparent")
    );
}

#[test]
fn chain_fires_for_instances_added_after_the_axiom() {
    let mut net = ReteNetwork::new();
    net.add_fact(chain_axiom("hasParent,hasParent", "hasGrandparent"), "t");
    net.add_fact(role("dave", "hasParent", "erin"), "late");
    net.add_fact(role("erin", "hasParent", "frank"), "late");
    assert!(net.contains(&role("dave", "hasGrandparent", "frank")));
}

#[test]
fn chain_fires_when_axiom_arrives_last() {
    let mut net = ReteNetwork::new();
    net.add_fact(role("alice", "hasParent", "bob"), "a");
    net.add_fact(role("bob", "hasParent", "charlie"), "a");
    net.add_fact(chain_axiom("hasParent,hasParent", "hasGrandparent"), "t");
    assert!(net.contains(&role("alice", "hasGrandparent", "charlie")));
}

#[test]
fn three_link_property_chain() {
    let mut net = ReteNetwork::new();
    net.add_fact(chain_axiom("p,q,r", "s"), "t");
    net.add_fact(role("a", "p", "b"), "x");
    net.add_fact(role("b", "q", "c"), "x");
    net.add_fact(role("c", "r", "d"), "x");
    assert!(net.contains(&role("a", "s", "d")));
    assert!(!net.contains(&role("a", "s", "c")));
}

#[test]
fn duplicate_chain_axiom_installs_once() {
    let mut net = ReteNetwork::new();
    net.add_fact(chain_axiom("p,q", "r"), "t1");
    net.add_fact(chain_axiom("p,q", "r"), "t2");
    net.add_fact(role("a", "p", "b"), "x");
    net.add_fact(role("b", "q", "c"), "x");
    assert!(net.contains(&role("a", "r", "c")));
    assert_eq!(net.stats().production_firings["prp-spo2-p-q-r"], 1);
}

#[test]
fn malformed_chain_axiom_is_ignored() {
    let mut net = ReteNetwork::new();
    net.add_fact(Fact::of("property_chain", &[("chain", ""), ("super", "r")]), "t");
    net.add_fact(role("a", "p", "b"), "x");
    // No panic, no derivation, the axiom fact itself is still recorded.
    assert_eq!(
        net.query_facts(&[("type".to_string(), "property_chain".to_string())]).len(),
        1
    );
}

#[test]
fn has_key_merges_individuals_sharing_all_keys() {
    let mut net = ReteNetwork::new();
    net.add_fact(Fact::of("has_key", &[("class", "Person"), ("keys", "hasSSN")]), "t");
    net.add_fact(inst("p1", "Person"), "a");
    net.add_fact(inst("p2", "Person"), "a");
    net.add_fact(role("p1", "hasSSN", "123"), "a");
    net.add_fact(role("p2", "hasSSN", "123"), "a");
    assert!(net.contains(&Fact::of("same_as", &[("ind1", "p1"), ("ind2", "p2")])));
}

#[test]
fn has_key_requires_every_key_to_agree() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("has_key", &[("class", "Person"), ("keys", "firstName,lastName")]),
        "t",
    );
    net.add_fact(inst("p1", "Person"), "a");
    net.add_fact(inst("p2", "Person"), "a");
    net.add_fact(role("p1", "firstName", "Ada"), "a");
    net.add_fact(role("p2", "firstName", "Ada"), "a");
    net.add_fact(role("p1", "lastName", "Lovelace"), "a");
    net.add_fact(role("p2", "lastName", "Byron"), "a");
    assert!(!net.contains(&Fact::of("same_as", &[("ind1", "p1"), ("ind2", "p2")])));

    net.add_fact(role("p2", "lastName", "Lovelace"), "a");
    assert!(net.contains(&Fact::of("same_as", &[("ind1", "p1"), ("ind2", "p2")])));
}

#[test]
fn max_cardinality_zero_reports_inconsistency() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("max_cardinality", &[
            ("cardinality", "0"),
            ("on_property", "hasMeatTopping"),
            ("restriction_class", "VegetarianPizza"),
        ]),
        "t",
    );
    net.add_fact(inst("margherita", "VegetarianPizza"), "a");
    net.add_fact(role("margherita", "hasMeatTopping", "pepperoni"), "a");

    let errors = net.query_facts(&[("type".to_string(), "inconsistency".to_string())]);
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|f| f.get("individual") == Some("margherita")));
}

#[test]
fn max_cardinality_one_collapses_fillers() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("max_cardinality", &[
            ("cardinality", "1"),
            ("on_property", "hasBirthMother"),
            ("restriction_class", "Person"),
        ]),
        "t",
    );
    net.add_fact(inst("alice", "Person"), "a");
    net.add_fact(role("alice", "hasBirthMother", "mary"), "a");
    net.add_fact(role("alice", "hasBirthMother", "sue"), "a");

    let merged = net.contains(&Fact::of("same_as", &[("ind1", "mary"), ("ind2", "sue")]))
        || net.contains(&Fact::of("same_as", &[("ind1", "sue"), ("ind2", "mary")]));
    assert!(merged);
}

#[test]
fn qualified_max_cardinality_checks_the_filler_class() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("max_qualified_cardinality", &[
            ("cardinality", "0"),
            ("on_property", "hasTopping"),
            ("on_class", "MeatTopping"),
            ("restriction_class", "VegetarianPizza"),
        ]),
        "t",
    );
    net.add_fact(inst("margherita", "VegetarianPizza"), "a");
    net.add_fact(role("margherita", "hasTopping", "basil"), "a");
    assert!(
        net.query_facts(&[("type".to_string(), "inconsistency".to_string())])
            .is_empty()
    );

    net.add_fact(inst("basil", "MeatTopping"), "oops");
    assert!(
        !net.query_facts(&[("type".to_string(), "inconsistency".to_string())])
            .is_empty()
    );
}

#[test]
fn qualified_max_cardinality_one_with_thing_behaves_unqualified() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("max_qualified_cardinality", &[
            ("cardinality", "1"),
            ("on_property", "hasSpouse"),
            ("on_class", "Thing"),
            ("restriction_class", "Monogamist"),
        ]),
        "t",
    );
    net.add_fact(inst("kim", "Monogamist"), "a");
    net.add_fact(role("kim", "hasSpouse", "lee"), "a");
    net.add_fact(role("kim", "hasSpouse", "max"), "a");
    let merged = net.contains(&Fact::of("same_as", &[("ind1", "lee"), ("ind2", "max")]))
        || net.contains(&Fact::of("same_as", &[("ind1", "max"), ("ind2", "lee")]));
    assert!(merged);
}

#[test]
fn inconsistencies_cascade_away_with_their_source() {
    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("max_cardinality", &[
            ("cardinality", "0"),
            ("on_property", "hasMeatTopping"),
            ("restriction_class", "VegetarianPizza"),
        ]),
        "t",
    );
    net.add_fact(inst("margherita", "VegetarianPizza"), "menu");
    net.add_fact(role("margherita", "hasMeatTopping", "pepperoni"), "menu");
    assert!(
        !net.query_facts(&[("type".to_string(), "inconsistency".to_string())])
            .is_empty()
    );

    net.remove_source("menu");
    assert!(
        net.query_facts(&[("type".to_string(), "inconsistency".to_string())])
            .is_empty()
    );
}
