use retort::{Fact, ReteNetwork};

fn triple(s: &str, p: &str, o: &str) -> Fact {
    Fact::of("role_assertion", &[("subject", s), ("role", p), ("object", o)])
}

fn inst(x: &str, c: &str) -> Fact {
    Fact::of("instance_of", &[("individual", x), ("concept", c)])
}

fn social_net() -> ReteNetwork {
    let mut net = ReteNetwork::new();
    for p in ["Alice", "Bob", "Charlie", "Diana"] {
        net.add_fact(inst(p, "Person"), "people");
    }
    net.add_fact(triple("Alice", "knows", "Bob"), "edges");
    net.add_fact(triple("Alice", "knows", "Charlie"), "edges");
    net.add_fact(triple("Bob", "knows", "Diana"), "edges");
    net.add_fact(triple("Charlie", "knows", "Alice"), "edges");
    net.add_fact(triple("Alice", "age", "30"), "ages");
    net.add_fact(triple("Bob", "age", "25"), "ages");
    net.add_fact(triple("Charlie", "age", "35"), "ages");
    net.add_fact(triple("Diana", "age", "28"), "ages");
    net
}

fn column(table: &retort::Table, name: &str) -> Vec<Option<String>> {
    table
        .column(name)
        .map(|c| c.cells.clone())
        .unwrap_or_default()
}

#[test]
fn union_concatenates_aligned_branches() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("m1", "calls", "m2"), "code");
    net.add_fact(triple("m1", "maybeCalls", "f1"), "code");
    let table = net
        .reql(
            "SELECT ?caller ?callee WHERE { { ?caller calls ?callee } UNION { ?caller maybeCalls ?callee } }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 2);
}

#[test]
fn union_filter_can_use_unselected_variables() {
    // The shape of the historical UNION + FILTER variable bug: the filter
    // references ?t, which is not in the SELECT list, across a UNION.
    let mut net = ReteNetwork::new();
    net.add_fact(triple("m1", "calls", "m2"), "code");
    net.add_fact(triple("m2", "calls", "m3"), "code");
    net.add_fact(triple("m1", "maybeCalls", "f1"), "code");
    net.add_fact(triple("m1", "concept", "pyMethod"), "code");
    net.add_fact(triple("m2", "concept", "pyMethod"), "code");
    net.add_fact(triple("f1", "concept", "ooFunction"), "code");

    let table = net
        .reql(
            "SELECT ?caller ?callee WHERE { \
               { ?caller calls ?callee } UNION { ?caller maybeCalls ?callee } \
               ?caller concept ?t \
               FILTER(CONTAINS(?t, \"Method\")) }",
            0,
        )
        .expect("filter variables outside SELECT must stay in scope");
    assert_eq!(table.num_rows(), 3);
    assert_eq!(table.column_names(), vec!["?caller", "?callee"]);
}

#[test]
fn optional_fills_missing_rows_with_nulls() {
    let mut net = social_net();
    net.add_fact(triple("Eve", "age", "99"), "strays");
    net.add_fact(inst("Eve", "Person"), "people");
    net.remove_source("strays");

    let table = net
        .reql(
            "SELECT ?p ?age WHERE { ?p type Person . OPTIONAL { ?p age ?age } }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 5);
    let ages = column(&table, "?age");
    assert_eq!(ages.iter().filter(|a| a.is_none()).count(), 1);
}

#[test]
fn minus_removes_matching_rows() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?p WHERE { ?p type Person . MINUS { Alice knows ?p } }",
            0,
        )
        .expect("query should succeed");
    let mut people: Vec<_> = (0..table.num_rows())
        .map(|i| table.cell(i, "?p").unwrap_or("").to_string())
        .collect();
    people.sort();
    assert_eq!(people, vec!["Alice".to_string(), "Diana".to_string()]);
}

#[test]
fn not_exists_filters_correlated_rows() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?p WHERE { ?p type Person . FILTER NOT EXISTS { ?p knows ?q } }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.cell(0, "?p"), Some("Diana"));
}

#[test]
fn values_constrains_a_variable_inline() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?p ?age WHERE { ?p age ?age . VALUES ?p { Alice Diana } }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 2);
}

#[test]
fn property_path_transitive_closure() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "hasParent", "b"), "fam");
    net.add_fact(triple("b", "hasParent", "c"), "fam");
    net.add_fact(triple("c", "hasParent", "d"), "fam");

    let table = net
        .reql("SELECT ?anc WHERE { a hasParent* ?anc }", 0)
        .expect("query should succeed");
    let mut ancestors: Vec<_> = (0..table.num_rows())
        .map(|i| table.cell(i, "?anc").unwrap_or("").to_string())
        .collect();
    ancestors.sort();
    assert_eq!(ancestors, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
}

#[test]
fn property_path_depth_bound() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "hasParent", "b"), "fam");
    net.add_fact(triple("b", "hasParent", "c"), "fam");
    net.add_fact(triple("c", "hasParent", "d"), "fam");

    let table = net
        .reql("SELECT ?anc WHERE { a hasParent*2 ?anc }", 0)
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 2);
}

#[test]
fn property_path_survives_cycles() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "next", "b"), "g");
    net.add_fact(triple("b", "next", "c"), "g");
    net.add_fact(triple("c", "next", "a"), "g");
    let table = net
        .reql("SELECT ?x WHERE { a next* ?x }", 0)
        .expect("cycles must terminate");
    // a reaches b, c and itself around the loop.
    assert_eq!(table.num_rows(), 3);
}

#[test]
fn property_path_api_mirrors_reql() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "hasParent", "b"), "fam");
    net.add_fact(triple("b", "hasParent", "c"), "fam");
    let direct = net
        .property_path("a", "hasParent*", "?ancestor", Some(1))
        .expect("path should succeed");
    assert_eq!(direct.num_rows(), 1);
    let full = net
        .property_path("a", "hasParent*", "?ancestor", None)
        .expect("path should succeed");
    assert_eq!(full.num_rows(), 2);
}

#[test]
fn group_by_with_count_and_having() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("alice", "worksIn", "eng"), "hr");
    net.add_fact(triple("bob", "worksIn", "eng"), "hr");
    net.add_fact(triple("carol", "worksIn", "eng"), "hr");
    net.add_fact(triple("dan", "worksIn", "sales"), "hr");

    let table = net
        .reql(
            "SELECT ?dept (COUNT(?p) AS ?n) WHERE { ?p worksIn ?dept } \
             GROUP BY ?dept ORDER BY DESC(?n)",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 2);
    assert_eq!(table.cell(0, "?dept"), Some("eng"));
    assert_eq!(table.cell(0, "?n"), Some("3"));

    let filtered = net
        .reql(
            "SELECT ?dept (COUNT(?p) AS ?n) WHERE { ?p worksIn ?dept } \
             GROUP BY ?dept HAVING(?n > 2)",
            0,
        )
        .expect("query should succeed");
    assert_eq!(filtered.num_rows(), 1);
    assert_eq!(filtered.cell(0, "?dept"), Some("eng"));
}

#[test]
fn aggregates_over_the_whole_table() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT (COUNT(?p) AS ?n) (AVG(?age) AS ?avg) (MIN(?age) AS ?min) \
             (MAX(?age) AS ?max) (SUM(?age) AS ?sum) \
             WHERE { ?p age ?age }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.cell(0, "?n"), Some("4"));
    assert_eq!(table.cell(0, "?avg"), Some("29.5"));
    assert_eq!(table.cell(0, "?min"), Some("25"));
    assert_eq!(table.cell(0, "?max"), Some("35"));
    assert_eq!(table.cell(0, "?sum"), Some("118"));
}

#[test]
fn group_by_nullable_key_keeps_null_groups() {
    let mut net = ReteNetwork::new();
    for p in ["a", "b", "c"] {
        net.add_fact(inst(p, "Person"), "people");
    }
    net.add_fact(triple("a", "age", "30"), "ages");

    // ?age is null for b and c; the null group must survive aggregation
    // bit-exactly instead of being coerced into a default.
    let table = net
        .reql(
            "SELECT ?age (COUNT(?p) AS ?n) WHERE { ?p type Person . \
             OPTIONAL { ?p age ?age } } GROUP BY ?age ORDER BY ?age",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 2);
    // Nulls order first.
    assert_eq!(table.cell(0, "?age"), None);
    assert_eq!(table.cell(0, "?n"), Some("2"));
    assert_eq!(table.cell(1, "?age"), Some("30"));
    assert_eq!(table.cell(1, "?n"), Some("1"));
}

#[test]
fn uncorrelated_scalar_subquery_broadcasts() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?person (SELECT COUNT(?x) WHERE { ?x type Person }) AS ?total \
             WHERE { ?person type Person }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 4);
    for i in 0..4 {
        assert_eq!(table.cell(i, "?total"), Some("4"));
    }
}

#[test]
fn correlated_scalar_subquery_counts_per_row() {
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?person (SELECT COUNT(?friend) WHERE { ?person knows ?friend }) AS ?n \
             WHERE { ?person type Person } ORDER BY ?person",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 4);
    assert_eq!(table.cell(0, "?person"), Some("Alice"));
    assert_eq!(table.cell(0, "?n"), Some("2"));
    assert_eq!(table.cell(3, "?person"), Some("Diana"));
    assert_eq!(table.cell(3, "?n"), Some("0"));
}

#[test]
fn correlation_detection_sees_filter_variables() {
    // The subquery's only reference to the outer row is inside FILTER;
    // missing it would execute the subquery uncorrelated and fail.
    let net = social_net();
    let table = net
        .reql(
            "SELECT ?person (SELECT COUNT(?other) WHERE { ?other age ?oage . \
             FILTER(?oage < ?page) }) AS ?younger \
             WHERE { ?person type Person . ?person age ?page } ORDER BY ?person",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.cell(0, "?person"), Some("Alice"));
    assert_eq!(table.cell(0, "?younger"), Some("2"));
    assert_eq!(table.cell(1, "?person"), Some("Bob"));
    assert_eq!(table.cell(1, "?younger"), Some("0"));
    assert_eq!(table.cell(2, "?person"), Some("Charlie"));
    assert_eq!(table.cell(2, "?younger"), Some("3"));
    assert_eq!(table.cell(3, "?person"), Some("Diana"));
    assert_eq!(table.cell(3, "?younger"), Some("1"));
}

#[test]
fn multiple_scalar_subqueries_coexist() {
    let mut net = social_net();
    net.add_fact(triple("Alice", "likes", "tea"), "likes");
    net.add_fact(triple("Alice", "likes", "coffee"), "likes");
    let table = net
        .reql(
            "SELECT ?person \
             (SELECT COUNT(?friend) WHERE { ?person knows ?friend }) AS ?friends \
             (SELECT COUNT(?food) WHERE { ?person likes ?food }) AS ?likes \
             WHERE { ?person type Person } ORDER BY ?person",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.cell(0, "?friends"), Some("2"));
    assert_eq!(table.cell(0, "?likes"), Some("2"));
    assert_eq!(table.cell(1, "?likes"), Some("0"));
}

#[test]
fn double_union_merges_three_branches() {
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "p", "x"), "d");
    net.add_fact(triple("b", "q", "y"), "d");
    net.add_fact(triple("c", "r", "z"), "d");
    let table = net
        .reql(
            "SELECT ?s ?o WHERE { { ?s p ?o } UNION { ?s q ?o } UNION { ?s r ?o } }",
            0,
        )
        .expect("query should succeed");
    assert_eq!(table.num_rows(), 3);
}

#[test]
fn pattern_interface_matches_reql() {
    use retort::{Expr, PatternSpec, Predicate, Term, TriplePattern};
    let net = social_net();
    let spec = PatternSpec {
        triples: vec![TriplePattern {
            subject: Term::Var("?p".to_string()),
            predicate: Predicate::Iri("age".to_string()),
            object: Term::Var("?age".to_string()),
        }],
        filters: vec![Expr::Cmp(
            retort::CmpOp::Gt,
            Box::new(Expr::Var("?age".to_string())),
            Box::new(Expr::NumLit(28.0)),
        )],
        not_exists: Vec::new(),
        values: Vec::new(),
        select: Some(vec!["?p".to_string()]),
    };
    let table = net.pattern(&spec).expect("pattern should succeed");
    assert_eq!(table.num_rows(), 2);
}

#[test]
fn live_pattern_reflects_later_assertions() {
    use retort::{PatternSpec, Predicate, Term, TriplePattern};
    let mut net = ReteNetwork::new();
    net.add_fact(triple("a", "knows", "b"), "d");
    let live = net.live_pattern(PatternSpec {
        triples: vec![TriplePattern {
            subject: Term::Var("?x".to_string()),
            predicate: Predicate::Iri("knows".to_string()),
            object: Term::Var("?y".to_string()),
        }],
        ..PatternSpec::default()
    });
    assert_eq!(live.current(&net).expect("live query").num_rows(), 1);

    net.add_fact(triple("b", "knows", "c"), "d");
    assert_eq!(live.current(&net).expect("live query").num_rows(), 2);

    net.remove_source("d");
    assert_eq!(live.current(&net).expect("live query").num_rows(), 0);
}
