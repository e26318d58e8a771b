use std::io::Write;

use retort::{Fact, ReteNetwork, SnapshotError, Variant};

fn role(s: &str, r: &str, o: &str) -> Fact {
    Fact::of("role_assertion", &[("subject", s), ("role", r), ("object", o)])
}

#[test]
fn save_load_preserves_facts_and_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("net.rtrt");

    let mut net = ReteNetwork::new();
    net.add_fact(Fact::of("class", &[("id", "Person")]), "ontology");
    net.add_fact(Fact::of("class", &[("id", "Animal")]), "ontology");
    net.add_fact(Fact::of("individual", &[("id", "Alice")]), "data");
    net.save(&path).expect("save should succeed");

    let restored = ReteNetwork::load(&path).expect("load should succeed");
    assert_eq!(restored.fact_count(), net.fact_count());
    assert_eq!(restored.sources(), net.sources());
    assert_eq!(
        restored.facts_of_source("ontology"),
        net.facts_of_source("ontology")
    );
}

#[test]
fn source_removal_after_load_behaves_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("net.rtrt");

    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("subsumption", &[("sub", "Dog"), ("sup", "Mammal")]),
        "tbox",
    );
    net.add_fact(
        Fact::of("instance_of", &[("individual", "rex"), ("concept", "Dog")]),
        "abox",
    );
    net.save(&path).expect("save should succeed");

    let mut restored = ReteNetwork::load(&path).expect("load should succeed");
    assert!(restored.contains(&Fact::of(
        "instance_of",
        &[("individual", "rex"), ("concept", "Mammal")]
    )));
    restored.remove_source("abox");
    assert!(!restored.contains(&Fact::of(
        "instance_of",
        &[("individual", "rex"), ("concept", "Mammal")]
    )));
    assert_eq!(restored.sources(), vec!["tbox".to_string()]);
}

#[test]
fn chain_template_survives_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("net.rtrt");

    let mut net = ReteNetwork::new();
    net.add_fact(
        Fact::of("property_chain", &[
            ("chain", "hasParent,hasParent"),
            ("super", "hasGrandparent"),
        ]),
        "tbox",
    );
    net.add_fact(role("alice", "hasParent", "bob"), "gen1");
    net.add_fact(role("bob", "hasParent", "charlie"), "gen1");
    assert!(net.contains(&role("alice", "hasGrandparent", "charlie")));
    net.save(&path).expect("save should succeed");

    // New instances joined after load must reach the specialized
    // production restored from the snapshot, not re-fire the template.
    let mut restored = ReteNetwork::load(&path).expect("load should succeed");
    assert!(restored.contains(&role("alice", "hasGrandparent", "charlie")));
    restored.add_fact(role("david", "hasParent", "erin"), "gen2");
    restored.add_fact(role("erin", "hasParent", "frank"), "gen2");
    assert!(restored.contains(&role("david", "hasGrandparent", "frank")));
    assert!(
        restored
            .installed_rules()
            .iter()
            .any(|r| r.name == "prp-spo2-hasParent-hasParent-hasGrandparent")
    );
}

#[test]
fn snapshot_size_is_stable_across_intermediate_save_load() {
    // Sequence A: build everything in one reasoner, save once.
    // Sequence B: identical prefix, save/load in the middle, same suffix.
    // The two snapshots must describe the same asserted state.
    let dir = tempfile::tempdir().expect("tempdir");
    let path_a = dir.path().join("a.rtrt");
    let path_b = dir.path().join("b.rtrt");
    let path_mid = dir.path().join("mid.rtrt");

    let ontology = "SubClassOf(Dog, Mammal)\nSubClassOf(Mammal, Animal)\n";
    let f1 = "Dog(rex)\nDog(fido)\n";
    let f2 = "hasParent(rex, fido)\nDog(lassie)\n";
    let f3 = "Dog(buddy)\nhasParent(buddy, rex)\n";

    let mut a = ReteNetwork::new();
    a.add_source(ontology, "onto", Variant::Ascii).expect("onto");
    a.add_source(f1, "f1", Variant::Ascii).expect("f1");
    a.add_source(f2, "f2", Variant::Ascii).expect("f2");
    a.remove_source("f1");
    a.add_source(f3, "f3", Variant::Ascii).expect("f3");
    a.save(&path_a).expect("save a");

    let mut b = ReteNetwork::new();
    b.add_source(ontology, "onto", Variant::Ascii).expect("onto");
    b.add_source(f1, "f1", Variant::Ascii).expect("f1");
    b.add_source(f2, "f2", Variant::Ascii).expect("f2");
    b.save(&path_mid).expect("save mid");
    let mut b = ReteNetwork::load(&path_mid).expect("load mid");
    b.remove_source("f1");
    b.add_source(f3, "f3", Variant::Ascii).expect("f3");
    b.save(&path_b).expect("save b");

    let a_restored = ReteNetwork::load(&path_a).expect("load a");
    let b_restored = ReteNetwork::load(&path_b).expect("load b");
    assert_eq!(a_restored.fact_count(), b_restored.fact_count());
    assert_eq!(a_restored.sources(), b_restored.sources());

    let size_a = std::fs::metadata(&path_a).expect("meta a").len() as f64;
    let size_b = std::fs::metadata(&path_b).expect("meta b").len() as f64;
    let ratio = (size_a - size_b).abs() / size_a.max(size_b);
    assert!(ratio <= 0.20, "snapshot sizes diverge: {size_a} vs {size_b}");
}

#[test]
fn missing_file_fails_load() {
    let err = ReteNetwork::load(std::path::Path::new("/nonexistent/net.rtrt"))
        .expect_err("missing file");
    assert!(matches!(err, SnapshotError::Io(_)));
}

#[test]
fn garbage_file_fails_load_with_bad_magic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("junk.rtrt");
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(b"this is not a snapshot"))
        .expect("write junk");
    let err = ReteNetwork::load(&path).expect_err("junk file");
    assert!(matches!(err, SnapshotError::BadMagic));
}

#[test]
fn truncated_file_fails_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let full = dir.path().join("full.rtrt");
    let cut = dir.path().join("cut.rtrt");

    let mut net = ReteNetwork::new();
    for i in 0..50 {
        net.add_fact(Fact::of("class", &[("id", &format!("C{i}"))]), "s");
    }
    net.save(&full).expect("save");

    let bytes = std::fs::read(&full).expect("read");
    std::fs::write(&cut, &bytes[..bytes.len() / 2]).expect("write truncated");
    let err = ReteNetwork::load(&cut).expect_err("truncated file");
    assert!(matches!(err, SnapshotError::Codec(_) | SnapshotError::Io(_)));
}

#[test]
fn queries_match_before_and_after_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("net.rtrt");

    let mut net = ReteNetwork::new();
    net.add_source(
        "SubClassOf(Dog, Mammal)\nDog(rex)\nDog(fido)\nhasParent(rex, fido)\n",
        "world",
        Variant::Ascii,
    )
    .expect("load ontology");
    let before = net
        .reql("SELECT ?x WHERE { ?x type Mammal } ORDER BY ?x", 0)
        .expect("query");
    net.save(&path).expect("save");

    let restored = ReteNetwork::load(&path).expect("load");
    let after = restored
        .reql("SELECT ?x WHERE { ?x type Mammal } ORDER BY ?x", 0)
        .expect("query");
    assert_eq!(before, after);
}
