//! End-to-end scenarios (spec §8 "Concrete end-to-end scenarios").

use reasoner::fact::FactId;
use reasoner::persistence::Hybrid;
use reasoner::Network;

fn fact(net: &mut Network, pairs: &[(&str, &str)]) -> (FactId, bool) {
    let attrs = pairs.iter().map(|(a, v)| (net.interner_mut().intern(a), net.interner_mut().intern(v))).collect();
    net.add_fact(attrs).unwrap()
}

fn rows_of(table: &reasoner::query::ResultTable, col: usize) -> Vec<String> {
    let mut out: Vec<String> = (0..table.num_rows()).map(|i| table.row(i)[col].clone().unwrap()).collect();
    out.sort();
    out
}

/// (a) Subsumption propagation.
#[test]
fn subsumption_propagation() {
    let mut net = Network::new();
    fact(&mut net, &[("type", "subsumption"), ("sub", "Cat"), ("sup", "Mammal")]);
    fact(&mut net, &[("type", "subsumption"), ("sub", "Mammal"), ("sup", "Animal")]);
    fact(&mut net, &[("type", "instance_of"), ("individual", "Felix"), ("concept", "Cat")]);

    let table = net.reql("SELECT ?c WHERE { Felix type ?c . }", 0).unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(rows_of(&table, 0), vec!["Animal".to_string(), "Cat".to_string(), "Mammal".to_string()]);
}

/// (b) Property-chain template: instantiation, then re-instantiation after
/// a save/close/reopen cycle for a brand-new pair of individuals.
#[test]
fn property_chain_template_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("graph.bin");

    {
        let mut h = Hybrid::open(&base).unwrap();
        let net = h.network_mut();
        fact(net, &[("type", "property_chain"), ("super_property", "hasGrandparent"), ("chain", "hasParent,hasParent")]);
        fact(net, &[("type", "role_assertion"), ("subject", "Alice"), ("role", "hasParent"), ("object", "Bob")]);
        fact(net, &[("type", "role_assertion"), ("subject", "Bob"), ("role", "hasParent"), ("object", "Charlie")]);

        let table = net.reql("SELECT ?g WHERE { Alice hasGrandparent ?g . }", 0).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.row(0), vec![Some("Charlie".to_string())]);
        h.save().unwrap();
    }

    let mut h2 = Hybrid::open(&base).unwrap();
    let net = h2.network_mut();
    fact(net, &[("type", "role_assertion"), ("subject", "Dave"), ("role", "hasParent"), ("object", "Eve")]);
    fact(net, &[("type", "role_assertion"), ("subject", "Eve"), ("role", "hasParent"), ("object", "Frank")]);

    let table = net.reql("SELECT ?g WHERE { Dave hasGrandparent ?g . }", 0).unwrap();
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.row(0), vec![Some("Frank".to_string())]);
}

/// (c) OPTIONAL independence: two disjoint OPTIONAL sub-patterns grouped by
/// the outer variable must report independent per-group counts, not their
/// cartesian product.
#[test]
fn optional_independence() {
    let mut net = Network::new();
    fact(&mut net, &[("type", "instance_of"), ("individual", "Widget"), ("concept", "Class")]);
    for f in ["f1", "f2", "f3"] {
        fact(&mut net, &[("type", "instance_of"), ("individual", f), ("concept", "Field")]);
        fact(&mut net, &[("type", "role_assertion"), ("subject", f), ("role", "definedIn"), ("object", "Widget")]);
    }
    for m in ["m1", "m2", "m3", "m4", "m5"] {
        fact(&mut net, &[("type", "instance_of"), ("individual", m), ("concept", "Method")]);
        fact(&mut net, &[("type", "role_assertion"), ("subject", m), ("role", "definedIn"), ("object", "Widget")]);
    }

    let query = "SELECT ?c (COUNT(?a) AS ?ac) (COUNT(?m) AS ?mc) WHERE { \
        ?c type Class . \
        OPTIONAL { ?a type Field . ?a definedIn ?c . } \
        OPTIONAL { ?m type Method . ?m definedIn ?c . } \
    } GROUP BY ?c";
    let table = net.reql(query, 0).unwrap();
    assert_eq!(table.num_rows(), 1);
    let row = table.row(0);
    let ac = table.column_index("ac").unwrap();
    let mc = table.column_index("mc").unwrap();
    assert_eq!(row[ac], Some("3".to_string()));
    assert_eq!(row[mc], Some("5".to_string()));
}

/// (d) NOT EXISTS.
#[test]
fn not_exists_filters_out_matching_rows() {
    let mut net = Network::new();
    fact(&mut net, &[("type", "instance_of"), ("individual", "Alice"), ("concept", "Person")]);
    fact(&mut net, &[("type", "instance_of"), ("individual", "Bob"), ("concept", "Person")]);
    fact(&mut net, &[("type", "role_assertion"), ("subject", "Alice"), ("role", "hasChild"), ("object", "Charlie")]);

    let table = net.reql("SELECT ?p WHERE { ?p type Person . FILTER NOT EXISTS { ?p hasChild ?c . } }", 0).unwrap();
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.row(0), vec![Some("Bob".to_string())]);
}

/// (e) CRC-protected delta recovery: a flipped byte in a middle entry is
/// skipped, the rest replay, and `fact_count` reflects base + surviving
/// delta entries.
#[test]
fn crc_protected_delta_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("graph.bin");

    {
        let mut h = Hybrid::open(&base).unwrap();
        for i in 0..10u32 {
            h.add_fact(vec![("individual".to_string(), format!("E{i}"))]).unwrap();
        }
        h.save().unwrap();
    }

    // Flip one byte inside the 5th entry's payload (not its length prefix),
    // so only that entry fails its CRC check and every other entry — before
    // and after it — still replays.
    let delta_path = {
        let mut p = base.clone().into_os_string();
        p.push(".delta");
        std::path::PathBuf::from(p)
    };
    let mut bytes = std::fs::read(&delta_path).unwrap();
    const HEADER_LEN: usize = 8 + 4 + 16 + 4;
    let mut pos = HEADER_LEN;
    for _ in 0..4 {
        let length = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += length + 4;
    }
    // `pos` now points at the 5th entry: length(4) | op(1) | payload...
    let payload_byte = pos + 4 + 1;
    bytes[payload_byte] ^= 0xFF;
    std::fs::write(&delta_path, &bytes).unwrap();

    let h2 = Hybrid::open(&base).unwrap();
    assert_eq!(h2.base_fact_count(), 0);
    assert_eq!(h2.fact_count(), 9, "exactly the corrupted entry should have been dropped");
}

/// (f) Source removal cascade: retracting a source removes both the
/// asserted fact and anything it supported.
#[test]
fn source_removal_cascades_to_inferences() {
    let mut net = Network::new();
    let source = net.interner_mut().intern("source1");
    fact(&mut net, &[("type", "subsumption"), ("sub", "Cat"), ("sup", "Mammal")]);
    let attrs = vec![
        (net.interner_mut().intern("type"), net.interner_mut().intern("instance_of")),
        (net.interner_mut().intern("individual"), net.interner_mut().intern("Felix")),
        (net.interner_mut().intern("concept"), net.interner_mut().intern("Cat")),
    ];
    net.add_fact_with_source(attrs, source).unwrap();

    let before = net.reql("SELECT ?c WHERE { Felix type ?c . }", 0).unwrap();
    assert_eq!(before.num_rows(), 2);

    net.remove_source(source).unwrap();
    let after = net.reql("SELECT ?c WHERE { Felix type ?c . }", 0).unwrap();
    assert_eq!(after.num_rows(), 0);
}
