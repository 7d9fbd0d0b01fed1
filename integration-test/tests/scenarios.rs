//! End-to-end operation scenarios against a running service.

use ldapd::{AliasDerefMode, Dn, Filter, ResultCode, SearchRequest, SearchScope, Value};
use ldapd_tests::{add_person, entry, seed_suffix, start_example};

// -- S1: add, lookup, delete ------------------------------------------------

#[test]
fn s1_add_lookup_delete() {
    let (_service, session) = start_example();
    seed_suffix(&session);
    add_person(&session, "o=example", "alice", "smith");

    let e = session.lookup("cn=alice,o=example").unwrap();
    assert_eq!(e.first_text(&session.registry(), "sn"), Some("smith"));

    let err = session.delete("o=example").unwrap_err();
    assert_eq!(err.code, ResultCode::NotAllowedOnNonLeaf);

    session.delete("cn=alice,o=example").unwrap();
    session.delete("o=example").unwrap();
    assert!(!session.has_entry("o=example").unwrap());
}

// -- S2: indexed equality search --------------------------------------------

#[test]
fn s2_indexed_equality_search() {
    let (_service, session) = start_example();
    seed_suffix(&session);
    for i in 0..100 {
        add_person(&session, "o=example", &format!("user{:03}", i), "lname");
    }

    let hits = session
        .search("o=example", SearchScope::Subtree, "(cn=user042)")
        .unwrap()
        .collect_entries()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dn.norm(), "cn=user042,o=example");

    let hits = session
        .search(
            "o=example",
            SearchScope::Subtree,
            "(&(cn=user042)(sn=lname))",
        )
        .unwrap()
        .collect_entries()
        .unwrap();
    assert_eq!(hits.len(), 1);

    let hits = session
        .search("o=example", SearchScope::Subtree, "(cn=nosuch)")
        .unwrap()
        .collect_entries()
        .unwrap();
    assert!(hits.is_empty());
}

// -- S3: rename preserves entryUUID ------------------------------------------

#[test]
fn s3_rename_preserves_uuid() {
    let (_service, session) = start_example();
    let registry = session.registry();
    seed_suffix(&session);
    add_person(&session, "o=example", "bob", "builder");

    let uuid1 = session
        .lookup("cn=bob,o=example")
        .unwrap()
        .first_text(&registry, "entryUUID")
        .map(str::to_string)
        .expect("entryUUID stamped");

    session.rename("cn=bob,o=example", "cn=bobby", true).unwrap();

    let err = session.lookup("cn=bob,o=example").unwrap_err();
    assert_eq!(err.code, ResultCode::NoSuchObject);

    let e = session.lookup("cn=bobby,o=example").unwrap();
    assert_eq!(e.first_text(&registry, "entryUUID"), Some(uuid1.as_str()));
    assert!(!e
        .has_value(&registry, "cn", &Value::text("bob"))
        .unwrap());
    assert!(e
        .has_value(&registry, "cn", &Value::text("bobby"))
        .unwrap());
}

// -- S4: move updates the sub-level closure ----------------------------------

#[test]
fn s4_move_updates_subtree() {
    let (_service, session) = start_example();
    let registry = session.registry();
    seed_suffix(&session);
    for ou in ["a", "b"] {
        session
            .add(entry(
                &registry,
                &format!("ou={},o=example", ou),
                &[
                    ("objectClass", "top"),
                    ("objectClass", "organizationalUnit"),
                    ("ou", ou),
                ],
            ))
            .unwrap();
    }
    add_person(&session, "ou=a,o=example", "x", "moves");

    let subtree_of = |base: &str| -> Vec<String> {
        session
            .search(base, SearchScope::Subtree, "(objectClass=person)")
            .unwrap()
            .collect_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.dn.norm().to_string())
            .collect()
    };

    assert_eq!(subtree_of("ou=a,o=example"), vec!["cn=x,ou=a,o=example"]);
    assert!(subtree_of("ou=b,o=example").is_empty());

    session
        .move_entry("cn=x,ou=a,o=example", "ou=b,o=example")
        .unwrap();

    assert!(subtree_of("ou=a,o=example").is_empty());
    assert_eq!(subtree_of("ou=b,o=example"), vec!["cn=x,ou=b,o=example"]);
    // The moved entry keeps its content and resolves at the new DN.
    let e = session.lookup("cn=x,ou=b,o=example").unwrap();
    assert_eq!(e.first_text(&registry, "sn"), Some("moves"));
}

// -- S5: alias dereferencing --------------------------------------------------

#[test]
fn s5_alias_dereferencing() {
    let (_service, session) = start_example();
    let registry = session.registry();
    seed_suffix(&session);
    add_person(&session, "o=example", "target", "t");
    session
        .add(entry(
            &registry,
            "cn=alias1,o=example",
            &[
                ("objectClass", "top"),
                ("objectClass", "alias"),
                ("objectClass", "extensibleObject"),
                ("cn", "alias1"),
                ("aliasedObjectName", "cn=target,o=example"),
            ],
        ))
        .unwrap();

    let base = Dn::parse(&registry, "cn=alias1,o=example").unwrap();
    let request = SearchRequest::new(
        base,
        SearchScope::Object,
        Filter::parse("(objectClass=*)").unwrap(),
    )
    .with_deref(AliasDerefMode::FindingBase);
    let hits = session.search_req(request).unwrap().collect_entries().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dn.norm(), "cn=target,o=example");

    let hits = session
        .search("o=example", SearchScope::Subtree, "(objectClass=alias)")
        .unwrap()
        .collect_entries()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dn.norm(), "cn=alias1,o=example");
}

// -- S6: size limit ------------------------------------------------------------

#[test]
fn s6_size_limit() {
    let (_service, session) = start_example();
    let registry = session.registry();
    seed_suffix(&session);
    for i in 0..10 {
        add_person(&session, "o=example", &format!("p{}", i), "sized");
    }

    let base = Dn::parse(&registry, "o=example").unwrap();
    let request = SearchRequest::new(
        base,
        SearchScope::Subtree,
        Filter::parse("(objectClass=person)").unwrap(),
    )
    .with_limits(3, 0);
    let mut cursor = session.search_req(request).unwrap();
    let mut seen = 0;
    let overflow = loop {
        match cursor.next_entry() {
            Ok(Some(_)) => seen += 1,
            Ok(None) => panic!("expected sizeLimitExceeded after {} entries", seen),
            Err(e) => break e,
        }
    };
    assert_eq!(seen, 3);
    assert_eq!(overflow.code, ResultCode::SizeLimitExceeded);
}
