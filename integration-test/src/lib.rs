//! Test fixtures for the ldapd integration tests.
//!
//! Builds a running service around an `o=example` partition with the common
//! indexes, plus small helpers for constructing entries without LDIF noise.

use std::sync::Arc;

use ldapd::{
    DirectoryConfig, DirectoryService, Entry, LdapSession, PartitionConfig, SchemaRegistry, Value,
};

pub const ADMIN_DN: &str = "uid=admin,ou=system";
pub const ADMIN_PASSWORD: &[u8] = b"secret";

/// Start a service with an in-memory `o=example` partition (cn, sn, uid and
/// uidNumber indexed) and return an admin-bound session.
pub fn start_example() -> (Arc<DirectoryService>, LdapSession) {
    let config = DirectoryConfig::default().with_partition(
        PartitionConfig::in_memory("example", "o=example")
            .with_indexes(&["cn", "sn", "uid", "uidNumber"]),
    );
    let service = DirectoryService::start(config).expect("service starts");
    let session = service.session();
    session
        .bind(ADMIN_DN, ADMIN_PASSWORD)
        .expect("admin bind succeeds");
    (service, session)
}

/// Like `start_example`, with the partition persisted under `dir`.
pub fn start_example_at(dir: &std::path::Path) -> (Arc<DirectoryService>, LdapSession) {
    let config = DirectoryConfig::default().with_partition(
        PartitionConfig::in_memory("example", "o=example")
            .with_indexes(&["cn", "sn", "uid", "uidNumber"])
            .with_directory(dir),
    );
    let service = DirectoryService::start(config).expect("service starts");
    let session = service.session();
    session
        .bind(ADMIN_DN, ADMIN_PASSWORD)
        .expect("admin bind succeeds");
    (service, session)
}

/// Build an entry from attribute pairs. `objectClass` may appear repeatedly.
pub fn entry(registry: &SchemaRegistry, dn: &str, attrs: &[(&str, &str)]) -> Entry {
    let dn = ldapd::Dn::parse(registry, dn).expect("test DN parses");
    let mut e = Entry::new(dn);
    for (attr, value) in attrs {
        e.add(registry, attr, Value::text(*value))
            .expect("test attribute value");
    }
    e
}

/// Add the `o=example` suffix entry.
pub fn seed_suffix(session: &LdapSession) {
    let registry = session.registry();
    session
        .add(entry(
            &registry,
            "o=example",
            &[
                ("objectClass", "top"),
                ("objectClass", "organization"),
                ("o", "example"),
            ],
        ))
        .expect("suffix add succeeds");
}

/// Add a person entry `cn=<cn>,<parent>` with the given surname.
pub fn add_person(session: &LdapSession, parent: &str, cn: &str, sn: &str) {
    let registry = session.registry();
    let dn = format!("cn={},{}", cn, parent);
    session
        .add(entry(
            &registry,
            &dn,
            &[
                ("objectClass", "top"),
                ("objectClass", "person"),
                ("cn", cn),
                ("sn", sn),
            ],
        ))
        .expect("person add succeeds");
}
