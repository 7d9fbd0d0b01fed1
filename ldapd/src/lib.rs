//! ldapd -- an embeddable LDAPv3 directory server core.
//!
//! The crate implements the X.500 directory information tree model with an
//! LDAP-compatible operation set: schema-aware entries stored in
//! B-tree-backed partitions, a filter-optimizing search engine, and an
//! interceptor pipeline carrying the cross-cutting concerns (normalization,
//! authentication, referrals, access control, schema enforcement,
//! operational attributes, subentries, collective attributes, change
//! logging, events, triggers).
//!
//! The wire protocol, transports and client APIs are out of scope; embed
//! the core through [`DirectoryService`] and [`LdapSession`]:
//!
//! ```
//! use ldapd::{DirectoryConfig, DirectoryService, PartitionConfig, SearchScope};
//!
//! let config = DirectoryConfig::default()
//!     .with_partition(PartitionConfig::in_memory("example", "o=example").with_indexes(&["cn"]));
//! let service = DirectoryService::start(config).unwrap();
//! let session = service.session();
//! session.bind("uid=admin,ou=system", b"secret").unwrap();
//! session
//!     .import_ldif("dn: o=example\nobjectClass: top\nobjectClass: organization\no: example\n")
//!     .unwrap();
//! let hits = session
//!     .search("o=example", SearchScope::Subtree, "(objectClass=*)")
//!     .unwrap()
//!     .collect_entries()
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

pub mod changelog;
pub mod config;
pub mod context;
pub mod csn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod interceptor;
pub mod ldif;
pub mod name;
pub mod nexus;
pub mod partition;
pub mod referral;
pub mod schema;
pub mod search;
pub mod service;
pub mod session;
pub mod table;

pub use changelog::{ChangeLog, ChangeLogEvent, ChangeType, Tag};
pub use config::{DirectoryConfig, PartitionConfig};
pub use context::{Controls, OperationContext};
pub use csn::{Csn, CsnFactory};
pub use entry::{Attribute, Entry, ModOp, Modification, Value};
pub use error::{DirectoryError, Result, ResultCode};
pub use filter::Filter;
pub use interceptor::{DirectoryListener, ListenerCriteria};
pub use ldif::{ChangeRecord, LdifParser, LdifRecord};
pub use name::{Ava, Dn, Rdn};
pub use nexus::PartitionNexus;
pub use partition::{BTreePartition, Partition};
pub use schema::{AttributeType, ObjectClass, SchemaRegistry};
pub use search::{AliasDerefMode, SearchCursor, SearchRequest, SearchScope};
pub use service::{DirectoryService, LdapSession};
pub use session::{AuthLevel, Session};
