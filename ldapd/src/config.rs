//! Configuration.
//!
//! The server configuration is itself a set of directory entries
//! (`directoryConfig` for server identity and defaults, one
//! `partitionConfig` per partition), usually loaded from a configuration
//! partition rendered as LDIF. `DirectoryConfig::default()` gives a usable
//! in-memory server with one admin principal and no user partitions.

use std::path::PathBuf;

use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::ldif;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub id: String,
    pub suffix: String,
    /// Attribute ids to maintain user indexes for.
    pub indexed_attributes: Vec<String>,
    /// Absent means in-memory only.
    pub working_directory: Option<PathBuf>,
}

impl PartitionConfig {
    pub fn in_memory(id: impl Into<String>, suffix: impl Into<String>) -> PartitionConfig {
        PartitionConfig {
            id: id.into(),
            suffix: suffix.into(),
            indexed_attributes: Vec::new(),
            working_directory: None,
        }
    }

    pub fn with_indexes(mut self, attrs: &[&str]) -> PartitionConfig {
        self.indexed_attributes = attrs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> PartitionConfig {
        self.working_directory = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub instance_id: String,
    pub replica_id: u16,
    pub admin_dn: String,
    pub admin_password: Vec<u8>,
    /// 0 means unbounded.
    pub default_size_limit: usize,
    /// Seconds; 0 means unbounded.
    pub default_time_limit: u64,
    pub partitions: Vec<PartitionConfig>,
    /// Interceptor names in chain order; empty means the canonical chain.
    pub interceptors: Vec<String>,
}

impl Default for DirectoryConfig {
    fn default() -> DirectoryConfig {
        DirectoryConfig {
            instance_id: "default".to_string(),
            replica_id: 1,
            admin_dn: "uid=admin,ou=system".to_string(),
            admin_password: b"secret".to_vec(),
            default_size_limit: 0,
            default_time_limit: 0,
            partitions: Vec::new(),
            interceptors: Vec::new(),
        }
    }
}

impl DirectoryConfig {
    pub fn with_partition(mut self, partition: PartitionConfig) -> DirectoryConfig {
        self.partitions.push(partition);
        self
    }

    /// Build a configuration from its entry representation.
    pub fn from_entries(registry: &SchemaRegistry, entries: &[Entry]) -> Result<DirectoryConfig> {
        let mut config = DirectoryConfig::default();
        for entry in entries {
            if entry.has_object_class(registry, "directoryConfig") {
                if let Some(v) = entry.first_text(registry, "directoryInstanceId") {
                    config.instance_id = v.to_string();
                }
                if let Some(v) = entry.first_text(registry, "replicaId") {
                    config.replica_id = parse_number(v, "replicaId")? as u16;
                }
                if let Some(v) = entry.first_text(registry, "defaultSizeLimit") {
                    config.default_size_limit = parse_number(v, "defaultSizeLimit")? as usize;
                }
                if let Some(v) = entry.first_text(registry, "defaultTimeLimit") {
                    config.default_time_limit = parse_number(v, "defaultTimeLimit")?;
                }
                if let Some(v) = entry.first_text(registry, "adminDn") {
                    config.admin_dn = v.to_string();
                }
                if let Some(a) = entry.get(registry, "adminPassword") {
                    if let Some(v) = a.first() {
                        config.admin_password = v.bytes().to_vec();
                    }
                }
                if let Some(a) = entry.get(registry, "interceptorName") {
                    config.interceptors = a
                        .values()
                        .iter()
                        .filter_map(|v| v.as_text().map(str::to_string))
                        .collect();
                }
            } else if entry.has_object_class(registry, "partitionConfig") {
                let id = entry
                    .first_text(registry, "partitionId")
                    .ok_or_else(|| bad_config("partitionConfig without partitionId"))?;
                let suffix = entry
                    .first_text(registry, "partitionSuffix")
                    .ok_or_else(|| bad_config("partitionConfig without partitionSuffix"))?;
                let mut partition = PartitionConfig::in_memory(id, suffix);
                if let Some(dir) = entry.first_text(registry, "partitionWorkingDir") {
                    partition.working_directory = Some(PathBuf::from(dir));
                }
                if let Some(a) = entry.get(registry, "indexedAttribute") {
                    partition.indexed_attributes = a
                        .values()
                        .iter()
                        .filter_map(|v| v.as_text().map(str::to_string))
                        .collect();
                }
                config.partitions.push(partition);
            }
        }
        Ok(config)
    }

    /// Parse a configuration LDIF document.
    pub fn from_ldif(registry: &SchemaRegistry, text: &str) -> Result<DirectoryConfig> {
        let entries = ldif::parse_entries(registry, text)?;
        Self::from_entries(registry, &entries)
    }
}

fn bad_config(detail: &str) -> DirectoryError {
    DirectoryError::unwilling_to_perform(format!("bad configuration: {}", detail))
}

fn parse_number(s: &str, what: &str) -> Result<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| bad_config(&format!("{} is not a number: {}", what, s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    #[test]
    fn defaults_are_sane() {
        let c = DirectoryConfig::default();
        assert_eq!(c.admin_dn, "uid=admin,ou=system");
        assert_eq!(c.replica_id, 1);
        assert!(c.partitions.is_empty());
    }

    #[test]
    fn parse_from_ldif() {
        let reg = bootstrap_registry();
        let text = "\
dn: cn=config,ou=config
objectClass: top
objectClass: directoryConfig
cn: config
directoryInstanceId: test-instance
replicaId: 7
defaultSizeLimit: 500
defaultTimeLimit: 30
adminDn: uid=admin,ou=system
adminPassword: hunter2
interceptorName: normalizationInterceptor
interceptorName: schemaInterceptor

dn: cn=example,ou=partitions,ou=config
objectClass: top
objectClass: partitionConfig
cn: example
partitionId: example
partitionSuffix: o=example
indexedAttribute: cn
indexedAttribute: uid
partitionWorkingDir: /var/lib/ldapd/example
";
        let c = DirectoryConfig::from_ldif(&reg, text).unwrap();
        assert_eq!(c.instance_id, "test-instance");
        assert_eq!(c.replica_id, 7);
        assert_eq!(c.default_size_limit, 500);
        assert_eq!(c.default_time_limit, 30);
        assert_eq!(c.admin_password, b"hunter2");
        assert_eq!(c.interceptors.len(), 2);
        assert_eq!(c.partitions.len(), 1);
        let p = &c.partitions[0];
        assert_eq!(p.id, "example");
        assert_eq!(p.suffix, "o=example");
        assert_eq!(p.indexed_attributes, vec!["cn", "uid"]);
        assert_eq!(
            p.working_directory.as_deref(),
            Some(std::path::Path::new("/var/lib/ldapd/example"))
        );
    }

    #[test]
    fn partition_without_suffix_is_rejected() {
        let reg = bootstrap_registry();
        let text = "\
dn: cn=broken,ou=config
objectClass: top
objectClass: partitionConfig
cn: broken
partitionId: broken
";
        let err = DirectoryConfig::from_ldif(&reg, text).unwrap_err();
        assert!(err.message.contains("partitionSuffix"));
    }
}
