//! Partition nexus.
//!
//! Routes every operation to the partition owning the target DN by longest
//! suffix match, and synthesizes the virtual entries that belong to no
//! partition: the root DSE and the subschema subentry (`cn=schema`).

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::context::OperationContext;
use crate::entry::{Entry, Modification, Value};
use crate::error::{DirectoryError, Result};
use crate::name::{Dn, Rdn};
use crate::partition::Partition;
use crate::schema::SchemaRegistry;
use crate::search::{SearchCursor, SearchRequest, SearchScope};

pub const SUBSCHEMA_DN: &str = "cn=schema";

pub struct PartitionNexus {
    partitions: RwLock<Vec<Arc<dyn Partition>>>,
    vendor_name: String,
    vendor_version: String,
}

impl Default for PartitionNexus {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionNexus {
    pub fn new() -> PartitionNexus {
        PartitionNexus {
            partitions: RwLock::new(Vec::new()),
            vendor_name: "ldapd".to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    // -- partition registry -------------------------------------------------

    pub fn register(&self, partition: Arc<dyn Partition>) -> Result<()> {
        let mut partitions = self.partitions.write().unwrap_or_else(|p| p.into_inner());
        for existing in partitions.iter() {
            let old = existing.suffix();
            let new = partition.suffix();
            if old == new || old.ancestor_of(new) || new.ancestor_of(old) {
                return Err(DirectoryError::unwilling_to_perform(format!(
                    "partition suffix {} overlaps {}",
                    new.user(),
                    old.user()
                )));
            }
        }
        info!(partition = partition.id(), suffix = %partition.suffix(), "registered partition");
        partitions.push(partition);
        Ok(())
    }

    pub fn partitions(&self) -> Vec<Arc<dyn Partition>> {
        self.partitions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The partition owning `dn`, by longest suffix match.
    pub fn partition_for(&self, dn: &Dn) -> Result<Arc<dyn Partition>> {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        partitions
            .iter()
            .filter(|p| dn.at_or_under(p.suffix()))
            .max_by_key(|p| p.suffix().len())
            .cloned()
            .ok_or_else(|| DirectoryError::no_such_object(dn.user()))
    }

    // -- virtual entries ----------------------------------------------------

    /// The root DSE: server metadata aggregated over the partitions.
    pub fn root_dse(&self, registry: &SchemaRegistry) -> Result<Entry> {
        let mut e = Entry::new(Dn::empty());
        e.put(
            registry,
            "objectClass",
            vec![Value::text("top"), Value::text("extensibleObject")],
        )?;
        e.add(registry, "vendorName", self.vendor_name.as_str())?;
        e.add(registry, "vendorVersion", self.vendor_version.as_str())?;
        e.add(registry, "supportedLDAPVersion", "3")?;
        e.add(registry, "subschemaSubentry", SUBSCHEMA_DN)?;
        for p in self.partitions() {
            e.add(registry, "namingContexts", p.suffix().user())?;
        }
        Ok(e)
    }

    /// The subschema subentry rendering the live registry.
    pub fn subschema_entry(&self, registry: &SchemaRegistry) -> Result<Entry> {
        let dn = Dn::parse(registry, SUBSCHEMA_DN)?;
        let mut e = Entry::new(dn);
        e.put(
            registry,
            "objectClass",
            vec![
                Value::text("top"),
                Value::text("subentry"),
                Value::text("subschema"),
            ],
        )?;
        e.add(registry, "cn", "schema")?;
        e.add(registry, "subtreeSpecification", "{}")?;
        let types: Vec<Value> = registry
            .attribute_types()
            .map(|at| Value::text(at.to_string()))
            .collect();
        e.put(registry, "attributeTypes", types)?;
        let classes: Vec<Value> = registry
            .object_classes()
            .map(|oc| Value::text(oc.to_string()))
            .collect();
        e.put(registry, "objectClasses", classes)?;
        Ok(e)
    }

    fn is_subschema_dn(dn: &Dn) -> bool {
        dn.norm() == SUBSCHEMA_DN
    }

    // -- operation routing --------------------------------------------------

    pub fn add(&self, ctx: &OperationContext, entry: Entry) -> Result<()> {
        if entry.dn.is_empty() || Self::is_subschema_dn(&entry.dn) {
            return Err(DirectoryError::unwilling_to_perform(
                "cannot add a virtual entry",
            ));
        }
        self.partition_for(&entry.dn)?.add(ctx, entry)
    }

    pub fn delete(&self, ctx: &OperationContext, dn: &Dn) -> Result<()> {
        if dn.is_empty() || Self::is_subschema_dn(dn) {
            return Err(DirectoryError::unwilling_to_perform(
                "cannot delete a virtual entry",
            ));
        }
        self.partition_for(dn)?.delete(ctx, dn)
    }

    pub fn modify(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        mods: &[Modification],
    ) -> Result<Entry> {
        if dn.is_empty() || Self::is_subschema_dn(dn) {
            return Err(DirectoryError::unwilling_to_perform(
                "cannot modify a virtual entry",
            ));
        }
        self.partition_for(dn)?.modify(ctx, dn, mods)
    }

    /// Rename and/or move. `new_parent` must stay within one partition.
    pub fn rename(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_rdn: Option<&Rdn>,
        delete_old_rdn: bool,
        new_parent: Option<&Dn>,
    ) -> Result<()> {
        let partition = self.partition_for(dn)?;
        if let Some(parent) = new_parent {
            let target = self.partition_for(parent)?;
            if target.id() != partition.id() {
                return Err(DirectoryError::unwilling_to_perform(
                    "moddn across partitions is not supported",
                ));
            }
        }
        match (new_parent, new_rdn) {
            (Some(parent), Some(rdn)) => {
                partition.move_and_rename(ctx, dn, parent, rdn, delete_old_rdn)
            }
            (Some(parent), None) => partition.move_entry(ctx, dn, parent),
            (None, Some(rdn)) => partition.rename(ctx, dn, rdn, delete_old_rdn),
            (None, None) => Ok(()),
        }
    }

    pub fn lookup(&self, ctx: &OperationContext, dn: &Dn) -> Result<Entry> {
        if dn.is_empty() {
            return self.root_dse(&ctx.registry);
        }
        if Self::is_subschema_dn(dn) {
            return self.subschema_entry(&ctx.registry);
        }
        self.partition_for(dn)?.lookup(ctx, dn)
    }

    pub fn has_entry(&self, ctx: &OperationContext, dn: &Dn) -> Result<bool> {
        if dn.is_empty() || Self::is_subschema_dn(dn) {
            return Ok(true);
        }
        match self.partition_for(dn) {
            Ok(p) => p.has_entry(ctx, dn),
            Err(_) => Ok(false),
        }
    }

    pub fn list(&self, ctx: &OperationContext, dn: &Dn) -> Result<SearchCursor> {
        if dn.is_empty() {
            let suffixes: Vec<Entry> = self
                .partitions()
                .iter()
                .filter_map(|p| p.lookup(ctx, p.suffix()).ok())
                .collect();
            return Ok(SearchCursor::from_entries(suffixes));
        }
        self.partition_for(dn)?.list(ctx, dn)
    }

    pub fn search(&self, ctx: &OperationContext, request: &SearchRequest) -> Result<SearchCursor> {
        if request.base.is_empty() {
            return match request.scope {
                SearchScope::Object => {
                    let dse = self.root_dse(&ctx.registry)?;
                    Ok(SearchCursor::from_entries(vec![dse]))
                }
                _ => Err(DirectoryError::unwilling_to_perform(
                    "search below the root DSE must target a naming context",
                )),
            };
        }
        if Self::is_subschema_dn(&request.base) {
            let entry = self.subschema_entry(&ctx.registry)?;
            let filter = request.filter.normalize(&ctx.registry);
            let matched = crate::search::evaluate(&ctx.registry, &entry, &filter)?;
            return Ok(SearchCursor::from_entries(if matched {
                vec![entry]
            } else {
                Vec::new()
            }));
        }
        self.partition_for(&request.base)?.search(ctx, request)
    }

    /// Compare one asserted value against the entry.
    pub fn compare(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        attr: &str,
        value: &Value,
    ) -> Result<bool> {
        let entry = self.lookup(ctx, dn)?;
        ctx.registry.require_attribute_type(attr)?;
        entry.has_value(&ctx.registry, attr, value)
    }

    pub fn flush_all(&self) -> Result<()> {
        for p in self.partitions() {
            p.flush()?;
        }
        Ok(())
    }
}
