//! Operational attribute interceptor.
//!
//! Stamps `entryUUID`, `entryCSN`, `creatorsName`/`createTimestamp` on add
//! and `modifiersName`/`modifyTimestamp`/`entryCSN` on modify and rename;
//! refuses user modification of NO-USER-MODIFICATION attributes; and on the
//! way back out projects results down to the requested attribute set
//! (`*`, `+`, `1.1`, or explicit names -- operational attributes only
//! appear when asked for).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::csn::CsnFactory;
use crate::entry::{Entry, Modification, Value};
use crate::error::{DirectoryError, Result};
use crate::interceptor::{
    names, AddRequest, Interceptor, ListRequest, LookupRequest, ModifyRequest, Next,
    RenameRequest,
};
use crate::nexus::PartitionNexus;
use crate::schema::{ids, SchemaRegistry};
use crate::search::{SearchCursor, SearchRequest};

pub struct OperationalAttributeInterceptor {
    nexus: Arc<PartitionNexus>,
    csn_factory: Arc<CsnFactory>,
}

impl OperationalAttributeInterceptor {
    pub fn new(nexus: Arc<PartitionNexus>, csn_factory: Arc<CsnFactory>) -> Self {
        OperationalAttributeInterceptor { nexus, csn_factory }
    }

    fn principal_name(ctx: &OperationContext) -> String {
        ctx.principal().user().to_string()
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%SZ").to_string()
    }

    fn mutation_stamps(&self, ctx: &OperationContext) -> Vec<Modification> {
        vec![
            Modification::replace(ids::ENTRY_CSN, vec![Value::text(self.csn_factory.next().to_string())]),
            Modification::replace(
                ids::MODIFIERS_NAME,
                vec![Value::text(Self::principal_name(ctx))],
            ),
            Modification::replace(
                ids::MODIFY_TIMESTAMP,
                vec![Value::text(Self::timestamp())],
            ),
        ]
    }
}

/// Reject user-supplied values for server-maintained attributes.
fn deny_protected(registry: &SchemaRegistry, ids_in_use: impl Iterator<Item = String>) -> Result<()> {
    for id in ids_in_use {
        if let Some(at) = registry.attribute_type(&id) {
            if at.no_user_modification {
                return Err(DirectoryError::constraint_violation(format!(
                    "{} may not be modified by users",
                    at.name()
                )));
            }
        }
    }
    Ok(())
}

impl Interceptor for OperationalAttributeInterceptor {
    fn name(&self) -> &'static str {
        names::OPERATIONAL
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        let registry = &ctx.registry;
        deny_protected(
            registry,
            req.entry.attributes().iter().map(|a| a.oid.clone()),
        )?;

        req.entry
            .add(registry, ids::ENTRY_UUID, Uuid::new_v4().to_string())?;
        req.entry.add(
            registry,
            ids::ENTRY_CSN,
            self.csn_factory.next().to_string(),
        )?;
        req.entry
            .add(registry, ids::CREATORS_NAME, Self::principal_name(ctx))?;
        req.entry
            .add(registry, ids::CREATE_TIMESTAMP, Self::timestamp())?;
        next.add(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        deny_protected(&ctx.registry, req.mods.iter().map(|m| m.attr.clone()))?;
        req.mods.extend(self.mutation_stamps(ctx));
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        let target = req.target_dn();
        next.rename(ctx, req)?;
        // The entry moved; stamp it in place, straight at the nexus.
        self.nexus.modify(ctx, &target, &self.mutation_stamps(ctx))?;
        Ok(())
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let attrs = req.attrs.clone();
        let entry = next.lookup(ctx, req)?;
        Ok(project_attributes(&ctx.registry, entry, &attrs))
    }

    fn list(
        &self,
        ctx: &OperationContext,
        req: &mut ListRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        let cursor = next.list(ctx, req)?;
        let registry = Arc::clone(&ctx.registry);
        Ok(cursor.map_entries(move |e| Some(project_attributes(&registry, e, &[]))))
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        let attrs = req.attrs.clone();
        let cursor = next.search(ctx, req)?;
        let registry = Arc::clone(&ctx.registry);
        Ok(cursor.map_entries(move |e| Some(project_attributes(&registry, e, &attrs))))
    }
}

// ---------------------------------------------------------------------------
// Attribute projection
// ---------------------------------------------------------------------------

/// Apply an RFC 4511 requested-attribute list to an entry. An empty list
/// and `*` mean all user attributes; `+` adds the operational ones; `1.1`
/// means none; anything else selects by name.
pub fn project_attributes(registry: &SchemaRegistry, entry: Entry, attrs: &[String]) -> Entry {
    if attrs.iter().any(|a| a == "1.1") {
        return Entry::new(entry.dn.clone());
    }
    let all_user = attrs.is_empty() || attrs.iter().any(|a| a == "*");
    let all_operational = attrs.iter().any(|a| a == "+");
    let explicit: Vec<String> = attrs
        .iter()
        .filter(|a| *a != "*" && *a != "+")
        .filter_map(|a| registry.attribute_type(a).map(|at| at.oid.clone()))
        .collect();

    let mut out = Entry::new(entry.dn.clone());
    for attr in entry.attributes() {
        let Some(at) = registry.attribute_type(&attr.oid) else {
            continue;
        };
        let wanted = if at.is_operational() {
            all_operational || explicit.contains(&at.oid)
        } else {
            all_user || explicit.contains(&at.oid)
        };
        if !wanted {
            continue;
        }
        // Values were already deduplicated; put keeps them as-is.
        let _ = out.put(registry, &attr.id, attr.values().to_vec());
    }
    out
}
