//! Change log interceptor.
//!
//! After a mutation commits, appends a reversible record to the change log:
//! the forward change plus the records that undo it. Failed operations are
//! never logged, and the log append happens on the unwind path, after the
//! partition writer lock has been released.

use std::sync::Arc;

use crate::changelog::{invert_modifications, ChangeLog, ChangeType};
use crate::context::OperationContext;
use crate::csn::CsnFactory;
use crate::entry::Entry;
use crate::error::Result;
use crate::interceptor::{
    names, AddRequest, DeleteRequest, Interceptor, ModifyRequest, Next, RenameRequest,
};
use crate::ldif::ChangeRecord;
use crate::nexus::PartitionNexus;
use crate::schema::ids;

pub struct ChangeLogInterceptor {
    log: Arc<ChangeLog>,
    nexus: Arc<PartitionNexus>,
    csn_factory: Arc<CsnFactory>,
}

impl ChangeLogInterceptor {
    pub fn new(
        log: Arc<ChangeLog>,
        nexus: Arc<PartitionNexus>,
        csn_factory: Arc<CsnFactory>,
    ) -> Self {
        ChangeLogInterceptor {
            log,
            nexus,
            csn_factory,
        }
    }

    fn csn_of(&self, ctx: &OperationContext, entry: &Entry) -> String {
        entry
            .first_text(&ctx.registry, ids::ENTRY_CSN)
            .map(str::to_string)
            .unwrap_or_else(|| self.csn_factory.next().to_string())
    }
}

impl Interceptor for ChangeLogInterceptor {
    fn name(&self) -> &'static str {
        names::CHANGELOG
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        next.add(ctx, req)?;
        let entry = req.entry.clone();
        let csn = self.csn_of(ctx, &entry);
        let dn = entry.dn.clone();
        self.log.append(
            ChangeType::Add,
            ctx.principal().user().to_string(),
            csn,
            ChangeRecord::Add(entry),
            vec![ChangeRecord::Delete(dn)],
        );
        Ok(())
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        let before = self.nexus.lookup(ctx, &req.dn)?;
        next.delete(ctx, req)?;
        let csn = self.csn_factory.next().to_string();
        self.log.append(
            ChangeType::Delete,
            ctx.principal().user().to_string(),
            csn,
            ChangeRecord::Delete(req.dn.clone()),
            vec![ChangeRecord::Add(before)],
        );
        Ok(())
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let before = self.nexus.lookup(ctx, &req.dn)?;
        let result = next.modify(ctx, req)?;
        let reverse = invert_modifications(&ctx.registry, &before, &req.mods);
        let csn = self.csn_of(ctx, &result);
        self.log.append(
            ChangeType::Modify,
            ctx.principal().user().to_string(),
            csn,
            ChangeRecord::Modify {
                dn: req.dn.clone(),
                mods: req.mods.clone(),
            },
            vec![ChangeRecord::Modify {
                dn: req.dn.clone(),
                mods: reverse,
            }],
        );
        Ok(result)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        let old_dn = req.dn.clone();
        let old_rdn = old_dn.rdn().cloned();
        let old_parent = old_dn.parent();
        let target = req.target_dn();
        let forward_rdn = req
            .new_rdn
            .clone()
            .or_else(|| old_rdn.clone());
        next.rename(ctx, req)?;

        let (Some(forward_rdn), Some(old_rdn)) = (forward_rdn, old_rdn) else {
            return Ok(());
        };
        let csn = self.csn_factory.next().to_string();
        self.log.append(
            ChangeType::ModDn,
            ctx.principal().user().to_string(),
            csn,
            ChangeRecord::ModRdn {
                dn: old_dn,
                new_rdn: forward_rdn,
                delete_old_rdn: req.delete_old_rdn,
                new_superior: req.new_parent.clone(),
            },
            vec![ChangeRecord::ModRdn {
                dn: target,
                new_rdn: old_rdn,
                delete_old_rdn: true,
                new_superior: old_parent,
            }],
        );
        Ok(())
    }
}
