//! Exception interceptor.
//!
//! Verifies the pre-conditions every operation relies on and raises the
//! canonical errors before anything reaches the partition: the target (or
//! the parent, for add) must exist, the parent must not be an alias, and
//! the target of add/rename must not collide with an existing entry.
//! Errors carry the matched DN computed by the owning partition.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::interceptor::{
    names, AddRequest, CompareRequest, DeleteRequest, Interceptor, ModifyRequest, Next,
    RenameRequest,
};
use crate::nexus::PartitionNexus;

pub struct ExceptionInterceptor {
    nexus: Arc<PartitionNexus>,
}

impl ExceptionInterceptor {
    pub fn new(nexus: Arc<PartitionNexus>) -> Self {
        ExceptionInterceptor { nexus }
    }
}

impl Interceptor for ExceptionInterceptor {
    fn name(&self) -> &'static str {
        names::EXCEPTION
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        let dn = &req.entry.dn;
        if dn.is_empty() {
            return Err(DirectoryError::unwilling_to_perform(
                "the root DSE cannot be added",
            ));
        }
        if self.nexus.has_entry(ctx, dn)? {
            return Err(DirectoryError::entry_already_exists(dn.user()));
        }
        // Parent checks apply except when creating a partition suffix.
        let partition = self.nexus.partition_for(dn)?;
        if dn != partition.suffix() {
            let parent_dn = dn
                .parent()
                .ok_or_else(|| DirectoryError::invalid_dn_syntax(dn.user(), "no parent"))?;
            let parent = self.nexus.lookup(ctx, &parent_dn)?;
            if parent.is_alias(&ctx.registry) {
                return Err(DirectoryError::alias_problem(
                    "cannot add an entry under an alias",
                ));
            }
        }
        next.add(ctx, req)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        if req.dn.is_empty() {
            return Err(DirectoryError::unwilling_to_perform(
                "the root DSE cannot be deleted",
            ));
        }
        // Existence check; propagates noSuchObject with the matched DN.
        self.nexus.lookup(ctx, &req.dn)?;
        next.delete(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.nexus.lookup(ctx, &req.dn)?;
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.nexus.lookup(ctx, &req.dn)?;
        if let Some(parent) = &req.new_parent {
            self.nexus.lookup(ctx, parent)?;
        }
        let target = req.target_dn();
        if target != req.dn && self.nexus.has_entry(ctx, &target)? {
            return Err(DirectoryError::entry_already_exists(target.user()));
        }
        next.rename(ctx, req)
    }

    fn compare(
        &self,
        ctx: &OperationContext,
        req: &mut CompareRequest,
        next: Next<'_>,
    ) -> Result<bool> {
        self.nexus.lookup(ctx, &req.dn)?;
        next.compare(ctx, req)
    }
}
