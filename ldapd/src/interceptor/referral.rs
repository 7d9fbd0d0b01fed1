//! Referral interceptor.
//!
//! When a request targets a DN at or under a referral entry and does not
//! carry the ManageDsaIT control, the operation stops here with a referral
//! result carrying the `ref` URLs. With the control, referral entries behave
//! like ordinary entries -- which is also how this interceptor maintains the
//! referral manager on add/delete/modify/rename of referral entries.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::interceptor::{
    names, AddRequest, CompareRequest, DeleteRequest, Interceptor, ListRequest, LookupRequest,
    ModifyRequest, Next, RenameRequest,
};
use crate::name::Dn;
use crate::referral::ReferralManager;
use crate::schema::ids;
use crate::search::{SearchCursor, SearchRequest};

pub struct ReferralInterceptor {
    manager: Arc<ReferralManager>,
}

impl ReferralInterceptor {
    pub fn new(manager: Arc<ReferralManager>) -> Self {
        ReferralInterceptor { manager }
    }

    fn check(&self, ctx: &OperationContext, dn: &Dn) -> Result<()> {
        if ctx.controls.manage_dsa_it {
            return Ok(());
        }
        if let Some(hit) = self.manager.find_covering(dn) {
            return Err(DirectoryError::referral(hit.urls));
        }
        Ok(())
    }

    fn ref_urls(ctx: &OperationContext, entry: &Entry) -> Vec<String> {
        entry
            .get(&ctx.registry, ids::REF)
            .map(|a| {
                a.values()
                    .iter()
                    .filter_map(|v| v.as_text().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Interceptor for ReferralInterceptor {
    fn name(&self) -> &'static str {
        names::REFERRAL
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        self.check(ctx, &req.entry.dn)?;
        let is_referral = req.entry.is_referral(&ctx.registry);
        let urls = Self::ref_urls(ctx, &req.entry);
        let dn_norm = req.entry.dn.norm().to_string();
        next.add(ctx, req)?;
        if is_referral {
            self.manager.add(dn_norm, urls);
        }
        Ok(())
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check(ctx, &req.dn)?;
        next.delete(ctx, req)?;
        self.manager.remove(req.dn.norm());
        Ok(())
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.check(ctx, &req.dn)?;
        let result = next.modify(ctx, req)?;
        if result.is_referral(&ctx.registry) {
            self.manager
                .add(req.dn.norm().to_string(), Self::ref_urls(ctx, &result));
        } else {
            self.manager.remove(req.dn.norm());
        }
        Ok(result)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check(ctx, &req.dn)?;
        if let Some(parent) = &req.new_parent {
            self.check(ctx, parent)?;
        }
        let was_referral = self.manager.is_referral(req.dn.norm());
        let old_norm = req.dn.norm().to_string();
        let target = req.target_dn();
        next.rename(ctx, req)?;
        if was_referral {
            if let Some(hit) = self.manager.find_covering(&req.dn) {
                // Only the exact entry moved; re-key it.
                if hit.dn == old_norm {
                    self.manager.remove(&old_norm);
                    self.manager.add(target.norm().to_string(), hit.urls);
                }
            } else {
                self.manager.remove(&old_norm);
            }
        }
        Ok(())
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.check(ctx, &req.dn)?;
        next.lookup(ctx, req)
    }

    fn list(
        &self,
        ctx: &OperationContext,
        req: &mut ListRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        self.check(ctx, &req.dn)?;
        next.list(ctx, req)
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        self.check(ctx, &req.base)?;
        next.search(ctx, req)
    }

    fn compare(
        &self,
        ctx: &OperationContext,
        req: &mut CompareRequest,
        next: Next<'_>,
    ) -> Result<bool> {
        self.check(ctx, &req.dn)?;
        next.compare(ctx, req)
    }
}
