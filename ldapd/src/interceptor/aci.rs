//! Access control interceptor.
//!
//! Evaluates the access directives carried by `accessControlSubentry`
//! subentries against the bound principal and the operation. A directive is
//! a colon-separated triple `grant|deny : op[,op...] : who`, where `who` is
//! `anyone`, `anonymous`, `authenticated`, `self`, or `dn=<dn>`. Deny wins
//! over grant; with no applicable directive the decision falls through to
//! the default authorization stage. The administrator is never restricted.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::interceptor::subentry::SubentryCache;
use crate::interceptor::{
    names, AddRequest, CompareRequest, DeleteRequest, Interceptor, LookupRequest, ModifyRequest,
    Next, RenameRequest,
};
use crate::name::Dn;
use crate::schema::SchemaRegistry;
use crate::search::{SearchCursor, SearchRequest};

// ---------------------------------------------------------------------------
// Directives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AciOp {
    Read,
    Search,
    Compare,
    Add,
    Delete,
    Modify,
    Rename,
    All,
}

impl AciOp {
    fn parse(s: &str) -> Option<AciOp> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Some(AciOp::Read),
            "search" => Some(AciOp::Search),
            "compare" => Some(AciOp::Compare),
            "add" => Some(AciOp::Add),
            "delete" => Some(AciOp::Delete),
            "modify" => Some(AciOp::Modify),
            "rename" | "moddn" => Some(AciOp::Rename),
            "all" => Some(AciOp::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AciWho {
    Anyone,
    Anonymous,
    Authenticated,
    SelfEntry,
    /// Normalized DN.
    Dn(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AciDirective {
    pub grant: bool,
    pub ops: Vec<AciOp>,
    pub who: AciWho,
}

impl AciDirective {
    pub fn parse(registry: &SchemaRegistry, s: &str) -> Result<AciDirective> {
        let bad = |detail: &str| DirectoryError::invalid_attribute_syntax("prescriptiveACI", detail);
        let mut parts = s.splitn(3, ':');
        let action = parts.next().ok_or_else(|| bad("missing action"))?.trim();
        let grant = match action.to_ascii_lowercase().as_str() {
            "grant" => true,
            "deny" => false,
            other => return Err(bad(&format!("bad action: {}", other))),
        };
        let ops_text = parts.next().ok_or_else(|| bad("missing operations"))?;
        let mut ops = Vec::new();
        for op in ops_text.split(',') {
            ops.push(AciOp::parse(op).ok_or_else(|| bad(&format!("bad operation: {}", op)))?);
        }
        let who_text = parts.next().ok_or_else(|| bad("missing subject"))?.trim();
        let who = match who_text.to_ascii_lowercase().as_str() {
            "anyone" | "*" => AciWho::Anyone,
            "anonymous" => AciWho::Anonymous,
            "authenticated" => AciWho::Authenticated,
            "self" => AciWho::SelfEntry,
            _ => match who_text.strip_prefix("dn=") {
                Some(dn_text) => AciWho::Dn(Dn::parse(registry, dn_text)?.norm().to_string()),
                None => return Err(bad(&format!("bad subject: {}", who_text))),
            },
        };
        Ok(AciDirective { grant, ops, who })
    }

    fn matches(&self, ctx: &OperationContext, op: AciOp, target: &Dn) -> bool {
        if !self.ops.contains(&op) && !self.ops.contains(&AciOp::All) {
            return false;
        }
        let principal = ctx.principal();
        match &self.who {
            AciWho::Anyone => true,
            AciWho::Anonymous => ctx.session.is_anonymous(),
            AciWho::Authenticated => !ctx.session.is_anonymous(),
            AciWho::SelfEntry => !principal.is_empty() && principal == *target,
            AciWho::Dn(dn_norm) => principal.norm() == dn_norm,
        }
    }
}

/// Tri-state ACI decision for one operation on one entry: `Some(false)` is
/// an explicit deny, `Some(true)` an explicit grant, `None` means no
/// applicable directive.
pub fn aci_decision(
    cache: &SubentryCache,
    ctx: &OperationContext,
    op: AciOp,
    target: &Dn,
) -> Option<bool> {
    let mut granted = None;
    for subentry in cache.covering(target) {
        for directive in &subentry.aci {
            if directive.matches(ctx, op, target) {
                if !directive.grant {
                    return Some(false);
                }
                granted = Some(true);
            }
        }
    }
    granted
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

pub struct AciInterceptor {
    cache: Arc<SubentryCache>,
}

impl AciInterceptor {
    pub fn new(cache: Arc<SubentryCache>) -> Self {
        AciInterceptor { cache }
    }

    fn check(&self, ctx: &OperationContext, op: AciOp, target: &Dn) -> Result<()> {
        if ctx.session.is_admin() {
            return Ok(());
        }
        if aci_decision(&self.cache, ctx, op, target) == Some(false) {
            return Err(DirectoryError::insufficient_access(format!(
                "access to {} denied by ACI",
                target.user()
            )));
        }
        Ok(())
    }
}

impl Interceptor for AciInterceptor {
    fn name(&self) -> &'static str {
        names::ACI
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        self.check(ctx, AciOp::Add, &req.entry.dn)?;
        next.add(ctx, req)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check(ctx, AciOp::Delete, &req.dn)?;
        next.delete(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.check(ctx, AciOp::Modify, &req.dn)?;
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check(ctx, AciOp::Rename, &req.dn)?;
        next.rename(ctx, req)
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.check(ctx, AciOp::Read, &req.dn)?;
        next.lookup(ctx, req)
    }

    fn compare(
        &self,
        ctx: &OperationContext,
        req: &mut CompareRequest,
        next: Next<'_>,
    ) -> Result<bool> {
        self.check(ctx, AciOp::Compare, &req.dn)?;
        next.compare(ctx, req)
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        self.check(ctx, AciOp::Search, &req.base)?;
        let cursor = next.search(ctx, req)?;
        if ctx.session.is_admin() {
            return Ok(cursor);
        }
        // Filter out entries the principal may not read.
        let cache = Arc::clone(&self.cache);
        let session = Arc::clone(&ctx.session);
        let registry = Arc::clone(&ctx.registry);
        let shadow = OperationContext::new(registry, session);
        Ok(cursor.map_entries(move |e| {
            if aci_decision(&cache, &shadow, AciOp::Read, &e.dn) == Some(false) {
                None
            } else {
                Some(e)
            }
        }))
    }
}
