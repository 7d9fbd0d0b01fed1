//! Interceptor chain.
//!
//! Every operation passes head-to-tail through an ordered list of
//! interceptors; the tail falls through to the partition nexus. Each
//! interceptor gets a `Next` continuation and may short-circuit, rewrite the
//! request, or post-process the result as the stack unwinds. A
//! per-operation bypass set (on the `OperationContext`) lets internal calls
//! skip stages by name.

mod aci;
mod authn;
mod authz;
mod changelog;
mod collective;
mod event;
mod exception;
mod normalization;
mod operational;
mod referral;
mod schema_check;
mod subentry;
mod trigger;

pub use aci::{AciDirective, AciInterceptor, AciOp};
pub use authn::AuthenticationInterceptor;
pub use authz::DefaultAuthorizationInterceptor;
pub use changelog::ChangeLogInterceptor;
pub use collective::CollectiveAttributeInterceptor;
pub use event::{DirectoryListener, EventInterceptor, EventSystem, ListenerCriteria};
pub use exception::ExceptionInterceptor;
pub use normalization::NormalizationInterceptor;
pub use operational::{project_attributes, OperationalAttributeInterceptor};
pub use referral::ReferralInterceptor;
pub use schema_check::SchemaInterceptor;
pub use subentry::{SubentryCache, SubentryInterceptor, SubtreeSpec};
pub use trigger::{StoredProcedure, TriggerContext, TriggerEvent, TriggerInterceptor, TriggerRegistry, TriggerSpec};

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::{Entry, Modification, Value};
use crate::error::Result;
use crate::name::{Dn, Rdn};
use crate::nexus::PartitionNexus;
use crate::search::{SearchCursor, SearchRequest};

/// Canonical interceptor names, usable in bypass sets.
pub mod names {
    pub const NORMALIZATION: &str = "normalizationInterceptor";
    pub const AUTHENTICATION: &str = "authenticationInterceptor";
    pub const REFERRAL: &str = "referralInterceptor";
    pub const ACI: &str = "aciAuthorizationInterceptor";
    pub const DEFAULT_AUTHORIZATION: &str = "defaultAuthorizationInterceptor";
    pub const EXCEPTION: &str = "exceptionInterceptor";
    pub const SCHEMA: &str = "schemaInterceptor";
    pub const OPERATIONAL: &str = "operationalAttributeInterceptor";
    pub const SUBENTRY: &str = "subentryInterceptor";
    pub const COLLECTIVE: &str = "collectiveAttributeInterceptor";
    pub const CHANGELOG: &str = "changeLogInterceptor";
    pub const EVENT: &str = "eventInterceptor";
    pub const TRIGGER: &str = "triggerInterceptor";

    /// Everything except normalization; used by internal replay paths.
    pub const ALL_BUT_NORMALIZATION: &[&str] = &[
        AUTHENTICATION,
        REFERRAL,
        ACI,
        DEFAULT_AUTHORIZATION,
        EXCEPTION,
        SCHEMA,
        OPERATIONAL,
        SUBENTRY,
        COLLECTIVE,
        CHANGELOG,
        EVENT,
        TRIGGER,
    ];
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub dn: Dn,
    pub password: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub entry: Entry,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub dn: Dn,
}

#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub dn: Dn,
    pub mods: Vec<Modification>,
}

/// Rename, move, or both.
#[derive(Debug, Clone)]
pub struct RenameRequest {
    pub dn: Dn,
    pub new_rdn: Option<Rdn>,
    pub delete_old_rdn: bool,
    pub new_parent: Option<Dn>,
}

impl RenameRequest {
    /// The DN the entry will have after the operation.
    pub fn target_dn(&self) -> Dn {
        let parent = self
            .new_parent
            .clone()
            .or_else(|| self.dn.parent())
            .unwrap_or_else(Dn::empty);
        let rdn = self
            .new_rdn
            .clone()
            .or_else(|| self.dn.rdn().cloned());
        match rdn {
            Some(r) => parent.append(r),
            None => parent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub dn: Dn,
    /// Requested attributes: names, or the sentinels `*`, `+`, `1.1`.
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub dn: Dn,
}

#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub dn: Dn,
    pub attr: String,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Interceptor trait
// ---------------------------------------------------------------------------

/// One stage of the pipeline. Every method defaults to passing through.
#[allow(unused_variables)]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn bind(&self, ctx: &OperationContext, req: &mut BindRequest, next: Next<'_>) -> Result<()> {
        next.bind(ctx, req)
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        next.add(ctx, req)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        next.delete(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        next.rename(ctx, req)
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        next.lookup(ctx, req)
    }

    fn has_entry(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<bool> {
        next.has_entry(ctx, req)
    }

    fn list(
        &self,
        ctx: &OperationContext,
        req: &mut ListRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        next.list(ctx, req)
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        next.search(ctx, req)
    }

    fn compare(
        &self,
        ctx: &OperationContext,
        req: &mut CompareRequest,
        next: Next<'_>,
    ) -> Result<bool> {
        next.compare(ctx, req)
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Continuation over the remaining interceptors; falls through to the nexus.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    nexus: &'a PartitionNexus,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Interceptor>], nexus: &'a PartitionNexus) -> Next<'a> {
        Next { chain, nexus }
    }

    /// First non-bypassed interceptor and the continuation past it.
    fn advance(&self, ctx: &OperationContext) -> Option<(&'a dyn Interceptor, Next<'a>)> {
        for (i, interceptor) in self.chain.iter().enumerate() {
            if !ctx.is_bypassed(interceptor.name()) {
                return Some((
                    interceptor.as_ref(),
                    Next {
                        chain: &self.chain[i + 1..],
                        nexus: self.nexus,
                    },
                ));
            }
        }
        None
    }

    pub fn bind(self, ctx: &OperationContext, req: &mut BindRequest) -> Result<()> {
        match self.advance(ctx) {
            Some((i, next)) => i.bind(ctx, req, next),
            // Nothing below the chain handles bind.
            None => Err(crate::error::DirectoryError::inappropriate_authentication(
                "no authenticator available",
            )),
        }
    }

    pub fn add(self, ctx: &OperationContext, req: &mut AddRequest) -> Result<()> {
        match self.advance(ctx) {
            Some((i, next)) => i.add(ctx, req, next),
            None => self.nexus.add(ctx, req.entry.clone()),
        }
    }

    pub fn delete(self, ctx: &OperationContext, req: &mut DeleteRequest) -> Result<()> {
        match self.advance(ctx) {
            Some((i, next)) => i.delete(ctx, req, next),
            None => self.nexus.delete(ctx, &req.dn),
        }
    }

    pub fn modify(self, ctx: &OperationContext, req: &mut ModifyRequest) -> Result<Entry> {
        match self.advance(ctx) {
            Some((i, next)) => i.modify(ctx, req, next),
            None => self.nexus.modify(ctx, &req.dn, &req.mods),
        }
    }

    pub fn rename(self, ctx: &OperationContext, req: &mut RenameRequest) -> Result<()> {
        match self.advance(ctx) {
            Some((i, next)) => i.rename(ctx, req, next),
            None => self.nexus.rename(
                ctx,
                &req.dn,
                req.new_rdn.as_ref(),
                req.delete_old_rdn,
                req.new_parent.as_ref(),
            ),
        }
    }

    pub fn lookup(self, ctx: &OperationContext, req: &mut LookupRequest) -> Result<Entry> {
        match self.advance(ctx) {
            Some((i, next)) => i.lookup(ctx, req, next),
            None => self.nexus.lookup(ctx, &req.dn),
        }
    }

    pub fn has_entry(self, ctx: &OperationContext, req: &mut LookupRequest) -> Result<bool> {
        match self.advance(ctx) {
            Some((i, next)) => i.has_entry(ctx, req, next),
            None => self.nexus.has_entry(ctx, &req.dn),
        }
    }

    pub fn list(self, ctx: &OperationContext, req: &mut ListRequest) -> Result<SearchCursor> {
        match self.advance(ctx) {
            Some((i, next)) => i.list(ctx, req, next),
            None => self.nexus.list(ctx, &req.dn),
        }
    }

    pub fn search(self, ctx: &OperationContext, req: &mut SearchRequest) -> Result<SearchCursor> {
        match self.advance(ctx) {
            Some((i, next)) => i.search(ctx, req, next),
            None => self.nexus.search(ctx, req),
        }
    }

    pub fn compare(self, ctx: &OperationContext, req: &mut CompareRequest) -> Result<bool> {
        match self.advance(ctx) {
            Some((i, next)) => i.compare(ctx, req, next),
            None => self.nexus.compare(ctx, &req.dn, &req.attr, &req.value),
        }
    }
}

// ---------------------------------------------------------------------------
// InterceptorChain
// ---------------------------------------------------------------------------

pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    nexus: Arc<PartitionNexus>,
}

impl InterceptorChain {
    pub fn new(nexus: Arc<PartitionNexus>, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        InterceptorChain {
            interceptors,
            nexus,
        }
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    fn head(&self) -> Next<'_> {
        Next::new(&self.interceptors, &self.nexus)
    }

    pub fn bind(&self, ctx: &OperationContext, mut req: BindRequest) -> Result<()> {
        self.head().bind(ctx, &mut req)
    }

    pub fn add(&self, ctx: &OperationContext, mut req: AddRequest) -> Result<()> {
        self.head().add(ctx, &mut req)
    }

    pub fn delete(&self, ctx: &OperationContext, mut req: DeleteRequest) -> Result<()> {
        self.head().delete(ctx, &mut req)
    }

    pub fn modify(&self, ctx: &OperationContext, mut req: ModifyRequest) -> Result<Entry> {
        self.head().modify(ctx, &mut req)
    }

    pub fn rename(&self, ctx: &OperationContext, mut req: RenameRequest) -> Result<()> {
        self.head().rename(ctx, &mut req)
    }

    pub fn lookup(&self, ctx: &OperationContext, mut req: LookupRequest) -> Result<Entry> {
        self.head().lookup(ctx, &mut req)
    }

    pub fn has_entry(&self, ctx: &OperationContext, mut req: LookupRequest) -> Result<bool> {
        self.head().has_entry(ctx, &mut req)
    }

    pub fn list(&self, ctx: &OperationContext, mut req: ListRequest) -> Result<SearchCursor> {
        self.head().list(ctx, &mut req)
    }

    pub fn search(&self, ctx: &OperationContext, mut req: SearchRequest) -> Result<SearchCursor> {
        self.head().search(ctx, &mut req)
    }

    pub fn compare(&self, ctx: &OperationContext, mut req: CompareRequest) -> Result<bool> {
        self.head().compare(ctx, &mut req)
    }
}
