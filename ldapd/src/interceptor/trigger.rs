//! Trigger interceptor.
//!
//! Executes stored procedures bound to directory events. A procedure is a
//! host-registered closure with a (event, base, scope) binding; matching
//! procedures run after the operation commits. A failing procedure is
//! logged and does not undo the committed change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::Result;
use crate::interceptor::event::scope_matches;
use crate::interceptor::{
    names, AddRequest, DeleteRequest, Interceptor, ModifyRequest, Next, RenameRequest,
};
use crate::name::Dn;
use crate::search::SearchScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    AfterAdd,
    AfterDelete,
    AfterModify,
    AfterModDn,
}

#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub event: TriggerEvent,
    pub base: Dn,
    pub scope: SearchScope,
}

/// What a procedure sees when it fires.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub event: TriggerEvent,
    pub dn: Dn,
    /// The entry after the operation (absent for delete).
    pub entry: Option<Entry>,
}

pub type StoredProcedure = Arc<dyn Fn(&TriggerContext) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct TriggerRegistry {
    triggers: RwLock<Vec<(u64, TriggerSpec, StoredProcedure)>>,
    next_id: AtomicU64,
}

impl TriggerRegistry {
    pub fn new() -> TriggerRegistry {
        TriggerRegistry::default()
    }

    pub fn register(&self, spec: TriggerSpec, procedure: StoredProcedure) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.triggers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, spec, procedure));
        id
    }

    pub fn unregister(&self, id: u64) {
        self.triggers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(tid, _, _)| *tid != id);
    }

    pub fn fire(&self, event: TriggerEvent, dn: &Dn, entry: Option<&Entry>) {
        let procedures: Vec<StoredProcedure> = self
            .triggers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, spec, _)| spec.event == event && scope_matches(&spec.base, spec.scope, dn))
            .map(|(_, _, p)| Arc::clone(p))
            .collect();
        if procedures.is_empty() {
            return;
        }
        let tc = TriggerContext {
            event,
            dn: dn.clone(),
            entry: entry.cloned(),
        };
        for procedure in procedures {
            if let Err(e) = procedure(&tc) {
                warn!(dn = %dn, error = %e, "stored procedure failed");
            }
        }
    }
}

pub struct TriggerInterceptor {
    triggers: Arc<TriggerRegistry>,
}

impl TriggerInterceptor {
    pub fn new(triggers: Arc<TriggerRegistry>) -> Self {
        TriggerInterceptor { triggers }
    }
}

impl Interceptor for TriggerInterceptor {
    fn name(&self) -> &'static str {
        names::TRIGGER
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        next.add(ctx, req)?;
        self.triggers
            .fire(TriggerEvent::AfterAdd, &req.entry.dn, Some(&req.entry));
        Ok(())
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        next.delete(ctx, req)?;
        self.triggers.fire(TriggerEvent::AfterDelete, &req.dn, None);
        Ok(())
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let after = next.modify(ctx, req)?;
        self.triggers
            .fire(TriggerEvent::AfterModify, &req.dn, Some(&after));
        Ok(after)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        let target = req.target_dn();
        next.rename(ctx, req)?;
        self.triggers.fire(TriggerEvent::AfterModDn, &target, None);
        Ok(())
    }
}
