//! Event interceptor.
//!
//! Dispatches change notifications to registered listeners after a mutation
//! commits. A listener subscribes with a (base, scope, filter) criterion;
//! notifications fire only for entries the criterion matches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::Filter;
use crate::interceptor::{
    names, AddRequest, DeleteRequest, Interceptor, ModifyRequest, Next, RenameRequest,
};
use crate::name::Dn;
use crate::nexus::PartitionNexus;
use crate::schema::SchemaRegistry;
use crate::search::{evaluate, SearchScope};

/// What a listener is interested in.
#[derive(Debug, Clone)]
pub struct ListenerCriteria {
    pub base: Dn,
    pub scope: SearchScope,
    pub filter: Filter,
}

/// Change notification callbacks. All default to no-ops.
#[allow(unused_variables)]
pub trait DirectoryListener: Send + Sync {
    fn entry_added(&self, entry: &Entry) {}
    fn entry_deleted(&self, entry: &Entry) {}
    fn entry_modified(&self, before: &Entry, after: &Entry) {}
    fn entry_renamed(&self, old_dn: &Dn, entry: &Entry) {}
}

pub(crate) fn scope_matches(base: &Dn, scope: SearchScope, dn: &Dn) -> bool {
    match scope {
        SearchScope::Object => dn == base,
        SearchScope::OneLevel => dn.parent().map(|p| p == *base).unwrap_or(false),
        SearchScope::Subtree => dn.at_or_under(base),
    }
}

#[derive(Default)]
pub struct EventSystem {
    listeners: RwLock<Vec<(u64, ListenerCriteria, Arc<dyn DirectoryListener>)>>,
    next_id: AtomicU64,
}

impl EventSystem {
    pub fn new() -> EventSystem {
        EventSystem::default()
    }

    pub fn register(
        &self,
        criteria: ListenerCriteria,
        listener: Arc<dyn DirectoryListener>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, criteria, listener));
        id
    }

    pub fn unregister(&self, id: u64) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(lid, _, _)| *lid != id);
    }

    /// Listeners whose criteria match `entry` at `dn`.
    fn matching(
        &self,
        registry: &SchemaRegistry,
        dn: &Dn,
        entry: &Entry,
    ) -> Vec<Arc<dyn DirectoryListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, c, _)| {
                scope_matches(&c.base, c.scope, dn)
                    && evaluate(registry, entry, &c.filter.normalize(registry)).unwrap_or(false)
            })
            .map(|(_, _, l)| Arc::clone(l))
            .collect()
    }

    pub fn notify_added(&self, registry: &SchemaRegistry, entry: &Entry) {
        for l in self.matching(registry, &entry.dn, entry) {
            l.entry_added(entry);
        }
    }

    pub fn notify_deleted(&self, registry: &SchemaRegistry, entry: &Entry) {
        for l in self.matching(registry, &entry.dn, entry) {
            l.entry_deleted(entry);
        }
    }

    pub fn notify_modified(&self, registry: &SchemaRegistry, before: &Entry, after: &Entry) {
        for l in self.matching(registry, &after.dn, after) {
            l.entry_modified(before, after);
        }
    }

    pub fn notify_renamed(&self, registry: &SchemaRegistry, old_dn: &Dn, entry: &Entry) {
        for l in self.matching(registry, &entry.dn, entry) {
            l.entry_renamed(old_dn, entry);
        }
    }
}

pub struct EventInterceptor {
    events: Arc<EventSystem>,
    nexus: Arc<PartitionNexus>,
}

impl EventInterceptor {
    pub fn new(events: Arc<EventSystem>, nexus: Arc<PartitionNexus>) -> Self {
        EventInterceptor { events, nexus }
    }
}

impl Interceptor for EventInterceptor {
    fn name(&self) -> &'static str {
        names::EVENT
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        next.add(ctx, req)?;
        self.events.notify_added(&ctx.registry, &req.entry);
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
        self.events.notify_deleted(&ctx.registry, &before);
        Ok(())
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let before = self.nexus.lookup(ctx, &req.dn)?;
        let after = next.modify(ctx, req)?;
        self.events.notify_modified(&ctx.registry, &before, &after);
        Ok(after)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        let old_dn = req.dn.clone();
        let target = req.target_dn();
        next.rename(ctx, req)?;
        match self.nexus.lookup(ctx, &target) {
            Ok(entry) => self.events.notify_renamed(&ctx.registry, &old_dn, &entry),
            Err(e) => debug!(dn = %target, error = %e, "renamed entry vanished before notify"),
        }
        Ok(())
    }
}
