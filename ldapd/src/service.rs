//! Directory service and sessions.
//!
//! `DirectoryService` owns everything: the copy-on-write schema registry,
//! the partition nexus, the interceptor chain, the change log, the event
//! and trigger systems, and the referral and subentry caches. External
//! callers obtain an `LdapSession` and drive operations through it; DN and
//! filter strings are parsed at this boundary, so syntax errors surface
//! before the chain is entered.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::changelog::ChangeLog;
use crate::config::DirectoryConfig;
use crate::context::{Controls, OperationContext};
use crate::csn::CsnFactory;
use crate::entry::{Entry, Modification, Value};
use crate::error::{DirectoryError, Result};
use crate::interceptor::{
    names, AciInterceptor, AddRequest, AuthenticationInterceptor, BindRequest,
    ChangeLogInterceptor, CollectiveAttributeInterceptor, CompareRequest,
    DefaultAuthorizationInterceptor, DeleteRequest, EventInterceptor, EventSystem,
    ExceptionInterceptor, Interceptor, InterceptorChain, ListRequest, LookupRequest,
    ModifyRequest, NormalizationInterceptor, OperationalAttributeInterceptor, RenameRequest,
    ReferralInterceptor, SchemaInterceptor, SubentryCache, SubentryInterceptor,
    TriggerInterceptor, TriggerRegistry,
};
use crate::ldif::{self, ChangeRecord, LdifRecord};
use crate::name::{Dn, Rdn};
use crate::nexus::PartitionNexus;
use crate::partition::BTreePartition;
use crate::referral::ReferralManager;
use crate::schema::{bootstrap_registry, ids, SchemaRegistry};
use crate::search::{SearchCursor, SearchRequest, SearchScope};
use crate::session::{AuthLevel, Session};

const SYSTEM_PARTITION_SUFFIX: &str = "ou=system";

/// Interceptors skipped by internal maintenance operations (seeding, change
/// replay). Normalization stays; correctness checks stay.
const INTERNAL_BYPASS: &[&str] = &[
    names::ACI,
    names::DEFAULT_AUTHORIZATION,
    names::OPERATIONAL,
    names::CHANGELOG,
    names::EVENT,
    names::TRIGGER,
];

pub struct DirectoryService {
    registry: RwLock<Arc<SchemaRegistry>>,
    nexus: Arc<PartitionNexus>,
    chain: InterceptorChain,
    changelog: Arc<ChangeLog>,
    events: Arc<EventSystem>,
    triggers: Arc<TriggerRegistry>,
    referrals: Arc<ReferralManager>,
    subentries: Arc<SubentryCache>,
    csn_factory: Arc<CsnFactory>,
    config: DirectoryConfig,
    admin_dn: Dn,
}

impl DirectoryService {
    /// Build and start a service from a configuration: bootstrap the schema,
    /// open the partitions (plus the system partition), assemble the chain,
    /// seed the admin principal and warm the referral/subentry caches.
    pub fn start(config: DirectoryConfig) -> Result<Arc<DirectoryService>> {
        let registry = Arc::new(bootstrap_registry());
        let admin_dn = Dn::parse(&registry, &config.admin_dn)?;
        let nexus = Arc::new(PartitionNexus::new());
        let csn_factory = Arc::new(CsnFactory::new(config.replica_id));
        let changelog = Arc::new(ChangeLog::new());
        let events = Arc::new(EventSystem::new());
        let triggers = Arc::new(TriggerRegistry::new());
        let referrals = Arc::new(ReferralManager::new());
        let subentries = Arc::new(SubentryCache::new());

        // The system partition always exists; user partitions follow config.
        let system_suffix = Dn::parse(&registry, SYSTEM_PARTITION_SUFFIX)?;
        let system = BTreePartition::new(
            "system",
            system_suffix.clone(),
            &indexed_oids(&registry, &["objectClass", "uid"])?,
        );
        nexus.register(Arc::new(system))?;
        for pc in &config.partitions {
            let suffix = Dn::parse(&registry, &pc.suffix)?;
            let mut indexed: Vec<&str> = vec!["objectClass", ids::ADMINISTRATIVE_ROLE];
            indexed.extend(pc.indexed_attributes.iter().map(String::as_str));
            let oids = indexed_oids(&registry, &indexed)?;
            let partition: Arc<dyn crate::partition::Partition> = match &pc.working_directory {
                Some(dir) => Arc::new(BTreePartition::open(
                    pc.id.clone(),
                    suffix,
                    &oids,
                    dir.clone(),
                    &registry,
                )?),
                None => Arc::new(BTreePartition::new(pc.id.clone(), suffix, &oids)),
            };
            nexus.register(partition)?;
        }

        let interceptors = build_chain(
            &config,
            Arc::clone(&nexus),
            Arc::clone(&csn_factory),
            Arc::clone(&changelog),
            Arc::clone(&events),
            Arc::clone(&triggers),
            Arc::clone(&referrals),
            Arc::clone(&subentries),
            admin_dn.clone(),
            config.admin_password.clone(),
        )?;
        let chain = InterceptorChain::new(Arc::clone(&nexus), interceptors);

        let service = Arc::new(DirectoryService {
            registry: RwLock::new(registry),
            nexus,
            chain,
            changelog,
            events,
            triggers,
            referrals,
            subentries,
            csn_factory,
            config,
            admin_dn,
        });
        service.seed_system_entries()?;
        service.warm_caches()?;
        info!(instance = %service.config.instance_id, "directory service started");
        Ok(service)
    }

    // -- accessors ----------------------------------------------------------

    pub fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Copy-on-write schema edit: readers keep their snapshot, new
    /// operations see the updated registry.
    pub fn update_schema<F>(&self, edit: F)
    where
        F: FnOnce(&mut SchemaRegistry),
    {
        let mut guard = self.registry.write().unwrap_or_else(|p| p.into_inner());
        let mut next = (**guard).clone();
        edit(&mut next);
        *guard = Arc::new(next);
    }

    pub fn nexus(&self) -> &Arc<PartitionNexus> {
        &self.nexus
    }

    pub fn changelog(&self) -> &Arc<ChangeLog> {
        &self.changelog
    }

    pub fn events(&self) -> &Arc<EventSystem> {
        &self.events
    }

    pub fn triggers(&self) -> &Arc<TriggerRegistry> {
        &self.triggers
    }

    pub fn referrals(&self) -> &Arc<ReferralManager> {
        &self.referrals
    }

    pub fn admin_dn(&self) -> &Dn {
        &self.admin_dn
    }

    pub fn flush(&self) -> Result<()> {
        self.nexus.flush_all()
    }

    // -- sessions -----------------------------------------------------------

    /// A fresh anonymous session with the configured default limits.
    pub fn session(self: &Arc<Self>) -> LdapSession {
        LdapSession {
            service: Arc::clone(self),
            session: Arc::new(Session::with_limits(
                self.config.default_size_limit,
                self.config.default_time_limit,
            )),
        }
    }

    /// An internal session already bound as the administrator.
    fn internal_session(&self) -> Arc<Session> {
        let session = Session::anonymous();
        session.bind_as(self.admin_dn.clone(), AuthLevel::Admin);
        Arc::new(session)
    }

    fn internal_ctx(&self) -> OperationContext {
        OperationContext::new(self.registry(), self.internal_session())
            .with_bypass(INTERNAL_BYPASS)
    }

    // -- bootstrap ----------------------------------------------------------

    fn seed_system_entries(&self) -> Result<()> {
        let registry = self.registry();
        let ctx = self.internal_ctx();
        let system_dn = Dn::parse(&registry, SYSTEM_PARTITION_SUFFIX)?;
        if !self.nexus.has_entry(&ctx, &system_dn)? {
            let mut system = Entry::new(system_dn.clone());
            system.put(
                &registry,
                ids::OBJECT_CLASS,
                vec![Value::text("top"), Value::text("organizationalUnit")],
            )?;
            system.add(&registry, "ou", "system")?;
            self.chain.add(&ctx, AddRequest { entry: system })?;
        }
        if self.admin_dn.descendant_of(&system_dn) && !self.nexus.has_entry(&ctx, &self.admin_dn)?
        {
            let mut admin = Entry::new(self.admin_dn.clone());
            admin.put(
                &registry,
                ids::OBJECT_CLASS,
                vec![
                    Value::text("top"),
                    Value::text("inetOrgPerson"),
                ],
            )?;
            admin.add(&registry, "uid", "admin")?;
            admin.add(&registry, "cn", "administrator")?;
            admin.add(&registry, "sn", "administrator")?;
            admin.add(
                &registry,
                ids::USER_PASSWORD,
                Value::binary(self.config.admin_password.clone()),
            )?;
            self.chain.add(&ctx, AddRequest { entry: admin })?;
        }
        Ok(())
    }

    /// Rebuild the referral and subentry caches from persisted partitions.
    fn warm_caches(&self) -> Result<()> {
        let registry = self.registry();
        for partition in self.nexus.partitions() {
            let ctx = self.internal_ctx();
            let request = SearchRequest::new(
                partition.suffix().clone(),
                SearchScope::Subtree,
                crate::filter::Filter::Or(vec![
                    crate::filter::Filter::Equality {
                        attr: ids::OBJECT_CLASS.to_string(),
                        value: ids::OC_REFERRAL.to_string(),
                    },
                    crate::filter::Filter::Equality {
                        attr: ids::OBJECT_CLASS.to_string(),
                        value: ids::OC_SUBENTRY.to_string(),
                    },
                ]),
            );
            let cursor = match self.nexus.search(&ctx, &request) {
                Ok(c) => c,
                // An empty partition has no suffix entry yet.
                Err(e) if e.code == crate::error::ResultCode::NoSuchObject => continue,
                Err(e) => return Err(e),
            };
            for entry in cursor.collect_entries()? {
                if entry.is_referral(&registry) {
                    let urls = entry
                        .get(&registry, ids::REF)
                        .map(|a| {
                            a.values()
                                .iter()
                                .filter_map(|v| v.as_text().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    self.referrals.add(entry.dn.norm().to_string(), urls);
                }
                if entry.is_subentry(&registry) {
                    if let Err(e) = self.subentries.insert(&registry, &entry) {
                        warn!(dn = %entry.dn, error = %e, "skipping bad subentry");
                    }
                }
            }
        }
        Ok(())
    }

    // -- change log revert --------------------------------------------------

    /// Undo every change after `revision` by replaying reverse records
    /// newest-first, then truncate the log. Returns how many events were
    /// reverted.
    pub fn revert(&self, revision: u64) -> Result<usize> {
        let current = self.changelog.current_revision();
        if revision > current {
            return Err(DirectoryError::unwilling_to_perform(format!(
                "cannot revert forward to revision {} (current {})",
                revision, current
            )));
        }
        let mut events = self.changelog.events_since(revision);
        events.reverse();
        let count = events.len();
        for event in events {
            for record in &event.reverse {
                self.apply_record(record)?;
            }
        }
        self.changelog.truncate_to(revision);
        info!(revision, reverted = count, "change log reverted");
        Ok(count)
    }

    fn apply_record(&self, record: &ChangeRecord) -> Result<()> {
        let ctx = self.internal_ctx();
        match record {
            ChangeRecord::Add(entry) => self.chain.add(
                &ctx,
                AddRequest {
                    entry: entry.clone(),
                },
            ),
            ChangeRecord::Delete(dn) => self.chain.delete(&ctx, DeleteRequest { dn: dn.clone() }),
            ChangeRecord::Modify { dn, mods } => self
                .chain
                .modify(
                    &ctx,
                    ModifyRequest {
                        dn: dn.clone(),
                        mods: mods.clone(),
                    },
                )
                .map(|_| ()),
            ChangeRecord::ModRdn {
                dn,
                new_rdn,
                delete_old_rdn,
                new_superior,
            } => {
                // A move back to the current parent is a plain rename.
                let parent = new_superior
                    .as_ref()
                    .filter(|p| dn.parent().map(|cur| cur != **p).unwrap_or(true));
                self.chain.rename(
                    &ctx,
                    RenameRequest {
                        dn: dn.clone(),
                        new_rdn: Some(new_rdn.clone()),
                        delete_old_rdn: *delete_old_rdn,
                        new_parent: parent.cloned(),
                    },
                )
            }
        }
    }
}

fn indexed_oids(registry: &SchemaRegistry, attrs: &[&str]) -> Result<Vec<String>> {
    let mut oids = Vec::new();
    for attr in attrs {
        let oid = registry.require_attribute_type(attr)?.oid.clone();
        if !oids.contains(&oid) {
            oids.push(oid);
        }
    }
    Ok(oids)
}

/// Assemble the canonical chain, honoring an explicit interceptor order
/// from the configuration.
fn build_chain(
    config: &DirectoryConfig,
    nexus: Arc<PartitionNexus>,
    csn_factory: Arc<CsnFactory>,
    changelog: Arc<ChangeLog>,
    events: Arc<EventSystem>,
    triggers: Arc<TriggerRegistry>,
    referrals: Arc<ReferralManager>,
    subentries: Arc<SubentryCache>,
    admin_dn: Dn,
    admin_password: Vec<u8>,
) -> Result<Vec<Arc<dyn Interceptor>>> {
    let all: Vec<Arc<dyn Interceptor>> = vec![
        Arc::new(NormalizationInterceptor),
        Arc::new(AuthenticationInterceptor::new(
            Arc::clone(&nexus),
            admin_dn,
            admin_password,
        )),
        Arc::new(ReferralInterceptor::new(referrals)),
        Arc::new(AciInterceptor::new(Arc::clone(&subentries))),
        Arc::new(DefaultAuthorizationInterceptor::new(Arc::clone(
            &subentries,
        ))),
        Arc::new(ExceptionInterceptor::new(Arc::clone(&nexus))),
        Arc::new(SchemaInterceptor::new(Arc::clone(&nexus))),
        Arc::new(OperationalAttributeInterceptor::new(
            Arc::clone(&nexus),
            Arc::clone(&csn_factory),
        )),
        Arc::new(SubentryInterceptor::new(Arc::clone(&subentries))),
        Arc::new(CollectiveAttributeInterceptor::new(subentries)),
        Arc::new(ChangeLogInterceptor::new(changelog, Arc::clone(&nexus), csn_factory)),
        Arc::new(EventInterceptor::new(events, nexus)),
        Arc::new(TriggerInterceptor::new(triggers)),
    ];
    if config.interceptors.is_empty() {
        return Ok(all);
    }
    let mut ordered = Vec::with_capacity(config.interceptors.len());
    for name in &config.interceptors {
        let found = all
            .iter()
            .find(|i| i.name() == name)
            .cloned()
            .ok_or_else(|| {
                DirectoryError::unwilling_to_perform(format!("unknown interceptor: {}", name))
            })?;
        ordered.push(found);
    }
    Ok(ordered)
}

// ---------------------------------------------------------------------------
// LdapSession
// ---------------------------------------------------------------------------

/// The handle external callers drive operations through. Cheap to clone.
#[derive(Clone)]
pub struct LdapSession {
    service: Arc<DirectoryService>,
    session: Arc<Session>,
}

impl LdapSession {
    fn ctx(&self) -> OperationContext {
        OperationContext::new(self.service.registry(), Arc::clone(&self.session))
    }

    fn ctx_with(&self, controls: Controls, abandon: Option<Arc<AtomicBool>>) -> OperationContext {
        let mut ctx = self.ctx().with_controls(controls);
        if let Some(flag) = abandon {
            ctx = ctx.with_abandon_flag(flag);
        }
        ctx
    }

    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.service.registry()
    }

    pub fn service(&self) -> &Arc<DirectoryService> {
        &self.service
    }

    pub fn whoami(&self) -> Dn {
        self.session.principal()
    }

    // -- bind ---------------------------------------------------------------

    pub fn bind(&self, dn: &str, password: &[u8]) -> Result<()> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service.chain.bind(
            &self.ctx(),
            BindRequest {
                dn,
                password: password.to_vec(),
            },
        )
    }

    pub fn unbind(&self) {
        self.session.unbind();
    }

    // -- mutations ----------------------------------------------------------

    pub fn add(&self, entry: Entry) -> Result<()> {
        self.add_with(entry, Controls::default())
    }

    pub fn add_with(&self, entry: Entry, controls: Controls) -> Result<()> {
        self.service
            .chain
            .add(&self.ctx_with(controls, None), AddRequest { entry })
    }

    pub fn delete(&self, dn: &str) -> Result<()> {
        self.delete_with(dn, Controls::default())
    }

    pub fn delete_with(&self, dn: &str, controls: Controls) -> Result<()> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service
            .chain
            .delete(&self.ctx_with(controls, None), DeleteRequest { dn })
    }

    pub fn modify(&self, dn: &str, mods: Vec<Modification>) -> Result<Entry> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service
            .chain
            .modify(&self.ctx(), ModifyRequest { dn, mods })
    }

    pub fn rename(&self, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        let rdn = Rdn::parse(&registry, new_rdn)?;
        self.service.chain.rename(
            &self.ctx(),
            RenameRequest {
                dn,
                new_rdn: Some(rdn),
                delete_old_rdn,
                new_parent: None,
            },
        )
    }

    pub fn move_entry(&self, dn: &str, new_parent: &str) -> Result<()> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        let parent = Dn::parse(&registry, new_parent)?;
        self.service.chain.rename(
            &self.ctx(),
            RenameRequest {
                dn,
                new_rdn: None,
                delete_old_rdn: false,
                new_parent: Some(parent),
            },
        )
    }

    pub fn move_and_rename(
        &self,
        dn: &str,
        new_parent: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        let parent = Dn::parse(&registry, new_parent)?;
        let rdn = Rdn::parse(&registry, new_rdn)?;
        self.service.chain.rename(
            &self.ctx(),
            RenameRequest {
                dn,
                new_rdn: Some(rdn),
                delete_old_rdn,
                new_parent: Some(parent),
            },
        )
    }

    // -- reads --------------------------------------------------------------

    /// Full entry, operational attributes included.
    pub fn lookup(&self, dn: &str) -> Result<Entry> {
        self.lookup_attrs(dn, &["*", "+"])
    }

    pub fn lookup_attrs(&self, dn: &str, attrs: &[&str]) -> Result<Entry> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service.chain.lookup(
            &self.ctx(),
            LookupRequest {
                dn,
                attrs: attrs.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn has_entry(&self, dn: &str) -> Result<bool> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service.chain.has_entry(
            &self.ctx(),
            LookupRequest {
                dn,
                attrs: Vec::new(),
            },
        )
    }

    pub fn list(&self, dn: &str) -> Result<SearchCursor> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service.chain.list(&self.ctx(), ListRequest { dn })
    }

    pub fn compare(&self, dn: &str, attr: &str, value: impl Into<Value>) -> Result<bool> {
        let registry = self.service.registry();
        let dn = Dn::parse(&registry, dn)?;
        self.service.chain.compare(
            &self.ctx(),
            CompareRequest {
                dn,
                attr: attr.to_string(),
                value: value.into(),
            },
        )
    }

    /// Convenience search: subtree attrs defaulted, session limits applied.
    pub fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
    ) -> Result<SearchCursor> {
        let registry = self.service.registry();
        let base = Dn::parse(&registry, base)?;
        let filter = crate::filter::Filter::parse(filter)?;
        self.search_req(SearchRequest::new(base, scope, filter))
    }

    pub fn search_req(&self, request: SearchRequest) -> Result<SearchCursor> {
        self.execute_search(request, Controls::default(), None)
    }

    /// Full-control search entry point: request controls plus an abandon
    /// flag the caller may set from another thread.
    pub fn execute_search(
        &self,
        mut request: SearchRequest,
        controls: Controls,
        abandon: Option<Arc<AtomicBool>>,
    ) -> Result<SearchCursor> {
        request.size_limit = combine_limit(request.size_limit, self.session.size_limit);
        request.time_limit = combine_limit(request.time_limit as usize, self.session.time_limit as usize) as u64;
        self.service
            .chain
            .search(&self.ctx_with(controls, abandon), request)
    }

    // -- LDIF ---------------------------------------------------------------

    /// Apply an LDIF document: content records become adds, change records
    /// are applied as written. Returns the number of records applied.
    pub fn import_ldif(&self, text: &str) -> Result<usize> {
        let registry = self.service.registry();
        let mut parser = ldif::LdifParser::new(text.as_bytes());
        let mut count = 0;
        while let Some(record) = parser.read_record(&registry)? {
            match record {
                LdifRecord::Entry(entry) | LdifRecord::Change(ChangeRecord::Add(entry)) => {
                    self.add(entry)?;
                }
                LdifRecord::Change(ChangeRecord::Delete(dn)) => {
                    self.delete(dn.user())?;
                }
                LdifRecord::Change(ChangeRecord::Modify { dn, mods }) => {
                    self.modify(dn.user(), mods)?;
                }
                LdifRecord::Change(ChangeRecord::ModRdn {
                    dn,
                    new_rdn,
                    delete_old_rdn,
                    new_superior,
                }) => {
                    self.service.chain.rename(
                        &self.ctx(),
                        RenameRequest {
                            dn,
                            new_rdn: Some(new_rdn),
                            delete_old_rdn,
                            new_parent: new_superior,
                        },
                    )?;
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Render a subtree as LDIF (user attributes only, so a re-import
    /// reproduces the same logical entries).
    pub fn export_subtree(&self, base: &str) -> Result<String> {
        let registry = self.service.registry();
        let base = Dn::parse(&registry, base)?;
        let request = SearchRequest::new(
            base,
            SearchScope::Subtree,
            crate::filter::Filter::Presence {
                attr: ids::OBJECT_CLASS.to_string(),
            },
        );
        let mut entries = self.search_req(request)?.collect_entries()?;
        // Parents before children, deterministically.
        entries.sort();
        Ok(ldif::entries_to_string(&entries))
    }
}

fn combine_limit(requested: usize, session_default: usize) -> usize {
    match (requested, session_default) {
        (0, d) => d,
        (r, 0) => r,
        (r, d) => r.min(d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_limit_prefers_the_tighter_bound() {
        assert_eq!(combine_limit(0, 0), 0);
        assert_eq!(combine_limit(10, 0), 10);
        assert_eq!(combine_limit(0, 5), 5);
        assert_eq!(combine_limit(10, 5), 5);
        assert_eq!(combine_limit(3, 5), 3);
    }
}
