//! Collective attribute interceptor.
//!
//! At read time, fuses collective attribute values from the applicable
//! `collectiveAttributeSubentry` entries into returned entries. An entry
//! opts out per attribute through `collectiveExclusions`, or entirely with
//! `excludeAllCollectiveAttributes`.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::Result;
use crate::interceptor::subentry::SubentryCache;
use crate::interceptor::{names, Interceptor, LookupRequest, Next};
use crate::schema::{ids, SchemaRegistry};
use crate::search::{SearchCursor, SearchRequest};

pub struct CollectiveAttributeInterceptor {
    cache: Arc<SubentryCache>,
}

impl CollectiveAttributeInterceptor {
    pub fn new(cache: Arc<SubentryCache>) -> Self {
        CollectiveAttributeInterceptor { cache }
    }
}

const EXCLUDE_ALL: &str = "excludeallcollectiveattributes";

/// Fuse applicable collective values into `entry`.
pub fn fuse_collective(
    registry: &SchemaRegistry,
    cache: &SubentryCache,
    mut entry: Entry,
) -> Entry {
    if entry.is_subentry(registry) {
        return entry;
    }
    let exclusions: Vec<String> = entry
        .get(registry, ids::COLLECTIVE_EXCLUSIONS)
        .map(|a| {
            a.values()
                .iter()
                .filter_map(|v| v.as_text().map(str::to_lowercase))
                .collect()
        })
        .unwrap_or_default();
    if exclusions.iter().any(|e| e == EXCLUDE_ALL || e == "2.5.18.0") {
        return entry;
    }
    let excluded = |attr: &str| -> bool {
        let oid = registry.attribute_type(attr).map(|at| at.oid.clone());
        exclusions.iter().any(|e| {
            e.eq_ignore_ascii_case(attr)
                || oid
                    .as_deref()
                    .and_then(|o| registry.attribute_type(e).map(|at| at.oid == o))
                    .unwrap_or(false)
        })
    };

    for subentry in cache.covering(&entry.dn) {
        for (attr, values) in &subentry.collective {
            if excluded(attr) {
                continue;
            }
            for value in values {
                match entry.has_value(registry, attr, value) {
                    Ok(false) => {
                        let _ = entry.add(registry, attr, value.clone());
                    }
                    _ => continue,
                }
            }
        }
    }
    entry
}

impl Interceptor for CollectiveAttributeInterceptor {
    fn name(&self) -> &'static str {
        names::COLLECTIVE
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let entry = next.lookup(ctx, req)?;
        Ok(fuse_collective(&ctx.registry, &self.cache, entry))
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        let cursor = next.search(ctx, req)?;
        let cache = Arc::clone(&self.cache);
        let registry = Arc::clone(&ctx.registry);
        Ok(cursor.map_entries(move |e| Some(fuse_collective(&registry, &cache, e))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Dn;
    use crate::schema::bootstrap_registry;

    fn cache_with_collective(registry: &SchemaRegistry) -> SubentryCache {
        let dn = Dn::parse(registry, "cn=locale,o=example").unwrap();
        let mut sub = Entry::new(dn);
        sub.add(registry, "objectClass", "top").unwrap();
        sub.add(registry, "objectClass", "subentry").unwrap();
        sub.add(registry, "objectClass", "collectiveAttributeSubentry")
            .unwrap();
        sub.add(registry, "cn", "locale").unwrap();
        sub.add(registry, "subtreeSpecification", "{}").unwrap();
        sub.add(registry, "c-l", "Dublin").unwrap();
        let cache = SubentryCache::new();
        cache.insert(registry, &sub).unwrap();
        cache
    }

    fn person(registry: &SchemaRegistry, dn: &str) -> Entry {
        let dn = Dn::parse(registry, dn).unwrap();
        let mut e = Entry::new(dn);
        e.add(registry, "objectClass", "person").unwrap();
        e.add(registry, "cn", "x").unwrap();
        e.add(registry, "sn", "y").unwrap();
        e
    }

    #[test]
    fn collective_value_is_fused_in_scope() {
        let reg = bootstrap_registry();
        let cache = cache_with_collective(&reg);
        let fused = fuse_collective(&reg, &cache, person(&reg, "cn=a,o=example"));
        assert_eq!(fused.first_text(&reg, "c-l"), Some("Dublin"));
    }

    #[test]
    fn out_of_scope_entry_is_untouched() {
        let reg = bootstrap_registry();
        let cache = cache_with_collective(&reg);
        let fused = fuse_collective(&reg, &cache, person(&reg, "cn=a,o=other"));
        assert!(fused.get(&reg, "c-l").is_none());
    }

    #[test]
    fn exclusions_suppress_fusion() {
        let reg = bootstrap_registry();
        let cache = cache_with_collective(&reg);
        let mut e = person(&reg, "cn=a,o=example");
        e.add(&reg, "collectiveExclusions", "c-l").unwrap();
        let fused = fuse_collective(&reg, &cache, e);
        assert!(fused.get(&reg, "c-l").is_none());

        let mut e = person(&reg, "cn=b,o=example");
        e.add(&reg, "collectiveExclusions", "excludeAllCollectiveAttributes")
            .unwrap();
        let fused = fuse_collective(&reg, &cache, e);
        assert!(fused.get(&reg, "c-l").is_none());
    }

    #[test]
    fn own_value_is_not_duplicated() {
        let reg = bootstrap_registry();
        let cache = cache_with_collective(&reg);
        let mut e = person(&reg, "cn=a,o=example");
        e.add(&reg, "c-l", "Dublin").unwrap();
        let fused = fuse_collective(&reg, &cache, e);
        assert_eq!(fused.get(&reg, "c-l").unwrap().len(), 1);
    }
}
