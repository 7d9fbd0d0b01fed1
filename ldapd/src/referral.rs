//! Referral manager.
//!
//! An in-memory mirror of the referral entries in the DIT (object class
//! `referral`, `ref` URLs), keyed by normalized DN. Lookups find the
//! nearest referral at or above a target DN so the referral interceptor can
//! answer without touching the partitions. Maintained on Add/Delete/Modify
//! of referral entries under its own readers-writer lock.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::name::Dn;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralHit {
    /// Normalized DN of the referral entry.
    pub dn: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ReferralManager {
    by_dn: RwLock<BTreeMap<String, Vec<String>>>,
}

impl ReferralManager {
    pub fn new() -> ReferralManager {
        ReferralManager::default()
    }

    pub fn add(&self, dn_norm: impl Into<String>, urls: Vec<String>) {
        self.by_dn
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(dn_norm.into(), urls);
    }

    pub fn remove(&self, dn_norm: &str) {
        self.by_dn
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(dn_norm);
    }

    pub fn is_referral(&self, dn_norm: &str) -> bool {
        self.by_dn
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(dn_norm)
    }

    /// The nearest referral entry at or above `dn`, if any.
    pub fn find_covering(&self, dn: &Dn) -> Option<ReferralHit> {
        let map = self.by_dn.read().unwrap_or_else(|p| p.into_inner());
        let mut current = Some(dn.clone());
        while let Some(d) = current {
            if let Some(urls) = map.get(d.norm()) {
                return Some(ReferralHit {
                    dn: d.norm().to_string(),
                    urls: urls.clone(),
                });
            }
            current = d.parent();
        }
        None
    }

    pub fn clear(&self) {
        self.by_dn
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    #[test]
    fn finds_referral_at_and_below() {
        let reg = bootstrap_registry();
        let mgr = ReferralManager::new();
        mgr.add(
            "ou=remote,o=example",
            vec!["ldap://other.example/ou=remote,o=example".to_string()],
        );

        let at = Dn::parse(&reg, "ou=remote,o=example").unwrap();
        let below = Dn::parse(&reg, "cn=someone,ou=remote,o=example").unwrap();
        let outside = Dn::parse(&reg, "ou=local,o=example").unwrap();

        assert!(mgr.find_covering(&at).is_some());
        let hit = mgr.find_covering(&below).unwrap();
        assert_eq!(hit.dn, "ou=remote,o=example");
        assert_eq!(hit.urls.len(), 1);
        assert!(mgr.find_covering(&outside).is_none());
    }

    #[test]
    fn remove_clears_coverage() {
        let reg = bootstrap_registry();
        let mgr = ReferralManager::new();
        mgr.add("ou=remote,o=example", vec!["ldap://x/".to_string()]);
        mgr.remove("ou=remote,o=example");
        let dn = Dn::parse(&reg, "cn=a,ou=remote,o=example").unwrap();
        assert!(mgr.find_covering(&dn).is_none());
    }
}
