//! Sessions.
//!
//! A session associates a bound principal with per-session defaults (size
//! and time limits, alias dereferencing mode). The operation manager hands
//! each external caller one of these; rebinding mutates it in place.

use std::sync::RwLock;

use crate::name::Dn;

/// How strongly the session's principal was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Anonymous,
    Simple,
    /// The administrator principal; bypasses access control.
    Admin,
}

#[derive(Debug)]
pub struct Session {
    principal: RwLock<Dn>,
    auth: RwLock<AuthLevel>,
    /// 0 means unbounded.
    pub size_limit: usize,
    /// Seconds; 0 means unbounded.
    pub time_limit: u64,
}

impl Session {
    pub fn anonymous() -> Session {
        Session {
            principal: RwLock::new(Dn::empty()),
            auth: RwLock::new(AuthLevel::Anonymous),
            size_limit: 0,
            time_limit: 0,
        }
    }

    pub fn with_limits(size_limit: usize, time_limit: u64) -> Session {
        Session {
            size_limit,
            time_limit,
            ..Session::anonymous()
        }
    }

    pub fn principal(&self) -> Dn {
        self.principal
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn auth_level(&self) -> AuthLevel {
        *self.auth.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_anonymous(&self) -> bool {
        self.auth_level() == AuthLevel::Anonymous
    }

    pub fn is_admin(&self) -> bool {
        self.auth_level() == AuthLevel::Admin
    }

    /// Record a successful bind.
    pub fn bind_as(&self, principal: Dn, level: AuthLevel) {
        *self.principal.write().unwrap_or_else(|p| p.into_inner()) = principal;
        *self.auth.write().unwrap_or_else(|p| p.into_inner()) = level;
    }

    /// Drop back to the anonymous state.
    pub fn unbind(&self) {
        self.bind_as(Dn::empty(), AuthLevel::Anonymous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    #[test]
    fn anonymous_by_default() {
        let s = Session::anonymous();
        assert!(s.is_anonymous());
        assert!(s.principal().is_empty());
    }

    #[test]
    fn bind_and_unbind() {
        let reg = bootstrap_registry();
        let s = Session::anonymous();
        let dn = Dn::parse(&reg, "uid=admin,ou=system").unwrap();
        s.bind_as(dn.clone(), AuthLevel::Admin);
        assert!(s.is_admin());
        assert_eq!(s.principal(), dn);
        s.unbind();
        assert!(s.is_anonymous());
    }
}
