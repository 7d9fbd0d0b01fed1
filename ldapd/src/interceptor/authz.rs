//! Default authorization interceptor.
//!
//! The baseline policy that applies when no ACI directive decided: the
//! administrator bypasses everything, anonymous sessions may only read, and
//! an authenticated user may mutate only its own entry. The system area
//! (`ou=system`) is writable by the administrator alone. An explicit ACI
//! grant from the previous stage overrides these defaults.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::interceptor::aci::{aci_decision, AciOp};
use crate::interceptor::subentry::SubentryCache;
use crate::interceptor::{
    names, AddRequest, DeleteRequest, Interceptor, ModifyRequest, Next, RenameRequest,
};
use crate::name::Dn;

pub struct DefaultAuthorizationInterceptor {
    cache: Arc<SubentryCache>,
}

const SYSTEM_SUFFIX: &str = "ou=system";

impl DefaultAuthorizationInterceptor {
    pub fn new(cache: Arc<SubentryCache>) -> Self {
        DefaultAuthorizationInterceptor { cache }
    }

    fn check_write(&self, ctx: &OperationContext, op: AciOp, what: &str, dn: &Dn) -> Result<()> {
        if ctx.session.is_admin() {
            return Ok(());
        }
        let deny =
            || DirectoryError::insufficient_access(format!("{} of {} denied", what, dn.user()));
        if dn.norm() == SYSTEM_SUFFIX || dn.norm().ends_with(&format!(",{}", SYSTEM_SUFFIX)) {
            return Err(deny());
        }
        if aci_decision(&self.cache, ctx, op, dn) == Some(true) {
            return Ok(());
        }
        if ctx.session.is_anonymous() {
            return Err(deny());
        }
        // Simple binds may maintain their own entry only.
        if *dn == ctx.principal() {
            return Ok(());
        }
        Err(deny())
    }
}

impl Interceptor for DefaultAuthorizationInterceptor {
    fn name(&self) -> &'static str {
        names::DEFAULT_AUTHORIZATION
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        self.check_write(ctx, AciOp::Add, "add", &req.entry.dn)?;
        next.add(ctx, req)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check_write(ctx, AciOp::Delete, "delete", &req.dn)?;
        next.delete(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        self.check_write(ctx, AciOp::Modify, "modify", &req.dn)?;
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        self.check_write(ctx, AciOp::Rename, "rename", &req.dn)?;
        if let Some(parent) = &req.new_parent {
            self.check_write(ctx, AciOp::Add, "move under", parent)?;
        }
        next.rename(ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;
    use crate::session::{AuthLevel, Session};

    fn interceptor() -> DefaultAuthorizationInterceptor {
        DefaultAuthorizationInterceptor::new(Arc::new(SubentryCache::new()))
    }

    fn ctx_with(level: AuthLevel, principal: &str) -> OperationContext {
        let registry = Arc::new(bootstrap_registry());
        let session = Session::anonymous();
        if level != AuthLevel::Anonymous {
            let dn = Dn::parse(&registry, principal).unwrap();
            session.bind_as(dn, level);
        }
        OperationContext::new(registry, Arc::new(session))
    }

    #[test]
    fn anonymous_cannot_write() {
        let i = interceptor();
        let ctx = ctx_with(AuthLevel::Anonymous, "");
        let dn = Dn::parse(&ctx.registry, "cn=x,o=example").unwrap();
        let err = i.check_write(&ctx, AciOp::Add, "add", &dn).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::InsufficientAccessRights);
    }

    #[test]
    fn admin_writes_anywhere() {
        let i = interceptor();
        let ctx = ctx_with(AuthLevel::Admin, "uid=admin,ou=system");
        let dn = Dn::parse(&ctx.registry, "uid=admin,ou=system").unwrap();
        assert!(i.check_write(&ctx, AciOp::Modify, "modify", &dn).is_ok());
    }

    #[test]
    fn user_may_write_own_entry_only() {
        let i = interceptor();
        let ctx = ctx_with(AuthLevel::Simple, "cn=alice,o=example");
        let own = Dn::parse(&ctx.registry, "cn=alice,o=example").unwrap();
        let other = Dn::parse(&ctx.registry, "cn=bob,o=example").unwrap();
        assert!(i.check_write(&ctx, AciOp::Modify, "modify", &own).is_ok());
        assert!(i.check_write(&ctx, AciOp::Modify, "modify", &other).is_err());
    }

    #[test]
    fn system_area_is_admin_only() {
        let i = interceptor();
        let ctx = ctx_with(AuthLevel::Simple, "uid=someone,ou=system");
        let dn = Dn::parse(&ctx.registry, "uid=someone,ou=system").unwrap();
        assert!(i.check_write(&ctx, AciOp::Modify, "modify", &dn).is_err());
    }

    #[test]
    fn aci_grant_overrides_defaults() {
        let reg = bootstrap_registry();
        let cache = Arc::new(SubentryCache::new());
        let dn = Dn::parse(&reg, "cn=acl,o=example").unwrap();
        let mut e = Entry::new(dn);
        e.add(&reg, "objectClass", "top").unwrap();
        e.add(&reg, "objectClass", "subentry").unwrap();
        e.add(&reg, "objectClass", "accessControlSubentry").unwrap();
        e.add(&reg, "cn", "acl").unwrap();
        e.add(&reg, "subtreeSpecification", "{}").unwrap();
        e.add(&reg, "prescriptiveACI", "grant:add,modify:authenticated")
            .unwrap();
        cache.insert(&reg, &e).unwrap();

        let i = DefaultAuthorizationInterceptor::new(cache);
        let ctx = ctx_with(AuthLevel::Simple, "cn=alice,o=example");
        let other = Dn::parse(&ctx.registry, "cn=bob,o=example").unwrap();
        assert!(i.check_write(&ctx, AciOp::Modify, "modify", &other).is_ok());
    }
}
