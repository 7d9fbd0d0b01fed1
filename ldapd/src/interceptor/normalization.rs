//! Normalization interceptor.
//!
//! First stage of the chain: filter values are rewritten to their
//! schema-canonical form and requested attribute identifiers are resolved,
//! with unknown ones silently dropped (RFC 2251). DNs arrive already
//! normalized -- parsing happens at the operation-manager boundary so syntax
//! errors never enter the chain.

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::Result;
use crate::interceptor::{names, Interceptor, LookupRequest, Next};
use crate::search::{SearchCursor, SearchRequest};

pub struct NormalizationInterceptor;

/// `*`, `+` and `1.1` pass through; anything else must resolve.
fn clean_attr_ids(ctx: &OperationContext, attrs: &mut Vec<String>) {
    attrs.retain(|a| {
        a == "*" || a == "+" || a == "1.1" || ctx.registry.attribute_type(a).is_some()
    });
}

impl Interceptor for NormalizationInterceptor {
    fn name(&self) -> &'static str {
        names::NORMALIZATION
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        req.filter = req.filter.normalize(&ctx.registry);
        clean_attr_ids(ctx, &mut req.attrs);
        next.search(ctx, req)
    }

    fn lookup(
        &self,
        ctx: &OperationContext,
        req: &mut LookupRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        clean_attr_ids(ctx, &mut req.attrs);
        next.lookup(ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;
    use crate::session::Session;
    use std::sync::Arc;

    #[test]
    fn unknown_requested_attributes_are_dropped() {
        let registry = Arc::new(bootstrap_registry());
        let ctx = OperationContext::new(registry, Arc::new(Session::anonymous()));
        let mut attrs = vec![
            "cn".to_string(),
            "noSuchAttr".to_string(),
            "*".to_string(),
            "1.1".to_string(),
        ];
        clean_attr_ids(&ctx, &mut attrs);
        assert_eq!(attrs, vec!["cn", "*", "1.1"]);
    }
}
