//! Authentication interceptor.
//!
//! Handles bind: anonymous, the configured administrator, and simple binds
//! verified against `userPassword` values, including the RFC 2307 hash
//! schemes ({SHA}, {SSHA}, {MD5}, {SMD5}). The interceptor terminates bind
//! processing; it never forwards a bind down the chain.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::context::OperationContext;
use crate::error::{DirectoryError, Result};
use crate::interceptor::{names, BindRequest, Interceptor, Next};
use crate::name::Dn;
use crate::nexus::PartitionNexus;
use crate::schema::ids;
use crate::session::AuthLevel;

pub struct AuthenticationInterceptor {
    nexus: Arc<PartitionNexus>,
    admin_dn: Dn,
    admin_password: Vec<u8>,
}

impl AuthenticationInterceptor {
    pub fn new(nexus: Arc<PartitionNexus>, admin_dn: Dn, admin_password: Vec<u8>) -> Self {
        AuthenticationInterceptor {
            nexus,
            admin_dn,
            admin_password,
        }
    }
}

impl Interceptor for AuthenticationInterceptor {
    fn name(&self) -> &'static str {
        names::AUTHENTICATION
    }

    fn bind(&self, ctx: &OperationContext, req: &mut BindRequest, _next: Next<'_>) -> Result<()> {
        if req.dn.is_empty() {
            if req.password.is_empty() {
                ctx.session.bind_as(Dn::empty(), AuthLevel::Anonymous);
                return Ok(());
            }
            return Err(DirectoryError::invalid_credentials());
        }
        if req.password.is_empty() {
            // Unauthenticated binds (name without password) are refused.
            return Err(DirectoryError::inappropriate_authentication(
                "empty password with a bind DN",
            ));
        }

        if req.dn == self.admin_dn {
            if verify_password(&self.admin_password, &req.password) {
                ctx.session.bind_as(req.dn.clone(), AuthLevel::Admin);
                return Ok(());
            }
            debug!(dn = %req.dn, "admin bind failed");
            return Err(DirectoryError::invalid_credentials());
        }

        // Entry lookup goes straight to the nexus; authorization does not
        // apply to reading one's own credentials.
        let entry = self
            .nexus
            .lookup(ctx, &req.dn)
            .map_err(|_| DirectoryError::invalid_credentials())?;
        let Some(attr) = entry.get(&ctx.registry, ids::USER_PASSWORD) else {
            return Err(DirectoryError::invalid_credentials());
        };
        for stored in attr.values() {
            if verify_password(stored.bytes(), &req.password) {
                ctx.session.bind_as(entry.dn.clone(), AuthLevel::Simple);
                return Ok(());
            }
        }
        debug!(dn = %req.dn, "simple bind failed");
        Err(DirectoryError::invalid_credentials())
    }
}

// ---------------------------------------------------------------------------
// Password schemes
// ---------------------------------------------------------------------------

/// Verify `supplied` against a stored `userPassword` value.
pub fn verify_password(stored: &[u8], supplied: &[u8]) -> bool {
    let Some((scheme, rest)) = split_scheme(stored) else {
        return stored == supplied;
    };
    let Ok(decoded) = BASE64.decode(rest) else {
        return false;
    };
    match scheme.to_ascii_uppercase().as_str() {
        "SHA" => decoded == sha1_digest(supplied, &[]),
        "MD5" => decoded == md5_digest(supplied, &[]),
        "SSHA" => {
            if decoded.len() <= 20 {
                return false;
            }
            let (digest, salt) = decoded.split_at(20);
            digest == sha1_digest(supplied, salt).as_slice()
        }
        "SMD5" => {
            if decoded.len() <= 16 {
                return false;
            }
            let (digest, salt) = decoded.split_at(16);
            digest == md5_digest(supplied, salt).as_slice()
        }
        _ => false,
    }
}

fn split_scheme(stored: &[u8]) -> Option<(String, &[u8])> {
    if stored.first() != Some(&b'{') {
        return None;
    }
    let close = stored.iter().position(|&b| b == b'}')?;
    let scheme = std::str::from_utf8(&stored[1..close]).ok()?;
    Some((scheme.to_string(), &stored[close + 1..]))
}

fn sha1_digest(password: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.finalize().to_vec()
}

fn md5_digest(password: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.finalize().to_vec()
}
