//! Operation context.
//!
//! Every operation travels with one of these: the schema snapshot the
//! operation runs against, the session it belongs to, the interceptors it is
//! allowed to skip, request controls, and the abandon flag checked at every
//! cursor advance and between pipeline stages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DirectoryError, Result};
use crate::name::Dn;
use crate::schema::SchemaRegistry;
use crate::session::Session;

/// Request controls the core honors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Controls {
    /// RFC 3296: treat referral entries as ordinary entries.
    pub manage_dsa_it: bool,
    /// RFC 3672: make subentries visible to search.
    pub subentries: bool,
}

pub struct OperationContext {
    pub registry: Arc<SchemaRegistry>,
    pub session: Arc<Session>,
    pub controls: Controls,
    bypass: HashSet<&'static str>,
    abandoned: Arc<AtomicBool>,
}

impl OperationContext {
    pub fn new(registry: Arc<SchemaRegistry>, session: Arc<Session>) -> OperationContext {
        OperationContext {
            registry,
            session,
            controls: Controls::default(),
            bypass: HashSet::new(),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_controls(mut self, controls: Controls) -> OperationContext {
        self.controls = controls;
        self
    }

    /// Skip the named interceptors for this operation (internal calls).
    pub fn with_bypass(mut self, names: &[&'static str]) -> OperationContext {
        self.bypass.extend(names);
        self
    }

    /// Share another context's abandon flag (nested internal operations).
    pub fn with_abandon_flag(mut self, flag: Arc<AtomicBool>) -> OperationContext {
        self.abandoned = flag;
        self
    }

    pub fn is_bypassed(&self, name: &str) -> bool {
        self.bypass.contains(name)
    }

    pub fn abandon_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abandoned)
    }

    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Relaxed);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Raise `canceled` if the operation has been abandoned.
    pub fn check_abandoned(&self) -> Result<()> {
        if self.is_abandoned() {
            Err(DirectoryError::canceled())
        } else {
            Ok(())
        }
    }

    /// The bound principal of the session this operation runs under.
    pub fn principal(&self) -> Dn {
        self.session.principal()
    }
}
