//! Pluggable value-variation modules.
//!
//! A record whose tag names a module (`2:volatile|...`) hands value
//! production to that module at lookup time. Modules see the full
//! request context and may answer with a different OID than requested,
//! which is how subtree records synthesize GETNEXT successors.

mod notification;

pub use notification::NotificationModule;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::notify::NotificationSender;
use crate::oid::Oid;
use crate::record::Record;
use crate::value::Value;

/// Everything a module may consult about the lookup that reached it.
///
/// `error_status` is the exception value the resolver would answer with
/// if the record produced nothing: `endOfMibView` under GETNEXT,
/// `noSuchInstance` otherwise. Modules return it for lookups they
/// decline.
#[derive(Debug, Clone, Copy)]
pub struct VariationContext<'a> {
    /// OID the request asked for (may differ from the record's under
    /// subtree coverage or inexact GETNEXT matches).
    pub orig_oid: &'a Oid,
    /// Value carried by the request varbind (the new value for SET).
    pub orig_value: &'a Value,
    /// Data file the matched record lives in.
    pub data_file: &'a Path,
    /// The matched record covers its whole subtree.
    pub subtree_flag: bool,
    /// The requested OID hit the index exactly.
    pub exact_match: bool,
    /// Exception value appropriate for this request kind.
    pub error_status: &'a Value,
    /// Varbinds in the whole request.
    pub vars_total: usize,
    /// Varbinds still unresolved after this one.
    pub vars_remaining: usize,
    /// GETNEXT/GETBULK request.
    pub next_flag: bool,
    /// SET request.
    pub set_flag: bool,
    /// Transport domain the request arrived on.
    pub transport_domain: &'a Oid,
    /// Peer address of the requester.
    pub transport_address: SocketAddr,
    /// SNMPv3 context engine ID (empty for v1/v2c).
    pub context_engine_id: &'a [u8],
    /// SNMPv3 context name, or the community string.
    pub context_name: &'a [u8],
    /// Outbound notification path, when the host process wired one up.
    pub notifier: Option<&'a NotificationSender>,
}

/// A value-variation capability.
///
/// Implementations are shared (`Arc`) across records and requests; any
/// per-record state lives inside the module, keyed by data file and
/// record OID, and is created on first invocation.
pub trait VariationModule: Send + Sync {
    /// One-time setup when the registry comes up.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Produce the response for a lookup that matched `record`.
    ///
    /// The returned OID becomes the response OID; returning
    /// [`Value::EndOfMibView`] makes the resolver step past this record
    /// to its physical successor.
    fn variate(&self, record: &Record, ctx: &VariationContext<'_>) -> Result<(Oid, Value)>;

    /// Whether records handled by this module cover their whole
    /// subtree. Consulted at index-build time.
    fn spans_subtree(&self) -> bool {
        false
    }

    /// Teardown on registry shutdown.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Name-keyed set of variation modules.
#[derive(Default)]
pub struct VariationRegistry {
    modules: HashMap<String, Arc<dyn VariationModule>>,
}

impl VariationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in modules registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("notification", Arc::new(NotificationModule::new()));
        registry
    }

    /// Register `module` under `name`, replacing any previous holder.
    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn VariationModule>) {
        self.modules.insert(name.into(), module);
    }

    /// Fetch a module by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn VariationModule>> {
        self.modules.get(name)
    }

    /// Registered module names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Run every module's `init`. The first failure aborts.
    pub fn init_all(&self) -> Result<()> {
        for (name, module) in &self.modules {
            module.init().inspect_err(|e| {
                warn!(module = %name, error = %e, "variation module init failed");
            })?;
        }
        Ok(())
    }

    /// Run every module's `shutdown`, logging failures.
    pub fn shutdown_all(&self) {
        for (name, module) in &self.modules {
            if let Err(e) = module.shutdown() {
                warn!(module = %name, error = %e, "variation module shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for VariationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariationRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
