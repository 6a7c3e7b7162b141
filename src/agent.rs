//! The directory of simulated agents: discovered identifiers mapped to
//! their data-file controllers, plus the request-context probe that
//! picks one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::context::probe_context;
use crate::datafile::{DataFile, HandlePool, RequestContext};
use crate::discovery::find_data_files;
use crate::error::{Error, Result};
use crate::variation::VariationRegistry;

/// Identifier-keyed set of controllers for one data root.
#[derive(Debug)]
pub struct AgentDirectory {
    agents: HashMap<String, Arc<DataFile>>,
}

impl AgentDirectory {
    /// Discover every data file under `root` and build a controller
    /// per agent. Two files deriving the same identifier is a
    /// configuration error.
    pub fn from_root(
        root: &Path,
        registry: Arc<VariationRegistry>,
        pool: Arc<HandlePool>,
    ) -> Result<Self> {
        let mut agents: HashMap<String, Arc<DataFile>> = HashMap::new();
        for discovered in find_data_files(root)? {
            if let Some(existing) = agents.get(&discovered.ident) {
                return Err(Error::DuplicateIdent {
                    ident: discovered.ident,
                    first: existing.path().to_path_buf(),
                    second: discovered.path,
                });
            }
            let controller = DataFile::new(discovered.path, registry.clone(), pool.clone());
            agents.insert(discovered.ident, Arc::new(controller));
        }
        info!(root = %root.display(), agents = agents.len(), "agent directory ready");
        Ok(Self { agents })
    }

    /// Build (or refresh) every agent's index.
    pub fn build_indexes(&self, force: bool, validate: bool) -> Result<()> {
        for controller in self.agents.values() {
            controller.build_index(force, validate)?;
        }
        Ok(())
    }

    /// Fetch a controller by exact identifier.
    pub fn get(&self, ident: &str) -> Option<&Arc<DataFile>> {
        self.agents.get(ident)
    }

    /// Pick the controller for a request: the first
    /// [`probe_context`] candidate with an associated data file.
    pub fn probe(&self, ctx: &RequestContext) -> Option<(String, &Arc<DataFile>)> {
        let engine = (!ctx.context_engine_id.is_empty()).then_some(&ctx.context_engine_id[..]);
        for candidate in probe_context(
            &ctx.transport_domain,
            &ctx.transport_address,
            engine,
            &ctx.context_name,
        ) {
            if let Some(controller) = self.agents.get(&candidate) {
                return Some((candidate, controller));
            }
        }
        None
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agent identifiers, sorted.
    pub fn idents(&self) -> Vec<&str> {
        let mut idents: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        idents.sort_unstable();
        idents
    }
}
