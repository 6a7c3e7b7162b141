//! The data-file controller: one simulated agent's record store and the
//! lookup/walk algorithm over it.
//!
//! Resolution of one varbind: probe the index for an exact hit, fall
//! back to a file search that rounds up to the next record, then run
//! the successor loop. The loop steps to the physical next record for
//! GETNEXT on plain records, recovers enclosing wildcard subtrees
//! through the index's prev pointers, and re-advances whenever a
//! variation module answers with the end-of-MIB sentinel.

mod pool;

pub use pool::{HandlePool, Handles};

use std::io::{Seek, SeekFrom};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::context::udp_domain;
use crate::error::{Error, Result};
use crate::notify::NotificationSender;
use crate::oid::Oid;
use crate::record::{LAST_KEY, RecordIndex, SnmprecGrammar, get_record, search_record_by_oid};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::variation::{VariationContext, VariationRegistry};

/// Per-request facts the dispatcher hands the controller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// GETNEXT/GETBULK request.
    pub next_flag: bool,
    /// SET request.
    pub set_flag: bool,
    /// Transport domain the request arrived on.
    pub transport_domain: Oid,
    /// Peer address of the requester.
    pub transport_address: SocketAddr,
    /// SNMPv3 context engine ID (empty for v1/v2c).
    pub context_engine_id: Bytes,
    /// SNMPv3 context name, or the community string.
    pub context_name: Bytes,
    /// Outbound notification path for variation modules.
    pub notifier: Option<NotificationSender>,
}

impl RequestContext {
    /// A plain GET over IPv4 UDP from an unspecified peer.
    pub fn new() -> Self {
        Self {
            next_flag: false,
            set_flag: false,
            transport_domain: udp_domain(),
            transport_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            context_engine_id: Bytes::new(),
            context_name: Bytes::new(),
            notifier: None,
        }
    }

    /// Same, with the GETNEXT flag raised.
    pub fn getnext() -> Self {
        Self {
            next_flag: true,
            ..Self::new()
        }
    }

    /// Same, with the SET flag raised.
    pub fn set() -> Self {
        Self {
            set_flag: true,
            ..Self::new()
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller for one (data file, index) pair.
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    index_path: PathBuf,
    grammar: SnmprecGrammar,
    registry: Arc<VariationRegistry>,
    pool: Arc<HandlePool>,
}

impl DataFile {
    /// Create a controller. The index lives next to the data file as
    /// `<name>.idx` unless [`DataFile::with_index_dir`] moves it.
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<VariationRegistry>,
        pool: Arc<HandlePool>,
    ) -> Self {
        let path = path.into();
        let mut sibling = path.as_os_str().to_os_string();
        sibling.push(".idx");
        Self {
            path,
            index_path: PathBuf::from(sibling),
            grammar: SnmprecGrammar,
            registry,
            pool,
        }
    }

    /// Keep the index under `dir` instead of next to the data file
    /// (for read-only data roots). The file name encodes the full data
    /// path so distinct agents never collide.
    pub fn with_index_dir(mut self, dir: &Path) -> Self {
        let mangled: String = self
            .path
            .to_string_lossy()
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        self.index_path = dir.join(format!("{}.idx", mangled));
        self
    }

    /// The data file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where this controller keeps its index.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Ensure the index exists and is fresh; see
    /// [`RecordIndex::build`] for `force` and `validate`.
    pub fn build_index(&self, force: bool, validate: bool) -> Result<()> {
        RecordIndex::build(
            &self.path,
            &self.index_path,
            &self.grammar,
            &self.registry,
            force,
            validate,
        )
    }

    /// Resolve a batch of varbinds.
    ///
    /// Always yields one response varbind per request varbind, with
    /// per-varbind failures turned into the request kind's exception
    /// value, except for the two propagated conditions
    /// ([`Error::NoDataNotification`], [`Error::MibOperation`]) which
    /// abort the batch for the caller to translate.
    pub fn process_var_binds(
        &self,
        var_binds: &[VarBind],
        ctx: &RequestContext,
    ) -> Result<Vec<VarBind>> {
        let error_status = if ctx.next_flag {
            Value::EndOfMibView
        } else {
            Value::NoSuchInstance
        };

        debug!(
            data_file = %self.path.display(),
            request = %format_varbinds(var_binds),
            mode = if ctx.next_flag { "NEXT" } else { "EXACT" },
            kind = if ctx.set_flag { "SET" } else { "GET" },
            "request var-binds"
        );

        let resolved = self.pool.with_handles(&self.path, &self.index_path, |handles| {
            let vars_total = var_binds.len();
            let mut err_total = 0usize;
            let mut responses = Vec::with_capacity(vars_total);
            for (done, request) in var_binds.iter().enumerate() {
                let vars_remaining = vars_total - done - 1;
                match self.resolve_one(
                    handles,
                    request,
                    ctx,
                    &error_status,
                    vars_total,
                    vars_remaining,
                ) {
                    Ok(response) => responses.push(response),
                    Err(e) if e.is_propagated() => return Err(e),
                    Err(e) => {
                        err_total += 1;
                        error!(
                            data_file = %self.path.display(),
                            oid = %request.oid,
                            error = %e,
                            "data error"
                        );
                        responses.push(VarBind::new(request.oid.clone(), error_status.clone()));
                    }
                }
            }
            if err_total > 0 {
                warn!(
                    data_file = %self.path.display(),
                    failures = err_total,
                    total = vars_total,
                    "request finished with data errors"
                );
            }
            Ok(responses)
        });

        match resolved {
            Ok(responses) => {
                debug!(
                    data_file = %self.path.display(),
                    response = %format_varbinds(&responses),
                    "response var-binds"
                );
                Ok(responses)
            }
            Err(e) if e.is_propagated() => Err(e),
            Err(e) => {
                error!(
                    data_file = %self.path.display(),
                    error = %e,
                    "problem with data file or its index"
                );
                Ok(var_binds
                    .iter()
                    .map(|vb| VarBind::new(vb.oid.clone(), error_status.clone()))
                    .collect())
            }
        }
    }

    fn resolve_one(
        &self,
        handles: &mut Handles,
        request: &VarBind,
        ctx: &RequestContext,
        error_status: &Value,
        vars_total: usize,
        vars_remaining: usize,
    ) -> Result<VarBind> {
        let oid = &request.oid;
        let io_err = |e| Error::data_file(&self.path, e);

        let (offset, mut subtree_flag, mut exact_match) =
            match handles.index.lookup(&oid.to_string()) {
                Some(entry) => (entry.offset, entry.subtree, true),
                None => {
                    // Rounds up to the least record past the request.
                    let offset = search_record_by_oid(
                        &mut handles.text,
                        &self.grammar,
                        oid,
                        !ctx.next_flag,
                    )
                    .map_err(io_err)?;
                    (offset, false, false)
                }
            };

        handles
            .text
            .seek(SeekFrom::Start(offset))
            .map_err(io_err)?;
        let mut line = get_record(&mut handles.text).map_err(io_err)?;

        loop {
            if exact_match {
                if ctx.next_flag && !subtree_flag {
                    // Step to the physical successor, taking its
                    // subtree flag along.
                    match get_record(&mut handles.text).map_err(io_err)? {
                        Some(next_line) => {
                            let next_oid = self
                                .grammar
                                .evaluate_oid(&next_line)
                                .map_err(|k| Error::parse(&self.path, None, k))?;
                            match handles.index.lookup(&next_oid.to_string()) {
                                Some(entry) => {
                                    subtree_flag = entry.subtree;
                                    line = Some(next_line);
                                }
                                None => {
                                    error!(
                                        data_file = %self.path.display(),
                                        oid = %next_oid,
                                        "data error: no index entry, index broken?"
                                    );
                                    line = None;
                                }
                            }
                        }
                        None => line = None,
                    }
                }
            } else {
                // The search rounded up; the request may still fall
                // inside a preceding wildcard subtree.
                let current_key = match &line {
                    Some(text) => self
                        .grammar
                        .evaluate_oid(text)
                        .map_err(|k| Error::parse(&self.path, None, k))?
                        .to_string(),
                    None => LAST_KEY.to_string(),
                };
                match handles.index.lookup(&current_key) {
                    Some(entry) if entry.prev >= 0 => {
                        handles
                            .text
                            .seek(SeekFrom::Start(entry.prev as u64))
                            .map_err(io_err)?;
                        if let Some(prev_line) = get_record(&mut handles.text).map_err(io_err)? {
                            let prev_oid = self
                                .grammar
                                .evaluate_oid(&prev_line)
                                .map_err(|k| Error::parse(&self.path, None, k))?;
                            if prev_oid.is_prefix_of(oid) {
                                line = Some(prev_line);
                                subtree_flag = true;
                            }
                        }
                    }
                    Some(_) => {}
                    None => {
                        error!(
                            data_file = %self.path.display(),
                            key = %current_key,
                            "data error: no index entry, index broken?"
                        );
                        line = None;
                    }
                }
            }

            let Some(current) = line.take() else {
                return Ok(VarBind::new(oid.clone(), error_status.clone()));
            };

            let call_ctx = VariationContext {
                orig_oid: oid,
                orig_value: &request.value,
                data_file: &self.path,
                subtree_flag,
                exact_match,
                error_status,
                vars_total,
                vars_remaining,
                next_flag: ctx.next_flag,
                set_flag: ctx.set_flag,
                transport_domain: &ctx.transport_domain,
                transport_address: ctx.transport_address,
                context_engine_id: &ctx.context_engine_id,
                context_name: &ctx.context_name,
                notifier: ctx.notifier.as_ref(),
            };

            let (response_oid, response_value) = self.evaluate_line(&current, &call_ctx)?;
            if response_value == Value::EndOfMibView {
                // The handler is exhausted; advance to the record after
                // the cursor as if this one matched exactly.
                exact_match = true;
                subtree_flag = false;
                continue;
            }
            return Ok(VarBind::new(response_oid, response_value));
        }
    }

    /// Evaluate one matched line: module records dispatch through the
    /// registry; plain records yield their typed value, but only when
    /// the lookup actually reaches them (exact match, or a walk). A
    /// GET that merely rounded up to this record answers with the
    /// request's exception value instead.
    fn evaluate_line(&self, line: &str, ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
        let record = self
            .grammar
            .parse(line)
            .map_err(|k| Error::parse(&self.path, None, k))?;
        if let Some(name) = &record.tag.module {
            return match self.registry.get(name) {
                Some(module) => module.variate(&record, ctx),
                None => Err(Error::UnknownVariationModule(name.clone())),
            };
        }
        if ctx.set_flag {
            // Writes are accepted but never persisted; echo on a hit.
            return if ctx.exact_match {
                Ok((record.oid, ctx.orig_value.clone()))
            } else {
                Ok((ctx.orig_oid.clone(), ctx.error_status.clone()))
            };
        }
        if ctx.next_flag || ctx.exact_match {
            let value = record
                .typed_value()
                .map_err(|k| Error::parse(&self.path, None, k))?;
            Ok((record.oid, value))
        } else {
            Ok((ctx.orig_oid.clone(), ctx.error_status.clone()))
        }
    }
}

impl std::fmt::Display for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} controller", self.path.display())
    }
}

fn format_varbinds(var_binds: &[VarBind]) -> String {
    var_binds
        .iter()
        .map(|vb| vb.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variation::VariationRegistry;

    fn controller(path: &str) -> DataFile {
        DataFile::new(
            path,
            Arc::new(VariationRegistry::new()),
            Arc::new(HandlePool::default()),
        )
    }

    #[test]
    fn test_index_lives_next_to_data_file() {
        let agent = controller("/srv/snmp/public.snmprec");
        assert_eq!(
            agent.index_path(),
            Path::new("/srv/snmp/public.snmprec.idx")
        );
    }

    #[test]
    fn test_index_dir_mangles_full_path() {
        let agent =
            controller("/srv/snmp/site/backup.snmprec").with_index_dir(Path::new("/var/cache"));
        assert_eq!(
            agent.index_path(),
            Path::new("/var/cache/_srv_snmp_site_backup.snmprec.idx")
        );
    }

    #[test]
    fn test_request_context_constructors() {
        let get = RequestContext::new();
        assert!(!get.next_flag && !get.set_flag);
        let next = RequestContext::getnext();
        assert!(next.next_flag && !next.set_flag);
        let set = RequestContext::set();
        assert!(!set.next_flag && set.set_flag);
        assert_eq!(get.transport_domain, udp_domain());
    }

    #[test]
    fn test_controller_display() {
        let agent = controller("/srv/snmp/public.snmprec");
        assert_eq!(agent.to_string(), "/srv/snmp/public.snmprec controller");
    }
}
