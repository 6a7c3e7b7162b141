//! Data-resolution engine for an SNMP agent simulator.
//!
//! Given a request aimed at a named simulated agent, this crate picks
//! the right simulation data file, resolves each requested OID against
//! the file's persistent record index, and produces the varbind a real
//! agent would have answered with, including lexicographic successor
//! semantics for walks, wildcard subtree coverage, and pluggable
//! variation modules that synthesize values at lookup time (one of
//! which originates SNMP notifications as a side effect).
//!
//! # Overview
//!
//! - [`discovery`] walks a data root and derives agent identifiers
//!   from file locations.
//! - [`context`] maps an inbound (transport, engine ID, context) tuple
//!   to identifier candidates; [`AgentDirectory`] tries them in order.
//! - [`DataFile`] owns one (text file, index) pair and runs the
//!   GET/GETNEXT lookup algorithm; [`HandlePool`] caps how many stay
//!   open at once.
//! - [`variation`] hosts the module seam; the built-in
//!   [`NotificationModule`](variation::NotificationModule) sends traps
//!   and informs through [`NotificationSender`] on its own event loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use snmp_mimic::{
//!     AgentDirectory, HandlePool, RequestContext, VarBind, VariationRegistry, oid,
//! };
//!
//! # fn main() -> snmp_mimic::Result<()> {
//! let registry = Arc::new(VariationRegistry::with_builtins());
//! let pool = Arc::new(HandlePool::default());
//! let agents = AgentDirectory::from_root("data".as_ref(), registry, pool)?;
//! agents.build_indexes(false, true)?;
//!
//! let ctx = RequestContext::getnext();
//! if let Some((ident, controller)) = agents.probe(&ctx) {
//!     let request = vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))];
//!     let response = controller.process_var_binds(&request, &ctx)?;
//!     println!("{}: {}", ident, response[0]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod context;
pub mod datafile;
pub mod discovery;
pub mod error;
pub mod notify;
pub mod oid;
pub mod record;
pub mod value;
pub mod varbind;
pub mod variation;
pub mod version;

mod util;

pub mod prelude;

pub use agent::AgentDirectory;
pub use datafile::{DataFile, HandlePool, RequestContext};
pub use error::{Error, ErrorStatus, Result};
pub use notify::NotificationSender;
pub use oid::Oid;
pub use value::Value;
pub use varbind::VarBind;
pub use variation::{VariationContext, VariationModule, VariationRegistry};
pub use version::Version;
