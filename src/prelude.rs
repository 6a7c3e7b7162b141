//! Prelude module for convenient imports.
//!
//! ```rust,no_run
//! use snmp_mimic::prelude::*;
//! ```
//!
//! This imports:
//! - Core types: [`AgentDirectory`], [`DataFile`], [`HandlePool`],
//!   [`RequestContext`], [`Oid`], [`Value`], [`VarBind`]
//! - Error handling: [`Error`], [`Result`]
//! - Variation plumbing: [`VariationModule`], [`VariationRegistry`]
//! - The [`oid!`] macro for OID literals

pub use crate::agent::AgentDirectory;
pub use crate::datafile::{DataFile, HandlePool, RequestContext};
pub use crate::error::{Error, Result};
pub use crate::notify::NotificationSender;
pub use crate::oid::Oid;
pub use crate::value::Value;
pub use crate::varbind::VarBind;
pub use crate::variation::{VariationContext, VariationModule, VariationRegistry};
pub use crate::version::Version;

#[doc(no_inline)]
pub use crate::oid;
