//! Shared fixtures: temp data roots and observer variation modules.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use snmp_mimic::datafile::{DataFile, HandlePool};
use snmp_mimic::oid::Oid;
use snmp_mimic::record::Record;
use snmp_mimic::value::Value;
use snmp_mimic::variation::{VariationContext, VariationModule, VariationRegistry};
use snmp_mimic::{Result, oid};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install the test subscriber once; `RUST_LOG=snmp_mimic=debug` then
/// shows the resolver's request/response logs under `cargo test`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The three-record system group used by the basic scenarios.
pub const SYSTEM_RECORDS: &[&str] = &[
    "1.3.6.1.2.1.1.1.0|4|hello",
    "1.3.6.1.2.1.1.3.0|2|42",
    "1.3.6.1.2.1.1.5.0|4|world",
];

pub fn write_data_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    init_tracing();
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(&path, contents).unwrap();
    path
}

/// Build a ready-to-query controller over `lines`.
pub fn controller(
    dir: &Path,
    name: &str,
    lines: &[&str],
    registry: Arc<VariationRegistry>,
    pool: Arc<HandlePool>,
) -> DataFile {
    let path = write_data_file(dir, name, lines);
    let controller = DataFile::new(path, registry, pool);
    controller.build_index(false, true).unwrap();
    controller
}

pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}

pub fn sys_uptime() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
}

pub fn sys_name() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)
}

/// What a module observed about its last invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub subtree_flag: bool,
    pub exact_match: bool,
    pub next_flag: bool,
}

/// Subtree-spanning module answering a constant for any covered OID.
/// Under GETNEXT it synthesizes the requested OID's first child, the
/// way a table-backed handler would keep a walk moving.
#[derive(Debug, Default)]
pub struct ConstantSubtree {
    pub value: i32,
    pub observed: Mutex<Option<Observed>>,
}

impl ConstantSubtree {
    pub fn new(value: i32) -> Self {
        Self {
            value,
            observed: Mutex::new(None),
        }
    }

    pub fn last_observed(&self) -> Option<Observed> {
        *self.observed.lock().unwrap()
    }
}

impl VariationModule for ConstantSubtree {
    fn variate(&self, _record: &Record, ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
        self.observed.lock().unwrap().replace(Observed {
            subtree_flag: ctx.subtree_flag,
            exact_match: ctx.exact_match,
            next_flag: ctx.next_flag,
        });
        let oid = if ctx.next_flag {
            let mut successor = ctx.orig_oid.clone();
            successor.push(0);
            successor
        } else {
            ctx.orig_oid.clone()
        };
        Ok((oid, Value::Integer(self.value)))
    }

    fn spans_subtree(&self) -> bool {
        true
    }
}

/// Subtree module with nothing to say: always the end-of-MIB sentinel,
/// forcing the resolver on to the next physical record.
#[derive(Debug, Default)]
pub struct Exhausted;

impl VariationModule for Exhausted {
    fn variate(&self, _record: &Record, _ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
        Ok((Oid::new(), Value::EndOfMibView))
    }

    fn spans_subtree(&self) -> bool {
        true
    }
}

/// Module that declines to answer at all.
#[derive(Debug, Default)]
pub struct Mute;

impl VariationModule for Mute {
    fn variate(&self, _record: &Record, _ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
        Err(snmp_mimic::Error::NoDataNotification)
    }
}
