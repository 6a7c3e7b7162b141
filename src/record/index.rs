//! Persistent sorted index over one data file.
//!
//! The index maps the dotted OID string of every record to
//! `offset,subtree_flag,prev_offset`:
//!
//! - `offset`: byte position of the record line.
//! - `subtree_flag`: the record's variation module covers the whole
//!   subtree below its OID.
//! - `prev_offset`: offset of the nearest preceding subtree record, or
//!   -1. Following it from any entry strictly decreases offsets.
//!
//! One sentinel entry under the key `last` (offset = file size) lets
//! lookups that run past the final record still recover a trailing
//! subtree. The on-disk form is a sidecar text file: a stamp line
//! carrying the data file's mtime and length, then one `oid|value`
//! line per entry.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{debug, info};

use crate::error::{Error, IndexErrorKind, Result};
use crate::record::SnmprecGrammar;
use crate::variation::VariationRegistry;

const FORMAT_TAG: &str = "#smidx1";

/// Sentinel key for the position one past the final record.
pub(crate) const LAST_KEY: &str = "last";

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the record line in the data file.
    pub offset: u64,
    /// Record covers its whole subtree.
    pub subtree: bool,
    /// Offset of the nearest preceding subtree record, or -1.
    pub prev: i64,
}

impl IndexEntry {
    fn encode(&self) -> String {
        format!("{},{},{}", self.offset, u8::from(self.subtree), self.prev)
    }

    fn decode(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, ',');
        let offset = parts.next()?.parse().ok()?;
        let subtree = match parts.next()? {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        let prev = parts.next()?.parse().ok()?;
        Some(Self {
            offset,
            subtree,
            prev,
        })
    }
}

/// A loaded, read-only index.
#[derive(Debug)]
pub struct RecordIndex {
    entries: HashMap<String, IndexEntry>,
}

impl RecordIndex {
    /// Build (or rebuild) the index file for `data_path`.
    ///
    /// A fresh index is left untouched unless `force` is set. With
    /// `validate`, every line must parse and record OIDs must be
    /// strictly ascending.
    pub fn build(
        data_path: &Path,
        index_path: &Path,
        grammar: &SnmprecGrammar,
        registry: &VariationRegistry,
        force: bool,
        validate: bool,
    ) -> Result<()> {
        if !force && stamp_matches(data_path, index_path)? {
            debug!(data_file = %data_path.display(), "index up to date");
            return Ok(());
        }
        info!(data_file = %data_path.display(), validate, "building index");

        let file = File::open(data_path).map_err(|e| Error::data_file(data_path, e))?;
        let mut reader = BufReader::new(file);

        let mut entries: Vec<(String, IndexEntry)> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut last_subtree: i64 = -1;
        let mut prev_oid = None;
        let mut offset: u64 = 0;
        let mut line_no: u64 = 0;

        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| Error::data_file(data_path, e))?;
            if n == 0 {
                break;
            }
            line_no += 1;
            let record = grammar
                .parse(&line)
                .map_err(|kind| Error::parse(data_path, line_no, kind))?;
            if validate {
                if let Some(prev) = &prev_oid {
                    if *prev >= record.oid {
                        return Err(Error::index(
                            data_path,
                            IndexErrorKind::OrderViolation { line: line_no },
                        ));
                    }
                }
                prev_oid = Some(record.oid.clone());
            }
            let subtree = record
                .tag
                .module
                .as_deref()
                .and_then(|name| registry.get(name))
                .is_some_and(|module| module.spans_subtree());
            let key = record.oid.to_string();
            // First record wins when two lines share an OID.
            if seen.insert(key.clone(), ()).is_none() {
                entries.push((
                    key,
                    IndexEntry {
                        offset,
                        subtree,
                        prev: last_subtree,
                    },
                ));
            }
            if subtree {
                last_subtree = offset as i64;
            }
            offset += n as u64;
        }

        entries.push((
            LAST_KEY.to_string(),
            IndexEntry {
                offset,
                subtree: false,
                prev: last_subtree,
            },
        ));

        write_index(data_path, index_path, &entries)
    }

    /// Load the index for `data_path`, refusing missing or stale files.
    pub fn load(data_path: &Path, index_path: &Path) -> Result<Self> {
        if !index_path.exists() {
            return Err(Error::index(data_path, IndexErrorKind::Missing));
        }
        if !stamp_matches(data_path, index_path)? {
            return Err(Error::index(data_path, IndexErrorKind::Stale));
        }
        let file = File::open(index_path).map_err(|e| Error::data_file(index_path, e))?;
        let reader = BufReader::new(file);
        let mut entries = HashMap::new();
        for (no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::data_file(index_path, e))?;
            if no == 0 {
                continue; // stamp line, already checked
            }
            let malformed = || {
                Error::index(
                    data_path,
                    IndexErrorKind::Malformed {
                        line: no as u64 + 1,
                    },
                )
            };
            let (key, value) = line.split_once('|').ok_or_else(malformed)?;
            let entry = IndexEntry::decode(value).ok_or_else(malformed)?;
            entries.insert(key.to_string(), entry);
        }
        let index = Self { entries };
        index.check_prev_chains(data_path)?;
        Ok(index)
    }

    /// Look up the entry for a dotted OID string (or the `last` sentinel).
    pub fn lookup(&self, key: &str) -> Option<IndexEntry> {
        self.entries.get(key).copied()
    }

    /// Number of entries, including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // A prev chain that fails to decrease would loop the wildcard
    // recovery path forever; reject the whole index instead.
    fn check_prev_chains(&self, data_path: &Path) -> Result<()> {
        for (key, entry) in &self.entries {
            if entry.prev >= 0 && entry.prev as u64 >= entry.offset {
                return Err(Error::index(
                    data_path,
                    IndexErrorKind::PrevChainViolation { key: key.clone() },
                ));
            }
        }
        Ok(())
    }
}

fn write_index(data_path: &Path, index_path: &Path, entries: &[(String, IndexEntry)]) -> Result<()> {
    let (mtime, len) = data_stamp(data_path)?;
    let tmp_path = index_path.with_extension("idx.tmp");
    {
        let file = File::create(&tmp_path).map_err(|e| Error::data_file(&tmp_path, e))?;
        let mut out = BufWriter::new(file);
        let io_err = |e| Error::data_file(&tmp_path, e);
        writeln!(out, "{} {} {}", FORMAT_TAG, mtime, len).map_err(io_err)?;
        for (key, entry) in entries {
            writeln!(out, "{}|{}", key, entry.encode()).map_err(io_err)?;
        }
        out.flush().map_err(io_err)?;
    }
    fs::rename(&tmp_path, index_path).map_err(|e| Error::data_file(index_path, e))
}

fn data_stamp(data_path: &Path) -> Result<(u64, u64)> {
    let meta = fs::metadata(data_path).map_err(|e| Error::data_file(data_path, e))?;
    let mtime = meta
        .modified()
        .map_err(|e| Error::data_file(data_path, e))?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok((mtime, meta.len()))
}

fn stamp_matches(data_path: &Path, index_path: &Path) -> Result<bool> {
    let file = match File::open(index_path) {
        Ok(file) => file,
        Err(_) => return Ok(false),
    };
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    if reader.read_line(&mut header).is_err() {
        return Ok(false);
    }
    let mut parts = header.split_whitespace();
    if parts.next() != Some(FORMAT_TAG) {
        return Ok(false);
    }
    let stored: Option<(u64, u64)> = parts
        .next()
        .and_then(|m| m.parse().ok())
        .zip(parts.next().and_then(|l| l.parse().ok()));
    let Some(stored) = stored else {
        return Ok(false);
    };
    Ok(stored == data_stamp(data_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variation::VariationRegistry;
    use std::io::Write as _;
    use std::sync::Arc;

    use crate::oid::Oid;
    use crate::record::Record;
    use crate::value::Value;
    use crate::variation::{VariationContext, VariationModule};

    struct Spanning;

    impl VariationModule for Spanning {
        fn variate(&self, record: &Record, _ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
            Ok((record.oid.clone(), Value::Integer(0)))
        }

        fn spans_subtree(&self) -> bool {
            true
        }
    }

    fn registry() -> VariationRegistry {
        let mut registry = VariationRegistry::new();
        registry.register("span", Arc::new(Spanning));
        registry
    }

    fn write_data(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_build_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(
            &dir,
            "a.snmprec",
            "1.3.6.1.1.0|4|one\n1.3.6.1.2|2:span|0\n1.3.6.1.3.0|4|three\n",
        );
        let index_path = dir.path().join("a.snmprec.idx");
        RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry(), false, true).unwrap();

        let index = RecordIndex::load(&data, &index_path).unwrap();
        let first = index.lookup("1.3.6.1.1.0").unwrap();
        assert_eq!(first.offset, 0);
        assert!(!first.subtree);
        assert_eq!(first.prev, -1);

        let span = index.lookup("1.3.6.1.2").unwrap();
        assert!(span.subtree);
        assert_eq!(span.prev, -1);

        let third = index.lookup("1.3.6.1.3.0").unwrap();
        assert!(!third.subtree);
        assert_eq!(third.prev, span.offset as i64);

        let last = index.lookup(LAST_KEY).unwrap();
        assert_eq!(last.offset, fs::metadata(&data).unwrap().len());
        assert_eq!(last.prev, span.offset as i64);
    }

    #[test]
    fn test_stale_index_rejected_then_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.1.0|4|one\n");
        let index_path = dir.path().join("a.snmprec.idx");
        let registry = registry();
        RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry, false, false).unwrap();

        // Grow the data file; the stamp no longer matches.
        let mut file = fs::OpenOptions::new().append(true).open(&data).unwrap();
        file.write_all(b"1.3.6.1.2.0|4|two\n").unwrap();
        drop(file);

        let err = RecordIndex::load(&data, &index_path).unwrap_err();
        assert!(matches!(
            err,
            Error::Index {
                kind: IndexErrorKind::Stale,
                ..
            }
        ));

        RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry, false, false).unwrap();
        let index = RecordIndex::load(&data, &index_path).unwrap();
        assert!(index.lookup("1.3.6.1.2.0").is_some());
    }

    #[test]
    fn test_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.1.0|4|one\n");
        let err = RecordIndex::load(&data, &dir.path().join("nope.idx")).unwrap_err();
        assert!(matches!(
            err,
            Error::Index {
                kind: IndexErrorKind::Missing,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_disorder() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.3.0|4|x\n1.3.6.1.1.0|4|y\n");
        let index_path = dir.path().join("a.snmprec.idx");
        let err = RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry(), false, true)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Index {
                kind: IndexErrorKind::OrderViolation { line: 2 },
                ..
            }
        ));
    }

    #[test]
    fn test_build_rejects_unparseable_line() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.1.0|4|x\nnot a record\n");
        let index_path = dir.path().join("a.snmprec.idx");
        let err = RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry(), false, true)
            .unwrap_err();
        assert!(matches!(err, Error::Parse { line: Some(2), .. }));
    }

    #[test]
    fn test_duplicate_oid_keeps_first_offset() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.1.0|4|first\n1.3.6.1.1.0|4|second\n");
        let index_path = dir.path().join("a.snmprec.idx");
        RecordIndex::build(&data, &index_path, &SnmprecGrammar, &registry(), false, false).unwrap();
        let index = RecordIndex::load(&data, &index_path).unwrap();
        assert_eq!(index.lookup("1.3.6.1.1.0").unwrap().offset, 0);
    }

    #[test]
    fn test_corrupt_prev_chain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(&dir, "a.snmprec", "1.3.6.1.1.0|4|one\n");
        let index_path = dir.path().join("a.snmprec.idx");
        let (mtime, len) = data_stamp(&data).unwrap();
        fs::write(
            &index_path,
            format!("{} {} {}\n1.3.6.1.1.0|0,0,5\nlast|18,0,-1\n", FORMAT_TAG, mtime, len),
        )
        .unwrap();
        let err = RecordIndex::load(&data, &index_path).unwrap_err();
        assert!(matches!(
            err,
            Error::Index {
                kind: IndexErrorKind::PrevChainViolation { .. },
                ..
            }
        ));
    }
}
