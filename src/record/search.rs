//! Cursor-level access to a data file: single-record reads and the
//! offset search used when an OID is not in the index.

use std::io::{self, BufRead, Seek, SeekFrom};

use crate::oid::Oid;
use crate::record::SnmprecGrammar;

/// Read one record line at the current cursor position.
///
/// Returns `None` at end of file. The trailing newline is stripped; the
/// cursor is left at the start of the following record.
pub fn get_record<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Find the byte offset of the least record whose OID is greater than
/// `target` (or greater-or-equal, with `include_equal`).
///
/// Returns the file size when no record qualifies. Bisects on byte
/// positions, probing the first line boundary after each midpoint, and
/// finishes with a bounded linear scan once the interval no longer
/// contains a usable boundary. Malformed lines surface as
/// `InvalidData` I/O errors.
pub fn search_record_by_oid<R: BufRead + Seek>(
    reader: &mut R,
    grammar: &SnmprecGrammar,
    target: &Oid,
    include_equal: bool,
) -> io::Result<u64> {
    let size = reader.seek(SeekFrom::End(0))?;
    let found = |oid: &Oid| {
        if include_equal {
            oid >= target
        } else {
            oid > target
        }
    };

    // Invariants: every record starting before `lo` fails the predicate;
    // `hi` is the file size or a line start whose record satisfies it.
    let mut lo: u64 = 0;
    let mut hi: u64 = size;

    loop {
        let mid = lo + (hi - lo) / 2;
        if mid <= lo {
            break;
        }
        let probe = next_line_start(reader, mid)?;
        if probe >= hi {
            break;
        }
        reader.seek(SeekFrom::Start(probe))?;
        let line = match get_record(reader)? {
            Some(line) => line,
            None => {
                hi = probe;
                continue;
            }
        };
        let line_end = reader.stream_position()?;
        let oid = grammar
            .evaluate_oid(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if found(&oid) {
            hi = probe;
        } else {
            lo = line_end;
        }
    }

    reader.seek(SeekFrom::Start(lo))?;
    let mut pos = lo;
    while pos < hi {
        let line = match get_record(reader)? {
            Some(line) => line,
            None => break,
        };
        let next = reader.stream_position()?;
        let oid = grammar
            .evaluate_oid(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if found(&oid) {
            return Ok(pos);
        }
        pos = next;
    }
    Ok(hi)
}

/// The first line start strictly after `from` (skips the possibly
/// partial line `from` lands in).
fn next_line_start<R: BufRead + Seek>(reader: &mut R, from: u64) -> io::Result<u64> {
    reader.seek(SeekFrom::Start(from))?;
    let mut sink = Vec::new();
    let skipped = reader.read_until(b'\n', &mut sink)?;
    Ok(from + skipped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use std::io::Cursor;

    const DATA: &str = "1.3.6.1.2.1.1.1.0|4|hello\n\
                        1.3.6.1.2.1.1.3.0|2|42\n\
                        1.3.6.1.2.1.1.5.0|4|world\n";

    fn offsets() -> [u64; 3] {
        let mut out = [0u64; 3];
        let mut pos = 0u64;
        for (i, line) in DATA.lines().enumerate() {
            out[i] = pos;
            pos += line.len() as u64 + 1;
        }
        out
    }

    #[test]
    fn test_get_record_sequence() {
        let mut cursor = Cursor::new(DATA);
        assert_eq!(
            get_record(&mut cursor).unwrap().unwrap(),
            "1.3.6.1.2.1.1.1.0|4|hello"
        );
        assert_eq!(
            get_record(&mut cursor).unwrap().unwrap(),
            "1.3.6.1.2.1.1.3.0|2|42"
        );
        assert_eq!(
            get_record(&mut cursor).unwrap().unwrap(),
            "1.3.6.1.2.1.1.5.0|4|world"
        );
        assert!(get_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_search_exact_with_equal() {
        let [first, second, third] = offsets();
        let mut cursor = Cursor::new(DATA);
        let grammar = SnmprecGrammar;
        let target = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        assert_eq!(
            search_record_by_oid(&mut cursor, &grammar, &target, true).unwrap(),
            second
        );
        assert_eq!(
            search_record_by_oid(&mut cursor, &grammar, &target, false).unwrap(),
            third
        );
        let before_all = oid!(1, 3);
        assert_eq!(
            search_record_by_oid(&mut cursor, &grammar, &before_all, true).unwrap(),
            first
        );
    }

    #[test]
    fn test_search_between_records_rounds_up() {
        let [_, second, _] = offsets();
        let mut cursor = Cursor::new(DATA);
        let between = oid!(1, 3, 6, 1, 2, 1, 1, 2, 0);
        for include_equal in [true, false] {
            assert_eq!(
                search_record_by_oid(&mut cursor, &SnmprecGrammar, &between, include_equal)
                    .unwrap(),
                second
            );
        }
    }

    #[test]
    fn test_search_past_end_returns_size() {
        let mut cursor = Cursor::new(DATA);
        let after_all = oid!(1, 3, 6, 1, 9);
        assert_eq!(
            search_record_by_oid(&mut cursor, &SnmprecGrammar, &after_all, true).unwrap(),
            DATA.len() as u64
        );
    }

    #[test]
    fn test_search_empty_file() {
        let mut cursor = Cursor::new("");
        assert_eq!(
            search_record_by_oid(&mut cursor, &SnmprecGrammar, &oid!(1, 3), true).unwrap(),
            0
        );
    }

    #[test]
    fn test_search_many_records() {
        // Large enough that the bisection loop actually runs.
        let mut data = String::new();
        let mut starts = Vec::new();
        for i in 0..500u32 {
            starts.push(data.len() as u64);
            data.push_str(&format!("1.3.6.1.9.{}.0|2|{}\n", i * 2, i));
        }
        let mut cursor = Cursor::new(data.as_str());
        for i in 0..500u32 {
            // Odd arcs fall between records; both roundings land on the next.
            let target = Oid::from_arcs(&[1, 3, 6, 1, 9, i * 2 + 1, 0]);
            let expect = starts
                .get(i as usize + 1)
                .copied()
                .unwrap_or(data.len() as u64);
            assert_eq!(
                search_record_by_oid(&mut cursor, &SnmprecGrammar, &target, true).unwrap(),
                expect
            );
        }
    }
}
