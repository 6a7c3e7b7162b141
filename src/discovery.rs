//! Data-file discovery.
//!
//! Walks a data root and derives each agent's identifier from its
//! location: the slash-joined relative path with the extension
//! stripped and `self` segments elided. A `self.<ext>` file names its
//! directory's default agent; at the root it yields the empty
//! identifier.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::SnmprecGrammar;

const SELF_LABEL: &str = "self";
const MAX_DEPTH: usize = 32;

/// Registered record-type extensions.
pub const RECORD_KINDS: &[(&str, RecordKind)] = &[(SnmprecGrammar::EXTENSION, RecordKind::Snmprec)];

/// The record grammar a data file is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordKind {
    /// `OID|tag|value` lines (`.snmprec`).
    Snmprec,
}

/// One data file found under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// The readable file (symlinks resolved).
    pub path: PathBuf,
    /// Record grammar, by extension.
    pub kind: RecordKind,
    /// Agent identifier derived from the file's location.
    pub ident: String,
}

/// Find every data file under `root`, sorted by identifier.
///
/// Symbolic links are followed one level, with relative targets
/// resolved against the link's directory; identifiers always derive
/// from where the link sits in the tree, not where it points. Broken
/// links and unreadable entries are skipped with a warning.
pub fn find_data_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let mut found = Vec::new();
    let mut rel = Vec::new();
    walk(root, &mut rel, &mut found)?;
    found.sort_by(|a, b| a.ident.cmp(&b.ident));
    Ok(found)
}

fn walk(dir: &Path, rel: &mut Vec<String>, found: &mut Vec<DiscoveredFile>) -> Result<()> {
    if rel.len() >= MAX_DEPTH {
        warn!(dir = %dir.display(), "directory nesting exceeds {MAX_DEPTH}; not descending");
        return Ok(());
    }
    let entries = fs::read_dir(dir).map_err(|e| Error::data_file(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::data_file(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let logical = dir.join(entry.file_name());

        let meta = match fs::symlink_metadata(&logical) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %logical.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let (physical, meta) = if meta.file_type().is_symlink() {
            match follow_symlink(&logical, dir) {
                Some(resolved) => resolved,
                None => continue,
            }
        } else {
            (logical, meta)
        };

        if meta.is_dir() {
            rel.push(name);
            walk(&physical, rel, found)?;
            rel.pop();
        } else if meta.is_file() {
            if let Some((kind, ident)) = classify(&name, rel) {
                debug!(path = %physical.display(), ident = %ident, "discovered data file");
                found.push(DiscoveredFile {
                    path: physical,
                    kind,
                    ident,
                });
            }
        }
    }
    Ok(())
}

fn follow_symlink(link: &Path, dir: &Path) -> Option<(PathBuf, fs::Metadata)> {
    let target = match fs::read_link(link) {
        Ok(target) => target,
        Err(e) => {
            warn!(path = %link.display(), error = %e, "skipping unreadable symlink");
            return None;
        }
    };
    let target = if target.is_absolute() {
        target
    } else {
        dir.join(target)
    };
    match fs::metadata(&target) {
        Ok(meta) => Some((target, meta)),
        Err(e) => {
            warn!(path = %link.display(), error = %e, "skipping broken symlink");
            None
        }
    }
}

/// Match a file name against the registered extensions and derive the
/// identifier from its relative segments.
fn classify(name: &str, rel: &[String]) -> Option<(RecordKind, String)> {
    for (ext, kind) in RECORD_KINDS {
        if let Some(stem) = name.strip_suffix(&format!(".{}", ext)) {
            let mut segments: Vec<&str> = rel.iter().map(String::as_str).collect();
            segments.push(stem);
            if segments.first() == Some(&SELF_LABEL) {
                segments.remove(0);
            }
            if segments.last() == Some(&SELF_LABEL) {
                segments.pop();
            }
            return Some((*kind, segments.join("/")));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap();
    }

    #[test]
    fn test_identifier_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("public.snmprec"));
        touch(&root.join("1.3.6.1.2.1/self.snmprec"));
        touch(&root.join("site/self.snmprec"));
        touch(&root.join("site/backup.snmprec"));
        touch(&root.join("site/notes.txt")); // not a registered extension

        let found = find_data_files(root).unwrap();
        let idents: Vec<&str> = found.iter().map(|f| f.ident.as_str()).collect();
        assert_eq!(idents, vec!["1.3.6.1.2.1", "public", "site", "site/backup"]);
        assert!(found.iter().all(|f| f.kind == RecordKind::Snmprec));
    }

    #[test]
    fn test_root_self_is_default_agent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("self.snmprec"));
        let found = find_data_files(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ident, "");
    }

    #[test]
    fn test_leading_self_directory_elided() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("self/agent.snmprec"));
        let found = find_data_files(dir.path()).unwrap();
        assert_eq!(found[0].ident, "agent");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_followed_ident_from_link_location() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        touch(&outside.join("real.snmprec"));
        let tree = root.join("tree");
        fs::create_dir_all(&tree).unwrap();
        std::os::unix::fs::symlink(outside.join("real.snmprec"), tree.join("alias.snmprec"))
            .unwrap();

        let found = find_data_files(&tree).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ident, "alias");
        assert_eq!(found[0].path, outside.join("real.snmprec"));
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ok.snmprec"));
        std::os::unix::fs::symlink(
            dir.path().join("gone.snmprec"),
            dir.path().join("dangling.snmprec"),
        )
        .unwrap();
        let found = find_data_files(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ident, "ok");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            find_data_files(&missing),
            Err(Error::DataFile { .. })
        ));
    }
}
