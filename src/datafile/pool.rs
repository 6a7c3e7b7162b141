//! Bounded pool of open data-file handles.
//!
//! Many simulated agents share a small number of file descriptors: each
//! open controller holds a text-file reader and its loaded index, and
//! the pool caps how many exist at once. Eviction is FIFO by open time;
//! reuse does not refresh a file's position in the queue. One mutex
//! serializes set mutation, open/close transitions, and reads, which
//! also guarantees no two threads ever share a file cursor.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use crate::error::{Error, Result};
use crate::record::RecordIndex;

/// An open (text reader, loaded index) pair for one data file.
pub struct Handles {
    /// Buffered reader over the data file; the shared cursor.
    pub text: BufReader<File>,
    /// The file's loaded index.
    pub index: RecordIndex,
}

impl Handles {
    fn open(data_path: &Path, index_path: &Path) -> Result<Self> {
        let file = File::open(data_path).map_err(|e| Error::data_file(data_path, e))?;
        let index = RecordIndex::load(data_path, index_path)?;
        Ok(Self {
            text: BufReader::new(file),
            index,
        })
    }
}

struct OpenEntry {
    path: PathBuf,
    handles: Handles,
}

/// Process-wide (but injectable) pool of open controllers.
///
/// Tests inject a small-capacity pool; production shares one
/// [`HandlePool::default`] across every [`DataFile`](crate::DataFile).
pub struct HandlePool {
    capacity: usize,
    open: Mutex<VecDeque<OpenEntry>>,
}

impl HandlePool {
    /// Default maximum number of open text+index pairs.
    pub const DEFAULT_CAPACITY: usize = 31;

    /// Create a pool capped at `capacity` open files.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            open: Mutex::new(VecDeque::new()),
        }
    }

    /// Run `f` with the handles for `data_path`, opening them (and
    /// evicting the oldest open file at capacity) when necessary.
    pub(crate) fn with_handles<T>(
        &self,
        data_path: &Path,
        index_path: &Path,
        f: impl FnOnce(&mut Handles) -> Result<T>,
    ) -> Result<T> {
        let mut open = self.lock();

        if let Some(entry) = open.iter_mut().find(|e| e.path == data_path) {
            return f(&mut entry.handles);
        }

        if open.len() >= self.capacity {
            if let Some(evicted) = open.pop_front() {
                info!(data_file = %evicted.path.display(), "closing");
            }
        }

        info!(data_file = %data_path.display(), "opening");
        let mut handles = Handles::open(data_path, index_path)?;
        let result = f(&mut handles);
        open.push_back(OpenEntry {
            path: data_path.to_path_buf(),
            handles,
        });
        result
    }

    /// Whether `data_path` currently holds open handles.
    pub fn is_open(&self, data_path: &Path) -> bool {
        self.lock().iter().any(|e| e.path == data_path)
    }

    /// Number of currently open files.
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    /// Paths of open files, oldest first.
    pub fn open_paths(&self) -> Vec<PathBuf> {
        self.lock().iter().map(|e| e.path.clone()).collect()
    }

    /// Close one file's handles, if open.
    pub fn close(&self, data_path: &Path) -> bool {
        let mut open = self.lock();
        match open.iter().position(|e| e.path == data_path) {
            Some(pos) => {
                open.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Close everything; used at shutdown.
    pub fn close_all(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OpenEntry>> {
        match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for HandlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlePool")
            .field("capacity", &self.capacity)
            .field("open", &self.open_count())
            .finish()
    }
}
