//
// global_state.rs
//
// The authoritative file table behind the global symbol table
//

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::epoch::TypecheckEpochManager;
use crate::errors::ErrorQueue;
use crate::files::{FileId, SourceFile, StrictLevel};

/// Path of the synthetic prelude file entered at construction. Like payload
/// files, it occupies a file-table slot without ever arriving through an
/// edit.
pub const PRELUDE_PATH: &str = "<prelude>";

const PRELUDE_SOURCE: &str = "\
class Int {}
class Float {}
class Bool {}
class String {}
class Unit {}
";

/// The authoritative pre-edit state: the file table, the error queue the
/// pipeline reports into, and the epoch manager shared with the typechecker.
///
/// The file table is frozen outside explicit mutation windows; `enter_file`
/// and `replace_file` assert the gate is open. `deep_copy` produces the
/// consistent snapshot handed to the typechecker for a slow path.
#[derive(Debug)]
pub struct GlobalState {
    files: Vec<Arc<SourceFile>>,
    files_by_path: IndexMap<String, FileId>,
    file_table_frozen: bool,
    error_queue: Arc<ErrorQueue>,
    epoch_manager: Arc<TypecheckEpochManager>,
}

impl GlobalState {
    pub fn new() -> Self {
        let mut gs = Self {
            files: Vec::new(),
            files_by_path: IndexMap::new(),
            file_table_frozen: false,
            error_queue: Arc::new(ErrorQueue::new()),
            epoch_manager: Arc::new(TypecheckEpochManager::new()),
        };
        let prelude = Arc::new(SourceFile::new(PRELUDE_PATH, PRELUDE_SOURCE));
        prelude.set_strict_level(StrictLevel::Strict);
        gs.enter_file(prelude);
        gs.file_table_frozen = true;
        gs
    }

    pub fn find_file_by_path(&self, path: &str) -> Option<FileId> {
        self.files_by_path.get(path).copied()
    }

    pub fn file(&self, fref: FileId) -> &Arc<SourceFile> {
        &self.files[fref.idx()]
    }

    pub fn files(&self) -> &[Arc<SourceFile>] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Open the file-table mutation gate for the lifetime of the guard.
    pub fn unfreeze_file_table(&mut self) -> FileTableUnfreeze<'_> {
        self.file_table_frozen = false;
        FileTableUnfreeze { gs: self }
    }

    /// Enter a file not previously present. Assigns the next `FileId`.
    pub fn enter_file(&mut self, file: Arc<SourceFile>) -> FileId {
        assert!(!self.file_table_frozen, "file table is frozen");
        let fref = FileId::new(self.files.len() as u32);
        let previous = self.files_by_path.insert(file.path().to_string(), fref);
        assert!(
            previous.is_none(),
            "entered a file already present: {}",
            file.path()
        );
        self.files.push(file);
        fref
    }

    /// Replace the content of an existing file, keeping its `FileId`.
    pub fn replace_file(&mut self, fref: FileId, file: Arc<SourceFile>) {
        assert!(!self.file_table_frozen, "file table is frozen");
        assert_eq!(
            self.files[fref.idx()].path(),
            file.path(),
            "replacement changes the file's path"
        );
        self.files[fref.idx()] = file;
    }

    pub fn error_queue(&self) -> &Arc<ErrorQueue> {
        &self.error_queue
    }

    pub fn epoch_manager(&self) -> &Arc<TypecheckEpochManager> {
        &self.epoch_manager
    }

    /// Run `f` with a throwaway, flush-ignoring error queue installed, then
    /// discard whatever the pipeline queued and restore the real queue.
    ///
    /// The indexer is not the reporting path for typecheck diagnostics, so
    /// anything produced here is drained and dropped.
    pub fn with_silenced_errors<T>(&mut self, f: impl FnOnce(&mut GlobalState) -> T) -> T {
        let saved = std::mem::replace(&mut self.error_queue, Arc::new(ErrorQueue::silenced()));
        let result = f(self);
        let discarded = self.error_queue.drain();
        if !discarded.is_empty() {
            log::trace!("discarded {} indexing diagnostics", discarded.len());
        }
        self.error_queue = saved;
        result
    }

    /// An immutable-content snapshot suitable for handing to the typechecker
    /// thread. File contents are shared; the table itself is independent.
    /// The epoch manager is the same shared instance, the error queue is
    /// fresh and owned by the snapshot's consumer.
    pub fn deep_copy(&self) -> GlobalState {
        GlobalState {
            files: self.files.clone(),
            files_by_path: self.files_by_path.clone(),
            file_table_frozen: true,
            error_queue: Arc::new(ErrorQueue::new()),
            epoch_manager: self.epoch_manager.clone(),
        }
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for the file-table mutation gate. Refreezes on drop, on every
/// exit path.
#[derive(Debug)]
pub struct FileTableUnfreeze<'gs> {
    gs: &'gs mut GlobalState,
}

impl Deref for FileTableUnfreeze<'_> {
    type Target = GlobalState;

    fn deref(&self) -> &GlobalState {
        self.gs
    }
}

impl DerefMut for FileTableUnfreeze<'_> {
    fn deref_mut(&mut self) -> &mut GlobalState {
        self.gs
    }
}

impl Drop for FileTableUnfreeze<'_> {
    fn drop(&mut self) {
        self.gs.file_table_frozen = true;
    }
}
