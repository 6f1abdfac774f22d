//
// updates.rs
//
// Edits as delivered by the editor, and their processed form
//

use std::collections::HashSet;
use std::sync::Arc;

use crate::files::SourceFile;
use crate::global_state::GlobalState;
use crate::metrics::LatencyTimer;
use crate::pipeline::ParsedFile;

/// One edit event from the document-editing protocol: a set of file
/// contents replacing prior versions.
#[derive(Debug)]
pub struct WorkspaceEdit {
    /// Strictly increasing identifier for the typecheck attempt this edit
    /// will become.
    pub epoch: u64,
    /// Edits folded together upstream before delivery.
    pub merge_count: u32,
    pub updates: Vec<Arc<SourceFile>>,
    /// Timers measuring edit-to-diagnostics latency; ownership follows the
    /// update that ends up carrying this edit's work.
    pub diagnostic_latency_timers: Vec<LatencyTimer>,
    /// Test-only hint: this edit is expected to cancel a running slow path.
    pub cancellation_expected: bool,
    /// Test-only hint: how many fast-path preemptions this edit expects.
    pub preemptions_expected: u32,
}

impl WorkspaceEdit {
    pub fn new(epoch: u64, updates: Vec<Arc<SourceFile>>) -> Self {
        Self {
            epoch,
            merge_count: 0,
            updates,
            diagnostic_latency_timers: Vec::new(),
            cancellation_expected: false,
            preemptions_expected: 0,
        }
    }
}

/// The processed form of one or more edits, as consumed by the typechecker.
#[derive(Debug)]
pub struct FileUpdates {
    pub epoch: u64,
    /// Edits represented by this update, growing under merges.
    pub edit_count: u32,
    /// Edits already acknowledged as merged into the pending slow path.
    pub committed_edit_count: u32,
    pub can_take_fast_path: bool,
    pub has_new_files: bool,
    /// Whether this update canceled and superseded a running slow path.
    pub canceled_slow_path: bool,
    pub cancellation_expected: bool,
    pub preemptions_expected: u32,
    pub updated_files: Vec<Arc<SourceFile>>,
    /// Aligned 1:1 with `updated_files`, in edit order.
    pub updated_file_indexes: Vec<ParsedFile>,
    /// Consistent snapshot handed to the typechecker; populated only for
    /// slow-path updates.
    pub updated_gs: Option<GlobalState>,
}

impl FileUpdates {
    pub fn new(epoch: u64, edit_count: u32) -> Self {
        Self {
            epoch,
            edit_count,
            committed_edit_count: 0,
            can_take_fast_path: false,
            has_new_files: false,
            canceled_slow_path: false,
            cancellation_expected: false,
            preemptions_expected: 0,
            updated_files: Vec::new(),
            updated_file_indexes: Vec::new(),
            updated_gs: None,
        }
    }

    /// Clone this update for the ledger, leaving the global-state snapshot
    /// behind: snapshots are taken exactly once, for the update the
    /// typechecker will execute.
    pub fn copy(&self) -> FileUpdates {
        FileUpdates {
            epoch: self.epoch,
            edit_count: self.edit_count,
            committed_edit_count: self.committed_edit_count,
            can_take_fast_path: self.can_take_fast_path,
            has_new_files: self.has_new_files,
            canceled_slow_path: self.canceled_slow_path,
            cancellation_expected: self.cancellation_expected,
            preemptions_expected: self.preemptions_expected,
            updated_files: self.updated_files.clone(),
            updated_file_indexes: self.updated_file_indexes.clone(),
            updated_gs: None,
        }
    }

    /// Fold an older update underneath this one, so the result represents
    /// "apply `older`, then `self`".
    ///
    /// The newest content wins on path collisions, for files and parsed
    /// trees alike. The epoch stays at `self.epoch` (the newest); counts
    /// sum; `has_new_files` is the disjunction. The caller is responsible
    /// for reclassifying the merged result.
    pub fn merge_older(&mut self, older: &FileUpdates) {
        self.edit_count += older.edit_count;
        self.committed_edit_count += older.committed_edit_count;
        self.has_new_files |= older.has_new_files;
        self.cancellation_expected |= older.cancellation_expected;
        self.preemptions_expected += older.preemptions_expected;

        let mut encountered: HashSet<String> = HashSet::new();
        for file in &self.updated_files {
            encountered.insert(file.path().to_string());
        }
        for (file, tree) in older
            .updated_files
            .iter()
            .zip(older.updated_file_indexes.iter())
        {
            if encountered.contains(file.path()) {
                continue;
            }
            self.updated_files.push(file.clone());
            self.updated_file_indexes.push(tree.clone());
        }
    }

    /// The content of `path` as this update would leave it, if it touches
    /// the path at all.
    pub fn content_of(&self, path: &str) -> Option<&str> {
        self.updated_files
            .iter()
            .find(|f| f.path() == path)
            .map(|f| f.source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileId;

    fn file(path: &str, source: &str) -> Arc<SourceFile> {
        Arc::new(SourceFile::new(path, source))
    }

    fn update_with(epoch: u64, files: Vec<Arc<SourceFile>>) -> FileUpdates {
        let mut update = FileUpdates::new(epoch, 1);
        update.updated_file_indexes = files
            .iter()
            .enumerate()
            .map(|(i, _)| ParsedFile::empty(FileId::new(i as u32)))
            .collect();
        update.updated_files = files;
        update
    }

    #[test]
    fn test_merge_older_newest_wins() {
        let mut newer = update_with(2, vec![file("a.sk", "new a")]);
        let older = update_with(1, vec![file("a.sk", "old a"), file("b.sk", "old b")]);

        newer.merge_older(&older);

        assert_eq!(newer.epoch, 2);
        assert_eq!(newer.edit_count, 2);
        assert_eq!(newer.content_of("a.sk"), Some("new a"));
        assert_eq!(newer.content_of("b.sk"), Some("old b"));
        assert_eq!(newer.updated_files.len(), newer.updated_file_indexes.len());
    }

    #[test]
    fn test_merge_older_sums_counts_and_ors_flags() {
        let mut newer = update_with(3, vec![]);
        newer.preemptions_expected = 1;
        let mut older = update_with(1, vec![]);
        older.edit_count = 2;
        older.committed_edit_count = 1;
        older.has_new_files = true;
        older.cancellation_expected = true;
        older.preemptions_expected = 2;

        newer.merge_older(&older);

        assert_eq!(newer.edit_count, 3);
        assert_eq!(newer.committed_edit_count, 1);
        assert!(newer.has_new_files);
        assert!(newer.cancellation_expected);
        assert_eq!(newer.preemptions_expected, 3);
    }

    #[test]
    fn test_copy_drops_snapshot() {
        let mut update = update_with(1, vec![file("a.sk", "a")]);
        update.updated_gs = Some(GlobalState::new());

        let copy = update.copy();
        assert!(copy.updated_gs.is_none());
        assert_eq!(copy.epoch, update.epoch);
        assert_eq!(copy.updated_files.len(), 1);
    }

    #[test]
    fn test_merge_chain_keeps_latest_content() {
        // Three edits touching the same path; folding newest-over-older must
        // leave the latest content no matter how the chain is built.
        let oldest = update_with(1, vec![file("a.sk", "v1")]);
        let mut middle = update_with(2, vec![file("a.sk", "v2")]);
        let mut newest = update_with(3, vec![file("a.sk", "v3")]);

        middle.merge_older(&oldest);
        newest.merge_older(&middle);
        assert_eq!(newest.content_of("a.sk"), Some("v3"));
        assert_eq!(newest.edit_count, 3);
    }
}
