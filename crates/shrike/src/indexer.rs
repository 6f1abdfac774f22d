//
// indexer.rs
//
// Incremental indexing and fast/slow-path arbitration
//
// Owns the authoritative pre-edit GlobalState on the LSP thread. Each edit
// is hashed, classified against prior definition hashes, folded into the
// file table, and then arbitrated against any slow path the typechecker is
// running: cancel-and-supersede when that yields a cheaper outcome, fold on
// top as a fast-path preemption otherwise.
//

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::IndexerConfig;
use crate::epoch::TypecheckEpochManager;
use crate::files::{DefinitionsHash, FileId, SourceFile};
use crate::global_state::GlobalState;
use crate::hashing;
use crate::metrics::{category_counter_inc, LatencyTimer};
use crate::pipeline::{self, ParseCache, ParsedFile};
use crate::updates::{FileUpdates, WorkspaceEdit};
use crate::workers::WorkerPool;

const SLOW_PATH_REASON: &str = "lsp.slow_path_reason";

/// The previous version of `fref`, preferring evicted versions when a
/// pending slow path makes the live table the wrong baseline.
fn old_file<'a>(
    fref: FileId,
    gs: &'a GlobalState,
    evicted: Option<&'a HashMap<FileId, Arc<SourceFile>>>,
) -> &'a Arc<SourceFile> {
    if let Some(file) = evicted.and_then(|map| map.get(&fref)) {
        return file;
    }
    gs.file(fref)
}

/// Merge `older` into `newly_evicted`, keeping the older of two versions on
/// collision: rollback must reach the state before the currently pending
/// slow path began.
fn merge_evicted_files(
    older: &HashMap<FileId, Arc<SourceFile>>,
    newly_evicted: &mut HashMap<FileId, Arc<SourceFile>>,
) {
    for (fref, file) in older {
        newly_evicted.insert(*fref, file.clone());
    }
}

/// Cancel everything in `timers`, then refill it with forks of `new_timers`.
fn clear_and_replace_timers(timers: &mut Vec<LatencyTimer>, new_timers: &[LatencyTimer]) {
    for timer in timers.iter_mut() {
        timer.cancel();
    }
    timers.clear();
    timers.extend(new_timers.iter().map(LatencyTimer::fork));
}

/// The indexing facade driven by the LSP main thread.
pub struct Indexer {
    config: IndexerConfig,
    initial_gs: GlobalState,
    initialized: bool,
    /// Prior versions of files replaced since the pending slow path was
    /// launched, keyed by file id. The rollback data for cancellation.
    evicted_files: HashMap<FileId, Arc<SourceFile>>,
    /// The update the typechecker is currently or next will consume: the
    /// slow-path base plus any fast-path preemptions folded on top.
    pending_typecheck_updates: FileUpdates,
    pending_diagnostic_latency_timers: Vec<LatencyTimer>,
    empty_workers: WorkerPool,
    parse_cache: Arc<ParseCache>,
}

impl Indexer {
    pub fn new(config: IndexerConfig, initial_gs: GlobalState) -> Self {
        config.log_summary();
        let parse_cache = Arc::new(ParseCache::with_capacity(config.parse_cache_capacity));
        Self {
            config,
            initial_gs,
            initialized: false,
            evicted_files: HashMap::new(),
            pending_typecheck_updates: FileUpdates::new(0, 1),
            pending_diagnostic_latency_timers: Vec::new(),
            empty_workers: WorkerPool::new(0),
            parse_cache,
        }
    }

    pub fn global_state(&self) -> &GlobalState {
        &self.initial_gs
    }

    pub fn epoch_manager(&self) -> Arc<TypecheckEpochManager> {
        self.initial_gs.epoch_manager().clone()
    }

    pub fn pending_typecheck_updates(&self) -> &FileUpdates {
        &self.pending_typecheck_updates
    }

    pub fn evicted_files(&self) -> &HashMap<FileId, Arc<SourceFile>> {
        &self.evicted_files
    }

    /// Timers attributing latency to the pending typecheck.
    pub fn pending_diagnostic_latency_timers(&self) -> &[LatencyTimer] {
        &self.pending_diagnostic_latency_timers
    }

    /// Hash `files` inline on the calling thread.
    pub fn compute_file_hashes(&self, files: &[Arc<SourceFile>]) {
        hashing::compute_file_hashes(files, &self.empty_workers);
    }

    /// Index the configured input files and produce the epoch-0 update the
    /// typechecker bootstraps from.
    pub fn initialize(&mut self, workers: &WorkerPool) -> anyhow::Result<FileUpdates> {
        assert!(
            !self.initialized,
            "indexer is already initialized; cannot initialize a second time"
        );
        self.initialized = true;

        let _timer = LatencyTimer::new("initial_index");
        log::info!(
            "indexing {} input files",
            self.config.input_file_names.len()
        );

        let config = &self.config;
        let cache = self.parse_cache.clone();
        let input = config.input_file_names.clone();
        let trees = self
            .initial_gs
            .with_silenced_errors(|gs| -> anyhow::Result<Vec<ParsedFile>> {
                let frefs = pipeline::reserve_files(gs, &input, config)?;
                Ok(pipeline::index(gs, &frefs, config, workers, Some(cache)))
            })?;

        // Dense by file id, padded to the full table: the table holds files
        // that never arrive through an edit (the prelude).
        let mut indexed: Vec<ParsedFile> = (0..self.initial_gs.file_count())
            .map(|i| ParsedFile::empty(FileId::new(i as u32)))
            .collect();
        for tree in trees {
            let idx = tree.file.idx();
            indexed[idx] = tree;
        }

        hashing::compute_file_hashes(self.initial_gs.files(), workers);

        let mut updates = FileUpdates::new(0, 1);
        updates.can_take_fast_path = false;
        updates.updated_file_indexes = indexed;
        updates.updated_gs = Some(self.initial_gs.deep_copy());
        self.pending_typecheck_updates = updates.copy();
        Ok(updates)
    }

    /// Classify a set of changed files against the live table.
    pub fn can_take_fast_path(&self, changed_files: &[Arc<SourceFile>]) -> bool {
        self.can_take_fast_path_with_evictions(changed_files, false)
    }

    /// Classify changed files, optionally reading baselines from the
    /// evicted-file map: when a slow path is in flight the baseline must be
    /// the pre-slow-path state, because the slow path may be canceled.
    pub fn can_take_fast_path_with_evictions(
        &self,
        changed_files: &[Arc<SourceFile>],
        use_pending_evictions: bool,
    ) -> bool {
        let _timer = LatencyTimer::new("fast_path_decision");
        log::debug!(
            "checking whether the fast path is available after {} file changes",
            changed_files.len()
        );
        if self.config.disable_fast_path {
            log::debug!("taking slow path because the fast path is disabled");
            category_counter_inc(SLOW_PATH_REASON, "fast_path_disabled");
            return false;
        }

        let evicted = use_pending_evictions.then_some(&self.evicted_files);
        for file in changed_files {
            let Some(fref) = self.initial_gs.find_file_by_path(file.path()) else {
                log::debug!("taking slow path because {} is a new file", file.path());
                category_counter_inc(SLOW_PATH_REASON, "new_file");
                return false;
            };

            let old = old_file(fref, &self.initial_gs, evicted);
            let old_hash = old.hash().expect("baseline file is missing its hash");
            let new_hash = file.hash().expect("changed file is missing its hash");
            assert!(
                old_hash.definitions != DefinitionsHash::NotComputed,
                "baseline definitions hash was never computed"
            );

            if new_hash.definitions.is_invalid() {
                log::debug!(
                    "taking slow path because {} has a syntax error",
                    file.path()
                );
                category_counter_inc(SLOW_PATH_REASON, "syntax_error");
                return false;
            } else if new_hash.definitions != old_hash.definitions {
                log::debug!(
                    "taking slow path because {} has changed definitions",
                    file.path()
                );
                category_counter_inc(SLOW_PATH_REASON, "changed_definition");
                return false;
            }
        }

        log::debug!("taking fast path");
        true
    }

    /// Classify a processed update. An update known to add new files goes
    /// straight to the slow path: the fast path cannot introduce symbols,
    /// and new files cannot be rolled back yet.
    pub fn can_take_fast_path_update(
        &self,
        update: &FileUpdates,
        use_pending_evictions: bool,
    ) -> bool {
        if update.has_new_files {
            log::debug!("taking slow path because the update has a new file");
            category_counter_inc(SLOW_PATH_REASON, "new_file");
            return false;
        }
        self.can_take_fast_path_with_evictions(&update.updated_files, use_pending_evictions)
    }

    /// Commit one edit: hash, classify, fold into the file table, arbitrate
    /// against a running slow path, and update the pending ledger. Returns
    /// the update the typechecker should act on.
    pub fn commit_edit(&mut self, edit: &mut WorkspaceEdit) -> FileUpdates {
        let _timer = LatencyTimer::new("commit_edit");

        let mut update = FileUpdates::new(edit.epoch, edit.merge_count + 1);
        // Ensure all files have hashes before classification.
        hashing::compute_file_hashes(&edit.updates, &self.empty_workers);
        update.updated_files = std::mem::take(&mut edit.updates);
        update.can_take_fast_path = self.can_take_fast_path_update(&update, false);
        update.cancellation_expected = edit.cancellation_expected;
        update.preemptions_expected = edit.preemptions_expected;

        // Fold the edit into the file table, remembering prior versions for
        // rollback, and the file ids in edit order.
        let mut newly_evicted_files: HashMap<FileId, Arc<SourceFile>> = HashMap::new();
        let mut frefs = Vec::with_capacity(update.updated_files.len());
        {
            let config = &self.config;
            let mut table = self.initial_gs.unfreeze_file_table();
            for file in &update.updated_files {
                match table.find_file_by_path(file.path()) {
                    Some(fref) => {
                        newly_evicted_files.insert(fref, table.file(fref).clone());
                        table.replace_file(fref, file.clone());
                        frefs.push(fref);
                    }
                    None => {
                        update.has_new_files = true;
                        let fref = table.enter_file(file.clone());
                        let level = pipeline::decide_strict_level(&table, fref, config);
                        table.file(fref).set_strict_level(level);
                        frefs.push(fref);
                    }
                }
            }
        }

        // The pipeline returns trees sorted by file id; map them back to
        // edit order.
        let mut file_to_pos = HashMap::with_capacity(frefs.len());
        for (i, fref) in frefs.iter().enumerate() {
            let previous = file_to_pos.insert(*fref, i);
            assert!(previous.is_none(), "edit contains {} twice", fref);
        }

        {
            let config = &self.config;
            let workers = &self.empty_workers;
            let cache = self.parse_cache.clone();
            let trees = self.initial_gs.with_silenced_errors(|gs| {
                pipeline::index(gs, &frefs, config, workers, Some(cache))
            });
            let mut slots: Vec<Option<ParsedFile>> = (0..trees.len()).map(|_| None).collect();
            for tree in trees {
                let pos = file_to_pos[&tree.file];
                slots[pos] = Some(tree);
            }
            update.updated_file_indexes = slots
                .into_iter()
                .map(|slot| slot.expect("pipeline dropped a requested file"))
                .collect();
        }

        let running_slow_path = self.initial_gs.epoch_manager().status();
        if running_slow_path.slow_path_running {
            // A cancelable slow path is in flight. Check whether canceling
            // is worthwhile before paying for a deep copy.
            // The running epoch must fall in
            // (pending.epoch - pending.edit_count, pending.epoch].
            let pending = &self.pending_typecheck_updates;
            assert!(running_slow_path.epoch <= pending.epoch);
            assert!(
                running_slow_path.epoch + u64::from(pending.edit_count) > pending.epoch,
                "running slow path predates the pending update chain"
            );

            let mut merged = update.copy();
            merged.merge_older(pending);
            merged.can_take_fast_path = self.can_take_fast_path_update(&merged, true);
            // Cancel if old + new takes the fast path, or if the new update
            // will take the slow path anyway.
            if (merged.can_take_fast_path || !update.can_take_fast_path)
                && self
                    .initial_gs
                    .epoch_manager()
                    .try_cancel_slow_path(merged.epoch)
            {
                update = merged;
                update.canceled_slow_path = true;
                merge_evicted_files(&self.evicted_files, &mut newly_evicted_files);
            }
        }

        assert_eq!(
            update.updated_files.len(),
            update.updated_file_indexes.len()
        );

        if update.canceled_slow_path {
            // This edit now carries the canceled slow path; latency
            // attribution follows it into the superseding update.
            let absorbed = std::mem::take(&mut self.pending_diagnostic_latency_timers);
            edit.diagnostic_latency_timers.extend(absorbed);
            clear_and_replace_timers(
                &mut self.pending_diagnostic_latency_timers,
                &edit.diagnostic_latency_timers,
            );
        } else if !update.can_take_fast_path {
            // A fresh slow path unrelated to whatever ran before.
            clear_and_replace_timers(
                &mut self.pending_diagnostic_latency_timers,
                &edit.diagnostic_latency_timers,
            );
        }

        if update.can_take_fast_path {
            // Fold into the pending record so the slow path can be reversed
            // if it later gets canceled.
            let mut merged = update.copy();
            merged.merge_older(&self.pending_typecheck_updates);
            self.pending_typecheck_updates = merged;
            if !update.canceled_slow_path {
                // A slow path kept running underneath: this edit preempted.
                self.pending_typecheck_updates.committed_edit_count += update.edit_count;
            }
            merge_evicted_files(&self.evicted_files, &mut newly_evicted_files);
        } else {
            update.updated_gs = Some(self.initial_gs.deep_copy());
            self.pending_typecheck_updates = update.copy();
        }

        // Changes from this edit, plus those of the pending typecheck when
        // it survived.
        self.evicted_files = newly_evicted_files;

        // The test-only hints apply to the original request only.
        self.pending_typecheck_updates.cancellation_expected = false;
        self.pending_typecheck_updates.preemptions_expected = 0;

        update
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        for timer in &mut self.pending_diagnostic_latency_timers {
            timer.cancel();
        }
    }
}
