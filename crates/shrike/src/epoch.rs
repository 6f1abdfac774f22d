//
// epoch.rs
//
// Epoch-based cancellation protocol between the indexer and the typechecker
//

use std::sync::Mutex;

/// Snapshot of the typechecker's progress as seen by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochStatus {
    pub slow_path_running: bool,
    pub epoch: u64,
}

#[derive(Debug)]
struct EpochState {
    running: bool,
    /// Set while the slow path is past the point of no return.
    cancelable: bool,
    /// Set once a cancellation has landed on the running epoch.
    canceled: bool,
    epoch: u64,
}

/// The single synchronization point between the LSP thread and the
/// typechecker thread.
///
/// The typechecker brackets each cancelable slow path with
/// `begin_slow_path` / `finish_slow_path` and polls `canceled` at safe
/// points; the indexer observes `status` and races `try_cancel_slow_path`
/// against it. Cancellation is compare-and-act: it succeeds at most once per
/// running epoch, and only while the typechecker is still at a cancelable
/// point.
#[derive(Debug)]
pub struct TypecheckEpochManager {
    state: Mutex<EpochState>,
}

impl TypecheckEpochManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EpochState {
                running: false,
                cancelable: false,
                canceled: false,
                epoch: 0,
            }),
        }
    }

    pub fn status(&self) -> EpochStatus {
        let state = self.state.lock().unwrap();
        EpochStatus {
            slow_path_running: state.running,
            epoch: state.epoch,
        }
    }

    /// Typechecker side: a cancelable slow path for `epoch` has started.
    pub fn begin_slow_path(&self, epoch: u64) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.running, "slow path already running");
        state.running = true;
        state.cancelable = true;
        state.canceled = false;
        state.epoch = epoch;
        log::debug!("slow path running for epoch {epoch}");
    }

    /// Typechecker side: the slow path is committing results and can no
    /// longer be canceled.
    pub fn enter_commit_phase(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.running, "no slow path to commit");
        state.cancelable = false;
    }

    /// Typechecker side: the slow path finished or acknowledged cancellation.
    pub fn finish_slow_path(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.cancelable = false;
        log::debug!("slow path finished at epoch {}", state.epoch);
    }

    /// Typechecker side: poll for a landed cancellation.
    pub fn canceled(&self) -> bool {
        self.state.lock().unwrap().canceled
    }

    /// Indexer side: try to retire the running slow path in favor of
    /// `new_epoch`. Returns whether the cancellation landed.
    pub fn try_cancel_slow_path(&self, new_epoch: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.running && state.cancelable && !state.canceled && new_epoch > state.epoch {
            log::debug!(
                "canceled slow path at epoch {} in favor of epoch {new_epoch}",
                state.epoch
            );
            state.canceled = true;
            state.epoch = new_epoch;
            true
        } else {
            false
        }
    }
}

impl Default for TypecheckEpochManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_requires_running() {
        let manager = TypecheckEpochManager::new();
        assert!(!manager.try_cancel_slow_path(5));
        assert!(!manager.status().slow_path_running);
    }

    #[test]
    fn test_cancel_succeeds_once() {
        let manager = TypecheckEpochManager::new();
        manager.begin_slow_path(3);
        assert!(manager.status().slow_path_running);

        assert!(manager.try_cancel_slow_path(4));
        assert!(manager.canceled());
        assert_eq!(manager.status().epoch, 4);

        // Second attempt on the same running epoch must fail.
        assert!(!manager.try_cancel_slow_path(5));
    }

    #[test]
    fn test_cancel_requires_newer_epoch() {
        let manager = TypecheckEpochManager::new();
        manager.begin_slow_path(3);
        assert!(!manager.try_cancel_slow_path(3));
        assert!(!manager.try_cancel_slow_path(2));
        assert!(!manager.canceled());
    }

    #[test]
    fn test_commit_phase_blocks_cancellation() {
        let manager = TypecheckEpochManager::new();
        manager.begin_slow_path(3);
        manager.enter_commit_phase();
        assert!(!manager.try_cancel_slow_path(4));
        assert!(manager.status().slow_path_running);
    }

    #[test]
    fn test_finish_clears_running() {
        let manager = TypecheckEpochManager::new();
        manager.begin_slow_path(3);
        manager.finish_slow_path();
        assert!(!manager.status().slow_path_running);
        assert!(!manager.try_cancel_slow_path(4));
    }
}
