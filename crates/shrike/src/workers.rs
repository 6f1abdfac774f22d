//
// workers.rs
//
// Worker pool for CPU-bound indexing jobs
//

use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A fixed-size pool that multiplexes one job closure across its workers.
///
/// A pool of size zero runs jobs inline on the calling thread; the indexer
/// keeps such a pool around for hashing small edits without touching the
/// worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// How long result-queue consumers block before re-checking for
    /// completion.
    pub const BLOCK_INTERVAL: Duration = Duration::from_millis(20);

    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `size` copies of `job` on dedicated threads. With an empty pool
    /// the job runs once, inline, before this returns.
    ///
    /// The returned handle joins the workers; callers typically drain a
    /// result channel first and join afterwards.
    pub fn multiplex_job<F>(&self, name: &str, job: F) -> MultiplexJob
    where
        F: FnOnce() + Clone + Send + 'static,
    {
        if self.size == 0 {
            log::trace!("{name}: running inline on the caller");
            job();
            return MultiplexJob {
                handles: Vec::new(),
            };
        }

        log::trace!("{name}: multiplexing over {} workers", self.size);
        let handles = (0..self.size)
            .map(|i| {
                let job = job.clone();
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(job)
                    .expect("failed to spawn worker thread")
            })
            .collect();
        MultiplexJob { handles }
    }
}

/// Join handle for a multiplexed job. Joins on drop.
#[derive(Debug)]
pub struct MultiplexJob {
    handles: Vec<JoinHandle<()>>,
}

impl MultiplexJob {
    pub fn join(mut self) {
        self.join_all();
    }

    fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl Drop for MultiplexJob {
    fn drop(&mut self) {
        self.join_all();
    }
}
