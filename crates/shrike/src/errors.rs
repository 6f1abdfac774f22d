//
// errors.rs
//
// Error queue shared between the indexing pipeline and its consumer
//

use std::fmt;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

/// A diagnostic produced while indexing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexError {
    pub path: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path, self.line, self.message)
    }
}

/// Queue of indexing diagnostics.
///
/// Producers may push from any thread; `flush` asserts that it runs on the
/// thread that created the queue, because the reporting path downstream is
/// single-consumer. The indexer substitutes a flush-ignoring queue while it
/// runs the pipeline off the reporting path, then drains and discards.
#[derive(Debug)]
pub struct ErrorQueue {
    owner: ThreadId,
    ignore_flushes: bool,
    queued: Mutex<Vec<IndexError>>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            ignore_flushes: false,
            queued: Mutex::new(Vec::new()),
        }
    }

    /// A throwaway queue whose flushes are no-ops. Safe to hand to the
    /// pipeline from any thread.
    pub fn silenced() -> Self {
        Self {
            ignore_flushes: true,
            ..Self::new()
        }
    }

    pub fn ignores_flushes(&self) -> bool {
        self.ignore_flushes
    }

    pub fn push(&self, error: IndexError) {
        self.queued.lock().unwrap().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.queued.lock().unwrap().is_empty()
    }

    /// Remove and return everything queued so far. Thread-safe.
    pub fn drain(&self) -> Vec<IndexError> {
        std::mem::take(&mut *self.queued.lock().unwrap())
    }

    /// Report queued diagnostics to the log and clear the queue.
    ///
    /// No-op for silenced queues. Must be called on the owning thread.
    pub fn flush(&self) {
        if self.ignore_flushes {
            return;
        }
        assert_eq!(
            thread::current().id(),
            self.owner,
            "ErrorQueue flushed from a thread other than its owner"
        );
        for error in self.drain() {
            log::warn!("{error}");
        }
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(message: &str) -> IndexError {
        IndexError {
            path: "a.sk".to_string(),
            line: 1,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_push_and_drain() {
        let queue = ErrorQueue::new();
        assert!(queue.is_empty());

        queue.push(error("first"));
        queue.push(error("second"));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_from_other_thread() {
        let queue = std::sync::Arc::new(ErrorQueue::new());
        let producer = queue.clone();
        thread::spawn(move || producer.push(error("cross-thread")))
            .join()
            .unwrap();
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn test_silenced_flush_is_noop_off_thread() {
        let queue = std::sync::Arc::new(ErrorQueue::silenced());
        queue.push(error("ignored"));
        let flusher = queue.clone();
        // Would assert on a non-silenced queue; silenced queues allow it.
        thread::spawn(move || flusher.flush()).join().unwrap();
        assert!(!queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "other than its owner")]
    fn test_flush_asserts_thread_affinity() {
        let queue = std::sync::Arc::new(ErrorQueue::new());
        let flusher = queue.clone();
        let result = thread::spawn(move || flusher.flush()).join();
        // Re-raise the panic from the worker thread.
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }
}
