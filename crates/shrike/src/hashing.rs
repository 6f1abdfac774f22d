//
// hashing.rs
//
// Parallel structural hashing of source files
//

use std::sync::Arc;

use crate::files::SourceFile;
use crate::pipeline;
use crate::workers::WorkerPool;

/// Ensure every file in `files` carries a structural hash.
///
/// Indices are fanned out over a bounded queue; workers skip files that are
/// already hashed and push results back in batches, which the caller drains
/// with a periodic blocking wait. Hashing is idempotent: a second call over
/// the same files does no work. With a zero-size pool the whole operation
/// runs inline on the caller.
pub fn compute_file_hashes(files: &[Arc<SourceFile>], workers: &WorkerPool) {
    // Fast abort if all files have hashes.
    if files.iter().all(|f| f.hash().is_some()) {
        return;
    }

    log::debug!("computing state hashes for {} files", files.len());

    let (index_tx, index_rx) = crossbeam_channel::bounded::<usize>(files.len());
    for i in 0..files.len() {
        index_tx.send(i).expect("index queue rejected a file index");
    }
    drop(index_tx);

    type HashBatch = Vec<(usize, crate::files::FileHash)>;
    let (result_tx, result_rx) = crossbeam_channel::bounded::<HashBatch>(files.len());
    let worker_files: Vec<Arc<SourceFile>> = files.to_vec();

    let job = workers.multiplex_job("file_hash", move || {
        let mut batch = HashBatch::new();
        while let Ok(i) = index_rx.try_recv() {
            let file = &worker_files[i];
            if file.hash().is_some() {
                continue;
            }
            batch.push((i, pipeline::compute_file_hash(file)));
        }
        if !batch.is_empty() {
            let _ = result_tx.send(batch);
        }
    });

    // Drain until every worker has dropped its sender.
    loop {
        match result_rx.recv_timeout(WorkerPool::BLOCK_INTERVAL) {
            Ok(batch) => {
                for (i, hash) in batch {
                    files[i].set_hash(hash);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                log::trace!("still hashing");
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    job.join();
}
