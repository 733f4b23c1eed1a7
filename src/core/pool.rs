//! Bounded-concurrency worker pools shared by attribution, ranking and ingestion.
//!
//! Two shapes:
//! - [`map_unordered`] is scoped to one call: a fixed number of workers pull
//!   tasks from a queue, push results into a bounded channel, and the caller
//!   collects until every worker has exited.
//! - [`WorkerPool`] is long-lived: named threads drain a receiver until its
//!   senders are dropped, which is the only shutdown signal.

use std::thread;

use crossbeam_channel::{Receiver, bounded};

use crate::core::errors::{Result, WsError};

/// Run `f` over every task with at most `workers` threads.
///
/// Blocks until all tasks are processed. Result order is unspecified. The
/// result channel holds at most `2 * workers` items; the collector drains it
/// while workers run, so a slow consumer back-pressures the workers.
pub fn map_unordered<T, R, F>(tasks: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if tasks.is_empty() {
        return Vec::new();
    }
    let total = tasks.len();
    let workers = workers.clamp(1, total);

    let (task_tx, task_rx) = bounded::<T>(total);
    for task in tasks {
        // Capacity equals task count, so this never blocks.
        let _ = task_tx.send(task);
    }
    drop(task_tx);

    let (result_tx, result_rx) = bounded::<R>(workers * 2);
    let f = &f;

    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for task in &task_rx {
                    if result_tx.send(f(task)).is_err() {
                        return;
                    }
                }
            });
        }
        // Drop our sender so the collector stops once the last worker exits.
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        results.extend(result_rx.iter());
        results
    })
}

/// Fixed set of named threads draining one channel.
pub struct WorkerPool {
    name: String,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each calling `handler` for every received item.
    ///
    /// Threads exit once every sender for `rx` has been dropped and the queue
    /// is drained.
    pub fn spawn<T, F>(name: &str, workers: usize, rx: &Receiver<T>, handler: F) -> Result<Self>
    where
        T: Send + 'static,
        F: Fn(usize, T) + Send + Sync + Clone + 'static,
    {
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || {
                    for item in &rx {
                        handler(worker_id, item);
                    }
                })
                .map_err(|e| WsError::Runtime {
                    details: format!("failed to spawn {name} worker {worker_id}: {e}"),
                })?;
            handles.push(handle);
        }
        Ok(Self {
            name: name.to_string(),
            handles,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// True once every worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(thread::JoinHandle::is_finished)
    }

    /// Wait for every worker. Returns how many of them panicked.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            eprintln!("[WS-POOL] {}: {panicked} worker(s) panicked", self.name);
        }
        panicked
    }
}
