//! Background thread pool for frame decoding.
//!
//! Uses work-stealing deques:
//! - External jobs go into a shared injector
//! - Idle workers steal from each other
//!
//! Epoch mechanism drops stale retrievals after an edit or session end:
//! a job enqueued under epoch N is skipped if the epoch moved on before a
//! worker picks it up.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{debug, trace};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4, cache_manager.epoch_ref())?;
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || {
///     let _ = tx.send(source.load());
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

fn find_job(local: &Worker<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) -> Option<Job> {
    if let Some(job) = local.pop() {
        return Some(job);
    }
    if let Some(job) = injector.steal_batch_and_pop(local).success() {
        return Some(job);
    }
    stealers.iter().find_map(|s| s.steal().success())
}

impl Workers {
    /// Spawn `num_threads` workers (at least one) sharing `epoch` with the
    /// `CacheManager`.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();
        let mut handles = Vec::with_capacity(num_threads);

        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("flipbook-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        if let Some(job) = find_job(&local, &injector, &stealers) {
                            job();
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        debug!("Workers initialized: {} threads", num_threads);

        Ok(Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
        })
    }

    /// Suggested pool size: three quarters of the cores, at least one.
    pub fn default_threads() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Run `f` on a worker thread unconditionally.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Run `f` only if the epoch still equals `epoch` when a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.injector.push(Box::new(move || {
            if current_epoch.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
            }
        }));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // Bounded wait; a thread stuck in a long decode dies with the process
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}
