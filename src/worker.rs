//! The cache's single designated worker thread
//!
//! All store and overlay mutation runs here. Confinement is enforced by a
//! thread-identity assertion rather than locking: a mutating call from any
//! other thread is a programming error and panics. Public read paths
//! marshal a closure onto the worker and block for the result; render
//! pipelines use delayed, self-rescheduling posts so that each step yields
//! the thread between items. Tasks may be tagged with a generation token;
//! advancing the generation cancels every pending tagged task.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{IconCacheError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

struct Task {
    run_at: Instant,
    /// Submission order, so same-deadline tasks run FIFO.
    seq: u64,
    /// Tagged tasks are skipped once the generation moves past them.
    generation: Option<u64>,
    job: Job,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline pops
        // first, ties broken by submission order.
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WorkerShared {
    tx: Sender<Message>,
    generation: AtomicU64,
    seq: AtomicU64,
    thread_id: OnceLock<ThreadId>,
}

/// Cloneable handle to the worker thread
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    /// Run `job` on the worker as soon as possible.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        self.send(Duration::ZERO, None, Box::new(job));
    }

    /// Run `job` on the worker after `delay`.
    pub fn post_delayed(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        self.send(delay, None, Box::new(job));
    }

    /// Run `job` after `delay` unless the generation has moved past
    /// `generation` by then.
    pub fn post_tagged(
        &self,
        generation: u64,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) {
        self.send(delay, Some(generation), Box::new(job));
    }

    /// Run `job` on the worker and block until it completes.
    ///
    /// Called from the worker itself, the job runs inline.
    pub fn run_blocking<R>(&self, job: impl FnOnce() -> R + Send + 'static) -> R
    where
        R: Send + 'static,
    {
        if self.is_on_worker() {
            return job();
        }
        let (tx, rx) = bounded(1);
        self.post(move || {
            let _ = tx.send(job());
        });
        rx.recv().expect("icon cache worker thread is gone")
    }

    /// The current cache generation token.
    pub fn current_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Advance the generation, cancelling every pending tagged task.
    pub fn advance_generation(&self) -> u64 {
        self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the calling thread is the worker thread.
    pub fn is_on_worker(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Panic unless called on the worker thread. Mutating cache state off
    /// the worker would break the single-writer invariant, so this is a
    /// programming error, not a recoverable condition.
    pub fn assert_worker_thread(&self) {
        assert!(
            self.is_on_worker(),
            "icon cache state touched off the worker thread"
        );
    }

    fn send(&self, delay: Duration, generation: Option<u64>, job: Job) {
        let task = Task {
            run_at: Instant::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            generation,
            job,
        };
        if self.shared.tx.send(Message::Run(task)).is_err() {
            log::warn!("icon cache worker is shut down, dropping task");
        }
    }
}

/// Owns the worker thread; joins it on drop.
pub struct WorkerThread {
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawn the worker thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(WorkerShared {
            tx,
            generation: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            thread_id: OnceLock::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = loop_shared.thread_id.set(thread::current().id());
                run_loop(&rx, &loop_shared);
            })
            .map_err(IconCacheError::Io)?;

        Ok(Self {
            handle: WorkerHandle { shared },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        let _ = self.handle.shared.tx.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_loop(rx: &Receiver<Message>, shared: &WorkerShared) {
    let mut delayed: BinaryHeap<Task> = BinaryHeap::new();
    loop {
        // Drain everything that is due before sleeping again.
        let now = Instant::now();
        if delayed.peek().is_some_and(|task| task.run_at <= now) {
            if let Some(task) = delayed.pop() {
                run_task(task, shared);
            }
            continue;
        }

        let received = match delayed.peek() {
            Some(next) => rx.recv_deadline(next.run_at),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Message::Run(task)) => {
                if task.run_at <= Instant::now() {
                    run_task(task, shared);
                } else {
                    delayed.push(task);
                }
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

fn run_task(task: Task, shared: &WorkerShared) {
    if let Some(generation) = task.generation {
        if generation != shared.generation.load(Ordering::SeqCst) {
            log::trace!("dropping cancelled task (generation {})", generation);
            return;
        }
    }
    (task.job)();
}
