//! Worker pool for blocking native jobs.
//!
//! Workers run *native* code only: they never see heap cells, frames, the
//! operand stack or the collector. A job is a boxed closure producing an
//! [`AsyncResult`], plain Rust data. The script callback associated with a
//! job stays on the main thread (the machine holds it in a pending table
//! the collector roots); when the main loop drains the result queue it
//! allocates the result value on its own turn and enqueues the callback as
//! an ordinary task.
//!
//! Both queues are guarded by their own mutex and condition variable.
//! Results enter the queue in completion order, regardless of submission
//! order.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Native data a worker job produces. The main loop converts it to a
/// script value when it reaps the result.
pub enum AsyncResult {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Failure description; delivered to the callback as a string.
    Error(String),
}

/// A blocking job dispatched to the pool.
pub type AsyncJob = Box<dyn FnOnce() -> AsyncResult + Send + 'static>;

pub(crate) struct AsyncTask {
    pub id: u64,
    pub job: AsyncJob,
}

pub(crate) struct AsyncTaskResult {
    pub id: u64,
    pub result: AsyncResult,
}

struct WorkerShared {
    task_queue: Mutex<VecDeque<AsyncTask>>,
    task_available: Condvar,
    result_queue: Mutex<VecDeque<AsyncTaskResult>>,
    result_available: Condvar,
    shutdown: AtomicBool,
    /// Jobs submitted but not yet reaped by the main loop.
    in_flight: AtomicUsize,
}

/// Fixed-size pool of blocking-work threads.
pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the pool: `max(hardware_concurrency, 32)` threads, or one when
    /// the single-worker flag is set.
    pub fn new(single_thread: bool) -> WorkerPool {
        let count = if single_thread {
            1
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(32)
        };

        let shared = Arc::new(WorkerShared {
            task_queue: Mutex::new(VecDeque::new()),
            task_available: Condvar::new(),
            result_queue: Mutex::new(VecDeque::new()),
            result_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });

        let threads = (0..count)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_main(shared))
            })
            .collect();

        WorkerPool { shared, threads }
    }

    /// Hand a job to the pool.
    pub(crate) fn submit(&self, id: u64, job: AsyncJob) {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.shared.task_queue.lock().push_back(AsyncTask { id, job });
        self.shared.task_available.notify_one();
    }

    /// Take every finished result, in completion order.
    pub(crate) fn drain_results(&self) -> Vec<AsyncTaskResult> {
        let mut queue = self.shared.result_queue.lock();
        let results: Vec<AsyncTaskResult> = queue.drain(..).collect();
        self.shared
            .in_flight
            .fetch_sub(results.len(), Ordering::SeqCst);
        results
    }

    /// Jobs submitted but not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Park the main loop until a result arrives or the timeout passes.
    pub(crate) fn wait_for_results(&self, timeout: Duration) {
        let mut queue = self.shared.result_queue.lock();
        if queue.is_empty() {
            let _ = self
                .shared
                .result_available
                .wait_for(&mut queue, timeout);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.task_available.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_main(shared: Arc<WorkerShared>) {
    loop {
        let task = {
            let mut queue = shared.task_queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                shared.task_available.wait(&mut queue);
            }
        };

        let result = (task.job)();
        shared.result_queue.lock().push_back(AsyncTaskResult {
            id: task.id,
            result,
        });
        shared.result_available.notify_one();
    }
}
