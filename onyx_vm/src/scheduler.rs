//! Task queue, timers, intervals and the event loop.
//!
//! One turn of [`start_runtime`]: move due timers and intervals onto the
//! task queue, reap finished worker results, then run a single task to
//! completion. With nothing runnable the loop sleeps until the nearest
//! deadline or a worker wakeup; with nothing outstanding at all it exits.
//!
//! Timers fire in due-time order; ties break by registration order because
//! the registration sequence number is part of the map key. A
//! timestamp-only key would silently drop same-instant registrations.
//!
//! [`start_runtime`]: VirtualMachine::start_runtime

use crate::machine::VirtualMachine;
use crate::worker::{AsyncJob, AsyncResult};
use onyx_core::{CoreError, CoreResult, Value};
use onyx_gc::TempScope;
use std::time::{Duration, Instant};

/// One queued invocation: a callable and its argument.
#[derive(Clone, Copy)]
pub struct Task {
    pub uid: u64,
    pub function: Value,
    pub argument: Value,
}

/// A repeating timer: the task to enqueue and its period.
#[derive(Clone, Copy)]
pub(crate) struct IntervalEntry {
    pub task: Task,
    pub period: Duration,
}

/// Intervals cannot fire more often than this; a zero period would spin
/// the drain loop forever.
const MIN_INTERVAL_PERIOD: Duration = Duration::from_millis(1);

/// Idle sleep cap while worker jobs are in flight with no timer deadline.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl VirtualMachine {
    // =========================================================================
    // Registration
    // =========================================================================

    /// Queue a callable for the next free turn.
    pub fn register_task(&mut self, function: Value, argument: Value) -> u64 {
        let uid = self.next_uid();
        self.task_queue.push_back(Task {
            uid,
            function,
            argument,
        });
        uid
    }

    /// Run a callable once at `due`.
    pub fn register_timer(&mut self, due: Instant, function: Value, argument: Value) -> u64 {
        let uid = self.next_uid();
        self.timers.insert(
            (due, uid),
            Task {
                uid,
                function,
                argument,
            },
        );
        uid
    }

    /// Run a callable every `period`, starting one period from now.
    pub fn register_interval(&mut self, period: Duration, function: Value, argument: Value) -> u64 {
        let period = period.max(MIN_INTERVAL_PERIOD);
        let uid = self.next_uid();
        self.intervals.insert(
            (Instant::now() + period, uid),
            IntervalEntry {
                task: Task {
                    uid,
                    function,
                    argument,
                },
                period,
            },
        );
        uid
    }

    /// Cancel a timer. Clearing one that already fired is a no-op.
    pub fn clear_timer(&mut self, uid: u64) {
        if let Some(key) = self.timers.keys().find(|key| key.1 == uid).copied() {
            self.timers.remove(&key);
        }
    }

    /// Cancel an interval, preventing any further fires.
    pub fn clear_interval(&mut self, uid: u64) {
        if let Some(key) = self.intervals.keys().find(|key| key.1 == uid).copied() {
            self.intervals.remove(&key);
        }
    }

    /// Dispatch a blocking job to the worker pool. The callback stays on
    /// the main thread, rooted in the pending table, until the result
    /// comes back and the pair is enqueued as a task.
    pub fn register_worker_task(&mut self, job: AsyncJob, callback: Value) -> u64 {
        let id = self.next_uid();
        self.pending_callbacks.insert(id, callback);
        self.workers.submit(id, job);
        id
    }

    fn next_uid(&mut self) -> u64 {
        let uid = self.next_timer_id;
        self.next_timer_id += 1;
        uid
    }

    // =========================================================================
    // The event loop
    // =========================================================================

    /// Drive tasks, timers, intervals and worker results until nothing
    /// remains, returning the process status code.
    pub fn start_runtime(&mut self) -> u8 {
        while self.running {
            let now = Instant::now();
            self.drain_due_timers(now);
            self.drain_due_intervals(now);
            if let Err(error) = self.reap_worker_results() {
                return self.fail_runtime(error);
            }

            if let Some(task) = self.task_queue.pop_front() {
                if let Err(error) = self.exec_task(task) {
                    return self.fail_runtime(error);
                }
                continue;
            }

            let deadline = self.nearest_deadline();
            if deadline.is_none() && self.workers.in_flight() == 0 {
                break;
            }
            let timeout = deadline
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(WORKER_POLL_INTERVAL);
            if !timeout.is_zero() {
                self.workers.wait_for_results(timeout);
            }
        }
        self.status_code
    }

    fn exec_task(&mut self, task: Task) -> CoreResult<()> {
        self.exec_function(task.function, task.argument)?;
        Ok(())
    }

    fn fail_runtime(&mut self, error: CoreError) -> u8 {
        use std::io::Write;
        let _ = writeln!(self.err_stream.borrow_mut(), "{}", error);
        error.exit_code()
    }

    fn drain_due_timers(&mut self, now: Instant) {
        while let Some((&key, _)) = self.timers.first_key_value() {
            if key.0 > now {
                break;
            }
            if let Some(task) = self.timers.remove(&key) {
                self.task_queue.push_back(task);
            }
        }
    }

    fn drain_due_intervals(&mut self, now: Instant) {
        while let Some((&key, _)) = self.intervals.first_key_value() {
            if key.0 > now {
                break;
            }
            if let Some(entry) = self.intervals.remove(&key) {
                self.task_queue.push_back(entry.task);
                let mut next = key.0 + entry.period;
                if next <= now {
                    next = now + entry.period;
                }
                self.intervals.insert((next, key.1), entry);
            }
        }
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        let timer = self.timers.first_key_value().map(|(key, _)| key.0);
        let interval = self.intervals.first_key_value().map(|(key, _)| key.0);
        match (timer, interval) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (deadline, None) => deadline,
            (None, deadline) => deadline,
        }
    }

    /// Convert finished worker results into tasks. Values are allocated
    /// here, on the main thread's own turn; workers only ever produced
    /// plain native data.
    pub(crate) fn reap_worker_results(&mut self) -> CoreResult<()> {
        for finished in self.workers.drain_results() {
            let Some(callback) = self.pending_callbacks.remove(&finished.id) else {
                continue;
            };
            let mut scope = TempScope::new(&self.heap);
            scope.pin(callback);

            let argument = match finished.result {
                AsyncResult::Null => Value::NULL,
                AsyncResult::Boolean(b) => Value::boolean(b),
                AsyncResult::Integer(n) => self.make_integer(n)?,
                AsyncResult::Float(x) => self.create_float(x)?,
                AsyncResult::Text(text) => self.create_string(&text)?,
                AsyncResult::Bytes(bytes) => {
                    let array = scope.pin(self.create_array(bytes.len())?);
                    let cell = array
                        .as_ptr::<onyx_gc::MemoryCell>()
                        .ok_or_else(|| CoreError::malformed_bytecode("array cell missing"))?;
                    for byte in bytes {
                        let encoded = Value::integer(byte as i64).unwrap_or(Value::NULL);
                        unsafe {
                            (*cell).array_mut().data.push(encoded);
                        }
                    }
                    array
                }
                AsyncResult::Error(message) => self.create_string(&message)?,
            };

            self.task_queue.push_back(Task {
                uid: finished.id,
                function: callback,
                argument,
            });
        }
        Ok(())
    }
}
