use std::collections::{HashMap, VecDeque};

use talon_os::backoff::Backoff;
use talon_os::sync::atomic::{AtomicBool, Ordering};
use talon_os::sync::{Arc, Condvar, Mutex, OnceLock};
use talon_os::thread::{self, JoinHandle, ThreadId};

use crate::handle::TaskHandle;
use crate::pool::TaskPool;

/// Sentinel returned by [`Scheduler::worker_index`] for a thread the
/// scheduler has never seen (neither a worker nor the main thread).
pub const UNKNOWN_WORKER: u32 = u32::MAX;

/// Lifecycle state of a [`Scheduler`], mirroring the `{Idle, Running,
/// Disposed}` surface the spec's external interfaces table describes. A
/// freshly constructed scheduler is always `Running` — there is no
/// separate pre-initialize state, since `Scheduler::new` both allocates
/// and starts its workers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    Running,
    Disposed,
}

type ThreadClosure = Box<dyn Fn(u32) + Send + Sync>;
type TaskClosure = Box<dyn Fn(u32, &str) + Send + Sync>;

/// Profiling/diagnostic callbacks a host can wire without forking the
/// crate: once per worker thread start/stop, and around every task's
/// closure. Each hook may be set at most once (`OnceLock`); later calls
/// are ignored, matching "set up before `run_task`, not swapped live".
#[derive(Default)]
pub struct Hooks {
    on_thread_start: OnceLock<ThreadClosure>,
    on_thread_stop: OnceLock<ThreadClosure>,
    on_task_start: OnceLock<TaskClosure>,
    on_task_stop: OnceLock<TaskClosure>,
}

impl Hooks {
    pub fn set_on_thread_start(&self, f: impl Fn(u32) + Send + Sync + 'static) {
        let _ = self.on_thread_start.set(Box::new(f));
    }

    pub fn set_on_thread_stop(&self, f: impl Fn(u32) + Send + Sync + 'static) {
        let _ = self.on_thread_stop.set(Box::new(f));
    }

    pub fn set_on_task_start(&self, f: impl Fn(u32, &str) + Send + Sync + 'static) {
        let _ = self.on_task_start.set(Box::new(f));
    }

    pub fn set_on_task_stop(&self, f: impl Fn(u32, &str) + Send + Sync + 'static) {
        let _ = self.on_task_stop.set(Box::new(f));
    }
}

struct QueueState {
    runnable: VecDeque<TaskHandle>,
    stop: bool,
}

struct Inner {
    pool: Mutex<TaskPool>,
    queue: Mutex<QueueState>,
    condvar: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_indices: Mutex<HashMap<ThreadId, u32>>,
    main_thread: ThreadId,
    hooks: Hooks,
    disposed: AtomicBool,
}

/// The scheduler: a fixed pool of worker threads draining a single FIFO
/// run queue, plus a recyclable pool of task records linked by
/// parent/child job counters.
///
/// `Scheduler` is a cheap, `Clone`-able handle around shared state (an
/// `Arc<Inner>`) — cloning it does not spawn new workers, it just shares
/// the existing pool and queue, the way the teacher workspace's own task
/// pool handles are passed around. ECS types in `talon_ecs` are
/// deliberately *not* `Sync`; `Scheduler` is the one synchronized surface
/// in this workspace (spec §5).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Starts the scheduler with `worker_count` background worker
    /// threads. `worker_count == 0` picks `cpu_count - 1`, clamped to a
    /// minimum of 1. The calling thread becomes "main" (worker index 0).
    pub fn new(worker_count: u32) -> Self {
        let worker_count = if worker_count == 0 {
            (thread::available_parallelism().get() as u32)
                .saturating_sub(1)
                .max(1)
        } else {
            worker_count
        };

        let main_thread = thread::current_id();
        let mut thread_indices = HashMap::with_capacity(worker_count as usize + 1);
        thread_indices.insert(main_thread, 0);

        let inner = Arc::new(Inner {
            pool: Mutex::new(TaskPool::new()),
            queue: Mutex::new(QueueState {
                runnable: VecDeque::new(),
                stop: false,
            }),
            condvar: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(worker_count as usize)),
            thread_indices: Mutex::new(thread_indices),
            main_thread,
            hooks: Hooks::default(),
            disposed: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(worker_count as usize);
        for i in 0..worker_count {
            let worker_index = i + 1;
            let inner = inner.clone();
            let handle = thread::spawn(format!("talon-worker-{worker_index}"), move || {
                inner.worker_loop(worker_index);
            });
            inner
                .thread_indices
                .lock()
                .unwrap()
                .insert(handle.thread().id(), worker_index);
            workers.push(handle);
        }
        *inner.workers.lock().unwrap() = workers;

        Self { inner }
    }

    /// Hooks for thread/task profiling callbacks.
    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    /// `true` if the calling thread is the one that constructed this
    /// scheduler.
    pub fn is_main_thread(&self) -> bool {
        thread::current_id() == self.inner.main_thread
    }

    /// Returns the worker index of the calling thread, or
    /// [`UNKNOWN_WORKER`] if the calling thread is neither "main" nor one
    /// of this scheduler's workers.
    pub fn worker_index(&self) -> u32 {
        self.inner
            .thread_indices
            .lock()
            .unwrap()
            .get(&thread::current_id())
            .copied()
            .unwrap_or(UNKNOWN_WORKER)
    }

    pub fn status(&self) -> SchedulerStatus {
        if self.inner.disposed.load(Ordering::Acquire) {
            SchedulerStatus::Disposed
        } else {
            SchedulerStatus::Running
        }
    }

    /// Creates a task with no parent. `jobs` starts at 1; the task is not
    /// scheduled until [`Self::run_task`] is called.
    pub fn create_task<F>(&self, name: &str, closure: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pool.lock().unwrap().create(name, Box::new(closure))
    }

    /// Creates a task as a child of `parent`.
    ///
    /// Atomically increments `parent`'s job counter *before* recording
    /// `parent` on the child. If `parent` had already completed (its jobs
    /// counter was 0), the increment is rolled back and the child is
    /// created as an orphan — this is the only acceptable race window per
    /// the spec.
    pub fn create_task_as_child<F>(&self, parent: TaskHandle, name: &str, closure: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pool = self.inner.pool.lock().unwrap();
        let handle = pool.create(name, Box::new(closure));

        if let Some(ptask) = pool.get(parent) {
            let previous_jobs = ptask.jobs.fetch_add(1, Ordering::AcqRel);
            if previous_jobs > 0 {
                pool.get_mut(handle).expect("just created").parent = Some(parent);
            } else {
                ptask.jobs.fetch_sub(1, Ordering::AcqRel);
            }
        }

        handle
    }

    /// Pushes `handle` onto the run queue. A no-op, logged at `debug!`,
    /// if called after [`Self::dispose`].
    pub fn run_task(&self, handle: TaskHandle) {
        debug_assert!(
            self.inner
                .pool
                .lock()
                .unwrap()
                .get(handle)
                .map(|t| t.jobs.load(Ordering::Acquire) > 0)
                .unwrap_or(false),
            "run_task with a handle that is not pending work"
        );

        let mut queue = self.inner.queue.lock().unwrap();
        if queue.stop {
            log::debug!("run_task({handle:?}) after scheduler shutdown; dropping");
            return;
        }
        queue.runnable.push_back(handle);
        drop(queue);
        self.inner.condvar.notify_one();
    }

    /// `true` iff `jobs == 0` for `handle`, or `handle` is stale (its slot
    /// has been recycled for other work).
    pub fn is_complete(&self, handle: TaskHandle) -> bool {
        match self.inner.pool.lock().unwrap().get(handle) {
            Some(task) => task.jobs.load(Ordering::Acquire) == 0,
            None => true,
        }
    }

    /// Blocks the calling thread until `handle` completes, helping by
    /// draining other ready tasks from the queue while it waits. Safe to
    /// call from any thread, including recursively from within a task's
    /// own closure (a task waiting on its children).
    pub fn wait_task(&self, handle: TaskHandle) {
        let worker_index = self.worker_index();
        let backoff = Backoff::new();

        while !self.is_complete(handle) {
            match self.inner.try_execute_one(worker_index) {
                ExecuteOutcome::Executed => backoff.reset(),
                ExecuteOutcome::Empty => backoff.snooze(),
                ExecuteOutcome::Stopping => break,
            }
        }
    }

    /// Signals shutdown, wakes all workers, and joins them. Idempotent.
    /// After this returns, [`Self::run_task`] silently drops its
    /// argument and [`Self::status`] reports [`SchedulerStatus::Disposed`].
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Inner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut queue = self.queue.lock().unwrap();
            queue.stop = true;
        }
        self.condvar.notify_all();

        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn worker_loop(&self, worker_index: u32) {
        if let Some(cb) = self.hooks.on_thread_start.get() {
            cb(worker_index);
        }

        loop {
            if matches!(self.execute_one(worker_index, true), ExecuteOutcome::Stopping) {
                break;
            }
        }

        if let Some(cb) = self.hooks.on_thread_stop.get() {
            cb(worker_index);
        }
    }

    /// Non-blocking variant used by `wait_task`'s help loop.
    fn try_execute_one(&self, worker_index: u32) -> ExecuteOutcome {
        self.execute_one(worker_index, false)
    }

    fn execute_one(&self, worker_index: u32, wait: bool) -> ExecuteOutcome {
        let handle = {
            let mut queue = self.queue.lock().unwrap();
            if wait {
                while !queue.stop && queue.runnable.is_empty() {
                    queue = self.condvar.wait(queue).unwrap();
                }
            }

            match queue.runnable.pop_front() {
                Some(handle) => handle,
                None => {
                    return if queue.stop {
                        ExecuteOutcome::Stopping
                    } else {
                        ExecuteOutcome::Empty
                    };
                }
            }
        };

        self.run_one(handle, worker_index);
        ExecuteOutcome::Executed
    }

    fn run_one(&self, handle: TaskHandle, worker_index: u32) {
        let (closure, name) = {
            let mut pool = self.pool.lock().unwrap();
            match pool.get_mut(handle) {
                Some(task) => (task.closure.take(), task.name.clone()),
                None => return,
            }
        };

        if let Some(cb) = self.hooks.on_task_start.get() {
            cb(worker_index, &name);
        }

        if let Some(closure) = closure {
            closure();
        }

        self.finish_task(handle);

        if let Some(cb) = self.hooks.on_task_stop.get() {
            cb(worker_index, &name);
        }
    }

    fn finish_task(&self, handle: TaskHandle) {
        let parent = {
            let mut pool = self.pool.lock().unwrap();
            let Some(task) = pool.get(handle) else {
                return;
            };
            let remaining = task.jobs.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining != 0 {
                return;
            }
            let parent = pool.get(handle).and_then(|t| t.parent);
            pool.recycle(handle);
            parent
        };

        if let Some(parent) = parent {
            self.finish_task(parent);
        }
    }
}

enum ExecuteOutcome {
    Executed,
    Empty,
    Stopping,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[test]
    fn s3_task_tree_four_children() {
        let sched = Scheduler::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let root = sched.create_task("root", || {});
        let children: Vec<TaskHandle> = (0..4)
            .map(|i| {
                let seen = seen.clone();
                sched.create_task_as_child(root, "child", move || {
                    std::thread::sleep(Duration::from_millis(1));
                    seen.lock().unwrap().push(i);
                })
            })
            .collect();

        sched.run_task(root);
        for child in &children {
            sched.run_task(*child);
        }
        sched.wait_task(root);

        assert!(sched.is_complete(root));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        for child in children {
            assert!(sched.is_complete(child));
        }

        sched.dispose();
    }

    #[test]
    fn s4_nested_tasks_finish_only_after_children() {
        // A spawns B and C as its own children from within its closure
        // (the only place a task can reference its own handle, since
        // `create_task` returns the handle after the closure is already
        // stored) and runs both before returning. `wait_task(a)` must not
        // observe completion until B and C have also finished.
        let sched = Scheduler::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (a_tx, a_rx) = std::sync::mpsc::channel();
        let sched_for_a = sched.clone();
        let order_for_a = order.clone();
        let a = sched.create_task("A", move || {
            let a_handle: TaskHandle = a_rx.recv().unwrap();

            let ob = order_for_a.clone();
            let b = sched_for_a.create_task_as_child(a_handle, "B", move || {
                std::thread::sleep(Duration::from_millis(2));
                ob.lock().unwrap().push('B');
            });
            let oc = order_for_a.clone();
            let c = sched_for_a.create_task_as_child(a_handle, "C", move || {
                oc.lock().unwrap().push('C');
            });

            sched_for_a.run_task(b);
            sched_for_a.run_task(c);
            order_for_a.lock().unwrap().push('A');
        });
        a_tx.send(a).unwrap();

        sched.run_task(a);
        sched.wait_task(a);

        assert!(sched.is_complete(a));
        let order = order.lock().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], 'A'); // A's own closure always returns first
        let mut tail = order[1..].to_vec();
        tail.sort();
        assert_eq!(tail, vec!['B', 'C']);

        sched.dispose();
    }

    #[test]
    fn child_of_already_completed_parent_becomes_orphan() {
        let sched = Scheduler::new(2);
        let parent = sched.create_task("parent", || {});
        sched.run_task(parent);
        sched.wait_task(parent);
        assert!(sched.is_complete(parent));

        // Parent's jobs counter already hit zero; a child created now
        // must not resurrect it as pending.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let child = sched.create_task_as_child(parent, "late-child", move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        sched.run_task(child);
        sched.wait_task(child);

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(sched.is_complete(parent));

        sched.dispose();
    }

    #[test]
    fn wait_task_helps_drain_unrelated_ready_tasks() {
        let sched = Scheduler::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        let unrelated: Vec<TaskHandle> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                sched.create_task("unrelated", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        let target = sched.create_task("target", || {});

        for h in &unrelated {
            sched.run_task(*h);
        }
        sched.run_task(target);
        sched.wait_task(target);

        assert!(sched.is_complete(target));
        assert_eq!(counter.load(Ordering::SeqCst), 8);

        sched.dispose();
    }

    #[test]
    fn dispose_then_run_task_is_a_silent_noop() {
        // Makes the `log::debug!` on this path visible when running this
        // test with `--nocapture`, instead of a silent no-op.
        let _ = env_logger::try_init();

        let sched = Scheduler::new(1);
        sched.dispose();
        assert_eq!(sched.status(), SchedulerStatus::Disposed);

        let handle = sched.create_task("after-dispose", || {});
        sched.run_task(handle); // must not panic or hang
    }

    #[test]
    fn stress_many_independent_tasks_run_exactly_once() {
        // Invariant 8 (spec §8): the queue/pool locking must never let
        // two threads execute the same slot, and no execution count can
        // exceed 1 per task.
        let sched = Scheduler::new(8);
        const N: usize = 500;
        let counts = Arc::new(Mutex::new(vec![0u32; N]));

        let handles: Vec<TaskHandle> = (0..N)
            .map(|i| {
                let counts = counts.clone();
                sched.create_task("stress", move || {
                    counts.lock().unwrap()[i] += 1;
                })
            })
            .collect();
        for h in &handles {
            sched.run_task(*h);
        }
        for h in &handles {
            sched.wait_task(*h);
        }

        assert!(counts.lock().unwrap().iter().all(|&c| c == 1));
        sched.dispose();
    }

    #[test]
    fn main_thread_is_worker_index_zero() {
        let sched = Scheduler::new(2);
        assert!(sched.is_main_thread());
        assert_eq!(sched.worker_index(), 0);
        sched.dispose();
    }
}
