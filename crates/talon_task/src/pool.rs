use talon_cfg::{DEFAULT_TASK_POOL_CHUNK_SIZE, TASK_NAME_MAX};
use talon_os::sync::atomic::{AtomicU32, Ordering};

use crate::handle::TaskHandle;

type Closure = Box<dyn FnOnce() + Send + 'static>;

/// A scheduler-owned unit of work.
///
/// `jobs` starts at 1 for the task's own unexecuted closure; each
/// unfinished descendant contributes another +1 (see
/// [`Scheduler::create_task_as_child`](crate::Scheduler::create_task_as_child)).
/// The task is complete only once `jobs` reaches zero (Invariant T1 /
/// S1 / S2 of the spec).
pub(crate) struct Task {
    pub(crate) closure: Option<Closure>,
    pub(crate) jobs: AtomicU32,
    pub(crate) parent: Option<TaskHandle>,
    pub(crate) name: Box<str>,
    pub(crate) version: u32,
}

impl Task {
    fn empty() -> Self {
        Self {
            closure: None,
            jobs: AtomicU32::new(0),
            parent: None,
            name: Box::from(""),
            version: 1,
        }
    }
}

/// Truncates `name` to [`TASK_NAME_MAX`] bytes at a char boundary, mirroring
/// the original's fixed `char name[64]` buffer without ever rejecting a
/// longer label.
fn truncate_name(name: &str) -> Box<str> {
    if name.len() <= TASK_NAME_MAX {
        return Box::from(name);
    }
    let mut end = TASK_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    Box::from(&name[..end])
}

/// Grow-only vector of [`Task`] records plus a LIFO free list, mirroring
/// the "versioned slot + free list" idiom used throughout this workspace
/// (see `talon_ecs::HandleSet` and `talon_ecs::FixedBlockAllocator`).
///
/// All mutation happens behind the scheduler's single `allocator_mutex`
/// (see [`Scheduler`](crate::Scheduler)); this differs from the original
/// C++, which read task slots without holding that mutex and relied on
/// the vector never shrinking — an assumption that does not hold once
/// Rust's aliasing rules are enforced across threads. See `DESIGN.md`.
pub(crate) struct TaskPool {
    tasks: Vec<Task>,
    free: Vec<u32>,
}

impl TaskPool {
    /// Reserves `DEFAULT_TASK_POOL_CHUNK_SIZE` slots up front so the
    /// common case (a handful of tasks in flight) doesn't reallocate the
    /// backing `Vec` on its first few `create` calls.
    pub(crate) fn new() -> Self {
        Self {
            tasks: Vec::with_capacity(DEFAULT_TASK_POOL_CHUNK_SIZE),
            free: Vec::new(),
        }
    }

    /// Acquires a task slot, filling in its `closure`, `name` and
    /// `jobs = 1`, and clearing any stale `parent`.
    pub(crate) fn create(&mut self, name: &str, closure: Closure) -> TaskHandle {
        let handle = self.acquire_slot();
        let task = self.get_mut(handle).expect("just-allocated slot");
        task.closure = Some(closure);
        task.jobs.store(1, Ordering::Release);
        task.parent = None;
        task.name = truncate_name(name);
        handle
    }

    fn acquire_slot(&mut self) -> TaskHandle {
        if let Some(index) = self.free.pop() {
            let version = self.tasks[index as usize].version;
            return TaskHandle::new(index, version);
        }

        let index = u32::try_from(self.tasks.len())
            .expect("too many tasks for a 32-bit index; consider widening TaskHandle::index");
        self.tasks.push(Task::empty());
        TaskHandle::new(index, self.tasks[index as usize].version)
    }

    pub(crate) fn get(&self, handle: TaskHandle) -> Option<&Task> {
        self.tasks
            .get(handle.index as usize)
            .filter(|t| t.version == handle.version)
    }

    pub(crate) fn get_mut(&mut self, handle: TaskHandle) -> Option<&mut Task> {
        self.tasks
            .get_mut(handle.index as usize)
            .filter(|t| t.version == handle.version)
    }

    /// Bumps `handle`'s slot to a fresh version, clears its closure and
    /// parent, and returns the index to the free list. Called once a
    /// task's `jobs` counter has reached zero.
    pub(crate) fn recycle(&mut self, handle: TaskHandle) {
        if let Some(task) = self.get_mut(handle) {
            task.closure = None;
            task.parent = None;
            task.version = task
                .version
                .checked_add(1)
                .expect("task slot version overflow");
            self.free.push(handle.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_name_keeps_short_names_intact() {
        assert_eq!(&*truncate_name("root"), "root");
    }

    #[test]
    fn truncate_name_cuts_long_names_at_a_char_boundary() {
        let long = "x".repeat(TASK_NAME_MAX + 10);
        let truncated = truncate_name(&long);
        assert_eq!(truncated.len(), TASK_NAME_MAX);
    }

    #[test]
    fn recycled_slot_is_reused_with_a_bumped_version() {
        let mut pool = TaskPool::new();
        let a = pool.create("a", Box::new(|| {}));
        pool.recycle(a);
        let b = pool.create("b", Box::new(|| {}));
        assert_eq!(a.index(), b.index());
        assert_ne!(a.version(), b.version());
        // The stale handle no longer resolves to a live task.
        assert!(pool.get(a).is_none());
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn free_list_never_yields_a_slot_twice_without_recycling() {
        let mut pool = TaskPool::new();
        let a = pool.create("a", Box::new(|| {}));
        let b = pool.create("b", Box::new(|| {}));
        assert_ne!(a.index(), b.index());
    }
}
