//! Thread pool with graceful fallback to synchronous execution.
//!
//! Tasks are dispatched to an idle worker when one exists; otherwise they run
//! synchronously on the caller's thread. Work is never queued behind busy
//! workers, which keeps nested fork-join submissions (a pool task spawning and
//! awaiting more pool tasks) free of starvation deadlocks.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, OnceLock,
    },
};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fork-join thread pool.
///
/// Two submission modes are supported:
/// - [`spawn`](Self::spawn) for `'static` tasks, returning a [`JoinHandle`];
/// - [`scope`](Self::scope) for tasks borrowing from the caller's stack, with
///   an implicit wait-all barrier when the scope closure returns.
///
/// When every worker is busy, both modes execute the task on the calling
/// thread instead of queueing it.
#[derive(Clone)]
pub struct ThreadPool(Arc<PoolHandle>);

/// Owner of the worker-shared state; stops the workers when the last
/// [`ThreadPool`] clone is dropped. Workers themselves only hold `Shared`.
struct PoolHandle(Arc<Shared>);

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.0.stopping.store(true, Ordering::Release);
        self.0.job_ready.notify_all();
    }
}

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    job_ready: Condvar,
    idle: AtomicUsize,
    stopping: AtomicBool,
}

impl ThreadPool {
    /// Creates a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> ThreadPool {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            job_ready: Condvar::new(),
            idle: AtomicUsize::new(num_threads),
            stopping: AtomicBool::new(false),
        });
        for _ in 0..num_threads {
            let shared = shared.clone();
            std::thread::spawn(move || worker_loop(shared));
        }
        ThreadPool(Arc::new(PoolHandle(shared)))
    }

    /// Returns the process-wide pool, lazily sized from the available
    /// parallelism.
    pub fn global() -> &'static ThreadPool {
        static POOL: OnceLock<ThreadPool> = OnceLock::new();
        POOL.get_or_init(|| {
            let n = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8);
            ThreadPool::new(n)
        })
    }

    /// Executes a `'static` task on an idle worker, or synchronously on the
    /// caller's thread when no worker is idle.
    pub fn spawn<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let shared = self.shared();
        if shared.try_reserve() {
            let slot = Arc::new(TaskSlot::new());
            let task_slot = slot.clone();
            shared.submit(Box::new(move || task_slot.complete(f())));
            JoinHandle(HandleState::Pending(slot))
        } else {
            JoinHandle(HandleState::Ready(Some(f())))
        }
    }

    fn shared(&self) -> &Shared {
        &self.0 .0
    }

    /// Runs `f` with a [`Scope`] that can spawn tasks borrowing from the
    /// enclosing stack frame. All spawned tasks complete before `scope`
    /// returns.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>) -> R,
    {
        let scope = Scope {
            pool: self,
            tracker: ScopeTracker::new(),
            scope: std::marker::PhantomData,
            env: std::marker::PhantomData,
        };
        let res = f(&scope);
        scope.tracker.wait();
        res
    }
}

impl Shared {
    /// Claims an idle worker slot. On success the caller must `submit` exactly
    /// one job.
    fn try_reserve(&self) -> bool {
        let mut idle = self.idle.load(Ordering::Acquire);
        while idle > 0 {
            match self.idle.compare_exchange_weak(
                idle,
                idle - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => idle = observed,
            }
        }
        false
    }

    fn submit(&self, job: Job) {
        self.queue.lock().expect("queue lock").push_back(job);
        self.job_ready.notify_one();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().expect("queue lock");
            loop {
                if shared.stopping.load(Ordering::Acquire) {
                    return;
                }
                match queue.pop_front() {
                    Some(job) => break job,
                    None => queue = shared.job_ready.wait(queue).expect("queue lock"),
                }
            }
        };
        job();
        shared.idle.fetch_add(1, Ordering::Release);
    }
}

enum HandleState<R> {
    Ready(Option<R>),
    Pending(Arc<TaskSlot<R>>),
}

/// Handle to a `'static` task submitted via [`ThreadPool::spawn`].
pub struct JoinHandle<R>(HandleState<R>);

impl<R> JoinHandle<R> {
    /// Blocks until the task completes and returns its result.
    pub fn join(self) -> R {
        match self.0 {
            HandleState::Ready(value) => value.expect("task result"),
            HandleState::Pending(slot) => slot.take(),
        }
    }

    /// Joins a batch of handles, preserving submission order.
    pub fn join_all(handles: Vec<JoinHandle<R>>) -> Vec<R> {
        handles.into_iter().map(JoinHandle::join).collect()
    }
}

/// Handle to a task spawned within a [`Scope`]; cannot outlive the scope.
pub struct ScopedJoinHandle<'scope, R> {
    state: HandleState<R>,
    _scope: std::marker::PhantomData<&'scope ()>,
}

impl<'scope, R> ScopedJoinHandle<'scope, R> {
    /// Blocks until the task completes and returns its result.
    pub fn join(self) -> R {
        match self.state {
            HandleState::Ready(value) => value.expect("task result"),
            HandleState::Pending(slot) => slot.take(),
        }
    }
}

/// Spawning context for tasks that borrow from the enclosing stack frame.
pub struct Scope<'scope, 'env: 'scope> {
    pool: &'scope ThreadPool,
    tracker: Arc<ScopeTracker>,
    scope: std::marker::PhantomData<&'scope mut &'scope ()>,
    env: std::marker::PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Executes a task on an idle worker, or synchronously when none is idle.
    ///
    /// The task may capture references living at least as long as `'env`; the
    /// scope's closing barrier guarantees it finishes before those references
    /// expire.
    pub fn spawn<F, R>(&'scope self, f: F) -> ScopedJoinHandle<'scope, R>
    where
        F: FnOnce() -> R + Send + 'scope,
        R: Send + 'scope,
    {
        if self.pool.shared().try_reserve() {
            let tracker = self.tracker.clone();
            tracker.task_spawned();
            let slot = Arc::new(TaskSlot::new());
            let task_slot = slot.clone();
            let work = move || {
                task_slot.complete(f());
                tracker.task_completed();
            };
            let work: Box<dyn FnOnce() + Send + 'scope> = Box::new(work);
            // The closing barrier outlives the task, so pretending the job is
            // 'static never lets it observe a dead borrow.
            let work: Job = unsafe { std::mem::transmute(work) };
            self.pool.shared().submit(work);
            ScopedJoinHandle {
                state: HandleState::Pending(slot),
                _scope: std::marker::PhantomData,
            }
        } else {
            ScopedJoinHandle {
                state: HandleState::Ready(Some(f())),
                _scope: std::marker::PhantomData,
            }
        }
    }
}

/// Counts in-flight scope tasks; `wait` blocks until all have completed.
struct ScopeTracker {
    pending: Mutex<usize>,
    all_done: Condvar,
}

impl ScopeTracker {
    fn new() -> Arc<ScopeTracker> {
        Arc::new(ScopeTracker {
            pending: Mutex::new(0),
            all_done: Condvar::new(),
        })
    }

    fn task_spawned(&self) {
        *self.pending.lock().expect("pending lock") += 1;
    }

    fn task_completed(&self) {
        let mut pending = self.pending.lock().expect("pending lock");
        *pending -= 1;
        if *pending == 0 {
            self.all_done.notify_all();
        }
    }

    fn wait(&self) {
        let mut pending = self.pending.lock().expect("pending lock");
        while *pending > 0 {
            pending = self.all_done.wait(pending).expect("pending lock");
        }
    }
}

/// Single-use result cell shared between a worker and a join handle.
struct TaskSlot<R> {
    value: Mutex<Option<R>>,
    done: Condvar,
}

impl<R> TaskSlot<R> {
    fn new() -> TaskSlot<R> {
        TaskSlot {
            value: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, value: R) {
        *self.value.lock().expect("slot lock") = Some(value);
        self.done.notify_all();
    }

    fn take(&self) -> R {
        let mut value = self.value.lock().expect("slot lock");
        loop {
            match value.take() {
                Some(v) => return v,
                None => value = self.done.wait(value).expect("slot lock"),
            }
        }
    }
}
