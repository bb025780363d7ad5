use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll, Wake, Waker},
    time::Duration,
};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use scoped_tls::scoped_thread_local;

use crate::{
    Error,
    task::{Id, JoinHandle, Termination},
};

type Queue = Arc<Mutex<VecDeque<Id>>>;
type LocalFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

scoped_thread_local! {
    static RUNTIME: Runtime
}

/// Environment variable consulted by [`Builder::build`] when no seed was
/// configured explicitly.
pub const SEED_ENV_VAR: &str = "SIMULATOR_SEED";

#[derive(Debug, Clone, Default)]
pub struct Builder {
    /// Seed for the ready-queue RNG. `None` runs ready tasks in FIFO wake
    /// order.
    pub seed: Option<u64>,
}

impl Builder {
    #[must_use]
    pub const fn new() -> Self {
        Self { seed: None }
    }

    pub fn seed<T: Into<Option<u64>>>(&mut self, seed: T) -> &mut Self {
        self.seed = seed.into();
        self
    }

    /// # Errors
    ///
    /// * If `SIMULATOR_SEED` is consulted and is not a valid `u64`
    pub fn build(&self) -> Result<Runtime, Error> {
        let seed = match self.seed {
            Some(seed) => Some(seed),
            None => seed_from_env()?,
        };
        Ok(Runtime::with_seed(seed))
    }
}

fn seed_from_env() -> Result<Option<u64>, Error> {
    std::env::var(SEED_ENV_VAR)
        .ok()
        .map(|x| x.parse::<u64>())
        .transpose()
        .map_err(Error::from)
}

struct TaskSlot {
    future: Option<LocalFuture>,
    waker: Waker,
    cancelled: bool,
}

struct TaskWaker {
    id: Id,
    queue: Queue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        log::trace!("wake: task={}", self.id);
        push_unique(&self.queue, self.id);
    }
}

fn push_unique(queue: &Queue, id: Id) {
    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
    if !queue.contains(&id) {
        queue.push_back(id);
    }
}

struct Inner {
    queue: Queue,
    tasks: RefCell<BTreeMap<Id, TaskSlot>>,
    timers: RefCell<BTreeMap<(Duration, u64), Waker>>,
    clock: Cell<Duration>,
    current: Cell<Option<Id>>,
    termination: Cell<Termination>,
    next_task_id: Cell<u64>,
    next_timer_id: Cell<u64>,
    rng: Option<RefCell<StdRng>>,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("clock", &self.inner.clock.get())
            .field("tasks", &self.inner.tasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("seeded", &self.inner.rng.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    fn with_seed(seed: Option<u64>) -> Self {
        log::debug!("runtime: created seed={seed:?}");
        Self {
            inner: Rc::new(Inner {
                queue: Arc::new(Mutex::new(VecDeque::new())),
                tasks: RefCell::new(BTreeMap::new()),
                timers: RefCell::new(BTreeMap::new()),
                clock: Cell::new(Duration::ZERO),
                current: Cell::new(None),
                termination: Cell::new(Termination::Normal),
                next_task_id: Cell::new(1),
                next_timer_id: Cell::new(0),
                rng: seed.map(|seed| RefCell::new(StdRng::seed_from_u64(seed))),
            }),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn current() -> Option<Self> {
        if RUNTIME.is_set() {
            Some(RUNTIME.with(Clone::clone))
        } else {
            None
        }
    }

    /// Virtual time elapsed since the runtime was created.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.clock.get()
    }

    #[must_use]
    pub fn current_task(&self) -> Option<Id> {
        self.inner.current.get()
    }

    /// The kind of teardown currently dropping a task's future, or
    /// [`Termination::Normal`] when no teardown is in progress.
    #[must_use]
    pub fn termination(&self) -> Termination {
        self.inner.termination.get()
    }

    pub fn spawn<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> JoinHandle<T> {
        let id = Id(self.inner.next_task_id.get());
        self.inner.next_task_id.set(id.0 + 1);

        let (tx, rx) = futures::channel::oneshot::channel();
        let wrapped = async move {
            let _ = tx.send(future.await);
        };
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            queue: self.inner.queue.clone(),
        }));

        self.inner.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future: Some(Box::pin(wrapped)),
                waker,
                cancelled: false,
            },
        );
        push_unique(&self.inner.queue, id);
        log::debug!("spawn: task={id} at={:?}", self.now());

        JoinHandle::new(id, rx, self.handle())
    }

    /// Runs `future` as the root task, driving every other task and the
    /// virtual clock until it completes.
    ///
    /// # Panics
    ///
    /// * If called from within a running `Runtime`
    /// * If the simulation deadlocks: the root task is pending, no task is
    ///   ready and no timer is pending
    /// * If the root task is cancelled or closed before completing
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        assert!(
            !RUNTIME.is_set(),
            "Cannot run block_on within a runtime"
        );
        log::trace!("block_on");
        RUNTIME.set(self, || {
            let mut root = self.spawn(future);
            loop {
                if let Some(result) = root.try_take() {
                    return result.unwrap_or_else(|e| panic!("root task did not complete: {e}"));
                }
                let progressed = self.step();
                assert!(
                    progressed,
                    "simulation deadlocked at {:?}: no task is ready and no timer is pending",
                    self.now()
                );
            }
        })
    }

    /// Drives the remaining tasks until none can make progress, then tears
    /// down whatever is still blocked with [`Termination::Cancelled`].
    ///
    /// # Errors
    ///
    /// * Never fails for the simulated runtime; kept fallible for parity
    ///   with runtimes that join worker threads
    #[allow(clippy::unnecessary_wraps)]
    pub fn wait(self) -> Result<(), Error> {
        log::debug!("wait: entering, outstanding tasks={}", self.tasks());
        RUNTIME.set(&self, || {
            loop {
                while self.step() {}

                let blocked = std::mem::take(&mut *self.inner.tasks.borrow_mut())
                    .into_iter()
                    .filter_map(|(id, slot)| slot.future.map(|future| (id, future)))
                    .collect::<Vec<_>>();
                if blocked.is_empty() {
                    break;
                }
                for (id, future) in blocked {
                    self.teardown(id, Termination::Cancelled, future);
                }
            }
        });
        log::debug!("wait: completed at={:?}", self.now());
        Ok(())
    }

    /// Runs a single scheduling step: one ready task, or one clock advance
    /// when nothing is ready. Returns `false` once neither is possible.
    pub fn tick(&self) -> bool {
        RUNTIME.set(self, || self.step())
    }

    fn tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    fn step(&self) -> bool {
        self.process_next_task() || self.advance_clock()
    }

    fn next_task(&self) -> Option<Id> {
        let mut queue = self
            .inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let task_count = queue.len();
        if task_count == 0 {
            return None;
        }
        let index = self
            .inner
            .rng
            .as_ref()
            .map_or(0, |rng| rng.borrow_mut().random_range(0..task_count));
        log::trace!("next task index={index} task_count={task_count}");

        queue.remove(index)
    }

    fn process_next_task(&self) -> bool {
        let Some(id) = self.next_task() else {
            return false;
        };

        let (future, waker, cancelled) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(&id) else {
                log::trace!("process_next_task: task={id} already gone");
                return true;
            };
            (slot.future.take(), slot.waker.clone(), slot.cancelled)
        };
        let Some(mut future) = future else {
            return true;
        };

        if cancelled {
            self.inner.tasks.borrow_mut().remove(&id);
            self.teardown(id, Termination::Cancelled, future);
            return true;
        }

        let mut ctx = Context::from_waker(&waker);
        let previous = self.inner.current.replace(Some(id));
        let poll = future.as_mut().poll(&mut ctx);
        self.inner.current.set(previous);

        match poll {
            Poll::Ready(()) => {
                self.inner.tasks.borrow_mut().remove(&id);
                log::debug!("task={id} finished at={:?}", self.now());
            }
            Poll::Pending => {
                let mut tasks = self.inner.tasks.borrow_mut();
                if let Some(slot) = tasks.get_mut(&id) {
                    slot.future = Some(future);
                } else {
                    // closed from within its own poll
                    drop(tasks);
                    self.teardown(id, Termination::Disposed, future);
                }
            }
        }

        true
    }

    fn advance_clock(&self) -> bool {
        let (deadline, due) = {
            let mut timers = self.inner.timers.borrow_mut();
            let Some(&(deadline, _)) = timers.keys().next() else {
                return false;
            };
            let mut due = vec![];
            while let Some(entry) = timers.first_entry() {
                if entry.key().0 > deadline {
                    break;
                }
                due.push(entry.remove());
            }
            (deadline, due)
        };

        log::debug!(
            "advance clock: {:?} -> {deadline:?} ({} timer(s) due)",
            self.now(),
            due.len()
        );
        self.inner.clock.set(deadline);
        for waker in due {
            waker.wake();
        }

        true
    }

    fn teardown(&self, id: Id, termination: Termination, future: LocalFuture) {
        log::debug!("teardown: task={id} termination={termination:?}");
        let previous_current = self.inner.current.replace(Some(id));
        let previous_termination = self.inner.termination.replace(termination);
        drop(future);
        self.inner.termination.set(previous_termination);
        self.inner.current.set(previous_current);
    }

    fn cancel(&self, id: Id) {
        let mut tasks = self.inner.tasks.borrow_mut();
        if let Some(slot) = tasks.get_mut(&id) {
            log::debug!("cancel: task={id}");
            slot.cancelled = true;
            push_unique(&self.inner.queue, id);
        }
    }

    fn dispose(&self, id: Id) {
        let slot = self.inner.tasks.borrow_mut().remove(&id);
        if let Some(future) = slot.and_then(|slot| slot.future) {
            self.teardown(id, Termination::Disposed, future);
        }
    }

    pub(crate) fn register_timer(&self, deadline: Duration, timer: Option<u64>, waker: &Waker) -> u64 {
        let timer = timer.unwrap_or_else(|| {
            let id = self.inner.next_timer_id.get();
            self.inner.next_timer_id.set(id + 1);
            id
        });
        self.inner
            .timers
            .borrow_mut()
            .entry((deadline, timer))
            .and_modify(|x| x.clone_from(waker))
            .or_insert_with(|| waker.clone());
        timer
    }

    pub(crate) fn cancel_timer(&self, deadline: Duration, timer: u64) {
        self.inner.timers.borrow_mut().remove(&(deadline, timer));
    }
}

/// Runs `f` against the runtime driving the current thread.
///
/// # Panics
///
/// * If no runtime is currently running
pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    assert!(RUNTIME.is_set(), "no simulation runtime is running");
    RUNTIME.with(f)
}

pub(crate) fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
    RUNTIME.is_set().then(|| RUNTIME.with(f))
}

/// Weak, cloneable reference to a [`Runtime`].
///
/// A handle never keeps its runtime alive; every operation on a handle whose
/// runtime is gone is a logged no-op.
#[derive(Debug, Clone)]
pub struct Handle {
    inner: Weak<Inner>,
}

impl Handle {
    /// # Panics
    ///
    /// * If no runtime is currently running
    #[must_use]
    pub fn current() -> Self {
        with(Runtime::handle)
    }

    #[must_use]
    pub fn try_current() -> Option<Self> {
        try_with(Runtime::handle)
    }

    pub(crate) const fn dangling() -> Self {
        Self { inner: Weak::new() }
    }

    fn runtime(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }

    pub fn spawn<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> JoinHandle<T> {
        self.runtime().map_or_else(
            || {
                log::warn!("spawn: runtime is gone, the task will never run");
                JoinHandle::orphaned()
            },
            |runtime| runtime.spawn(future),
        )
    }

    #[must_use]
    pub fn current_task(&self) -> Option<Id> {
        self.runtime().and_then(|x| x.current_task())
    }

    #[must_use]
    pub fn termination(&self) -> Termination {
        self.runtime()
            .map_or(Termination::Normal, |x| x.termination())
    }

    #[must_use]
    pub fn now(&self) -> Option<Duration> {
        self.runtime().map(|x| x.now())
    }

    pub(crate) fn cancel(&self, id: Id) {
        if let Some(runtime) = self.runtime() {
            runtime.cancel(id);
        }
    }

    pub(crate) fn dispose(&self, id: Id) {
        if let Some(runtime) = self.runtime() {
            runtime.dispose(id);
        }
    }
}
