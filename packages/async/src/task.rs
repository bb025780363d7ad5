//! Task identity, spawning and teardown.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;

use crate::{
    futures::YieldNow,
    runtime::{self, Handle},
};

/// Stable identity of a task within its runtime. Ids start at `1` and are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub(crate) u64);

impl Id {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a task's future is being dropped.
///
/// Destructors that need to react to their task going away (for example to
/// give back borrowed resources) read the mode through [`termination`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Termination {
    /// No teardown in progress: values are dropped on ordinary scope exit.
    #[default]
    Normal,
    /// The task was cancelled through [`JoinHandle::cancel`] and is torn down
    /// at its next scheduling step.
    Cancelled,
    /// The task was closed through [`JoinHandle::close`]: its future is
    /// dropped on the spot, from within whichever task requested it. Nothing
    /// dropped in this mode may rely on running again.
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task {id} was torn down before it completed")]
pub struct JoinError {
    id: Id,
}

impl JoinError {
    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }
}

/// Owned permission to await, cancel or close a spawned task.
///
/// Dropping a `JoinHandle` detaches the task; it keeps running.
pub struct JoinHandle<T> {
    id: Id,
    rx: oneshot::Receiver<T>,
    result: Option<Result<T, JoinError>>,
    handle: Handle,
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

// `result` is never pinned
impl<T> Unpin for JoinHandle<T> {}

impl<T> JoinHandle<T> {
    pub(crate) const fn new(id: Id, rx: oneshot::Receiver<T>, handle: Handle) -> Self {
        Self {
            id,
            rx,
            result: None,
            handle,
        }
    }

    pub(crate) fn orphaned() -> Self {
        let (_, rx) = oneshot::channel();
        Self::new(Id(0), rx, Handle::dangling())
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    pub fn is_finished(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }

        match self.rx.try_recv() {
            Ok(Some(x)) => {
                self.result = Some(Ok(x));
                true
            }
            Ok(None) => false,
            Err(oneshot::Canceled) => {
                self.result = Some(Err(JoinError { id: self.id }));
                true
            }
        }
    }

    /// Requests ordinary cancellation: the task is torn down with
    /// [`Termination::Cancelled`] the next time the scheduler reaches it.
    pub fn cancel(&self) {
        self.handle.cancel(self.id);
    }

    /// Forcibly disposes of the task: its future is dropped before this call
    /// returns, with [`Termination::Disposed`].
    pub fn close(&self) {
        self.handle.dispose(self.id);
    }

    pub(crate) fn try_take(&mut self) -> Option<Result<T, JoinError>> {
        if self.is_finished() {
            self.result.take()
        } else {
            None
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.result.take() {
            return Poll::Ready(result);
        }

        let id = self.id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(x) => Poll::Ready(x.map_err(|_| JoinError { id })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawns `future` onto the runtime driving the current thread.
///
/// # Panics
///
/// * If no runtime is currently running
pub fn spawn<T: 'static>(future: impl Future<Output = T> + 'static) -> JoinHandle<T> {
    runtime::with(|runtime| runtime.spawn(future))
}

/// Identity of the task currently being polled, if any.
#[must_use]
pub fn current() -> Option<Id> {
    runtime::try_with(runtime::Runtime::current_task).flatten()
}

/// Teardown mode in progress on the current thread.
#[must_use]
pub fn termination() -> Termination {
    runtime::try_with(runtime::Runtime::termination).unwrap_or_default()
}

/// Suspends the current task once, letting every other ready task run
/// before it resumes at the same virtual time.
#[must_use]
pub const fn yield_now() -> YieldNow {
    YieldNow::new()
}
