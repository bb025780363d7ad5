//! Future types for the virtual clock.
//!
//! Timers never consult wall-clock time: a [`Sleep`] registers its deadline
//! with the runtime, which wakes it once every ready task has suspended and
//! the clock has been advanced far enough.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::future::FusedFuture;
use pin_project_lite::pin_project;

use crate::runtime;

/// A future that completes once the virtual clock reaches its deadline.
#[derive(Debug)]
pub struct Sleep {
    deadline: Option<Duration>,
    timer: Option<u64>,
    completed: bool,
}

impl Sleep {
    /// Sleeps for `duration` from the current virtual time. A duration that
    /// overflows the clock, such as [`Duration::MAX`], never completes.
    ///
    /// # Panics
    ///
    /// * If no runtime is currently running
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        let now = runtime::with(runtime::Runtime::now);
        Self::from_deadline(now.checked_add(duration))
    }

    #[must_use]
    pub fn until(deadline: Duration) -> Self {
        Self::from_deadline(Some(deadline))
    }

    fn from_deadline(deadline: Option<Duration>) -> Self {
        Self {
            deadline: deadline.filter(|x| *x != Duration::MAX),
            timer: None,
            completed: false,
        }
    }

    /// `None` when the sleep never completes.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(deadline) = this.deadline else {
            return Poll::Pending;
        };

        runtime::with(|runtime| {
            log::trace!(
                "Polling Sleep: now={:?} deadline={deadline:?}",
                runtime.now()
            );
            if runtime.now() >= deadline {
                if let Some(timer) = this.timer.take() {
                    runtime.cancel_timer(deadline, timer);
                }
                this.completed = true;
                return Poll::Ready(());
            }

            this.timer = Some(runtime.register_timer(deadline, this.timer, cx.waker()));
            Poll::Pending
        })
    }
}

impl FusedFuture for Sleep {
    fn is_terminated(&self) -> bool {
        self.completed
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let (Some(deadline), Some(timer)) = (self.deadline, self.timer.take()) {
            runtime::try_with(|runtime| runtime.cancel_timer(deadline, timer));
        }
    }
}

/// Suspends once without advancing the clock.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    #[must_use]
    pub const fn new() -> Self {
        Self { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Error returned when a timeout operation exceeds its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline has elapsed")]
pub struct Elapsed;

pin_project! {
    /// A future that wraps another future with a virtual-time timeout.
    ///
    /// The inner future is polled first, so a future that becomes ready at
    /// exactly the deadline still wins.
    #[derive(Debug)]
    pub struct Timeout<F> {
        #[pin]
        future: F,
        #[pin]
        sleep: Sleep,
    }
}

impl<F> Timeout<F> {
    /// # Panics
    ///
    /// * If no runtime is currently running
    #[must_use]
    pub fn new(duration: Duration, future: F) -> Self {
        Self {
            future,
            sleep: Sleep::new(duration),
        }
    }

    /// Consumes the `Timeout` and returns the inner future.
    pub fn into_inner(self) -> F {
        self.future
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }

        if this.sleep.poll(cx).is_ready() {
            return Poll::Ready(Err(Elapsed));
        }

        Poll::Pending
    }
}

impl<F: FusedFuture> FusedFuture for Timeout<F> {
    fn is_terminated(&self) -> bool {
        self.future.is_terminated() || self.sleep.is_terminated()
    }
}
