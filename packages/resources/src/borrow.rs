//! Scoped acquisition of pool resources.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use simres::ConservedResources;
//! use simres_async::{runtime::{Builder, Handle}, time};
//!
//! let runtime = Builder::new().build().unwrap();
//!
//! runtime.block_on(async {
//!     let pool = ConservedResources::new(Handle::current(), [("cores", 8), ("memory", 16)]).unwrap();
//!
//!     let borrowed = pool.borrow([("cores", 2)]).unwrap().await;
//!     assert_eq!(pool.available().get("cores"), 6);
//!     time::sleep(Duration::from_secs(1)).await;
//!     drop(borrowed);
//!
//!     assert_eq!(pool.available().get("cores"), 8);
//! });
//! ```

use std::{
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{
    pool::Pool,
    tracked::WaitFor,
    vector::{Amount, Vector},
};

/// A validated request, not yet acquired. Awaiting it waits until the
/// amounts are available and takes them.
#[must_use = "nothing is borrowed until the request is awaited"]
pub struct Borrow<T: Amount + 'static> {
    pool: Rc<Pool<T>>,
    requested: Vector<T>,
}

impl<T: Amount + 'static> Borrow<T> {
    pub(crate) const fn new(pool: Rc<Pool<T>>, requested: Vector<T>) -> Self {
        Self { pool, requested }
    }

    #[must_use]
    pub const fn requested(&self) -> &Vector<T> {
        &self.requested
    }
}

impl<T: Amount + 'static> fmt::Debug for Borrow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrow")
            .field("requested", &self.requested)
            .finish_non_exhaustive()
    }
}

impl<T: Amount + 'static> IntoFuture for Borrow<T> {
    type Output = Borrowed<T>;
    type IntoFuture = Acquire<T>;

    fn into_future(self) -> Self::IntoFuture {
        Acquire {
            wait: self.pool.wait_available(&self.requested),
            pool: self.pool,
            requested: Some(self.requested),
        }
    }
}

/// Future returned by awaiting a [`Borrow`].
///
/// Dropping it before completion leaves the pool untouched.
#[must_use = "futures do nothing unless polled"]
pub struct Acquire<T: Amount + 'static> {
    pool: Rc<Pool<T>>,
    requested: Option<Vector<T>>,
    wait: WaitFor<Vector<T>>,
}

impl<T: Amount + 'static> fmt::Debug for Acquire<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("requested", &self.requested)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<T: Amount + 'static> Future for Acquire<T> {
    type Output = Borrowed<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if Pin::new(&mut self.wait).poll(cx).is_pending() {
            return Poll::Pending;
        }

        let Some(requested) = self.requested.take() else {
            panic!("`Acquire` polled after completion");
        };
        self.pool.remove(&requested);
        Poll::Ready(Borrowed {
            pool: self.pool.clone(),
            amounts: Some(requested),
        })
    }
}

/// Amounts currently held from a pool, returned when dropped.
///
/// If the holding task is disposed without a chance to run again, the
/// amounts are returned by a detached activity on the pool's scheduler.
#[must_use = "dropping a `Borrowed` returns its amounts immediately"]
pub struct Borrowed<T: Amount + 'static> {
    pool: Rc<Pool<T>>,
    amounts: Option<Vector<T>>,
}

impl<T: Amount + 'static> Borrowed<T> {
    /// # Panics
    ///
    /// * If the amounts were already returned, which cannot happen outside
    ///   of `Drop`
    #[must_use]
    pub fn amounts(&self) -> &Vector<T> {
        self.amounts
            .as_ref()
            .unwrap_or_else(|| unreachable!("borrowed amounts already returned"))
    }

    /// Returns the amounts now. Equivalent to dropping `self`.
    pub fn release(mut self) {
        if let Some(amounts) = self.amounts.take() {
            self.pool.insert(&amounts);
        }
    }
}

impl<T: Amount + 'static> fmt::Debug for Borrowed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("amounts", &self.amounts)
            .finish_non_exhaustive()
    }
}

impl<T: Amount + 'static> Drop for Borrowed<T> {
    fn drop(&mut self) {
        if let Some(amounts) = self.amounts.take() {
            self.pool.give_back(amounts);
        }
    }
}
