use std::rc::Rc;

use crate::{
    Result,
    borrow::Borrow,
    pool::Pool,
    scheduler::Scheduler,
    vector::{Amount, Vector},
};

/// Fixed supply of named resources which can be temporarily borrowed.
///
/// Individual units of a resource are indistinguishable; there is merely
/// an amount of each. Requests are granted as soon as enough is available,
/// in whatever order that happens, so a small request is never held back
/// by a larger one that does not fit yet.
#[derive(Debug)]
pub struct ConservedResources<T: Amount + 'static> {
    pool: Rc<Pool<T>>,
}

impl<T: Amount + 'static> Clone for ConservedResources<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<T: Amount + 'static> ConservedResources<T> {
    /// Creates a pool with the given resource names and capacities.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingAmounts`](crate::Error::MissingAmounts) if
    ///   `capacity` is empty
    /// * [`Error::NonPositiveCapacity`](crate::Error::NonPositiveCapacity) if
    ///   any capacity is not greater than zero
    pub fn new(
        scheduler: impl Scheduler + 'static,
        capacity: impl Into<Vector<T>>,
    ) -> Result<Self> {
        Ok(Self {
            pool: Rc::new(Pool::new(Rc::new(scheduler), capacity.into())?),
        })
    }

    pub(crate) const fn pool(&self) -> &Rc<Pool<T>> {
        &self.pool
    }

    /// Requests `amounts`. Unnamed resources are not borrowed at all.
    ///
    /// # Errors
    ///
    /// * [`Error::UnknownResource`](crate::Error::UnknownResource) for a name
    ///   the pool was not created with
    /// * [`Error::NegativeAmount`](crate::Error::NegativeAmount) for an amount
    ///   below zero
    /// * [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) if the
    ///   request could never be satisfied
    pub fn borrow(&self, amounts: impl Into<Vector<T>>) -> Result<Borrow<T>> {
        let amounts = amounts.into();
        self.pool.validate("borrow", &amounts, false)?;
        self.pool.check_capacity(&amounts)?;
        log::trace!("borrow: requesting {amounts}");
        Ok(Borrow::new(self.pool.clone(), amounts))
    }

    #[must_use]
    pub fn capacity(&self) -> Vector<T> {
        self.pool.capacity()
    }

    #[must_use]
    pub fn available(&self) -> Vector<T> {
        self.pool.available()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use simres_async::{
        runtime::{Handle, Runtime},
        task, time,
    };

    use crate::{Error, Vector};

    use super::*;

    fn levels(a: i64, b: i64) -> Vector<i64> {
        Vector::from([("a", a), ("b", b)])
    }

    #[test_log::test]
    fn misuse_is_reported_without_touching_availability() {
        let runtime = Runtime::new();
        let pool = ConservedResources::new(runtime.handle(), levels(10, 10)).unwrap();

        assert_eq!(
            pool.borrow([("c", 1)]).unwrap_err(),
            Error::UnknownResource {
                operation: "borrow",
                name: "c".to_string()
            }
        );
        assert_eq!(
            pool.borrow([("a", -1)]).unwrap_err(),
            Error::NegativeAmount {
                operation: "borrow",
                name: "a".to_string()
            }
        );
        assert_eq!(
            pool.borrow(levels(11, 1)).unwrap_err(),
            Error::CapacityExceeded {
                name: "a".to_string()
            }
        );
        assert_eq!(pool.available(), levels(10, 10));
    }

    #[test_log::test]
    fn empty_borrow_never_blocks() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ConservedResources::new(Handle::current(), levels(10, 10)).unwrap();
            let _all = pool.borrow(levels(10, 10)).unwrap().await;
            let nothing = pool.borrow(Vector::new()).unwrap().await;
            assert!(nothing.amounts().is_empty());
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn borrowed_amounts_return_on_drop() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ConservedResources::new(Handle::current(), levels(10, 10)).unwrap();
            {
                let borrowed = pool.borrow([("a", 6)]).unwrap().await;
                assert_eq!(borrowed.amounts(), &Vector::from([("a", 6)]));
                assert_eq!(pool.available(), levels(4, 10));
            }
            assert_eq!(pool.available(), levels(10, 10));

            let borrowed = pool.borrow([("b", 3)]).unwrap().await;
            borrowed.release();
            assert_eq!(pool.available(), levels(10, 10));
            assert_eq!(pool.capacity(), levels(10, 10));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn nested_borrows_share_the_pool() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ConservedResources::new(Handle::current(), levels(10, 10)).unwrap();
            let _outer = pool.borrow(levels(5, 5)).unwrap().await;
            let _inner = pool.borrow(levels(5, 5)).unwrap().await;
            assert_eq!(pool.available(), levels(0, 0));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn waiter_acquires_once_amounts_are_returned() {
        let runtime = Runtime::new();

        let acquired_at = runtime.block_on(async {
            let pool = ConservedResources::new(Handle::current(), levels(10, 10)).unwrap();
            task::spawn({
                let pool = pool.clone();
                async move {
                    let _held = pool.borrow(levels(8, 0)).unwrap().await;
                    time::sleep(Duration::from_secs(5)).await;
                }
            });
            task::yield_now().await;

            let _borrowed = pool.borrow(levels(5, 5)).unwrap().await;
            time::now()
        });

        assert_eq!(acquired_at, Duration::from_secs(5));
        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn float_amounts_are_supported() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool =
                ConservedResources::new(Handle::current(), [("cores", 8.0), ("memory", 2.5)])
                    .unwrap();
            let _borrowed = pool.borrow([("memory", 0.5)]).unwrap().await;
            assert_eq!(
                pool.available(),
                Vector::from([("cores", 8.0), ("memory", 2.0)])
            );
        });

        runtime.wait().unwrap();
    }
}
