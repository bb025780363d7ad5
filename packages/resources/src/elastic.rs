use std::{
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{
    Error, Result,
    borrow::Borrow,
    conserved::ConservedResources,
    pool::Pool,
    scheduler::Scheduler,
    tracked::WaitFor,
    vector::{Amount, Vector},
};

/// Supply of named resources whose capacity can change during a run.
///
/// Borrowing behaves exactly as for [`ConservedResources`]. Raising the
/// capacity makes the new amounts available at once. Lowering it takes
/// effect on the capacity immediately, while the amounts only leave the
/// pool once enough of them has been returned by borrowers.
#[derive(Debug)]
pub struct ElasticResources<T: Amount + 'static> {
    resources: ConservedResources<T>,
}

impl<T: Amount + 'static> Clone for ElasticResources<T> {
    fn clone(&self) -> Self {
        Self {
            resources: self.resources.clone(),
        }
    }
}

impl<T: Amount + 'static> ElasticResources<T> {
    /// # Errors
    ///
    /// * Same as [`ConservedResources::new`]
    pub fn new(
        scheduler: impl Scheduler + 'static,
        capacity: impl Into<Vector<T>>,
    ) -> Result<Self> {
        Ok(Self {
            resources: ConservedResources::new(scheduler, capacity)?,
        })
    }

    /// # Errors
    ///
    /// * Same as [`ConservedResources::borrow`]
    pub fn borrow(&self, amounts: impl Into<Vector<T>>) -> Result<Borrow<T>> {
        self.resources.borrow(amounts)
    }

    #[must_use]
    pub fn capacity(&self) -> Vector<T> {
        self.resources.capacity()
    }

    #[must_use]
    pub fn available(&self) -> Vector<T> {
        self.resources.available()
    }

    fn pool(&self) -> &Rc<Pool<T>> {
        self.resources.pool()
    }

    /// Raises capacity and availability by `amounts`. Never blocks.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingAmounts`] if `amounts` is empty
    /// * [`Error::UnknownResource`] or [`Error::NegativeAmount`] for an
    ///   invalid entry
    ///
    /// # Panics
    ///
    /// * In debug builds, if the new capacity overflows `T`
    pub fn increase(&self, amounts: impl Into<Vector<T>>) -> Result<()> {
        let amounts = amounts.into();
        self.pool().validate("increase", &amounts, true)?;
        self.pool().grow(&amounts);
        Ok(())
    }

    /// Lowers capacity by `amounts` right away and returns a future that
    /// takes the same amounts out of the pool once they are available.
    ///
    /// Dropping the future before it completes restores the capacity.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingAmounts`] if `amounts` is empty
    /// * [`Error::UnknownResource`] or [`Error::NegativeAmount`] for an
    ///   invalid entry
    /// * [`Error::CapacityUnderflow`] if capacity would drop below zero
    pub fn decrease(&self, amounts: impl Into<Vector<T>>) -> Result<Decrease<T>> {
        let amounts = amounts.into();
        let pool = self.pool();
        pool.validate("decrease", &amounts, true)?;
        if let Some(name) = pool
            .capacity()
            .violation(&amounts, |capacity, amount| capacity >= amount)
        {
            return Err(Error::CapacityUnderflow {
                name: name.to_string(),
            });
        }

        Ok(Decrease::new(pool.clone(), amounts, Vector::new()))
    }

    /// Moves capacity to `amounts`, increasing and decreasing per resource
    /// as needed. Resources not named keep their capacity.
    ///
    /// The lowered capacities apply immediately, as for
    /// [`decrease`](Self::decrease). The raised ones apply together with the
    /// removal of the lowered amounts, once the returned future completes.
    /// Without anything to lower, the whole change applies before `set`
    /// returns. Dropping the future before it completes leaves the pool
    /// as it was.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingAmounts`] if `amounts` is empty
    /// * [`Error::UnknownResource`] or [`Error::NegativeAmount`] for an
    ///   invalid entry
    ///
    /// # Panics
    ///
    /// * In debug builds, if a raised capacity overflows `T`
    pub fn set(&self, amounts: impl Into<Vector<T>>) -> Result<Decrease<T>> {
        let target = amounts.into();
        let pool = self.pool();
        pool.validate("set", &target, true)?;

        let capacity = pool.capacity();
        let mut up = Vector::new();
        let mut down = Vector::new();
        for (name, amount) in &target {
            let current = capacity.get(name);
            if amount > current {
                up.insert(name, amount - current);
            } else if amount < current {
                down.insert(name, current - amount);
            }
        }
        log::debug!("set: target={target} up={up} down={down}");

        if down.is_empty() {
            if !up.is_empty() {
                pool.grow(&up);
            }
            return Ok(Decrease::new(pool.clone(), down, Vector::new()));
        }
        Ok(Decrease::new(pool.clone(), down, up))
    }
}

/// A pending capacity decrease, see [`ElasticResources::decrease`].
#[must_use = "the capacity is restored if the decrease is dropped before completing"]
pub struct Decrease<T: Amount + 'static> {
    pool: Rc<Pool<T>>,
    amounts: Vector<T>,
    /// Increases of a [`set`](ElasticResources::set) held back until the
    /// decrease commits.
    growth: Vector<T>,
    wait: WaitFor<Vector<T>>,
    done: bool,
}

impl<T: Amount + 'static> Decrease<T> {
    fn new(pool: Rc<Pool<T>>, amounts: Vector<T>, growth: Vector<T>) -> Self {
        pool.begin_shrink(&amounts);
        Self {
            wait: pool.wait_available(&amounts),
            pool,
            amounts,
            growth,
            done: false,
        }
    }
}

impl<T: Amount + 'static> fmt::Debug for Decrease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decrease")
            .field("amounts", &self.amounts)
            .field("growth", &self.growth)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T: Amount + 'static> Future for Decrease<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Ready(());
        }
        if Pin::new(&mut self.wait).poll(cx).is_pending() {
            return Poll::Pending;
        }

        self.done = true;
        self.pool.commit_shrink(&self.amounts);
        if !self.growth.is_empty() {
            self.pool.grow(&self.growth);
        }
        Poll::Ready(())
    }
}

impl<T: Amount + 'static> Drop for Decrease<T> {
    fn drop(&mut self) {
        if !self.done {
            self.pool.abandon_shrink(&self.amounts);
        }
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

    use super::*;

    fn levels(a: i64, b: i64) -> Vector<i64> {
        Vector::from([("a", a), ("b", b)])
    }

    #[test_log::test]
    fn increase_raises_capacity_and_availability() {
        let runtime = Runtime::new();
        let pool = ElasticResources::new(runtime.handle(), levels(10, 10)).unwrap();

        pool.increase([("a", 5)]).unwrap();

        assert_eq!(pool.capacity(), levels(15, 10));
        assert_eq!(pool.available(), levels(15, 10));
    }

    #[test_log::test]
    fn capacity_changes_validate_amounts() {
        let runtime = Runtime::new();
        let pool = ElasticResources::new(runtime.handle(), levels(10, 10)).unwrap();

        assert_eq!(
            pool.increase(Vector::new()).unwrap_err(),
            Error::MissingAmounts {
                operation: "increase"
            }
        );
        assert_eq!(
            pool.increase([("a", -1)]).unwrap_err(),
            Error::NegativeAmount {
                operation: "increase",
                name: "a".to_string()
            }
        );
        assert_eq!(
            pool.decrease([("b", 11)]).unwrap_err(),
            Error::CapacityUnderflow {
                name: "b".to_string()
            }
        );
        assert_eq!(
            pool.decrease([("a", -1)]).unwrap_err(),
            Error::NegativeAmount {
                operation: "decrease",
                name: "a".to_string()
            }
        );
        assert_eq!(
            pool.set([("a", 5), ("b", -1)]).unwrap_err(),
            Error::NegativeAmount {
                operation: "set",
                name: "b".to_string()
            }
        );
        assert_eq!(
            pool.set([("c", 1)]).unwrap_err(),
            Error::UnknownResource {
                operation: "set",
                name: "c".to_string()
            }
        );
        assert_eq!(pool.capacity(), levels(10, 10));
    }

    #[test_log::test]
    fn decrease_completes_immediately_when_unborrowed() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();
            pool.decrease([("a", 10)]).unwrap().await;
            assert_eq!(pool.capacity(), levels(0, 10));
            assert_eq!(pool.available(), levels(0, 10));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn decrease_waits_for_returned_amounts() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();
            let holder = task::spawn({
                let pool = pool.clone();
                async move {
                    let _held = pool.borrow(levels(8, 8)).unwrap().await;
                    time::sleep(Duration::from_secs(10)).await;
                }
            });
            task::yield_now().await;

            let decrease = pool.decrease(levels(5, 0)).unwrap();
            assert_eq!(pool.capacity(), levels(5, 10));
            assert_eq!(
                pool.borrow(levels(6, 0)).unwrap_err(),
                Error::CapacityExceeded {
                    name: "a".to_string()
                }
            );

            decrease.await;
            assert_eq!(time::now(), Duration::from_secs(10));
            assert_eq!(pool.available(), levels(5, 10));
            holder.await.unwrap();
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn dropped_decrease_restores_capacity() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();
            let _held = pool.borrow(levels(10, 10)).unwrap().await;

            let decrease = pool.decrease(levels(4, 4)).unwrap();
            assert_eq!(pool.capacity(), levels(6, 6));
            let result = time::timeout(Duration::from_secs(1), decrease).await;
            assert!(result.is_err());
            assert_eq!(pool.capacity(), levels(10, 10));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn set_moves_each_resource_towards_target() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();

            pool.set([("a", 15), ("b", 4)]).unwrap().await;
            assert_eq!(pool.capacity(), levels(15, 4));
            assert_eq!(pool.available(), levels(15, 4));

            pool.set([("b", 4)]).unwrap().await;
            assert_eq!(pool.capacity(), levels(15, 4));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn cancelled_set_changes_nothing() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();
            let _held = pool.borrow(levels(10, 10)).unwrap().await;

            let set = pool.set([("a", 15), ("b", 4)]).unwrap();
            assert_eq!(pool.capacity(), levels(10, 4));
            assert_eq!(pool.available(), levels(0, 0));

            let result = time::timeout(Duration::from_secs(1), set).await;
            assert!(result.is_err());
            assert_eq!(pool.capacity(), levels(10, 10));
            assert_eq!(pool.available(), levels(0, 0));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn pending_set_raises_capacity_once_lowered_amounts_return() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let pool = ElasticResources::new(Handle::current(), levels(10, 10)).unwrap();
            let holder = task::spawn({
                let pool = pool.clone();
                async move {
                    let _held = pool.borrow(levels(10, 10)).unwrap().await;
                    time::sleep(Duration::from_secs(10)).await;
                }
            });
            task::yield_now().await;

            pool.set([("a", 15), ("b", 4)]).unwrap().await;
            assert_eq!(time::now(), Duration::from_secs(10));
            assert_eq!(pool.capacity(), levels(15, 4));
            assert_eq!(pool.available(), levels(15, 4));
            holder.await.unwrap();
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn set_without_lowering_applies_before_returning() {
        let runtime = Runtime::new();
        let pool = ElasticResources::new(runtime.handle(), levels(10, 10)).unwrap();

        drop(pool.set([("a", 12)]).unwrap());

        assert_eq!(pool.capacity(), levels(12, 10));
        assert_eq!(pool.available(), levels(12, 10));
    }

    #[cfg(debug_assertions)]
    #[test_log::test]
    #[should_panic(expected = "overflow")]
    fn increase_past_the_amount_type_panics() {
        let runtime = Runtime::new();
        let pool = ElasticResources::new(runtime.handle(), [("a", i64::MAX)]).unwrap();

        pool.increase([("a", 1)]).unwrap();
    }
}
