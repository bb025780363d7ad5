use std::{cell::RefCell, collections::BTreeSet, fmt, rc::Rc};

use simres_async::task::Termination;

use crate::{
    Error, Result,
    scheduler::Scheduler,
    tracked::{Condition, Tracked, WaitFor},
    vector::{Amount, Vector},
};

/// Book-keeping shared by every pool flavour.
///
/// `available` is the only monitored value; capacity changes of elastic
/// pools are mirrored onto it so waiters are woken by the same `set`.
pub(crate) struct Pool<T> {
    names: BTreeSet<String>,
    zero: Vector<T>,
    capacity: RefCell<Vector<T>>,
    shrinking: RefCell<Vector<T>>,
    available: Tracked<Vector<T>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T: Amount + 'static> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &*self.capacity.borrow())
            .field("available", &self.available.read())
            .field("waiters", &self.available.pending())
            .finish_non_exhaustive()
    }
}

impl<T: Amount + 'static> Pool<T> {
    /// # Errors
    ///
    /// * [`Error::MissingAmounts`] if `capacity` names no resource
    /// * [`Error::NonPositiveCapacity`] if any capacity is not above zero
    pub fn new(scheduler: Rc<dyn Scheduler>, capacity: Vector<T>) -> Result<Self> {
        if capacity.is_empty() {
            return Err(Error::MissingAmounts { operation: "new" });
        }
        let zero = capacity.zero_like();
        if let Some(name) = capacity.violation(&zero, |have, zero| have > zero) {
            return Err(Error::NonPositiveCapacity {
                name: name.to_string(),
            });
        }

        Ok(Self::new_unchecked(scheduler, capacity))
    }

    pub fn new_unchecked(scheduler: Rc<dyn Scheduler>, capacity: Vector<T>) -> Self {
        log::debug!("pool: created capacity={capacity}");
        Self {
            names: capacity.names().map(str::to_string).collect(),
            zero: capacity.zero_like(),
            shrinking: RefCell::new(capacity.zero_like()),
            available: Tracked::new(capacity.clone()),
            capacity: RefCell::new(capacity),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.scheduler
    }

    pub fn capacity(&self) -> Vector<T> {
        self.capacity.borrow().clone()
    }

    pub fn available(&self) -> Vector<T> {
        self.available.read()
    }

    /// Checks that `amounts` only names known resources and asks for
    /// nothing negative.
    pub fn validate(&self, operation: &'static str, amounts: &Vector<T>, required: bool) -> Result<()> {
        if required && amounts.is_empty() {
            return Err(Error::MissingAmounts { operation });
        }
        if let Some(name) = amounts.names().find(|name| !self.names.contains(*name)) {
            return Err(Error::UnknownResource {
                operation,
                name: name.to_string(),
            });
        }
        if let Some(name) = self.zero.violation(amounts, |zero, amount| amount >= zero) {
            return Err(Error::NegativeAmount {
                operation,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn check_capacity(&self, amounts: &Vector<T>) -> Result<()> {
        match self
            .capacity
            .borrow()
            .violation(amounts, |capacity, amount| capacity >= amount)
        {
            Some(name) => Err(Error::CapacityExceeded {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Resolves once at least `amounts` is available.
    pub fn wait_available(&self, amounts: &Vector<T>) -> WaitFor<Vector<T>> {
        self.available
            .wait_for(Condition::AtLeast(amounts.clone()))
    }

    pub fn insert(&self, amounts: &Vector<T>) {
        let woken = self.available.update(|x| x + amounts);
        log::debug!(
            "pool: inserted {amounts}, available={} woken={woken}",
            self.available.read()
        );
        self.check_invariant();
    }

    /// Takes `amounts` out of the pool. Only valid right after
    /// [`wait_available`](Self::wait_available) resolved for them.
    pub fn remove(&self, amounts: &Vector<T>) {
        self.available.update(|x| x - amounts);
        log::debug!(
            "pool: removed {amounts}, available={}",
            self.available.read()
        );
        self.check_invariant();
    }

    /// Returns `amounts` to the pool. During a [`Termination::Disposed`]
    /// teardown the insert is handed to a detached activity instead.
    pub fn give_back(self: &Rc<Self>, amounts: Vector<T>) {
        if self.scheduler.termination() == Termination::Disposed {
            log::debug!("pool: disposed holder, releasing {amounts} from a detached activity");
            let pool = self.clone();
            self.scheduler
                .spawn_detached(Box::pin(async move { pool.insert(&amounts) }));
        } else {
            self.insert(&amounts);
        }
    }

    pub fn grow(&self, amounts: &Vector<T>) {
        let capacity = &*self.capacity.borrow() + amounts;
        log::debug!("pool: capacity raised to {capacity}");
        *self.capacity.borrow_mut() = capacity;
        self.insert(amounts);
    }

    /// Lowers the capacity right away. The matching amounts leave
    /// `available` through [`commit_shrink`](Self::commit_shrink).
    pub fn begin_shrink(&self, amounts: &Vector<T>) {
        let capacity = &*self.capacity.borrow() - amounts;
        log::debug!("pool: capacity lowered to {capacity}");
        *self.capacity.borrow_mut() = capacity;
        let shrinking = &*self.shrinking.borrow() + amounts;
        *self.shrinking.borrow_mut() = shrinking;
    }

    pub fn commit_shrink(&self, amounts: &Vector<T>) {
        let shrinking = &*self.shrinking.borrow() - amounts;
        *self.shrinking.borrow_mut() = shrinking;
        self.remove(amounts);
    }

    pub fn abandon_shrink(&self, amounts: &Vector<T>) {
        let shrinking = &*self.shrinking.borrow() - amounts;
        *self.shrinking.borrow_mut() = shrinking;
        let capacity = &*self.capacity.borrow() + amounts;
        log::debug!("pool: decrease abandoned, capacity restored to {capacity}");
        *self.capacity.borrow_mut() = capacity;
        self.check_invariant();
    }

    fn check_invariant(&self) {
        let available = self.available.read();
        debug_assert!(
            available.ge(&self.zero),
            "available {available} dropped below zero"
        );
        debug_assert!(
            available.le(&(&*self.capacity.borrow() + &*self.shrinking.borrow())),
            "available {available} exceeds capacity {}",
            self.capacity.borrow()
        );
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use simres_async::runtime::Runtime;

    use super::*;

    fn pool(capacity: Vector<i64>) -> Result<Pool<i64>> {
        Pool::new(Rc::new(Runtime::new().handle()), capacity)
    }

    #[test_log::test]
    fn empty_configuration_is_rejected() {
        assert_eq!(
            pool(Vector::new()).unwrap_err(),
            Error::MissingAmounts { operation: "new" }
        );
    }

    #[test_log::test]
    fn capacity_must_be_positive() {
        assert_eq!(
            pool(Vector::from([("a", 1), ("b", 0)])).unwrap_err(),
            Error::NonPositiveCapacity {
                name: "b".to_string()
            }
        );
        assert!(pool(Vector::from([("a", -3)])).is_err());
    }

    #[test_log::test]
    fn validate_reports_unknown_before_negative() {
        let pool = pool(Vector::from([("a", 10)])).unwrap();

        assert_eq!(
            pool.validate("borrow", &Vector::from([("a", -1), ("z", 1)]), false),
            Err(Error::UnknownResource {
                operation: "borrow",
                name: "z".to_string()
            })
        );
        assert_eq!(
            pool.validate("borrow", &Vector::from([("a", -1)]), false),
            Err(Error::NegativeAmount {
                operation: "borrow",
                name: "a".to_string()
            })
        );
        assert_eq!(pool.validate("borrow", &Vector::new(), false), Ok(()));
        assert_eq!(
            pool.validate("increase", &Vector::new(), true),
            Err(Error::MissingAmounts {
                operation: "increase"
            })
        );
    }

    #[test_log::test]
    fn shrink_round_trip_restores_capacity() {
        let pool = pool(Vector::from([("a", 10)])).unwrap();

        pool.begin_shrink(&Vector::from([("a", 4)]));
        assert_eq!(pool.capacity(), Vector::from([("a", 6)]));
        assert_eq!(pool.available(), Vector::from([("a", 10)]));

        pool.abandon_shrink(&Vector::from([("a", 4)]));
        assert_eq!(pool.capacity(), Vector::from([("a", 10)]));

        pool.begin_shrink(&Vector::from([("a", 4)]));
        pool.commit_shrink(&Vector::from([("a", 4)]));
        assert_eq!(pool.capacity(), Vector::from([("a", 6)]));
        assert_eq!(pool.available(), Vector::from([("a", 6)]));
    }
}
