//! Reentrant mutual exclusion between simulated tasks.
//!
//! A [`Lock`] is a pool of a single unit plus the identity of the task
//! holding it. The holder may acquire it again without blocking; the unit
//! returns to the pool once every [`LockGuard`] of the holder is dropped.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use simres_async::task::Id;

use crate::{
    Error, Result,
    pool::Pool,
    scheduler::Scheduler,
    vector::Vector,
};

const UNIT: &str = "lock";

struct Inner {
    pool: Rc<Pool<u32>>,
    owners: RefCell<HashMap<Id, usize>>,
}

#[derive(Clone)]
pub struct Lock {
    inner: Rc<Inner>,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("owner", &self.owner())
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

fn unit() -> Vector<u32> {
    Vector::from([(UNIT, 1)])
}

impl Lock {
    #[must_use]
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                pool: Rc::new(Pool::new_unchecked(Rc::new(scheduler), unit())),
                owners: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Acquires the lock for the current task, waiting while another task
    /// holds it. A task that already holds the lock acquires it again
    /// immediately.
    ///
    /// # Errors
    ///
    /// * [`Error::Usage`] if called outside of a task
    pub async fn acquire(&self) -> Result<LockGuard> {
        let Some(task) = self.inner.pool.scheduler().current_task() else {
            return Err(Error::Usage("lock acquired outside of a task"));
        };

        if let Some(depth) = self.inner.owners.borrow_mut().get_mut(&task) {
            *depth += 1;
            log::debug!("lock: task={task} reentered depth={depth}");
            return Ok(self.guard(task));
        }

        self.inner.pool.wait_available(&unit()).await;
        self.inner.pool.remove(&unit());
        self.inner.owners.borrow_mut().insert(task, 1);
        log::debug!("lock: task={task} acquired");

        Ok(self.guard(task))
    }

    fn guard(&self, owner: Id) -> LockGuard {
        LockGuard {
            lock: self.clone(),
            owner,
        }
    }

    /// Whether no task holds the lock.
    #[must_use]
    pub fn available(&self) -> bool {
        self.inner.pool.available().get(UNIT) > 0
    }

    #[must_use]
    pub fn owner(&self) -> Option<Id> {
        self.inner.owners.borrow().keys().next().copied()
    }

    /// How many guards the holder currently has, `0` when free.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.owners.borrow().values().sum()
    }
}

/// Proof of holding a [`Lock`]. Dropping the last guard of the holder
/// releases it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock: Lock,
    owner: Id,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let inner = &self.lock.inner;
        let released = {
            let mut owners = inner.owners.borrow_mut();
            let Some(depth) = owners.get_mut(&self.owner) else {
                log::warn!("lock: guard of task={} outlived its ownership", self.owner);
                return;
            };
            *depth -= 1;
            if *depth == 0 {
                owners.remove(&self.owner);
                true
            } else {
                false
            }
        };

        if released {
            log::debug!("lock: task={} released", self.owner);
            inner.pool.give_back(unit());
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

    #[test_log::test]
    fn reentry_does_not_block() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let lock = Lock::new(Handle::current());
            let outer = lock.acquire().await.unwrap();
            let inner = lock.acquire().await.unwrap();
            assert_eq!(lock.depth(), 2);
            assert_eq!(lock.owner(), task::current());

            drop(inner);
            assert!(!lock.available());
            drop(outer);
            assert!(lock.available());
            assert_eq!(lock.owner(), None);
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn contended_lock_is_handed_over_on_release() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let lock = Lock::new(Handle::current());
            let holder = task::spawn({
                let lock = lock.clone();
                async move {
                    let _guard = lock.acquire().await.unwrap();
                    time::sleep(Duration::from_secs(5)).await;
                }
            });
            task::yield_now().await;
            assert_eq!(lock.owner(), Some(holder.id()));

            let _guard = lock.acquire().await.unwrap();
            assert_eq!(time::now(), Duration::from_secs(5));
            assert_eq!(lock.owner(), task::current());
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn cancelled_waiter_leaves_no_registration() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let lock = Lock::new(Handle::current());
            let guard = lock.acquire().await.unwrap();
            let waiter = task::spawn({
                let lock = lock.clone();
                async move { lock.acquire().await.map(drop) }
            });
            task::yield_now().await;

            waiter.cancel();
            assert!(waiter.await.is_err());
            drop(guard);
            assert!(lock.available());
        });

        runtime.wait().unwrap();
    }
}
