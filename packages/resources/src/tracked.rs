//! Monitor values: wait until an arbitrary condition over a value holds.
//!
//! A [`Tracked`] owns a value and an ordered list of waiters. Every
//! [`Tracked::set`] re-evaluates all waiters against the new value in
//! registration order and wakes each one whose predicate now holds. Waiters
//! are judged independently, so a later waiter asking for little can be
//! woken while an earlier one asking for more keeps waiting.
//!
//! A woken waiter checks its predicate once more when its task actually
//! resumes. Should another task have changed the value in between, the
//! waiter goes back to sleep without losing its place in line. This makes
//! "wait for the condition, then act on it" a single step under cooperative
//! scheduling: nothing can run between the final check and the code right
//! after the `.await`.

use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::vector::{Amount, Vector};

pub trait Predicate<V> {
    fn holds(&self, value: &V) -> bool;
}

impl<V, F: Fn(&V) -> bool> Predicate<V> for F {
    fn holds(&self, value: &V) -> bool {
        self(value)
    }
}

/// Threshold comparisons over a [`Vector`], carried as data.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<T> {
    /// `value >= threshold` for every key of the threshold.
    AtLeast(Vector<T>),
    /// `value > threshold` for every key of the threshold.
    Above(Vector<T>),
    /// `value <= threshold` for every key of the threshold.
    AtMost(Vector<T>),
}

impl<T: Amount> Predicate<Vector<T>> for Condition<T> {
    fn holds(&self, value: &Vector<T>) -> bool {
        match self {
            Self::AtLeast(threshold) => value.ge(threshold),
            Self::Above(threshold) => value.gt(threshold),
            Self::AtMost(threshold) => value.le(threshold),
        }
    }
}

struct Waiter<V> {
    id: u64,
    predicate: Rc<dyn Predicate<V>>,
    waker: Waker,
    notified: bool,
}

struct State<V> {
    value: V,
    waiters: Vec<Waiter<V>>,
    next_id: u64,
}

pub struct Tracked<V> {
    state: Rc<RefCell<State<V>>>,
}

impl<V> Clone for Tracked<V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Tracked<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Tracked")
            .field("value", &state.value)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<V: Clone + 'static> Tracked<V> {
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                value,
                waiters: vec![],
                next_id: 0,
            })),
        }
    }

    #[must_use]
    pub fn read(&self) -> V {
        self.state.borrow().value.clone()
    }

    /// Replaces the value and wakes every waiter whose predicate holds for
    /// it. Returns how many waiters were woken.
    ///
    /// Predicates run with the state released, so they may read this or any
    /// other [`Tracked`].
    pub fn set(&self, value: V) -> usize {
        let candidates = {
            let mut state = self.state.borrow_mut();
            state.value = value.clone();
            state
                .waiters
                .iter()
                .filter(|waiter| !waiter.notified)
                .map(|waiter| (waiter.id, waiter.predicate.clone()))
                .collect::<Vec<_>>()
        };
        let satisfied = candidates
            .into_iter()
            .filter(|(_, predicate)| predicate.holds(&value))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        let wakers = self
            .state
            .borrow_mut()
            .waiters
            .iter_mut()
            .filter(|waiter| !waiter.notified && satisfied.contains(&waiter.id))
            .map(|waiter| {
                waiter.notified = true;
                waiter.waker.clone()
            })
            .collect::<Vec<_>>();

        let woken = wakers.len();
        for waker in wakers {
            waker.wake();
        }
        woken
    }

    /// Applies `f` to the current value and [`set`](Self::set)s the result.
    pub fn update(&self, f: impl FnOnce(&V) -> V) -> usize {
        let value = f(&self.state.borrow().value);
        self.set(value)
    }

    /// Resolves to the value once `predicate` holds for it, immediately if
    /// it already does.
    ///
    /// Dropping the returned future removes its registration.
    pub fn wait_for(&self, predicate: impl Predicate<V> + 'static) -> WaitFor<V> {
        WaitFor {
            tracked: self.clone(),
            state: WaitState::Unregistered(Rc::new(predicate)),
        }
    }

    /// Number of registered waiters, woken or not.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().waiters.len()
    }
}

impl<V> Tracked<V> {
    fn predicate(&self, id: u64) -> Rc<dyn Predicate<V>> {
        let state = self.state.borrow();
        let Some(waiter) = state.waiters.iter().find(|x| x.id == id) else {
            unreachable!("waiter {id} was removed while still registered");
        };
        waiter.predicate.clone()
    }
}

enum WaitState<V> {
    Unregistered(Rc<dyn Predicate<V>>),
    Registered(u64),
    Done,
}

#[must_use = "futures do nothing unless polled"]
pub struct WaitFor<V> {
    tracked: Tracked<V>,
    state: WaitState<V>,
}

impl<V> fmt::Debug for WaitFor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            WaitState::Unregistered(_) => "unregistered",
            WaitState::Registered(_) => "registered",
            WaitState::Done => "done",
        };
        f.debug_struct("WaitFor").field("state", &state).finish()
    }
}

impl<V: Clone> Future for WaitFor<V> {
    type Output = V;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let value = this.tracked.state.borrow().value.clone();

        match std::mem::replace(&mut this.state, WaitState::Done) {
            WaitState::Unregistered(predicate) => {
                if predicate.holds(&value) {
                    return Poll::Ready(value);
                }
                let mut state = this.tracked.state.borrow_mut();
                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push(Waiter {
                    id,
                    predicate,
                    waker: cx.waker().clone(),
                    notified: false,
                });
                log::trace!("wait_for: registered waiter={id}");
                this.state = WaitState::Registered(id);
                Poll::Pending
            }
            WaitState::Registered(id) => {
                let predicate = this.tracked.predicate(id);
                if predicate.holds(&value) {
                    this.tracked.state.borrow_mut().waiters.retain(|x| x.id != id);
                    return Poll::Ready(value);
                }
                let mut state = this.tracked.state.borrow_mut();
                if let Some(waiter) = state.waiters.iter_mut().find(|x| x.id == id) {
                    log::trace!("wait_for: waiter={id} overtaken, waiting again");
                    waiter.notified = false;
                    waiter.waker.clone_from(cx.waker());
                }
                this.state = WaitState::Registered(id);
                Poll::Pending
            }
            WaitState::Done => panic!("`WaitFor` polled after completion"),
        }
    }
}

impl<V> Drop for WaitFor<V> {
    fn drop(&mut self) {
        if let WaitState::Registered(id) = self.state {
            log::trace!("wait_for: dropping waiter={id}");
            self.tracked
                .state
                .borrow_mut()
                .waiters
                .retain(|x| x.id != id);
        }
    }
}
