//! The scheduler capabilities resource primitives depend on.

use std::{future::Future, pin::Pin};

use simres_async::{
    runtime::Handle,
    task::{Id, Termination},
};

pub type Activity = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Handle to whatever drives the simulated tasks.
///
/// Every pool captures one at construction, so no primitive ever reaches
/// for a global scheduler.
pub trait Scheduler {
    /// Identity of the task currently running, `None` outside of any task.
    fn current_task(&self) -> Option<Id>;

    /// Teardown mode currently in progress.
    fn termination(&self) -> Termination;

    /// Runs `activity` independently of the current task. Must be callable
    /// while a task is being disposed.
    fn spawn_detached(&self, activity: Activity);
}

impl Scheduler for Handle {
    fn current_task(&self) -> Option<Id> {
        Self::current_task(self)
    }

    fn termination(&self) -> Termination {
        Self::termination(self)
    }

    fn spawn_detached(&self, activity: Activity) {
        drop(self.spawn(activity));
    }
}
