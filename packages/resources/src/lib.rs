#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Cooperative synchronization primitives for discrete-event simulations.
//!
//! Every primitive is built on a [`Tracked`] value: a monitor that lets
//! tasks wait until a predicate over its value holds. Resource pools track
//! the amounts available per named resource, so borrowing is "wait until
//! enough is available, then take it". Because only one simulated task
//! runs at a time, that sequence cannot be interleaved by another task.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use simres::{ConservedResources, Lock};
//! use simres_async::{runtime::{Builder, Handle}, task, time};
//!
//! let runtime = Builder::new().build().unwrap();
//!
//! let end = runtime.block_on(async {
//!     let pool = ConservedResources::new(Handle::current(), [("cores", 4)]).unwrap();
//!     let lock = Lock::new(Handle::current());
//!
//!     let jobs = (0..3)
//!         .map(|_| {
//!             let pool = pool.clone();
//!             let lock = lock.clone();
//!             task::spawn(async move {
//!                 let _cores = pool.borrow([("cores", 2)]).unwrap().await;
//!                 let _guard = lock.acquire().await.unwrap();
//!                 time::sleep(Duration::from_secs(1)).await;
//!             })
//!         })
//!         .collect::<Vec<_>>();
//!     for job in jobs {
//!         job.await.unwrap();
//!     }
//!     time::now()
//! });
//!
//! assert_eq!(end, Duration::from_secs(3));
//! runtime.wait().unwrap();
//! ```

pub mod borrow;
pub mod conserved;
pub mod elastic;
mod error;
pub mod lock;
mod pool;
pub mod scheduler;
pub mod tracked;
pub mod vector;

pub use borrow::{Borrow, Borrowed};
pub use conserved::ConservedResources;
pub use elastic::{Decrease, ElasticResources};
pub use error::{Error, Result};
pub use lock::{Lock, LockGuard};
pub use scheduler::Scheduler;
pub use tracked::{Condition, Predicate, Tracked};
pub use vector::{Amount, Vector};
