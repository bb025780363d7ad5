#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Single-threaded, virtual-time runtime for discrete-event simulations.
//!
//! Exactly one task runs at a time and only yields control at its own
//! `.await` points. The virtual clock never moves while any task is ready
//! to run; once every task is suspended it jumps straight to the earliest
//! pending [`time::sleep`] deadline.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use simres_async::{runtime::Builder, task, time};
//!
//! let runtime = Builder::new().build().unwrap();
//!
//! runtime.block_on(async {
//!     let handle = task::spawn(async {
//!         time::sleep(Duration::from_secs(5)).await;
//!         time::now()
//!     });
//!     assert_eq!(handle.await.unwrap(), Duration::from_secs(5));
//! });
//!
//! runtime.wait().unwrap();
//! ```

pub mod futures;
pub mod runtime;
pub mod task;
pub mod time;

pub use runtime::Builder;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Join(#[from] task::JoinError),
    #[error("invalid SIMULATOR_SEED: {0}")]
    Seed(#[from] std::num::ParseIntError),
}
