#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Congestion on a pool of two resources.
//!
//! Three jobs ask for more of `a` and `b` than fit at once. The first and
//! third job share the pool while the second waits for the first to finish.
//! Set `SIMULATOR_SEED` to run the ready jobs in a shuffled order and
//! `RUST_LOG=simres=debug` to follow every borrow and release.

use std::time::Duration;

use simres::{ConservedResources, Vector};
use simres_async::{
    runtime::{Builder, Handle},
    task, time,
};

const HOLD: Duration = Duration::from_secs(10);

/// # Errors
///
/// * If `SIMULATOR_SEED` is not a valid `u64`
/// * If the pool configuration is rejected
/// * If a job fails to complete
fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let runtime = Builder::new().build()?;

    let end = runtime.block_on(async {
        let pool = ConservedResources::new(Handle::current(), [("a", 10), ("b", 10)])?;
        println!("capacity {}", pool.capacity());

        let requests: [Vector<u32>; 3] = [
            [("a", 6), ("b", 4)].into(),
            [("a", 6), ("b", 4)].into(),
            [("a", 4), ("b", 6)].into(),
        ];
        let mut jobs = vec![];
        for (i, request) in requests.into_iter().enumerate() {
            let borrow = pool.borrow(request)?;
            jobs.push(task::spawn(async move {
                println!("{:>4?} job #{i} requests {}", time::now(), borrow.requested());
                let borrowed = borrow.await;
                println!("{:>4?} job #{i} acquired {}", time::now(), borrowed.amounts());
                time::sleep(HOLD).await;
                log::debug!("job #{i} releasing");
                drop(borrowed);
                println!("{:>4?} job #{i} done", time::now());
            }));
        }

        for job in jobs {
            job.await?;
        }
        Ok::<_, Box<dyn std::error::Error>>(time::now())
    })?;

    runtime.wait()?;
    println!("all jobs finished after {end:?}");

    Ok(())
}
