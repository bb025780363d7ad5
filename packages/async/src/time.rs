//! Virtual clock access.
//!
//! All functions here panic when called outside a running runtime.

use std::future::IntoFuture;

pub use std::time::Duration;

pub use crate::futures::{Elapsed, Sleep, Timeout};

use crate::runtime;

/// Virtual time elapsed since the simulation started.
///
/// # Panics
///
/// * If no runtime is currently running
#[must_use]
pub fn now() -> Duration {
    runtime::with(runtime::Runtime::now)
}

/// # Panics
///
/// * If no runtime is currently running
#[must_use]
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// Completes once the virtual clock reaches `deadline`; immediately if it
/// already has.
#[must_use]
pub fn sleep_until(deadline: Duration) -> Sleep {
    Sleep::until(deadline)
}

/// # Panics
///
/// * If no runtime is currently running
#[must_use]
pub fn timeout<F>(duration: Duration, future: F) -> Timeout<F::IntoFuture>
where
    F: IntoFuture,
{
    Timeout::new(duration, future.into_future())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{runtime::Runtime, task};

    use super::*;

    #[test_log::test]
    fn sleep_until_past_deadline_is_immediate() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            sleep(Duration::from_secs(4)).await;
            sleep_until(Duration::from_secs(1)).await;
            assert_eq!(now(), Duration::from_secs(4));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn timers_with_equal_deadlines_fire_together() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let a = task::spawn(async {
                sleep(Duration::from_secs(2)).await;
                now()
            });
            let b = task::spawn(async {
                sleep(Duration::from_secs(2)).await;
                now()
            });
            assert_eq!(a.await.unwrap(), Duration::from_secs(2));
            assert_eq!(b.await.unwrap(), Duration::from_secs(2));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn timeout_expires_on_virtual_deadline() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let result = timeout(Duration::from_secs(3), sleep(Duration::from_secs(10))).await;
            assert_eq!(result, Err(Elapsed));
            assert_eq!(now(), Duration::from_secs(3));

            let result = timeout(Duration::from_secs(3), sleep(Duration::from_secs(1))).await;
            assert_eq!(result, Ok(()));
            assert_eq!(now(), Duration::from_secs(4));
        });

        runtime.wait().unwrap();
    }

    #[test_log::test]
    fn dropped_sleep_does_not_advance_clock() {
        let runtime = Runtime::new();

        runtime.block_on(async {
            let handle = task::spawn(sleep(Duration::from_secs(100)));
            task::yield_now().await;
            handle.cancel();
            assert!(handle.await.is_err());
        });

        let probe = runtime.clone();
        runtime.wait().unwrap();
        assert_eq!(probe.now(), Duration::ZERO);
    }

    #[test_log::test]
    fn duration_max_never_fires() {
        assert_eq!(sleep_until(Duration::MAX).deadline(), None);
    }
}
