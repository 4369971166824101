//! Production environment: system clock and OS entropy.
//!
//! Randomness only feeds link ids and round-robin tie-breaks, so it does not
//! need to be reproducible here. The simulation harness swaps in a seeded
//! generator when it does.

use std::time::Duration;

use busroute_core::Environment;

/// Production environment using system time and the OS RNG.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A node without entropy cannot
/// allocate link ids, and the failure indicates an OS-level problem.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
