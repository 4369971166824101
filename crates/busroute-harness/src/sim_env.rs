//! Simulated environment: virtual clock and seeded RNG.
//!
//! Clones share one clock and one generator, so every node in a fabric sees
//! the same time and draws from one deterministic stream. Time only moves
//! when the fabric calls [`SimEnv::advance`].

use std::{
    ops::Sub,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use busroute_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Point on the virtual clock: time since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    #[must_use]
    pub fn elapsed_since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

struct State {
    now: SimInstant,
    rng: ChaCha8Rng,
}

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<State>>,
}

impl SimEnv {
    /// Environment seeded with 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random stream is fixed by `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let state = State { now: SimInstant::default(), rng: ChaCha8Rng::seed_from_u64(seed) };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.now = SimInstant(state.now.0 + by);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock already failed the test; keep going.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.lock().now
    }

    /// Advances the virtual clock instead of waiting.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
