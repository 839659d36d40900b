use std::time::{Duration, Instant};

/// Critic iterations used during warm-up and periodic re-convergence.
pub const WARMUP_CRITIC_ITERS: u64 = 100;
/// Every this many generator updates the critic is trained to optimality again.
pub const RECONVERGE_PERIOD: u64 = 500;

/// Number of critic updates to run before the next generator update.
pub fn critic_iterations(gen_iterations: u64, initial_iter: u64, d_iters: u64) -> u64 {
    if gen_iterations < initial_iter || gen_iterations % RECONVERGE_PERIOD == 0 {
        WARMUP_CRITIC_ITERS
    } else {
        d_iters
    }
}

/// Process-wide training counters.
#[derive(Debug)]
pub struct TrainState {
    pub epoch: u64,
    pub gen_iterations: u64,
    pub critic_updates: u64,
    start: Instant,
}

impl Default for TrainState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainState {
    pub fn new() -> Self {
        Self {
            epoch: 0,
            gen_iterations: 0,
            critic_updates: 0,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Real samples consumed per second since the state was created.
    pub fn throughput(&self, batch_size: i64) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0. {
            (self.critic_updates as f64 * batch_size as f64) / secs
        } else {
            0.
        }
    }
}
