//! Module that contains the delays used by the simulation loop between two printer requests.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Longest delay a Poisson schedule produces, whatever the sample.
pub const MAX_POISSON_DELAY: Duration = Duration::from_secs(3600);

/// Exponentially distributed delays, i.e. the gaps between events of a Poisson process.
pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    /// Expected number of events per second.
    pub rate: f64,
}

impl Poisson<SmallRng> {
    pub fn new(rate: f64, seed: &[u8; 32]) -> Self {
        Self {
            rng: Box::new(SmallRng::from_seed(*seed)),
            rate,
        }
    }

    pub fn from_entropy(rate: f64) -> Self {
        Self {
            rng: Box::new(SmallRng::from_os_rng()),
            rate,
        }
    }

    /// Function that samples the time, in seconds, until the next event.
    pub fn time_for_next_event(&mut self) -> f64 {
        -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate
    }
}

/// Enum that represents how long a peer waits before asking for the printer again.
pub enum Schedule {
    /// Uniform delays: a warm-up in `initial`, then each gap in `between`, in milliseconds.
    Uniform {
        initial: (u64, u64),
        between: (u64, u64),
    },
    Poisson(Poisson<SmallRng>),
}

impl Schedule {
    /// Function that returns the schedule used when no rate is configured.
    pub fn uniform() -> Self {
        Self::Uniform {
            initial: (5_000, 7_000),
            between: (5_000, 12_000),
        }
    }

    pub fn poisson(rate: f64) -> Self {
        Self::Poisson(Poisson::from_entropy(rate))
    }

    /// Function that returns the delay before the first request.
    pub fn initial_delay(&mut self) -> Duration {
        match self {
            Self::Uniform { initial, .. } => uniform_millis(*initial),
            Self::Poisson(poisson) => poisson_delay(poisson),
        }
    }

    /// Function that returns the delay between two consecutive requests.
    pub fn next_delay(&mut self) -> Duration {
        match self {
            Self::Uniform { between, .. } => uniform_millis(*between),
            Self::Poisson(poisson) => poisson_delay(poisson),
        }
    }
}

fn poisson_delay(poisson: &mut Poisson<SmallRng>) -> Duration {
    Duration::try_from_secs_f64(poisson.time_for_next_event())
        .map_or(MAX_POISSON_DELAY, |delay| delay.min(MAX_POISSON_DELAY))
}

fn uniform_millis((low, high): (u64, u64)) -> Duration {
    Duration::from_millis(rand::rng().random_range(low..=high.max(low)))
}
