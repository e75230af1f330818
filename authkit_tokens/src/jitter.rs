//! Utilities for adding a bit of jitter to reduce stampeding
//!
//! When many tabs or processes hold tokens minted at the same moment, they
//! would all schedule their renewals for the same instant. Jittering the
//! renewal delay spreads those requests out.

use std::time::Duration;

/// A type that provides some jittering of renewal delays
pub trait JitterSource {
    /// Jitters a given renewal delay
    fn jitter(&mut self, delay: Duration) -> Duration;
}

/// A jitter source that does not do any jittering
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, delay: Duration) -> Duration {
        delay
    }
}

#[cfg(feature = "rand")]
mod random {
    use std::time::Duration;

    use rand::{Rng, SeedableRng};

    /// Jitters a delay earlier by a random amount
    ///
    /// Delays jittered by this type will have a value with a uniform
    /// distribution in the interval `(delay - max_jitter, delay]`, never
    /// going below zero.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R> {
        max_jitter: Duration,
        rand_source: R,
    }

    impl RandomEarlyJitter<rand::rngs::StdRng> {
        /// Constructs a new instance that will jitter delays early up to `max_jitter`.
        pub fn new(max_jitter: Duration) -> Self {
            Self::with_rng(max_jitter, rand::rngs::StdRng::from_entropy())
        }
    }

    impl<R: Rng> RandomEarlyJitter<R> {
        /// Constructs a new instance using the given random number generator
        pub fn with_rng(max_jitter: Duration, rand_source: R) -> Self {
            Self {
                max_jitter,
                rand_source,
            }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&mut self, delay: Duration) -> Duration {
            let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            if max_ms == 0 {
                return delay;
            }

            let jitter = self.rand_source.gen_range(0..max_ms);
            delay.saturating_sub(Duration::from_millis(jitter))
        }
    }

}

#[cfg(feature = "rand")]
pub use random::RandomEarlyJitter;
