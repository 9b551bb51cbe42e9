//! Thread-local deterministic randomness for workloads.
//!
//! Every worker seeds its own generator right after the start barrier, so
//! state functions and executors can draw random values without threading an
//! RNG through their signatures. The same seed yields the same sequence on a
//! given thread.

use std::cell::{Cell, RefCell};

use rand::distr::uniform::SampleUniform;
use rand::distr::{Distribution, StandardUniform};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

thread_local! {
    /// Generator for the current worker thread.
    static WORKER_RNG: RefCell<ChaCha8Rng> = RefCell::new(ChaCha8Rng::seed_from_u64(0));

    /// Last seed passed to [`set_random_seed`], kept for failure reports.
    static CURRENT_SEED: Cell<u64> = const { Cell::new(0) };
}

/// Reseed the current thread's generator.
pub fn set_random_seed(seed: u64) {
    WORKER_RNG.with(|rng| *rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed));
    CURRENT_SEED.with(|current| current.set(seed));
}

/// Seed last set on this thread.
pub fn current_seed() -> u64 {
    CURRENT_SEED.with(Cell::get)
}

/// Draw a value from the standard distribution.
pub fn random<T>() -> T
where
    StandardUniform: Distribution<T>,
{
    WORKER_RNG.with(|rng| rng.borrow_mut().sample(StandardUniform))
}

/// Draw a value in `range`, returning `range.start` when the range is empty.
pub fn random_range<T>(range: std::ops::Range<T>) -> T
where
    T: SampleUniform + PartialOrd,
{
    if range.start >= range.end {
        return range.start;
    }
    WORKER_RNG.with(|rng| rng.borrow_mut().random_range(range))
}

/// Draw a float in `[0, 1)`.
pub fn random_f64() -> f64 {
    random::<f64>()
}

/// True with probability `probability`, clamped to `[0, 1]`.
pub fn random_bool(probability: f64) -> bool {
    let probability = if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    };
    WORKER_RNG.with(|rng| rng.borrow_mut().random_bool(probability))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        set_random_seed(42);
        let first: Vec<u64> = (0..8).map(|_| random()).collect();
        set_random_seed(42);
        let second: Vec<u64> = (0..8).map(|_| random()).collect();
        assert_eq!(first, second);
        assert_eq!(current_seed(), 42);
    }

    #[test]
    fn test_different_seeds_diverge() {
        set_random_seed(1);
        let a: u64 = random();
        set_random_seed(2);
        let b: u64 = random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_range_returns_start() {
        assert_eq!(random_range(5..5), 5);
        let v = random_range(0..10u32);
        assert!(v < 10);
    }

    #[test]
    fn test_random_bool_extremes() {
        set_random_seed(7);
        assert!(!random_bool(0.0));
        assert!(random_bool(1.0));
        assert!(random_bool(3.0));
        assert!(!random_bool(f64::NAN));
    }

    #[test]
    fn test_threads_are_independent() {
        set_random_seed(9);
        let here: u64 = random();
        let there = std::thread::spawn(|| {
            set_random_seed(9);
            random::<u64>()
        })
        .join()
        .expect("thread");
        assert_eq!(here, there);
    }
}
