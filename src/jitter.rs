//! Injectable score noise. `NoJitter` keeps evaluation deterministic.

use rand::rngs::StdRng;
use rand::distr::{Distribution, Uniform};
use rand::SeedableRng;
use std::sync::Mutex;

use crate::config_loader::SynthesisConfig;

pub trait Jitter: Send + Sync {
    /// Offset added to the synthesized score before clamping
    fn sample(&self) -> f64;
}

pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Uniform noise in `[-amplitude, amplitude]`
pub struct BoundedJitter {
    amplitude: f64,
    rng: Mutex<StdRng>,
}

impl BoundedJitter {
    pub fn new(amplitude: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        // non-finite ranges make the sampler panic
        let amplitude = if amplitude.is_finite() {
            amplitude.abs().min(f64::MAX / 4.0)
        } else {
            0.0
        };
        Self {
            amplitude,
            rng: Mutex::new(rng),
        }
    }
}

impl Jitter for BoundedJitter {
    fn sample(&self) -> f64 {
        if self.amplitude == 0.0 {
            return 0.0;
        }
        match self.rng.lock() {
            Ok(mut rng) => match Uniform::new_inclusive(-self.amplitude, self.amplitude) {
                Ok(range) => range.sample(&mut *rng),
                Err(_) => 0.0,
            },
            // noise is optional; a poisoned generator just stops adding it
            Err(_) => 0.0,
        }
    }
}

/// Pick the jitter implementation the configuration asks for
pub fn from_config(config: &SynthesisConfig) -> Box<dyn Jitter> {
    if config.jitter_amplitude == 0.0 {
        Box::new(NoJitter)
    } else {
        Box::new(BoundedJitter::new(config.jitter_amplitude, config.jitter_seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_jitter_is_reproducible_and_bounded() {
        let a = BoundedJitter::new(2.0, Some(42));
        let b = BoundedJitter::new(2.0, Some(42));
        for _ in 0..100 {
            let x = a.sample();
            assert_eq!(x, b.sample());
            assert!((-2.0..=2.0).contains(&x));
        }
    }

    #[test]
    fn extreme_amplitudes_never_panic() {
        for amplitude in [1e308, f64::MAX, f64::INFINITY, f64::NAN] {
            let jitter = BoundedJitter::new(amplitude, Some(7));
            assert!(!jitter.sample().is_nan(), "{amplitude}");
        }
        assert_eq!(BoundedJitter::new(f64::NAN, Some(7)).sample(), 0.0);
    }

    #[test]
    fn zero_amplitude_selects_no_jitter() {
        let jitter = from_config(&SynthesisConfig::default());
        assert_eq!(jitter.sample(), 0.0);
    }
}
