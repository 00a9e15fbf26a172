//! Validator commission rates.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Commission rates of a validator, as fractions in `[0, 1]`.
///
/// Invariants: `rate <= max_rate` and `max_change_rate < max_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionRates {
    /// Current commission rate
    pub rate: f64,
    /// Upper bound the rate may ever be raised to
    pub max_rate: f64,
    /// Largest change of the rate allowed per epoch
    pub max_change_rate: f64,
}

impl CommissionRates {
    /// Gap kept between `max_change_rate` and `max_rate`.
    pub const MAX_CHANGE_EPSILON: f64 = 1e-9;

    /// Create commission rates without validation.
    pub fn new(rate: f64, max_rate: f64, max_change_rate: f64) -> Self {
        Self {
            rate,
            max_rate,
            max_change_rate,
        }
    }

    /// Draw random commission rates.
    ///
    /// Two independent uniform draws are sorted into `rate` and `max_rate`,
    /// then `max_change_rate` is drawn from `[0, max_rate - epsilon]`.
    /// Pairs whose `max_rate` leaves no room for that range are redrawn.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (rate, max_rate) = loop {
            let a: f64 = rng.gen_range(0.0..=1.0);
            let b: f64 = rng.gen_range(0.0..=1.0);
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            if high > Self::MAX_CHANGE_EPSILON {
                break (low, high);
            }
        };
        let max_change_rate = rng.gen_range(0.0..=max_rate - Self::MAX_CHANGE_EPSILON);
        Self::new(rate, max_rate, max_change_rate)
    }

    /// Check the ordering invariants.
    pub fn is_valid(&self) -> bool {
        let in_unit = |x: f64| (0.0..=1.0).contains(&x);
        in_unit(self.rate)
            && in_unit(self.max_rate)
            && in_unit(self.max_change_rate)
            && self.rate <= self.max_rate
            && self.max_change_rate < self.max_rate
    }
}

/// Decimal places the chain keeps for rates.
pub const RATE_DECIMALS: usize = 18;

/// Render a rate the way it is passed to the wallet CLI.
pub fn format_rate(rate: f64) -> String {
    format!("{:.*}", RATE_DECIMALS, rate)
}

/// Compare a rate observed on chain with the reference rate.
///
/// The chain stores the rate truncated to [`RATE_DECIMALS`] places, so the
/// observed value may equal either the reference or its rendered form.
pub fn rate_matches(expected: f64, observed: f64) -> bool {
    if observed == expected {
        return true;
    }
    format_rate(expected)
        .parse::<f64>()
        .map(|quantized| quantized == observed)
        .unwrap_or(false)
}
