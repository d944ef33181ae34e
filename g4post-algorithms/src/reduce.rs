//! Elementwise threshold and innermost-level energy sums.

use g4post_core::{Error, Ragged, Result, ValueKind};
use serde::Deserialize;

/// Open interval test `low < v < high`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Threshold {
    /// `[low, high]` bounds.
    pub thr: [f64; 2],
}

impl Threshold {
    /// Checks the bounds are ordered.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `low > high` or a bound is NaN.
    pub fn validate(&self) -> Result<()> {
        let [low, high] = self.thr;
        if low <= high {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "threshold bounds [{low}, {high}] are not ordered"
            )))
        }
    }

    /// Boolean array of the same shape flagging values inside the interval.
    #[must_use]
    pub fn apply(&self, values: &Ragged) -> Ragged {
        let [low, high] = self.thr;
        values.map_values(ValueKind::Bool, |v| f64::from(u8::from(low < v && v < high)))
    }
}

/// Kind of a sum over values of `kind`: booleans count as integers.
#[must_use]
pub fn sum_kind(kind: ValueKind) -> ValueKind {
    match kind {
        ValueKind::Bool => ValueKind::Int64,
        other => other,
    }
}

/// Sums the innermost level, removing it.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] for an array without list levels.
pub fn sum_energy(values: &Ragged) -> Result<Ragged> {
    values.reduce_innermost(sum_kind(values.kind()), |list| list.iter().sum())
}
