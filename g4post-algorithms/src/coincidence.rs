//! Cross-stream time coincidence.
//!
//! For every window of a first stream, sums a value over the windows of a
//! second stream whose start time falls strictly inside an interval relative
//! to the first window's start.

use crate::reduce::sum_kind;
use g4post_core::{Error, Ragged, Result};
use serde::Deserialize;

/// Coincidence interval, relative to the first stream's window time.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct CoincidenceParams {
    /// Open lower bound.
    pub t_min: f64,
    /// Open upper bound.
    pub t_max: f64,
}

/// Sums `val` over the windows of stream 2 that fall in
/// `(t1 + t_min, t1 + t_max)`, once per window of stream 1.
///
/// Both time lists are used in full; an empty or excluding interval yields
/// `0`.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the streams are not depth 1, their
/// event counts differ, or `val` does not share the layout of `t2`.
pub fn correlate(
    params: &CoincidenceParams,
    t1: &Ragged,
    t2: &Ragged,
    val: &Ragged,
) -> Result<Ragged> {
    if t1.depth() != 1 || t2.depth() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "coincidence expects per-event window times, got depths {} and {}",
            t1.depth(),
            t2.depth()
        )));
    }
    if t1.len() != t2.len() {
        return Err(Error::ShapeMismatch(format!(
            "streams have {} and {} events",
            t1.len(),
            t2.len()
        )));
    }
    t2.check_same_layout(val, "coincidence value")?;

    let mut sums = Vec::with_capacity(t1.values().len());
    for event in 0..t1.len() {
        let second = t2.list(0, event);
        let times = &t2.values()[second.clone()];
        let values = &val.values()[second];
        for &start in t1.innermost(event) {
            let (low, high) = (start + params.t_min, start + params.t_max);
            let sum: f64 = times
                .iter()
                .zip(values)
                .filter(|(&t, _)| t > low && t < high)
                .map(|(_, &v)| v)
                .sum();
            sums.push(sum);
        }
    }
    Ragged::from_parts(sum_kind(val.kind()), t1.offsets().to_vec(), sums)
}
