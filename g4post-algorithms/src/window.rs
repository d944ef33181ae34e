//! Temporal windowing of hits.
//!
//! Hit times are aligned to the earliest baseline time of their event, then
//! clustered with a greedy leader-gap rule: a hit opens a new window when it
//! is more than `dT` later than the start of the current window. Window
//! starts are therefore data defined, not fixed-width bins.
//!
//! Every correlated per-hit field is regrouped into event → window → hit,
//! keeping the original hit order inside each window.

use g4post_core::{Error, Ragged, Result, ValueKind};
use serde::Deserialize;

/// Scalar stored in a window that received no hits.
///
/// Such a window still holds exactly one value, so reductions over it yield
/// the placeholder (a sum gives `0`) rather than an empty-set result.
pub const WINDOW_PLACEHOLDER: f64 = 0.0;

const fn default_dt() -> f64 {
    1e4
}

/// Windowing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct WindowParams {
    /// Minimum gap between a window start and the hit opening the next one.
    #[serde(rename = "dT", default = "default_dt")]
    pub dt: f64,
    /// Optional cutoff: hits at or after it share one final window that
    /// starts at the cutoff.
    #[serde(default)]
    pub t_max: Option<f64>,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            t_max: None,
        }
    }
}

impl WindowParams {
    /// Checks the parameters are usable.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a non-positive or non-finite `dT`.
    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(Error::Config(format!(
                "dT must be a positive number, got {}",
                self.dt
            )));
        }
        if self.t_max.is_some_and(f64::is_nan) {
            return Err(Error::Config("t_max must not be NaN".to_string()));
        }
        Ok(())
    }
}

/// Result of windowing one set of correlated fields.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowedFields {
    /// Window start times per event (depth 1).
    pub boundaries: Ragged,
    /// Baseline-aligned hit times per window (depth 2).
    pub shifted: Ragged,
    /// Correlated fields regrouped per window (depth 2), input order.
    pub fields: Vec<Ragged>,
}

/// Greedy leader-gap windowing.
#[derive(Clone, Debug, Default)]
pub struct Windowing {
    params: WindowParams,
}

impl Windowing {
    /// Creates the module.
    #[must_use]
    pub fn new(params: WindowParams) -> Self {
        Self { params }
    }

    /// Window start times for ascending shifted times of one event.
    ///
    /// The first window starts at `0` (or at the earliest time if it is
    /// negative). Boundaries are strictly increasing; the last window is
    /// unbounded above.
    #[must_use]
    pub fn boundaries(&self, sorted: &[f64]) -> Vec<f64> {
        let Some(&first) = sorted.first() else {
            return Vec::new();
        };
        let mut bounds = vec![first.min(0.0)];
        let mut last = bounds[0];
        for &t in sorted {
            if self.params.t_max.is_some_and(|cut| t >= cut) {
                break;
            }
            if t > last + self.params.dt {
                bounds.push(t);
                last = t;
            }
        }
        if let Some(cut) = self.params.t_max {
            if cut > last {
                bounds.push(cut);
            }
        }
        bounds
    }

    /// Windows `time` and the `correlated` fields sharing its layout.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if an input is not one list per
    /// event, the event counts differ, or a correlated field does not match
    /// the layout of `time`.
    pub fn run(
        &self,
        baseline: &Ragged,
        time: &Ragged,
        correlated: &[&Ragged],
    ) -> Result<WindowedFields> {
        if baseline.depth() != 1 || time.depth() != 1 {
            return Err(Error::ShapeMismatch(format!(
                "windowing expects per-event hit lists, got depths {} and {}",
                baseline.depth(),
                time.depth()
            )));
        }
        if baseline.len() != time.len() {
            return Err(Error::ShapeMismatch(format!(
                "baseline has {} events, hit times {}",
                baseline.len(),
                time.len()
            )));
        }
        for (index, field) in correlated.iter().enumerate() {
            time.check_same_layout(field, &format!("correlated field {index}"))?;
        }

        let n_events = time.len();
        let mut bound_offsets = Vec::with_capacity(n_events + 1);
        bound_offsets.push(0);
        let mut bound_values = Vec::new();
        let mut window_offsets = vec![0];
        let mut hit_offsets = vec![0];
        let mut shifted_values = Vec::with_capacity(time.values().len());
        let mut field_values: Vec<Vec<f64>> = correlated
            .iter()
            .map(|_| Vec::with_capacity(time.values().len()))
            .collect();

        let mut shifted = Vec::new();
        let mut sorted = Vec::new();
        let mut window_of = Vec::new();
        let mut order = Vec::new();

        for event in 0..n_events {
            let hits = time.list(0, event);
            let times = &time.values()[hits.clone()];

            let reference = event_minimum(&baseline.values()[baseline.list(0, event)])
                .or_else(|| event_minimum(times))
                .unwrap_or(0.0);
            shifted.clear();
            shifted.extend(times.iter().map(|&t| t - reference));
            sorted.clear();
            sorted.extend_from_slice(&shifted);
            sorted.sort_by(f64::total_cmp);

            let bounds = self.boundaries(&sorted);
            window_of.clear();
            window_of.extend(
                shifted
                    .iter()
                    .map(|&t| bounds.partition_point(|&b| b <= t).saturating_sub(1)),
            );

            // Stable counting sort of hit indices by window.
            let mut starts = vec![0usize; bounds.len() + 1];
            for &w in &window_of {
                starts[w + 1] += 1;
            }
            for w in 0..bounds.len() {
                starts[w + 1] += starts[w];
            }
            let mut cursor = starts.clone();
            order.clear();
            order.resize(window_of.len(), 0);
            for (hit, &w) in window_of.iter().enumerate() {
                order[cursor[w]] = hit;
                cursor[w] += 1;
            }

            for w in 0..bounds.len() {
                let members = &order[starts[w]..starts[w + 1]];
                if members.is_empty() {
                    shifted_values.push(WINDOW_PLACEHOLDER);
                    for values in &mut field_values {
                        values.push(WINDOW_PLACEHOLDER);
                    }
                } else {
                    shifted_values.extend(members.iter().map(|&k| shifted[k]));
                    for (values, field) in field_values.iter_mut().zip(correlated) {
                        let source = &field.values()[hits.clone()];
                        values.extend(members.iter().map(|&k| source[k]));
                    }
                }
                hit_offsets.push(shifted_values.len());
            }

            bound_values.extend_from_slice(&bounds);
            bound_offsets.push(bound_values.len());
            window_offsets.push(hit_offsets.len() - 1);
        }

        let layout = vec![bound_offsets.clone(), hit_offsets];
        let boundaries = Ragged::from_parts(ValueKind::Float64, vec![bound_offsets], bound_values)?;
        // Fractional baselines make shifted times fractional whatever the time kind.
        let shifted = Ragged::from_parts(ValueKind::Float64, layout.clone(), shifted_values)?;
        let fields = field_values
            .into_iter()
            .zip(correlated)
            .map(|(values, field)| Ragged::from_parts(field.kind(), layout.clone(), values))
            .collect::<Result<Vec<_>>>()?;
        debug_assert_eq!(window_offsets, layout[0]);

        Ok(WindowedFields {
            boundaries,
            shifted,
            fields,
        })
    }
}

fn event_minimum(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}
