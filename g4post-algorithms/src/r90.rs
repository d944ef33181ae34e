//! R90 energy-containment radius.
//!
//! R90 is the smallest distance from the energy-weighted centroid of a group
//! of hits within which at least 90% of the group's energy is deposited.

use g4post_core::{Error, Ragged, Result, ValueKind};

/// Fraction of the total energy the radius must contain.
pub const CONTAINMENT: f64 = 0.9;

/// R90 of one group of hits.
///
/// Returns `0` for an empty group, a single hit, or a non-positive total
/// energy.
#[must_use]
pub fn r90(edep: &[f64], x: &[f64], y: &[f64], z: &[f64]) -> f64 {
    if edep.len() < 2 {
        return 0.0;
    }
    let total: f64 = edep.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted = |pos: &[f64]| -> f64 {
        edep.iter().zip(pos).map(|(e, p)| e * p).sum::<f64>() / total
    };
    let centroid = [weighted(x), weighted(y), weighted(z)];

    let mut hits: Vec<(f64, f64)> = (0..edep.len())
        .map(|k| {
            let dx = x[k] - centroid[0];
            let dy = y[k] - centroid[1];
            let dz = z[k] - centroid[2];
            ((dx * dx + dy * dy + dz * dz).sqrt(), edep[k])
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));

    let target = CONTAINMENT * total;
    let mut cumulative = 0.0;
    for &(distance, energy) in &hits {
        cumulative += energy;
        if cumulative >= target {
            return distance;
        }
    }
    // Rounding can leave the running sum a hair below the target.
    hits.last().map_or(0.0, |&(distance, _)| distance)
}

/// R90 of every innermost list of correlated arrays, removing one level.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the arrays do not share
/// one layout with at least one list level.
pub fn estimate(edep: &Ragged, x: &Ragged, y: &Ragged, z: &Ragged) -> Result<Ragged> {
    edep.check_same_layout(x, "x position")?;
    edep.check_same_layout(y, "y position")?;
    edep.check_same_layout(z, "z position")?;
    if edep.depth() == 0 {
        return Err(Error::ShapeMismatch(
            "R90 needs at least one list level".to_string(),
        ));
    }

    let values = edep
        .innermost_ranges()
        .map(|range| {
            r90(
                &edep.values()[range.clone()],
                &x.values()[range.clone()],
                &y.values()[range.clone()],
                &z.values()[range],
            )
        })
        .collect();
    let offsets = edep.offsets()[..edep.depth() - 1].to_vec();
    Ragged::from_parts(ValueKind::Float64, offsets, values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;
    use g4post_core::Nested;

    #[test]
    fn test_degenerate_groups_are_zero() {
        assert_eq!(r90(&[], &[], &[], &[]), 0.0);
        assert_eq!(r90(&[5.0], &[1.0], &[2.0], &[3.0]), 0.0);
        assert_eq!(r90(&[0.0, 0.0], &[0.0, 1.0], &[0.0; 2], &[0.0; 2]), 0.0);
    }

    #[test]
    fn test_two_equal_hits() {
        // Centroid halfway; each hit holds 50%, so both are needed.
        let value = r90(&[1.0, 1.0], &[0.0, 2.0], &[0.0; 2], &[0.0; 2]);
        assert_relative_eq!(value, 1.0);
    }

    #[test]
    fn test_dominant_hit() {
        let value = r90(&[95.0, 5.0], &[0.0, 100.0], &[0.0; 2], &[0.0; 2]);
        assert_relative_eq!(value, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_estimate_removes_one_level() {
        let records: Vec<Nested> = vec![
            vec![vec![1.0, 1.0], vec![], vec![3.0]].into(),
            vec![vec![2.0, 2.0]].into(),
        ];
        let edep = Ragged::from_nested(ValueKind::Float64, 2, &records).unwrap();
        let positions: Vec<Nested> = vec![
            vec![vec![0.0, 2.0], vec![], vec![5.0]].into(),
            vec![vec![0.0, 4.0]].into(),
        ];
        let x = Ragged::from_nested(ValueKind::Float64, 2, &positions).unwrap();
        let zero = edep.map_values(ValueKind::Float64, |_| 0.0);

        let out = estimate(&edep, &x, &zero, &zero).unwrap();
        assert_eq!(out.depth(), 1);
        assert_eq!(out.offsets()[0], vec![0, 3, 4]);
        assert_eq!(out.values(), &[1.0, 0.0, 0.0, 2.0]);
    }
}
