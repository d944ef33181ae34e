//! Ragged arrays stored in a compressed (CSR) layout.
//!
//! A [`Ragged`] keeps every scalar in one flat buffer and describes the
//! nesting with one offset vector per list level, outermost first. Level 0
//! holds the records (events) and the scalars sit at level [`Ragged::depth`].
//! `offsets[k][e]..offsets[k][e + 1]` is the range of children of element `e`
//! of level `k` inside level `k + 1`.
//!
//! Algorithms iterate offset ranges with plain loops instead of walking a
//! tree of boxed lists.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use std::ops::Range;

/// Logical type of the scalars of a [`Ragged`] array.
///
/// Values are always held as `f64`; the kind decides how they are
/// serialized. `Int64` values are exact up to 2^53.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ValueKind {
    #[default]
    Float64,
    Int64,
    Bool,
}

impl ValueKind {
    /// Common kind of two arrays being concatenated.
    ///
    /// Integers widen to floats; booleans only combine with booleans.
    #[must_use]
    pub fn unify(self, other: Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Self::Float64, Self::Int64) | (Self::Int64, Self::Float64) => Some(Self::Float64),
            _ => None,
        }
    }

    /// Short name used in structure descriptors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Int64 => "int64",
            Self::Bool => "bool",
        }
    }
}

/// Tree representation of one record, used to build and inspect arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested {
    Value(f64),
    List(Vec<Nested>),
}

impl Nested {
    /// Number of list levels above the deepest scalar (empty list = 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Value(_) => 0,
            Self::List(items) => 1 + items.iter().map(Nested::depth).max().unwrap_or(0),
        }
    }
}

impl From<f64> for Nested {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

impl<T: Into<Nested>> From<Vec<T>> for Nested {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Arbitrarily deep nested numeric array with a flat value buffer.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ragged {
    kind: ValueKind,
    offsets: Vec<Vec<usize>>,
    values: Vec<f64>,
}

impl Ragged {
    /// Creates a depth-0 array holding one scalar per record.
    #[must_use]
    pub fn scalars(kind: ValueKind, values: Vec<f64>) -> Self {
        Self {
            kind,
            offsets: Vec::new(),
            values,
        }
    }

    /// Creates a depth-1 array from one list of values per record.
    pub fn from_lists<I, L>(kind: ValueKind, lists: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: IntoIterator<Item = f64>,
    {
        let mut offsets = vec![0];
        let mut values = Vec::new();
        for list in lists {
            values.extend(list);
            offsets.push(values.len());
        }
        Self {
            kind,
            offsets: vec![offsets],
            values,
        }
    }

    /// Creates an array from raw offsets and values, validating the layout.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if any offset vector is empty, does
    /// not start at zero, decreases, or does not end at the element count of
    /// the level below it.
    pub fn from_parts(kind: ValueKind, offsets: Vec<Vec<usize>>, values: Vec<f64>) -> Result<Self> {
        for (level, level_offsets) in offsets.iter().enumerate() {
            if level_offsets.first() != Some(&0) {
                return Err(Error::ShapeMismatch(format!(
                    "offsets of level {level} must start at 0"
                )));
            }
            if level_offsets.windows(2).any(|w| w[1] < w[0]) {
                return Err(Error::ShapeMismatch(format!(
                    "offsets of level {level} decrease"
                )));
            }
            let below = offsets
                .get(level + 1)
                .map_or(values.len(), |next| next.len().saturating_sub(1));
            if level_offsets.last() != Some(&below) {
                return Err(Error::ShapeMismatch(format!(
                    "offsets of level {level} end at {:?}, level below has {below} elements",
                    level_offsets.last()
                )));
            }
        }
        Ok(Self {
            kind,
            offsets,
            values,
        })
    }

    /// Builds an array of the given depth from record trees.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if a record has a scalar where a list
    /// is expected or the other way round.
    pub fn from_nested(kind: ValueKind, depth: usize, records: &[Nested]) -> Result<Self> {
        let mut offsets = vec![vec![0]; depth];
        let mut values = Vec::new();
        for record in records {
            push_node(record, 0, depth, &mut offsets, &mut values)?;
        }
        Ok(Self {
            kind,
            offsets,
            values,
        })
    }

    /// Converts the array back into one tree per record.
    #[must_use]
    pub fn to_nested(&self) -> Vec<Nested> {
        (0..self.len()).map(|index| self.node(0, index)).collect()
    }

    fn node(&self, level: usize, index: usize) -> Nested {
        if level == self.depth() {
            Nested::Value(self.values[index])
        } else {
            Nested::List(
                self.list(level, index)
                    .map(|child| self.node(level + 1, child))
                    .collect(),
            )
        }
    }

    /// Logical type of the scalars.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Returns the same array tagged with another value kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Number of list levels above the scalars.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.level_len(0)
    }

    /// Returns true if the array holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements at `level` (`depth()` counts the scalars).
    ///
    /// # Panics
    /// Panics if `level > depth()`.
    #[must_use]
    pub fn level_len(&self, level: usize) -> usize {
        assert!(level <= self.depth(), "level {level} out of range");
        match self.offsets.get(level) {
            Some(level_offsets) => level_offsets.len() - 1,
            None => self.values.len(),
        }
    }

    /// Flat scalar buffer.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Offset vectors, outermost level first.
    #[must_use]
    pub fn offsets(&self) -> &[Vec<usize>] {
        &self.offsets
    }

    /// Consumes the array into its raw parts.
    #[must_use]
    pub fn into_parts(self) -> (ValueKind, Vec<Vec<usize>>, Vec<f64>) {
        (self.kind, self.offsets, self.values)
    }

    /// Range of the children of element `index` of `level` in `level + 1`.
    #[must_use]
    pub fn list(&self, level: usize, index: usize) -> Range<usize> {
        let level_offsets = &self.offsets[level];
        level_offsets[index]..level_offsets[index + 1]
    }

    /// Iterates the value ranges of the innermost lists; empty at depth 0.
    pub fn innermost_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let last = self.offsets.last().map_or(&[][..], Vec::as_slice);
        last.windows(2).map(|w| w[0]..w[1])
    }

    /// Scalars of the innermost list `index`.
    #[must_use]
    pub fn innermost(&self, index: usize) -> &[f64] {
        &self.values[self.list(self.depth() - 1, index)]
    }

    /// True when both arrays have identical nesting and scalar count.
    #[must_use]
    pub fn same_layout(&self, other: &Ragged) -> bool {
        self.offsets == other.offsets && self.values.len() == other.values.len()
    }

    /// True when `self` is `other` truncated at level `self.depth()`: its
    /// scalars correspond one-to-one to the elements of that level.
    #[must_use]
    pub fn is_prefix_layout_of(&self, other: &Ragged) -> bool {
        self.depth() < other.depth()
            && self.offsets[..] == other.offsets[..self.depth()]
            && self.values.len() == other.level_len(self.depth())
    }

    /// Fails unless `other` has the same layout as `self`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] naming `what`.
    pub fn check_same_layout(&self, other: &Ragged, what: &str) -> Result<()> {
        if self.same_layout(other) {
            Ok(())
        } else {
            Err(Error::ShapeMismatch(format!(
                "{what}: depth {} / {} scalars vs depth {} / {} scalars",
                other.depth(),
                other.values.len(),
                self.depth(),
                self.values.len()
            )))
        }
    }

    /// Applies `f` to every scalar, keeping the layout.
    #[must_use]
    pub fn map_values(&self, kind: ValueKind, f: impl Fn(f64) -> f64) -> Ragged {
        Ragged {
            kind,
            offsets: self.offsets.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Folds every innermost list into one scalar, removing one level.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] for depth-0 arrays.
    pub fn reduce_innermost(
        &self,
        kind: ValueKind,
        mut f: impl FnMut(&[f64]) -> f64,
    ) -> Result<Ragged> {
        if self.depth() == 0 {
            return Err(Error::ShapeMismatch(
                "cannot reduce an array without list levels".to_string(),
            ));
        }
        let values = self
            .innermost_ranges()
            .map(|range| f(&self.values[range]))
            .collect();
        Ok(Ragged {
            kind,
            offsets: self.offsets[..self.depth() - 1].to_vec(),
            values,
        })
    }

    /// Adds empty levels to an array without scalars so it reaches `depth`.
    fn deepen_empty(&mut self, depth: usize) -> bool {
        if self.depth() > depth || (self.depth() < depth && !self.values.is_empty()) {
            return false;
        }
        while self.depth() < depth {
            self.offsets.push(vec![0]);
        }
        true
    }

    /// Appends the records of `other` after the records of `self`.
    ///
    /// An array without scalars may have fewer levels than the other side;
    /// it is deepened with empty levels first.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the depths or kinds are
    /// incompatible.
    pub fn extend(&mut self, other: &Ragged) -> Result<()> {
        // Arrays without records adopt the other side's kind and depth.
        if other.is_empty() && other.depth() <= self.depth() {
            return Ok(());
        }
        if self.is_empty() && self.depth() <= other.depth() {
            *self = other.clone();
            return Ok(());
        }
        let depth = self.depth().max(other.depth());
        let mut other = other.clone();
        if !self.deepen_empty(depth) || !other.deepen_empty(depth) {
            return Err(Error::ShapeMismatch(format!(
                "cannot concatenate arrays of depth {} and {}",
                self.depth(),
                other.depth()
            )));
        }
        self.kind = self.kind.unify(other.kind).ok_or_else(|| {
            Error::ShapeMismatch(format!(
                "cannot concatenate {} and {} values",
                self.kind.as_str(),
                other.kind.as_str()
            ))
        })?;

        for (mine, theirs) in self.offsets.iter_mut().zip(&other.offsets) {
            let base = *mine.last().unwrap_or(&0);
            mine.extend(theirs[1..].iter().map(|&o| o + base));
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }

    /// Concatenates arrays along the record axis.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `parts` is empty or the parts are
    /// incompatible.
    pub fn concat(parts: &[Ragged]) -> Result<Ragged> {
        let (first, rest) = parts.split_first().ok_or_else(|| {
            Error::ShapeMismatch("cannot concatenate zero arrays".to_string())
        })?;
        let mut out = first.clone();
        for part in rest {
            out.extend(part)?;
        }
        Ok(out)
    }
}

fn push_node(
    node: &Nested,
    level: usize,
    depth: usize,
    offsets: &mut [Vec<usize>],
    values: &mut Vec<f64>,
) -> Result<()> {
    match node {
        Nested::Value(value) if level == depth => {
            values.push(*value);
            Ok(())
        }
        Nested::List(items) if level < depth => {
            for item in items {
                push_node(item, level + 1, depth, offsets, values)?;
            }
            let end = if level + 1 < depth {
                offsets[level + 1].len() - 1
            } else {
                values.len()
            };
            offsets[level].push(end);
            Ok(())
        }
        Nested::Value(_) => Err(Error::ShapeMismatch(format!(
            "found a scalar at nesting level {level}, expected depth {depth}"
        ))),
        Nested::List(_) => Err(Error::ShapeMismatch(format!(
            "found a list at nesting level {level}, expected scalars"
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;

    fn windows() -> Ragged {
        let records: Vec<Nested> = vec![
            vec![vec![1.0, 2.0], vec![3.0]].into(),
            Nested::List(vec![]),
            vec![vec![4.0], vec![], vec![5.0, 6.0]].into(),
        ];
        Ragged::from_nested(ValueKind::Float64, 2, &records).unwrap()
    }

    #[test]
    fn test_from_nested_layout() {
        let array = windows();
        assert_eq!(array.depth(), 2);
        assert_eq!(array.len(), 3);
        assert_eq!(array.offsets()[0], vec![0, 2, 2, 5]);
        assert_eq!(array.offsets()[1], vec![0, 2, 3, 4, 4, 6]);
        assert_eq!(array.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(array.innermost(4), &[5.0, 6.0]);
    }

    #[test]
    fn test_nested_roundtrip() {
        let array = windows();
        let rebuilt = Ragged::from_nested(ValueKind::Float64, 2, &array.to_nested()).unwrap();
        assert_eq!(rebuilt, array);
    }

    #[test]
    fn test_from_nested_rejects_mixed_depth() {
        let records: Vec<Nested> = vec![vec![1.0].into(), vec![vec![2.0]].into()];
        let result = Ragged::from_nested(ValueKind::Float64, 1, &records);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_from_parts_validation() {
        assert!(Ragged::from_parts(ValueKind::Int64, vec![vec![0, 2]], vec![1.0, 2.0]).is_ok());
        assert!(Ragged::from_parts(ValueKind::Int64, vec![vec![0, 3]], vec![1.0, 2.0]).is_err());
        assert!(Ragged::from_parts(ValueKind::Int64, vec![vec![1, 2]], vec![1.0, 2.0]).is_err());
        assert!(
            Ragged::from_parts(ValueKind::Int64, vec![vec![0, 2, 1, 2]], vec![1.0, 2.0]).is_err()
        );
    }

    #[test]
    fn test_reduce_innermost() {
        let sums = windows()
            .reduce_innermost(ValueKind::Float64, |v| v.iter().sum())
            .unwrap();
        assert_eq!(sums.depth(), 1);
        assert_eq!(sums.values(), &[3.0, 3.0, 4.0, 0.0, 11.0]);
        assert_eq!(sums.offsets()[0], vec![0, 2, 2, 5]);
    }

    #[test]
    fn test_concat_shifts_offsets() {
        let a = Ragged::from_lists(ValueKind::Int64, vec![vec![1.0], vec![2.0, 3.0]]);
        let b = Ragged::from_lists(ValueKind::Float64, vec![vec![], vec![4.5]]);
        let joined = Ragged::concat(&[a, b]).unwrap();
        assert_eq!(joined.kind(), ValueKind::Float64);
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.offsets()[0], vec![0, 1, 3, 3, 4]);
        assert_eq!(joined.values(), &[1.0, 2.0, 3.0, 4.5]);
    }

    #[test]
    fn test_concat_deepens_empty_parts() {
        let shallow = Ragged::from_lists(ValueKind::Float64, vec![Vec::<f64>::new()]);
        let deep = windows();
        let joined = Ragged::concat(&[shallow, deep]).unwrap();
        assert_eq!(joined.depth(), 2);
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.offsets()[0], vec![0, 0, 2, 2, 5]);
    }

    #[test]
    fn test_concat_rejects_depth_and_kind_mismatch() {
        let flat = Ragged::from_lists(ValueKind::Float64, vec![vec![1.0]]);
        assert!(Ragged::concat(&[flat.clone(), windows()]).is_err());
        let flags = Ragged::from_lists(ValueKind::Bool, vec![vec![1.0]]);
        assert!(Ragged::concat(&[flat, flags]).is_err());
    }

    #[test]
    fn test_extend_with_zero_records_adopts_other_side() {
        let mut acc = Ragged::default();
        let flags = Ragged::from_lists(ValueKind::Bool, vec![vec![1.0, 0.0]]);
        acc.extend(&flags).unwrap();
        assert_eq!(acc, flags);

        acc.extend(&Ragged::default()).unwrap();
        assert_eq!(acc, flags);
    }

    #[test]
    fn test_prefix_layout() {
        let hits = windows();
        let per_window = hits
            .reduce_innermost(ValueKind::Float64, |v| v.len() as f64)
            .unwrap();
        assert!(per_window.is_prefix_layout_of(&hits));
        assert!(!hits.is_prefix_layout_of(&per_window));
        assert!(hits.check_same_layout(&per_window, "edep").is_err());
    }
}
