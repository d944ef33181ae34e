//! Masked selection shared by correlated arrays.
//!
//! A [`Selection`] is computed once from a boolean mask over one structure
//! (for example the hits of every window of every event) and then applied to
//! every array that shares that structure. Deriving all outputs from one
//! selection keeps parallel arrays aligned: time, energy, volume and position
//! of a hit are either all kept or all dropped.
//!
//! Arrays may be shallower than the masked structure (their scalars map to the
//! elements of an intermediate level, e.g. one boundary per window) or deeper
//! (descendants follow their masked ancestor).

use crate::error::{Error, Result};
use crate::ragged::Ragged;
use std::borrow::Cow;

/// Keep flags for every level of a masked structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    layout: Vec<Vec<usize>>,
    keep: Vec<Vec<bool>>,
}

impl Selection {
    /// Selection from a mask array: every non-zero scalar keeps the element
    /// at the mask's deepest level.
    #[must_use]
    pub fn from_mask(mask: &Ragged) -> Self {
        let mut keep: Vec<Vec<bool>> = (0..mask.depth())
            .map(|level| vec![true; mask.level_len(level)])
            .collect();
        keep.push(mask.values().iter().map(|&v| v != 0.0).collect());
        Self {
            layout: mask.offsets().to_vec(),
            keep,
        }
    }

    /// Selection keeping the flagged elements of `level` of `structure`.
    ///
    /// Descendants of a dropped element are dropped as well.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `level` exceeds the structure's
    /// depth or `flags` does not have one entry per element of that level.
    pub fn at_level(structure: &Ragged, level: usize, flags: Vec<bool>) -> Result<Self> {
        let depth = structure.depth();
        if level > depth {
            return Err(Error::ShapeMismatch(format!(
                "mask level {level} deeper than structure depth {depth}"
            )));
        }
        if flags.len() != structure.level_len(level) {
            return Err(Error::ShapeMismatch(format!(
                "mask has {} flags, level {level} has {} elements",
                flags.len(),
                structure.level_len(level)
            )));
        }

        let mut keep: Vec<Vec<bool>> = (0..level)
            .map(|l| vec![true; structure.level_len(l)])
            .collect();
        keep.push(flags);
        for l in level + 1..=depth {
            let mut child = vec![false; structure.level_len(l)];
            for (element, &kept) in keep[l - 1].iter().enumerate() {
                if kept {
                    child[structure.list(l - 1, element)].fill(true);
                }
            }
            keep.push(child);
        }

        Ok(Self {
            layout: structure.offsets().to_vec(),
            keep,
        })
    }

    /// Drops every list below the record level that has no kept child.
    ///
    /// Pruning cascades upwards: a window whose detector buckets all became
    /// empty is removed together with them. Records are never removed.
    #[must_use]
    pub fn prune_empty(mut self) -> Self {
        for level in (1..self.depth()).rev() {
            let (upper, lower) = self.keep.split_at_mut(level + 1);
            let parents = &mut upper[level];
            let children = &lower[0];
            let offsets = &self.layout[level];
            for (element, kept) in parents.iter_mut().enumerate() {
                if *kept && !children[offsets[element]..offsets[element + 1]].contains(&true) {
                    *kept = false;
                }
            }
        }
        self
    }

    /// Depth of the masked structure.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layout.len()
    }

    /// Keep flags of `level`.
    #[must_use]
    pub fn flags(&self, level: usize) -> &[bool] {
        &self.keep[level]
    }

    /// Number of kept elements at `level`.
    #[must_use]
    pub fn kept(&self, level: usize) -> usize {
        self.keep[level].iter().filter(|&&k| k).count()
    }

    /// Applies the selection to one array sharing the masked structure.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the array's outer levels differ
    /// from the masked structure.
    pub fn apply(&self, field: &Ragged) -> Result<Ragged> {
        let shared = field.depth().min(self.depth());
        if field.offsets()[..shared] != self.layout[..shared]
            || field.level_len(shared) != self.keep[shared].len()
        {
            return Err(Error::ShapeMismatch(format!(
                "array of depth {} with {} scalars does not share the masked structure",
                field.depth(),
                field.values().len()
            )));
        }

        let mut chain: Vec<Cow<'_, [bool]>> = self.keep[..=shared]
            .iter()
            .map(|flags| Cow::Borrowed(flags.as_slice()))
            .collect();
        for level in shared + 1..=field.depth() {
            let mut child = vec![false; field.level_len(level)];
            for (element, &kept) in chain[level - 1].iter().enumerate() {
                if kept {
                    child[field.list(level - 1, element)].fill(true);
                }
            }
            chain.push(Cow::Owned(child));
        }

        let mut offsets = Vec::with_capacity(field.depth());
        for level in 0..field.depth() {
            let mut level_offsets = Vec::with_capacity(chain[level].len() + 1);
            level_offsets.push(0);
            let mut count = 0;
            for (element, &kept) in chain[level].iter().enumerate() {
                if kept {
                    count += chain[level + 1][field.list(level, element)]
                        .iter()
                        .filter(|&&k| k)
                        .count();
                    level_offsets.push(count);
                }
            }
            offsets.push(level_offsets);
        }

        let values = field
            .values()
            .iter()
            .zip(chain[field.depth()].iter())
            .filter(|(_, &kept)| kept)
            .map(|(&value, _)| value)
            .collect();

        Ragged::from_parts(field.kind(), offsets, values)
    }

    /// Applies the selection to every array of a correlated group.
    ///
    /// # Errors
    /// Fails on the first array that does not share the masked structure.
    pub fn apply_all(&self, fields: &[&Ragged]) -> Result<Vec<Ragged>> {
        fields.iter().map(|field| self.apply(field)).collect()
    }
}
