//! Grouping of hits by sensitive volume.
//!
//! Two modes share one module:
//! - with a `group` label, hits outside the volumes of that group are masked
//!   out (shape otherwise unchanged);
//! - without one, every innermost list is split into per-detector buckets
//!   ordered by the first appearance of each volume id.

use g4post_core::{Error, Ragged, Result, Selection, ValueKind};
use serde::Deserialize;
use std::collections::HashSet;

/// Position of the volume-id field among the grouped inputs.
pub const VOLUME_SLOT: usize = 2;

/// Label of a detector group: a number or a name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum GroupLabel {
    /// Numeric label.
    Id(i64),
    /// Named label.
    Name(String),
}

/// Volume-to-group assignment table.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SensitiveVolumes {
    /// Volume ids.
    #[serde(rename = "sensVolID")]
    pub volume_ids: Vec<i64>,
    /// Group of each volume id.
    pub group: Vec<GroupLabel>,
}

/// Grouping parameters.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GroupParams {
    /// Group to keep; absent selects automatic bucketing.
    #[serde(default)]
    pub group: Option<GroupLabel>,
    /// Required when `group` is set.
    #[serde(default)]
    pub sensitive_volumes: Option<SensitiveVolumes>,
}

/// Grouping mode resolved from [`GroupParams`].
#[derive(Clone, Debug, PartialEq)]
pub enum Grouping {
    /// Keep hits whose volume belongs to the group.
    Static {
        /// Volume ids of the selected group.
        members: HashSet<i64>,
    },
    /// Bucket hits per volume id.
    Automatic,
}

impl Grouping {
    /// Resolves the grouping mode.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a group is requested without a
    /// consistent `sensitive_volumes` table.
    pub fn from_params(params: &GroupParams) -> Result<Self> {
        let Some(label) = &params.group else {
            return Ok(Self::Automatic);
        };
        let table = params.sensitive_volumes.as_ref().ok_or_else(|| {
            Error::Config("`group` requires a `sensitive_volumes` table".to_string())
        })?;
        if table.volume_ids.len() != table.group.len() {
            return Err(Error::Config(format!(
                "sensitive_volumes has {} ids but {} group labels",
                table.volume_ids.len(),
                table.group.len()
            )));
        }
        let members = table
            .volume_ids
            .iter()
            .zip(&table.group)
            .filter(|(_, g)| *g == label)
            .map(|(&id, _)| id)
            .collect();
        Ok(Self::Static { members })
    }

    /// Applies the grouping to correlated fields.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if fewer than three fields are given,
    /// the fields have no list level, or any field diverges from the
    /// volume field's layout.
    pub fn run(&self, fields: &[&Ragged]) -> Result<Vec<Ragged>> {
        let Some(&volumes) = fields.get(VOLUME_SLOT) else {
            return Err(Error::ShapeMismatch(format!(
                "grouping needs at least {} fields, got {}",
                VOLUME_SLOT + 1,
                fields.len()
            )));
        };
        if volumes.depth() == 0 {
            return Err(Error::ShapeMismatch(
                "grouping needs per-record hit lists".to_string(),
            ));
        }
        for (index, field) in fields.iter().enumerate() {
            volumes.check_same_layout(field, &format!("grouped field {index}"))?;
        }

        match self {
            Self::Static { members } => {
                #[allow(clippy::cast_possible_truncation)]
                let mask = volumes.map_values(ValueKind::Bool, |v| {
                    f64::from(u8::from(members.contains(&(v as i64))))
                });
                Selection::from_mask(&mask).apply_all(fields)
            }
            Self::Automatic => {
                let plan = Regrouping::by_volume(volumes);
                fields.iter().map(|field| plan.apply(field)).collect()
            }
        }
    }
}

/// Permutation that splits every innermost list into volume buckets.
#[derive(Clone, Debug)]
struct Regrouping {
    bucket_offsets: Vec<usize>,
    hit_offsets: Vec<usize>,
    order: Vec<usize>,
}

impl Regrouping {
    #[allow(clippy::cast_possible_truncation)]
    fn by_volume(volumes: &Ragged) -> Self {
        let mut bucket_offsets = vec![0];
        let mut hit_offsets = vec![0];
        let mut order = Vec::with_capacity(volumes.values().len());
        let mut ids: Vec<i64> = Vec::new();

        for range in volumes.innermost_ranges() {
            ids.clear();
            for &v in &volumes.values()[range.clone()] {
                let id = v as i64;
                if id >= 0 && !ids.contains(&id) {
                    ids.push(id);
                }
            }
            for &id in &ids {
                order.extend(range.clone().filter(|&k| volumes.values()[k] as i64 == id));
                hit_offsets.push(order.len());
            }
            bucket_offsets.push(hit_offsets.len() - 1);
        }

        Self {
            bucket_offsets,
            hit_offsets,
            order,
        }
    }

    fn apply(&self, field: &Ragged) -> Result<Ragged> {
        let depth = field.depth();
        let mut offsets = field.offsets()[..depth - 1].to_vec();
        offsets.push(self.bucket_offsets.clone());
        offsets.push(self.hit_offsets.clone());
        let values = self.order.iter().map(|&k| field.values()[k]).collect();
        Ragged::from_parts(field.kind(), offsets, values)
    }
}
