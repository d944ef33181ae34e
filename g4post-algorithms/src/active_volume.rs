//! Active-volume filtering of hits.
//!
//! Hits are tested against a cylinder or against the polycone of their own
//! volume. The resulting hit mask becomes one pruned [`Selection`] that is
//! applied to every correlated field, so lists emptied by the filter
//! disappear together with their parent-level values.

use crate::geometry::{Cylinder, Geometry, GeometryRegistry, Surface};
use g4post_core::{Error, Ragged, Result, Selection, ValueKind};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Number of correlated input fields: `[lead, edep, vol, x, y, z]`.
pub const ACTIVE_VOLUME_INPUTS: usize = 6;

const VOL: usize = 2;
const POS_X: usize = 3;
const POS_Y: usize = 4;
const POS_Z: usize = 5;

/// Reduced volume id of a list left empty by the filter.
pub const NO_VOLUME: f64 = -1.0;

const fn default_volume_threshold() -> i64 {
    1_000_000
}

/// Cylinder bounds as written in the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct CylinderConditions {
    /// Radius.
    pub r: f64,
    /// Upper z bound.
    pub h1: f64,
    /// Lower z bound.
    pub h2: f64,
}

/// Active-volume parameters, selected by the `type` key.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActiveVolumeParams {
    /// Fixed cylinder around the z axis.
    Cylinder {
        /// Bounds of the cylinder.
        conditions: CylinderConditions,
        /// Keep hits outside instead of inside.
        #[serde(default)]
        inverse: bool,
    },
    /// Per-volume polycones read from a geometry file.
    #[serde(alias = "deadlayer")]
    Polycone {
        /// Geometry file.
        file: PathBuf,
        /// Volume ids at or below this value are never active.
        #[serde(default = "default_volume_threshold")]
        volume_threshold: i64,
        /// Profile to test against.
        #[serde(default)]
        surface: Surface,
    },
}

/// Compiled containment test.
#[derive(Clone, Debug)]
pub enum VolumeTest {
    /// Same cylinder for every hit.
    Cylinder(Cylinder),
    /// Polycone of the hit's volume.
    Polycone {
        /// Shared geometry table.
        geometry: Arc<Geometry>,
        /// Volume ids at or below this value are rejected.
        volume_threshold: i64,
    },
}

impl VolumeTest {
    /// Compiles the test, loading geometry files through `registry`.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if the geometry file cannot be loaded.
    pub fn from_params(params: &ActiveVolumeParams, registry: &GeometryRegistry) -> Result<Self> {
        Ok(match params {
            ActiveVolumeParams::Cylinder {
                conditions,
                inverse,
            } => Self::Cylinder(Cylinder {
                radius: conditions.r,
                z_top: conditions.h1,
                z_bottom: conditions.h2,
                inverse: *inverse,
            }),
            ActiveVolumeParams::Polycone {
                file,
                volume_threshold,
                surface,
            } => Self::Polycone {
                geometry: registry.load(file, *surface)?,
                volume_threshold: *volume_threshold,
            },
        })
    }

    /// Tests one hit.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if an active volume id has no polycone.
    #[allow(clippy::cast_possible_truncation)]
    pub fn contains(&self, vol: f64, x: f64, y: f64, z: f64) -> Result<bool> {
        match self {
            Self::Cylinder(cylinder) => Ok(cylinder.contains(x, y, z)),
            Self::Polycone {
                geometry,
                volume_threshold,
            } => {
                let id = vol as i64;
                if id <= *volume_threshold {
                    return Ok(false);
                }
                let polycone = geometry.get(id).ok_or_else(|| {
                    Error::Geometry(format!("volume {id} is not described in the geometry"))
                })?;
                Ok(polycone.contains(x, y, z))
            }
        }
    }
}

/// Filters correlated fields to hits inside the active volume.
#[derive(Clone, Debug)]
pub struct ActiveVolumeFilter {
    test: VolumeTest,
}

impl ActiveVolumeFilter {
    /// Creates the filter.
    #[must_use]
    pub fn new(test: VolumeTest) -> Self {
        Self { test }
    }

    /// Boolean mask over the hits of `vol`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the positions diverge from the
    /// volume layout, or [`Error::Geometry`] for an unknown active volume.
    pub fn hit_mask(&self, vol: &Ragged, x: &Ragged, y: &Ragged, z: &Ragged) -> Result<Ragged> {
        vol.check_same_layout(x, "x position")?;
        vol.check_same_layout(y, "y position")?;
        vol.check_same_layout(z, "z position")?;

        let mut flags = Vec::with_capacity(vol.values().len());
        for (((&v, &px), &py), &pz) in vol
            .values()
            .iter()
            .zip(x.values())
            .zip(y.values())
            .zip(z.values())
        {
            flags.push(f64::from(u8::from(self.test.contains(v, px, py, pz)?)));
        }
        Ragged::from_parts(ValueKind::Bool, vol.offsets().to_vec(), flags)
    }

    /// Filters `[lead, edep, vol, x, y, z]` and returns `n_outputs` arrays.
    ///
    /// The first six outputs are the filtered inputs in order. A seventh
    /// output holds the first volume id of every innermost list of the
    /// filtered volumes ([`NO_VOLUME`] when the list is empty).
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an unsupported output count,
    /// [`Error::ShapeMismatch`] if the fields are not correlated with the
    /// hits, or [`Error::Geometry`] for an unknown active volume.
    pub fn run(&self, fields: &[&Ragged], n_outputs: usize) -> Result<Vec<Ragged>> {
        if fields.len() != ACTIVE_VOLUME_INPUTS {
            return Err(Error::ShapeMismatch(format!(
                "active volume needs {ACTIVE_VOLUME_INPUTS} fields, got {}",
                fields.len()
            )));
        }
        if n_outputs == 0 || n_outputs > ACTIVE_VOLUME_INPUTS + 1 {
            return Err(Error::Config(format!(
                "active volume produces 1 to {} outputs, {n_outputs} requested",
                ACTIVE_VOLUME_INPUTS + 1
            )));
        }
        let vol = fields[VOL];
        if vol.depth() == 0 {
            return Err(Error::ShapeMismatch(
                "active volume needs per-record hit lists".to_string(),
            ));
        }
        for (index, field) in fields[..VOL].iter().enumerate() {
            if !(vol.same_layout(field) || field.is_prefix_layout_of(vol)) {
                return Err(Error::ShapeMismatch(format!(
                    "field {index} is neither hit-level nor a parent level of the hits"
                )));
            }
        }

        let mask = self.hit_mask(vol, fields[POS_X], fields[POS_Y], fields[POS_Z])?;
        let selection = Selection::from_mask(&mask).prune_empty();

        let mut outputs = selection.apply_all(&fields[..n_outputs.min(ACTIVE_VOLUME_INPUTS)])?;
        if n_outputs > ACTIVE_VOLUME_INPUTS {
            let reduced = selection.apply(vol)?.reduce_innermost(ValueKind::Int64, |list| {
                list.first().copied().unwrap_or(NO_VOLUME)
            })?;
            outputs.push(reduced);
        }
        Ok(outputs)
    }
}
