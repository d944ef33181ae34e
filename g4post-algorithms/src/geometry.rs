//! Active-volume geometry: cylinders and per-volume polycones.
//!
//! A polycone is described by a piecewise-linear boundary in the `(r, z)`
//! half-plane around the volume's center. Geometry files map volume ids to
//! a center and two profiles (`orig` and the dead-layer corrected `dl`).

use g4post_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Closed cylinder around the z axis, optionally inverted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cylinder {
    /// Maximum radial distance from the z axis.
    pub radius: f64,
    /// Upper z bound (`h1`).
    pub z_top: f64,
    /// Lower z bound (`h2`).
    pub z_bottom: f64,
    /// Negate the containment test.
    pub inverse: bool,
}

impl Cylinder {
    /// Returns true if the point passes the (possibly inverted) test.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        let inside = x.hypot(y) <= self.radius && z >= self.z_bottom && z <= self.z_top;
        inside != self.inverse
    }
}

/// Profile of a volume to test hits against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    /// Dead-layer corrected (active) boundary.
    #[default]
    Dl,
    /// Nominal outer boundary.
    Orig,
}

/// Piecewise-linear radius-vs-z boundary around a center.
#[derive(Clone, Debug, PartialEq)]
pub struct Polycone {
    center: [f64; 3],
    r: Vec<f64>,
    z: Vec<f64>,
    z_min: f64,
    z_max: f64,
}

impl Polycone {
    /// Builds a polycone from its center and profile breakpoints.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if `r` and `z` differ in length or hold
    /// fewer than two points.
    pub fn new(center: [f64; 3], r: Vec<f64>, z: Vec<f64>) -> Result<Self> {
        if r.len() != z.len() {
            return Err(Error::Geometry(format!(
                "profile has {} radii and {} z values",
                r.len(),
                z.len()
            )));
        }
        if r.len() < 2 {
            return Err(Error::Geometry(
                "profile needs at least two points".to_string(),
            ));
        }
        let z_min = z.iter().copied().fold(f64::INFINITY, f64::min);
        let z_max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            center,
            r,
            z,
            z_min,
            z_max,
        })
    }

    /// Center the profile is expressed around.
    #[must_use]
    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// Containment test for a point in world coordinates.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        self.contains_local(x - self.center[0], y - self.center[1], z - self.center[2])
    }

    /// Containment test for a point already relative to the center.
    ///
    /// The first segment whose z span brackets the point decides; a
    /// horizontal segment uses the larger of its two radii.
    #[must_use]
    pub fn contains_local(&self, x: f64, y: f64, z: f64) -> bool {
        if z < self.z_min || z > self.z_max {
            return false;
        }
        let r_point = x.hypot(y);
        for i in 0..self.z.len() - 1 {
            let (z_low, z_high) = (self.z[i], self.z[i + 1]);
            let (r_low, r_high) = (self.r[i], self.r[i + 1]);
            if z < z_low.min(z_high) || z > z_low.max(z_high) {
                continue;
            }
            #[allow(clippy::float_cmp)]
            let r_interp = if z_high == z_low {
                r_low.max(r_high)
            } else {
                let t = (z - z_low) / (z_high - z_low);
                r_low + t * (r_high - r_low)
            };
            return r_point <= r_interp;
        }
        false
    }
}

#[derive(Deserialize)]
struct RawProfile {
    r: Vec<f64>,
    z: Vec<f64>,
}

#[derive(Deserialize)]
struct RawMesh {
    orig: Option<RawProfile>,
    dl: Option<RawProfile>,
}

#[derive(Deserialize)]
struct RawVolume {
    center: Vec<f64>,
    surface_mesh: RawMesh,
}

/// Immutable lookup table from volume id to polycone.
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    volumes: HashMap<i64, Polycone>,
}

impl Geometry {
    /// Parses a geometry description, compiling the chosen profile.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] for malformed JSON, non-integer volume
    /// keys, centers that are not 3-vectors, or invalid profiles.
    pub fn from_json(json: &str, surface: Surface) -> Result<Self> {
        let raw: HashMap<String, RawVolume> =
            serde_json::from_str(json).map_err(|e| Error::Geometry(e.to_string()))?;

        let mut volumes = HashMap::with_capacity(raw.len());
        for (key, volume) in raw {
            let id: i64 = key
                .trim()
                .parse()
                .map_err(|_| Error::Geometry(format!("volume key `{key}` is not an integer")))?;
            let center: [f64; 3] = volume.center.as_slice().try_into().map_err(|_| {
                Error::Geometry(format!(
                    "volume {id}: center has {} components",
                    volume.center.len()
                ))
            })?;
            let profile = match surface {
                Surface::Dl => volume.surface_mesh.dl,
                Surface::Orig => volume.surface_mesh.orig,
            }
            .ok_or_else(|| Error::Geometry(format!("volume {id}: missing {surface:?} profile")))?;
            let polycone = Polycone::new(center, profile.r, profile.z)
                .map_err(|e| e.context(format_args!("volume {id}")))?;
            volumes.insert(id, polycone);
        }
        Ok(Self { volumes })
    }

    /// Reads and parses a geometry file.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P, surface: Surface) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Geometry(format!("{}: {e}", path.display())))?;
        Self::from_json(&json, surface).map_err(|e| e.context(path.display()))
    }

    /// Polycone of a volume id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Polycone> {
        self.volumes.get(&id)
    }

    /// Number of volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Returns true if no volume is described.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// Process-wide cache of loaded geometries, shared read-only by all tasks.
#[derive(Debug, Default)]
pub struct GeometryRegistry {
    loaded: Mutex<HashMap<(PathBuf, Surface), Arc<Geometry>>>,
}

impl GeometryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the geometry for `path`, loading it on first use.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if loading fails; failures are not cached.
    pub fn load(&self, path: &Path, surface: Surface) -> Result<Arc<Geometry>> {
        let key = (path.to_path_buf(), surface);
        if let Some(geometry) = self.lock().get(&key) {
            return Ok(Arc::clone(geometry));
        }

        // Parsed without the lock; the first insert wins a concurrent load.
        let geometry = Arc::new(Geometry::from_file(path, surface)?);
        log::debug!(
            "loaded {} volumes from {}",
            geometry.len(),
            path.display()
        );
        Ok(Arc::clone(self.lock().entry(key).or_insert(geometry)))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(PathBuf, Surface), Arc<Geometry>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: &str = r#"{
        "1000001": {
            "center": [0.0, 0.0, 10.0],
            "surface_mesh": {
                "orig": {"r": [0.0, 40.0, 40.0, 0.0], "z": [0.0, 0.0, 30.0, 30.0]},
                "dl":   {"r": [0.0, 39.0, 39.0, 20.0], "z": [1.0, 1.0, 29.0, 29.0]}
            }
        }
    }"#;

    #[test]
    fn test_cylinder_contains() {
        let cylinder = Cylinder {
            radius: 10.0,
            z_top: 5.0,
            z_bottom: -5.0,
            inverse: false,
        };
        assert!(cylinder.contains(0.0, 0.0, 0.0));
        assert!(cylinder.contains(10.0, 0.0, 5.0));
        assert!(!cylinder.contains(10.0 + 1e-9, 0.0, 0.0));
        assert!(!cylinder.contains(0.0, 0.0, -5.1));

        let inverse = Cylinder {
            inverse: true,
            ..cylinder
        };
        for (x, y, z) in [(0.0, 0.0, 0.0), (11.0, 0.0, 0.0), (3.0, 4.0, 6.0)] {
            assert_ne!(cylinder.contains(x, y, z), inverse.contains(x, y, z));
        }
    }

    #[test]
    fn test_polycone_interpolation() {
        // Cone narrowing from r=10 at z=0 to r=0 at z=10.
        let cone = Polycone::new([0.0; 3], vec![10.0, 0.0], vec![0.0, 10.0]).unwrap();
        assert!(cone.contains_local(4.9, 0.0, 5.0));
        assert!(!cone.contains_local(5.1, 0.0, 5.0));
        assert!(!cone.contains_local(0.0, 0.0, 10.5));
        assert!(!cone.contains_local(0.0, 0.0, -0.5));
    }

    #[test]
    fn test_polycone_horizontal_segment_uses_outer_radius() {
        let can = Polycone::new(
            [0.0; 3],
            vec![0.0, 5.0, 5.0, 0.0],
            vec![0.0, 0.0, 8.0, 8.0],
        )
        .unwrap();
        assert!(can.contains_local(4.0, 0.0, 0.0));
        assert!(can.contains_local(3.0, 4.0, 4.0));
        assert!(!can.contains_local(3.0, 4.1, 4.0));
    }

    #[test]
    fn test_geometry_from_json_uses_surface() {
        let dl = Geometry::from_json(GEOMETRY, Surface::Dl).unwrap();
        let orig = Geometry::from_json(GEOMETRY, Surface::Orig).unwrap();
        assert_eq!(dl.len(), 1);

        // 39.5 mm off-axis at local z = 15: inside the nominal shape only.
        let dl_cone = dl.get(1_000_001).unwrap();
        let orig_cone = orig.get(1_000_001).unwrap();
        assert!(!dl_cone.contains(39.5, 0.0, 25.0));
        assert!(orig_cone.contains(39.5, 0.0, 25.0));
        assert!(dl.get(7).is_none());
    }

    #[test]
    fn test_geometry_rejects_malformed_input() {
        let bad_center = r#"{"5": {"center": [0, 0], "surface_mesh": {"dl": {"r": [0, 1], "z": [0, 1]}}}}"#;
        assert!(matches!(
            Geometry::from_json(bad_center, Surface::Dl),
            Err(Error::Geometry(_))
        ));

        let bad_key = r#"{"det": {"center": [0, 0, 0], "surface_mesh": {"dl": {"r": [0, 1], "z": [0, 1]}}}}"#;
        assert!(Geometry::from_json(bad_key, Surface::Dl).is_err());

        let bad_profile = r#"{"5": {"center": [0, 0, 0], "surface_mesh": {"dl": {"r": [0, 1, 2], "z": [0, 1]}}}}"#;
        assert!(Geometry::from_json(bad_profile, Surface::Dl).is_err());

        assert!(Geometry::from_json("[1, 2]", Surface::Dl).is_err());
        assert!(Geometry::from_json(GEOMETRY, Surface::Dl).is_ok());
    }

    #[test]
    fn test_registry_reports_missing_file() {
        let registry = GeometryRegistry::new();
        let result = registry.load(Path::new("/nonexistent/geometry.json"), Surface::Dl);
        assert!(matches!(result, Err(Error::Geometry(_))));
    }

    #[test]
    fn test_registry_shares_one_geometry_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geometry.json");
        fs::write(&path, GEOMETRY).unwrap();
        let registry = GeometryRegistry::new();

        let loaded: Vec<Arc<Geometry>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| registry.load(&path, Surface::Dl).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let cached = registry.load(&path, Surface::Dl).unwrap();
        assert!(loaded.iter().all(|g| Arc::ptr_eq(g, &cached)));
        let orig = registry.load(&path, Surface::Orig).unwrap();
        assert!(!Arc::ptr_eq(&orig, &cached));
    }
}
