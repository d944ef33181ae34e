//! g4post-algorithms: Transformation modules and the pipeline engine.
//!
//! This crate provides the modules a pipeline is assembled from:
//! - **window** - greedy leader-gap temporal windowing
//! - **group_sensitive_volume** - static group masks or per-volume buckets
//! - **active_volume** - cylinder and per-volume polycone filters
//! - **coincidence_window** - cross-stream open-interval sums
//! - **r90_estimator** - energy containment radius
//! - **threshold** / **sum_energy** - elementwise cut and innermost sums
//!
//! Instructions are validated once ([`config`]) and compiled into a
//! [`Pipeline`] that runs over a [`g4post_core::VariableStore`].
//!
#![warn(missing_docs)]

pub mod active_volume;
pub mod coincidence;
pub mod config;
pub mod geometry;
pub mod group;
mod pipeline;
pub mod r90;
pub mod reduce;
pub mod window;

pub use active_volume::{ActiveVolumeFilter, ActiveVolumeParams, VolumeTest};
pub use coincidence::{correlate, CoincidenceParams};
pub use config::{
    merge_params, parse_instructions, Instruction, InstructionSpec, ModuleKind, ModuleParams,
    ParamMap,
};
pub use geometry::{Cylinder, Geometry, GeometryRegistry, Polycone, Surface};
pub use group::{GroupParams, Grouping, SensitiveVolumes};
pub use pipeline::{Pipeline, Stage, Step};
pub use reduce::{sum_energy, Threshold};
pub use window::{WindowParams, WindowedFields, Windowing, WINDOW_PLACEHOLDER};
