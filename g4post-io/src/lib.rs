//! g4post-io: Input sources, HDF5 containers and task orchestration.
//!
//! This crate connects the pipeline engine to files:
//! - **config** - the run configuration document
//! - **source** - chunked line-delimited JSON and whole-file HDF5 inputs
//! - **form** - flattening ragged columns into typed buffers
//! - **hdf5** - the output container (feature `hdf5`)
//! - **manager** - one pipeline over one file
//! - **orchestrator** - one task per file on a rayon pool
//!

pub mod config;
mod error;
pub mod form;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod manager;
pub mod orchestrator;
pub mod source;

pub use config::{InputConfig, InputFormat, IoConfig, RunConfig, RunMode, RunParams};
pub use error::{Error, Result};
pub use form::{Columns, Form};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_container, write_container, ContainerWriteOptions, DEFAULT_GROUP};
pub use manager::DataManager;
pub use orchestrator::{discover_inputs, output_path, Orchestrator, RunSummary, Task};
pub use source::{InputSource, JsonlSource};
