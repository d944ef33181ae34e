//! g4post-core: Core types for ragged detector-record processing.
//!
//! This crate provides the CSR ragged array used for every per-event,
//! per-window and per-detector quantity, the shared masked selection that
//! keeps correlated arrays aligned, and the named variable store the
//! pipeline stages read from and write to.
//!

pub mod error;
pub mod ragged;
pub mod selection;
pub mod store;

pub use error::{Error, Result};
pub use ragged::{Nested, Ragged, ValueKind};
pub use selection::Selection;
pub use store::VariableStore;
