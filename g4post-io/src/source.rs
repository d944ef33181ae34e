//! Input sources yielding chunks of records.
//!
//! A source is an iterator of [`Columns`] chunks holding the requested
//! fields. Line-delimited JSON is streamed `step_size` events at a time;
//! containers written by a previous run are read whole.

use crate::config::InputFormat;
use crate::form::Columns;
use crate::{Error, Result};
use g4post_core::{Nested, Ragged, ValueKind};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use sysinfo::System;

/// Streaming reader over one JSON object per line.
pub struct JsonlSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    fields: Vec<String>,
    step_size: usize,
    line_no: usize,
    finished: bool,
}

impl JsonlSource {
    /// Opens `path`, extracting `fields` in chunks of `step_size` events
    /// (0 reads the whole file as one chunk).
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, fields: Vec<String>, step_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            fields,
            step_size,
            line_no: 0,
            finished: false,
        })
    }

    fn read_chunk(&mut self) -> Result<Option<Columns>> {
        let mut events = Vec::new();
        while self.step_size == 0 || events.len() < self.step_size {
            let Some(line) = self.lines.next() else {
                self.finished = true;
                break;
            };
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event: Value = serde_json::from_str(&line).map_err(|e| {
                Error::InvalidFormat(format!("{}:{}: {e}", self.path.display(), self.line_no))
            })?;
            if !event.is_object() {
                return Err(Error::InvalidFormat(format!(
                    "{}:{}: event is not a JSON object",
                    self.path.display(),
                    self.line_no
                )));
            }
            events.push(event);
        }
        if events.is_empty() {
            return Ok(None);
        }

        let mut columns = Columns::new(events.len());
        for field in &self.fields {
            let values = events
                .iter()
                .map(|event| {
                    event
                        .get(field)
                        .ok_or_else(|| g4post_core::Error::MissingKey(field.clone()))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            columns.push(field.clone(), column_from_json(field, &values)?)?;
        }
        Ok(Some(columns))
    }
}

impl Iterator for JsonlSource {
    type Item = Result<Columns>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(columns)) => Some(Ok(columns)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Builds one column from per-event JSON values, inferring kind and depth.
///
/// Integers give `Int64`, any float widens the column to `Float64`, and
/// booleans must not mix with numbers.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for non-numeric values or mixed kinds,
/// and a shape error if events nest to different depths.
pub fn column_from_json(name: &str, values: &[&Value]) -> Result<Ragged> {
    let mut kind = None;
    let records = values
        .iter()
        .map(|value| to_nested(value, &mut kind))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| match e {
            Error::InvalidFormat(msg) => Error::InvalidFormat(format!("field `{name}`: {msg}")),
            other => other,
        })?;
    let depth = records.iter().map(Nested::depth).max().unwrap_or(0);
    Ok(Ragged::from_nested(kind.unwrap_or_default(), depth, &records)
        .map_err(|e| e.context(format_args!("field `{name}`")))?)
}

fn to_nested(value: &Value, kind: &mut Option<ValueKind>) -> Result<Nested> {
    let (scalar, scalar_kind) = match value {
        Value::Array(items) => {
            return items
                .iter()
                .map(|item| to_nested(item, kind))
                .collect::<Result<Vec<_>>>()
                .map(Nested::List);
        }
        Value::Bool(flag) => (f64::from(u8::from(*flag)), ValueKind::Bool),
        Value::Number(number) => {
            let scalar_kind = if number.is_f64() {
                ValueKind::Float64
            } else {
                ValueKind::Int64
            };
            let scalar = number
                .as_f64()
                .ok_or_else(|| Error::InvalidFormat(format!("number {number} is not representable")))?;
            (scalar, scalar_kind)
        }
        other => {
            return Err(Error::InvalidFormat(format!(
                "expected numbers, booleans or arrays, found {other}"
            )));
        }
    };
    *kind = Some(match *kind {
        None => scalar_kind,
        Some(current) => current.unify(scalar_kind).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "mixes {} and {} values",
                current.as_str(),
                scalar_kind.as_str()
            ))
        })?,
    });
    Ok(Nested::Value(scalar))
}

/// Reads a whole container file, keeping only the requested fields.
///
/// # Errors
/// Returns an error if the container cannot be read, or
/// [`g4post_core::Error::MissingKey`] for an absent field.
#[cfg(feature = "hdf5")]
pub fn read_hdf5_source(path: &Path, group: &str, fields: &[String]) -> Result<Columns> {
    warn_if_larger_than_memory(path);
    let stored = crate::hdf5::read_container(path, group)?;
    let mut columns = Columns::new(stored.len());
    for field in fields {
        let column = stored
            .get(field)
            .ok_or_else(|| g4post_core::Error::MissingKey(field.clone()))?;
        columns.push(field.clone(), column.clone())?;
    }
    Ok(columns)
}

/// Logs a warning when a whole-file read may exhaust memory.
pub fn warn_if_larger_than_memory(path: &Path) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available > 0 && metadata.len() > available / 2 {
        log::warn!(
            "{} is {} bytes, more than half of the {available} bytes of available memory",
            path.display(),
            metadata.len()
        );
    }
}

/// Source of record chunks for one input file.
pub enum InputSource {
    /// Streaming line-delimited JSON.
    Jsonl(JsonlSource),
    /// Fully materialized records, yielded once.
    Loaded(Option<Columns>),
}

impl InputSource {
    /// Opens `path` in `format`, extracting `fields`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read, or
    /// [`Error::UnsupportedFormat`] when HDF5 support is not compiled in.
    pub fn open(
        path: &Path,
        format: InputFormat,
        group: &str,
        fields: Vec<String>,
        step_size: usize,
    ) -> Result<Self> {
        match format {
            InputFormat::Jsonl => Ok(Self::Jsonl(JsonlSource::open(path, fields, step_size)?)),
            #[cfg(feature = "hdf5")]
            InputFormat::Hdf5 => Ok(Self::Loaded(Some(read_hdf5_source(path, group, &fields)?))),
            #[cfg(not(feature = "hdf5"))]
            InputFormat::Hdf5 => {
                let _ = (group, fields, step_size);
                Err(Error::UnsupportedFormat(
                    "hdf5 (built without the `hdf5` feature)".to_string(),
                ))
            }
        }
    }
}

impl Iterator for InputSource {
    type Item = Result<Columns>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Jsonl(source) => source.next(),
            Self::Loaded(columns) => columns.take().map(Ok),
        }
    }
}
