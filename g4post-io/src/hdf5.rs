//! HDF5 container for serialized columns.
//!
//! Layout: one group (default `awkward`) holding one 1-D dataset per buffer
//! (`node<N>-offsets` as `i64`, `node<N>-data` as `f64`, `i64` or `u8`) and
//! two attributes: `form` (JSON descriptor) and `length` (record count).

use crate::form::{from_buffers, to_buffers, Buffer, BufferKind, Buffers, Columns, Form};
use crate::{Error, Result};
use g4post_core::ValueKind;
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{File, Group};
use ndarray::ArrayView1;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Group written by [`write_container`] unless configured otherwise.
pub const DEFAULT_GROUP: &str = "awkward";

/// Options for writing containers.
#[derive(Clone, Debug)]
pub struct ContainerWriteOptions {
    /// Group name.
    pub group: String,
    /// Chunk length of non-empty datasets.
    pub chunk_len: usize,
    /// Deflate level; `None` disables compression.
    pub compression: Option<u8>,
    /// Byte shuffle before compression.
    pub shuffle: bool,
}

impl Default for ContainerWriteOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            chunk_len: 65_536,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// Writes columns to a new file, replacing any existing one.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_container<P: AsRef<Path>>(
    path: P,
    columns: &Columns,
    options: &ContainerWriteOptions,
) -> Result<()> {
    let (form, length, buffers) = to_buffers(columns)?;
    let file = File::create(path)?;
    let group = file.create_group(&options.group)?;

    for (key, buffer) in &buffers {
        match buffer {
            Buffer::Int64(values) => write_buffer(&group, key, values, options)?,
            Buffer::Float64(values) => write_buffer(&group, key, values, options)?,
            Buffer::Bool(values) => write_buffer(&group, key, values, options)?,
        }
    }

    let form_json = to_var_len_unicode(&form.to_json()?)?;
    group
        .new_attr::<VarLenUnicode>()
        .create("form")?
        .write_scalar(&form_json)?;
    let length = u64::try_from(length)
        .map_err(|_| Error::InvalidFormat(format!("record count {length} exceeds u64")))?;
    group.new_attr::<u64>().create("length")?.write_scalar(&length)?;
    Ok(())
}

/// Writes columns next to `path` and moves them into place once complete,
/// so an interrupted write never leaves a file at `path`.
///
/// # Errors
/// Returns an error if the container cannot be written or renamed.
pub fn write_container_atomic<P: AsRef<Path>>(
    path: P,
    columns: &Columns,
    options: &ContainerWriteOptions,
) -> Result<()> {
    let path = path.as_ref();
    let staging = staging_path(path);
    if let Err(e) = write_container(&staging, columns, options) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    fs::rename(&staging, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = OsString::from(path.as_os_str());
    staging.push(".partial");
    PathBuf::from(staging)
}

/// Reads the columns stored under `group_name`.
///
/// # Errors
/// Returns an error if the group, its attributes or a referenced buffer is
/// missing, or the stored layout is inconsistent.
pub fn read_container<P: AsRef<Path>>(path: P, group_name: &str) -> Result<Columns> {
    let file = File::open(path)?;
    let group = file.group(group_name)?;

    let form_json: VarLenUnicode = group.attr("form")?.read_scalar()?;
    let form = Form::from_json(form_json.as_str())?;
    let length: u64 = group.attr("length")?.read_scalar()?;
    let length = usize::try_from(length)
        .map_err(|_| Error::InvalidFormat(format!("record count {length} exceeds usize")))?;

    let mut buffers = Buffers::new();
    for (key, kind) in form.buffer_keys() {
        let buffer = match kind {
            BufferKind::Offsets | BufferKind::Data(ValueKind::Int64) => {
                Buffer::Int64(read_dataset_vec(&group, &key)?)
            }
            BufferKind::Data(ValueKind::Float64) => Buffer::Float64(read_dataset_vec(&group, &key)?),
            BufferKind::Data(ValueKind::Bool) => Buffer::Bool(read_dataset_vec(&group, &key)?),
        };
        buffers.insert(key, buffer);
    }
    from_buffers(&form, length, &buffers)
}

fn write_buffer<T: H5Type>(
    group: &Group,
    name: &str,
    values: &[T],
    options: &ContainerWriteOptions,
) -> Result<()> {
    let mut builder = group.new_dataset::<T>().shape((values.len(),));
    if !values.is_empty() {
        builder = builder.chunk((options.chunk_len.clamp(1, values.len()),));
        if let Some(level) = options.compression {
            builder = builder.deflate(level);
        }
        if options.shuffle {
            builder = builder.shuffle();
        }
    }
    let dataset = builder.create(name)?;
    if !values.is_empty() {
        dataset.write(ArrayView1::from(values))?;
    }
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group
        .dataset(name)
        .map_err(|e| Error::InvalidFormat(format!("missing dataset `{name}`: {e}")))?;
    Ok(dataset.read_raw::<T>()?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use g4post_core::{Nested, Ragged};
    use tempfile::NamedTempFile;

    fn columns() -> Columns {
        let records: Vec<Nested> = vec![
            vec![vec![1.0, 2.0], vec![]].into(),
            Nested::List(vec![]),
            vec![vec![3.0]].into(),
        ];
        let mut columns = Columns::new(3);
        columns
            .push(
                "energy",
                Ragged::from_nested(ValueKind::Float64, 2, &records).unwrap(),
            )
            .unwrap();
        columns
            .push("n", Ragged::scalars(ValueKind::Int64, vec![2.0, 0.0, 1.0]))
            .unwrap();
        columns
            .push(
                "empty",
                Ragged::from_lists(ValueKind::Bool, vec![Vec::new(); 3]),
            )
            .unwrap();
        columns
    }

    #[test]
    fn test_container_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let original = columns();
        write_container(file.path(), &original, &ContainerWriteOptions::default()).unwrap();

        let restored = read_container(file.path(), DEFAULT_GROUP).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_custom_group_and_uncompressed() {
        let file = NamedTempFile::new().unwrap();
        let options = ContainerWriteOptions {
            group: "events".to_string(),
            chunk_len: 2,
            compression: None,
            shuffle: false,
        };
        write_container(file.path(), &columns(), &options).unwrap();
        assert!(read_container(file.path(), DEFAULT_GROUP).is_err());
        assert_eq!(read_container(file.path(), "events").unwrap().len(), 3);
    }

    #[test]
    fn test_atomic_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.hdf5");
        write_container_atomic(&path, &columns(), &ContainerWriteOptions::default()).unwrap();

        assert!(path.exists());
        assert!(!staging_path(&path).exists());
        assert_eq!(read_container(&path, DEFAULT_GROUP).unwrap(), columns());
    }
}
