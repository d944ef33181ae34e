//! Named record columns and their flat-buffer serialization.
//!
//! A [`Columns`] value is a record of named ragged fields sharing one record
//! count. [`to_buffers`] lowers it to a structure descriptor ([`Form`]) plus
//! one typed buffer per list level and leaf, keyed `node<N>-offsets` and
//! `node<N>-data`; [`from_buffers`] rebuilds identical nesting and values.

use crate::{Error, Result};
use g4post_core::{Ragged, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered named fields with a common record count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Columns {
    length: usize,
    fields: Vec<(String, Ragged)>,
}

impl Columns {
    /// Creates an empty record with `length` records.
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self {
            length,
            fields: Vec::new(),
        }
    }

    /// Adds a field, replacing one of the same name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the field's record count differs.
    pub fn push(&mut self, name: impl Into<String>, field: Ragged) -> Result<()> {
        let name = name.into();
        if field.len() != self.length {
            return Err(Error::InvalidFormat(format!(
                "field `{name}` has {} records, expected {}",
                field.len(),
                self.length
            )));
        }
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = field,
            None => self.fields.push((name, field)),
        }
        Ok(())
    }

    /// Record count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Ragged> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, field)| field)
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Fields in order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Ragged)] {
        &self.fields
    }

    /// Appends the records of `other`, matching fields by name.
    ///
    /// An empty record without fields adopts the fields of `other`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the field names differ, or a
    /// shape error if a field pair cannot be concatenated.
    pub fn extend(&mut self, other: &Columns) -> Result<()> {
        if self.fields.is_empty() && self.length == 0 {
            *self = other.clone();
            return Ok(());
        }
        if other.fields.is_empty() && other.length == 0 {
            return Ok(());
        }
        if self.fields.len() != other.fields.len() {
            return Err(Error::InvalidFormat(format!(
                "cannot append {} fields to {} fields",
                other.fields.len(),
                self.fields.len()
            )));
        }
        for (name, field) in &mut self.fields {
            let incoming = other.get(name).ok_or_else(|| {
                Error::InvalidFormat(format!("field `{name}` missing from appended records"))
            })?;
            field
                .extend(incoming)
                .map_err(|e| e.context(format_args!("field `{name}`")))?;
        }
        self.length += other.length;
        Ok(())
    }
}

/// Structure descriptor of serialized columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Form {
    /// Named fields of equal length.
    RecordArray {
        /// Field names.
        fields: Vec<String>,
        /// Field forms, in the order of `fields`.
        contents: Vec<Form>,
        /// Buffer key prefix.
        form_key: String,
    },
    /// One list level over `content`.
    ListOffsetArray {
        /// Offset integer type.
        offsets: String,
        /// Form of the list elements.
        content: Box<Form>,
        /// Buffer key prefix.
        form_key: String,
    },
    /// Typed leaf values.
    NumpyArray {
        /// Scalar type.
        primitive: ValueKind,
        /// Buffer key prefix.
        form_key: String,
    },
}

impl Form {
    /// Parses a JSON descriptor.
    ///
    /// # Errors
    /// Returns an error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// JSON descriptor.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Every buffer key the form refers to, with its buffer type.
    #[must_use]
    pub fn buffer_keys(&self) -> Vec<(String, BufferKind)> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<(String, BufferKind)>) {
        match self {
            Self::RecordArray { contents, .. } => {
                for content in contents {
                    content.collect_keys(keys);
                }
            }
            Self::ListOffsetArray {
                content, form_key, ..
            } => {
                keys.push((format!("{form_key}-offsets"), BufferKind::Offsets));
                content.collect_keys(keys);
            }
            Self::NumpyArray {
                primitive,
                form_key,
            } => keys.push((format!("{form_key}-data"), BufferKind::Data(*primitive))),
        }
    }
}

/// Element type of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// `i64` list offsets.
    Offsets,
    /// Leaf values.
    Data(ValueKind),
}

/// One typed flat buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Buffer {
    /// `i64` values (offsets and integer leaves).
    Int64(Vec<i64>),
    /// `f64` leaves.
    Float64(Vec<f64>),
    /// Boolean leaves stored as bytes.
    Bool(Vec<u8>),
}

impl Buffer {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Bool(values) => values.len(),
        }
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffers keyed by name.
pub type Buffers = BTreeMap<String, Buffer>;

/// Lowers columns to a form and flat buffers.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] if an offset exceeds the `i64` range.
pub fn to_buffers(columns: &Columns) -> Result<(Form, usize, Buffers)> {
    let mut buffers = Buffers::new();
    let mut next_node = 1usize;
    let mut contents = Vec::with_capacity(columns.fields.len());

    for (_, field) in &columns.fields {
        let (kind, offsets, values) = field.clone().into_parts();
        let mut keys = Vec::with_capacity(offsets.len() + 1);
        for level_offsets in &offsets {
            let key = format!("node{next_node}");
            next_node += 1;
            let converted = level_offsets
                .iter()
                .map(|&o| {
                    i64::try_from(o)
                        .map_err(|_| Error::InvalidFormat(format!("offset {o} exceeds i64")))
                })
                .collect::<Result<Vec<_>>>()?;
            buffers.insert(format!("{key}-offsets"), Buffer::Int64(converted));
            keys.push(key);
        }

        let leaf_key = format!("node{next_node}");
        next_node += 1;
        buffers.insert(format!("{leaf_key}-data"), encode_values(kind, &values));

        let mut form = Form::NumpyArray {
            primitive: kind,
            form_key: leaf_key,
        };
        for key in keys.into_iter().rev() {
            form = Form::ListOffsetArray {
                offsets: "i64".to_string(),
                content: Box::new(form),
                form_key: key,
            };
        }
        contents.push(form);
    }

    let form = Form::RecordArray {
        fields: columns.fields.iter().map(|(name, _)| name.clone()).collect(),
        contents,
        form_key: "node0".to_string(),
    };
    Ok((form, columns.length, buffers))
}

#[allow(clippy::cast_possible_truncation)]
fn encode_values(kind: ValueKind, values: &[f64]) -> Buffer {
    match kind {
        ValueKind::Float64 => Buffer::Float64(values.to_vec()),
        ValueKind::Int64 => Buffer::Int64(values.iter().map(|&v| v as i64).collect()),
        ValueKind::Bool => Buffer::Bool(values.iter().map(|&v| u8::from(v != 0.0)).collect()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_values(buffer: &Buffer) -> Vec<f64> {
    match buffer {
        Buffer::Float64(values) => values.clone(),
        Buffer::Int64(values) => values.iter().map(|&v| v as f64).collect(),
        Buffer::Bool(values) => values.iter().map(|&v| f64::from(v)).collect(),
    }
}

/// Rebuilds columns from a form and its buffers.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] if the form is not a record of list
/// chains over leaves, a buffer is missing or mistyped, or the offsets are
/// inconsistent.
pub fn from_buffers(form: &Form, length: usize, buffers: &Buffers) -> Result<Columns> {
    let Form::RecordArray {
        fields, contents, ..
    } = form
    else {
        return Err(Error::InvalidFormat("top-level form must be a record".to_string()));
    };
    if fields.len() != contents.len() {
        return Err(Error::InvalidFormat(format!(
            "record form has {} names for {} contents",
            fields.len(),
            contents.len()
        )));
    }

    let mut columns = Columns::new(length);
    for (name, content) in fields.iter().zip(contents) {
        let field = decode_field(content, buffers).map_err(|e| match e {
            Error::InvalidFormat(msg) => Error::InvalidFormat(format!("field `{name}`: {msg}")),
            other => other,
        })?;
        columns.push(name.clone(), field)?;
    }
    Ok(columns)
}

fn decode_field(form: &Form, buffers: &Buffers) -> Result<Ragged> {
    let mut offsets = Vec::new();
    let mut node = form;
    loop {
        match node {
            Form::ListOffsetArray {
                content, form_key, ..
            } => {
                let key = format!("{form_key}-offsets");
                let Some(Buffer::Int64(raw)) = buffers.get(&key) else {
                    return Err(Error::InvalidFormat(format!("missing offsets buffer `{key}`")));
                };
                let level = raw
                    .iter()
                    .map(|&o| {
                        usize::try_from(o)
                            .map_err(|_| Error::InvalidFormat(format!("negative offset {o}")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                offsets.push(level);
                node = content;
            }
            Form::NumpyArray {
                primitive,
                form_key,
            } => {
                let key = format!("{form_key}-data");
                let buffer = buffers
                    .get(&key)
                    .ok_or_else(|| Error::InvalidFormat(format!("missing data buffer `{key}`")))?;
                let matches = matches!(
                    (primitive, buffer),
                    (ValueKind::Float64, Buffer::Float64(_))
                        | (ValueKind::Int64, Buffer::Int64(_))
                        | (ValueKind::Bool, Buffer::Bool(_))
                );
                if !matches {
                    return Err(Error::InvalidFormat(format!(
                        "buffer `{key}` does not hold {} values",
                        primitive.as_str()
                    )));
                }
                return Ok(Ragged::from_parts(*primitive, offsets, decode_values(buffer))?);
            }
            Form::RecordArray { .. } => {
                return Err(Error::InvalidFormat("nested records are not supported".to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use g4post_core::Nested;

    fn sample() -> Columns {
        let windows: Vec<Nested> = vec![
            vec![vec![vec![vec![1.5]], vec![]], vec![]].into(),
            Nested::List(vec![]),
            vec![vec![vec![vec![2.0, 3.0], vec![]]]].into(),
        ];
        let deep = Ragged::from_nested(ValueKind::Float64, 4, &windows).unwrap();
        let ids = Ragged::from_lists(ValueKind::Int64, vec![vec![7.0, -1.0], vec![], vec![3.0]]);
        let flags = Ragged::scalars(ValueKind::Bool, vec![1.0, 0.0, 1.0]);

        let mut columns = Columns::new(3);
        columns.push("deep", deep).unwrap();
        columns.push("ids", ids).unwrap();
        columns.push("flags", flags).unwrap();
        columns
    }

    #[test]
    fn test_round_trip_preserves_nesting_and_kinds() {
        let columns = sample();
        let (form, length, buffers) = to_buffers(&columns).unwrap();
        assert_eq!(length, 3);
        assert!(buffers.contains_key("node1-offsets"));
        assert!(matches!(buffers["node5-data"], Buffer::Float64(_)));

        let json = form.to_json().unwrap();
        let parsed = Form::from_json(&json).unwrap();
        assert_eq!(parsed, form);

        let restored = from_buffers(&parsed, length, &buffers).unwrap();
        assert_eq!(restored, columns);
        assert_eq!(restored.get("ids").unwrap().kind(), ValueKind::Int64);
    }

    /// Record holding an empty list beside the populated branch at every
    /// level above the innermost one.
    fn record_with_empty_branches(depth: usize) -> Nested {
        match depth {
            0 => Nested::Value(1.0),
            1 => Nested::List(vec![Nested::Value(1.0), Nested::Value(0.0)]),
            _ => Nested::List(vec![
                record_with_empty_branches(depth - 1),
                Nested::List(vec![]),
            ]),
        }
    }

    #[test]
    fn test_round_trip_every_depth_with_empty_leaves() {
        let kinds = [ValueKind::Float64, ValueKind::Int64, ValueKind::Bool];
        for depth in 0..=4 {
            let kind = kinds[depth % kinds.len()];
            let mixed: Vec<Nested> = if depth == 0 {
                vec![Nested::Value(1.0), Nested::Value(0.0), Nested::Value(1.0)]
            } else {
                vec![
                    record_with_empty_branches(depth),
                    Nested::List(vec![]),
                    record_with_empty_branches(depth),
                ]
            };

            let mut columns = Columns::new(3);
            columns
                .push("mixed", Ragged::from_nested(kind, depth, &mixed).unwrap())
                .unwrap();
            if depth > 0 {
                let empty = vec![Nested::List(vec![]); 3];
                columns
                    .push("empty", Ragged::from_nested(kind, depth, &empty).unwrap())
                    .unwrap();
            }

            let mut no_records = Columns::new(0);
            no_records
                .push("mixed", Ragged::from_nested(kind, depth, &[]).unwrap())
                .unwrap();

            for original in [columns, no_records] {
                let (form, length, buffers) = to_buffers(&original).unwrap();
                let form = Form::from_json(&form.to_json().unwrap()).unwrap();
                let restored = from_buffers(&form, length, &buffers).unwrap();
                assert_eq!(restored, original, "depth {depth}");
                assert_eq!(restored.get("mixed").unwrap().depth(), depth);
            }
        }
    }

    #[test]
    fn test_form_lists_every_buffer() {
        let (form, _, buffers) = to_buffers(&sample()).unwrap();
        let keys = form.buffer_keys();
        assert_eq!(keys.len(), buffers.len());
        for (key, kind) in keys {
            match (kind, &buffers[&key]) {
                (BufferKind::Offsets, Buffer::Int64(_))
                | (BufferKind::Data(ValueKind::Int64), Buffer::Int64(_))
                | (BufferKind::Data(ValueKind::Float64), Buffer::Float64(_))
                | (BufferKind::Data(ValueKind::Bool), Buffer::Bool(_)) => {}
                other => panic!("mismatched buffer {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_buffer_is_reported() {
        let (form, length, mut buffers) = to_buffers(&sample()).unwrap();
        buffers.remove("node2-offsets");
        let err = from_buffers(&form, length, &buffers).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(ref msg) if msg.contains("deep")));
    }

    #[test]
    fn test_extend_concatenates_by_name() {
        let mut all = Columns::default();
        all.extend(&sample()).unwrap();
        all.extend(&sample()).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.get("flags").unwrap().values(), &[1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
        assert_eq!(all.get("deep").unwrap().len(), 6);

        let mut other = Columns::new(1);
        other
            .push("ids", Ragged::from_lists(ValueKind::Int64, vec![vec![1.0]]))
            .unwrap();
        assert!(all.extend(&other).is_err());
        assert!(Columns::new(2)
            .push("x", Ragged::scalars(ValueKind::Float64, vec![1.0]))
            .is_err());
    }
}
