use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::tag::TypeTag;
use crate::value::Value;

/// Data held by one set field of a [`Record`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldData {
    Scalar(Value),
    Scalars(Vec<Value>),
    Message(Record),
    Messages(Vec<Record>),
}

impl FieldData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Scalars(_) => "repeated scalar",
            Self::Message(_) => "message",
            Self::Messages(_) => "repeated message",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Scalars(v) => v.is_empty(),
            Self::Messages(v) => v.is_empty(),
            _ => false,
        }
    }
}

/// A dynamic record instance: a type tag plus its set fields.
///
/// Fields are kept in name order, which makes [`Record::encode`]
/// deterministic: equal records always serialize to identical bytes.
/// Empty repeated fields are treated as unset everywhere, including in the
/// encoded form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    tag: TypeTag,
    fields: BTreeMap<String, FieldData>,
}

impl Record {
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            fields: BTreeMap::new(),
        }
    }

    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    /// Set fields in name order (empty repeated fields are skipped).
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldData)> {
        self.fields.iter().filter(|(_, data)| !data.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|data| !data.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&FieldData> {
        self.fields.get(name)
    }

    /// Unset a field. Returns `true` if it held data.
    pub fn clear(&mut self, name: &str) -> bool {
        self.fields
            .remove(name)
            .is_some_and(|data| !data.is_empty())
    }

    // ---- scalars ----

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(FieldData::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), FieldData::Scalar(value));
    }

    pub fn scalars(&self, name: &str) -> &[Value] {
        match self.fields.get(name) {
            Some(FieldData::Scalars(v)) => v,
            _ => &[],
        }
    }

    pub fn scalars_mut(&mut self, name: &str) -> &mut Vec<Value> {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldData::Scalars(Vec::new()));
        if !matches!(slot, FieldData::Scalars(_)) {
            *slot = FieldData::Scalars(Vec::new());
        }
        match slot {
            FieldData::Scalars(values) => values,
            _ => unreachable!("slot was just set to Scalars"),
        }
    }

    // ---- composites ----

    pub fn message(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name) {
            Some(FieldData::Message(r)) => Some(r),
            _ => None,
        }
    }

    pub fn message_mut(&mut self, name: &str) -> Option<&mut Record> {
        match self.fields.get_mut(name) {
            Some(FieldData::Message(r)) => Some(r),
            _ => None,
        }
    }

    /// The nested record in `name`, creating an empty one of type `tag` if unset.
    pub fn message_or_insert(&mut self, name: &str, tag: TypeTag) -> &mut Record {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldData::Message(Record::new(tag.clone())));
        if !matches!(slot, FieldData::Message(_)) {
            *slot = FieldData::Message(Record::new(tag));
        }
        match slot {
            FieldData::Message(record) => record,
            _ => unreachable!("slot was just set to Message"),
        }
    }

    pub fn messages(&self, name: &str) -> &[Record] {
        match self.fields.get(name) {
            Some(FieldData::Messages(v)) => v,
            _ => &[],
        }
    }

    pub fn messages_mut(&mut self, name: &str) -> &mut Vec<Record> {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldData::Messages(Vec::new()));
        if !matches!(slot, FieldData::Messages(_)) {
            *slot = FieldData::Messages(Vec::new());
        }
        match slot {
            FieldData::Messages(items) => items,
            _ => unreachable!("slot was just set to Messages"),
        }
    }

    // ---- navigation ----

    /// The nested record addressed by `path` (the empty path is `self`).
    pub fn at(&self, path: &FieldPath) -> SchemaResult<&Record> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current.fields.get(segment.field())) {
                (PathSegment::Field(_), Some(FieldData::Message(r))) => r,
                (PathSegment::Item(_, i), Some(FieldData::Messages(items))) => items
                    .get(*i)
                    .ok_or_else(|| SchemaError::InvalidPath(path.to_string()))?,
                _ => return Err(SchemaError::InvalidPath(path.to_string())),
            };
        }
        Ok(current)
    }

    pub fn at_mut(&mut self, path: &FieldPath) -> SchemaResult<&mut Record> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current.fields.get_mut(segment.field())) {
                (PathSegment::Field(_), Some(FieldData::Message(r))) => r,
                (PathSegment::Item(_, i), Some(FieldData::Messages(items))) => items
                    .get_mut(*i)
                    .ok_or_else(|| SchemaError::InvalidPath(path.to_string()))?,
                _ => return Err(SchemaError::InvalidPath(path.to_string())),
            };
        }
        Ok(current)
    }

    // ---- encoding ----

    /// Serialize to bytes. Equal records produce identical bytes.
    pub fn encode(&self) -> SchemaResult<Vec<u8>> {
        serde_json::to_vec(&self.canonical()).map_err(|e| SchemaError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> SchemaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SchemaError::Serialization(e.to_string()))
    }

    fn canonical(&self) -> Record {
        let fields = self
            .fields()
            .map(|(name, data)| {
                let data = match data {
                    FieldData::Message(r) => FieldData::Message(r.canonical()),
                    FieldData::Messages(items) => {
                        FieldData::Messages(items.iter().map(Record::canonical).collect())
                    }
                    other => other.clone(),
                };
                (name.clone(), data)
            })
            .collect();
        Record {
            tag: self.tag.clone(),
            fields,
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.fields().eq(other.fields())
    }
}

/// One step from a record into a nested record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// A singular composite field.
    Field(String),
    /// One item of a repeated composite field.
    Item(String, usize),
}

impl PathSegment {
    pub fn field(&self) -> &str {
        match self {
            Self::Field(name) | Self::Item(name, _) => name,
        }
    }
}

/// Address of a nested record relative to the record that owns it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path, addressing the owning record itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(PathSegment::Field(name.into()));
        next
    }

    pub fn item(&self, name: impl Into<String>, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(PathSegment::Item(name.into(), index));
        next
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Split into the path of the containing record and the final step.
    pub fn split_last(&self) -> Option<(FieldPath, &PathSegment)> {
        let (last, rest) = self.0.split_last()?;
        Some((FieldPath(rest.to_vec()), last))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match segment {
                PathSegment::Field(name) => write!(f, "{name}")?,
                PathSegment::Item(name, index) => write!(f, "{name}[{index}]")?,
            }
        }
        Ok(())
    }
}
