//! Reading, writing and discovering link records inside a record tree.

use std::collections::BTreeSet;

use cairn_schema::builtin::link;
use cairn_schema::{FieldData, FieldPath, PathSegment, Record, TypeRegistry, TypeTag, Value};
use cairn_types::LocalId;

use crate::arena::NodeId;
use crate::error::{RepoError, RepoResult};
use crate::handle::{LinkAddr, LinkInfo};

impl LinkInfo {
    pub(crate) fn empty() -> Self {
        Self {
            key: None,
            type_tag: None,
            isleaf: false,
        }
    }
}

pub(crate) fn read_link(record: &Record) -> RepoResult<LinkInfo> {
    let key = match record.scalar(link::KEY).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Some(text.parse::<LocalId>().map_err(|e| {
            RepoError::InvalidArgument(format!("malformed link key {text:?}: {e}"))
        })?),
        _ => None,
    };
    let type_tag = match (
        record.scalar(link::TYPE_PACKAGE).and_then(Value::as_str),
        record.scalar(link::TYPE_NAME).and_then(Value::as_str),
    ) {
        (Some(package), Some(name)) => Some(TypeTag::new(package, name)),
        _ => None,
    };
    let isleaf = record
        .scalar(link::IS_LEAF)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(LinkInfo {
        key,
        type_tag,
        isleaf,
    })
}

pub(crate) fn write_link(record: &mut Record, key: &LocalId, tag: &TypeTag, isleaf: bool) {
    record.set_scalar(link::KEY, Value::Str(key.to_string()));
    record.set_scalar(link::TYPE_PACKAGE, Value::Str(tag.package.clone()));
    record.set_scalar(link::TYPE_NAME, Value::Str(tag.name.clone()));
    record.set_scalar(link::IS_LEAF, Value::Bool(isleaf));
}

/// Rewrite only the key and leaf flag of an existing link record.
pub(crate) fn rekey_link(record: &mut Record, key: &LocalId, isleaf: Option<bool>) {
    record.set_scalar(link::KEY, Value::Str(key.to_string()));
    if let Some(isleaf) = isleaf {
        record.set_scalar(link::IS_LEAF, Value::Bool(isleaf));
    }
}

/// A fresh link record pointing at `key`.
pub(crate) fn new_link(key: &LocalId, tag: &TypeTag, isleaf: bool) -> Record {
    let mut record = Record::new(link::tag());
    write_link(&mut record, key, tag, isleaf);
    record
}

/// The link record at `path`, creating it if the path ends in an unset
/// singular field. Repeated slots must already exist.
pub(crate) fn ensure_link_record<'a>(
    root: &'a mut Record,
    path: &FieldPath,
) -> RepoResult<&'a mut Record> {
    let (parent, last) = path
        .split_last()
        .ok_or_else(|| RepoError::IllegalLinkTarget("a link must be a field".into()))?;
    let container = root
        .at_mut(&parent)
        .map_err(|_| RepoError::InvalidAccess)?;
    match last {
        PathSegment::Field(name) => Ok(container.message_or_insert(name, link::tag())),
        PathSegment::Item(name, index) => {
            let items = container.messages_mut(name);
            let len = items.len();
            items.get_mut(*index).ok_or_else(|| {
                RepoError::Schema(cairn_schema::SchemaError::IndexOutOfRange {
                    field: name.clone(),
                    index: *index,
                    len,
                })
            })
        }
    }
}

/// Walk `record` and collect the address of every set link field.
///
/// Unset fields are skipped and non-link composites are walked into, so the
/// result describes the tree's outgoing edges without resolving any of them.
pub(crate) fn collect_links(
    registry: &TypeRegistry,
    record: &Record,
    owner: NodeId,
    path: &FieldPath,
    out: &mut BTreeSet<LinkAddr>,
) -> RepoResult<()> {
    let desc = registry.descriptor(record.tag())?;
    for (name, data) in record.fields() {
        let is_link = desc.field(name)?.is_link();
        match data {
            FieldData::Message(inner) => {
                visit(registry, inner, owner, path.field(name.as_str()), is_link, out)?
            }
            FieldData::Messages(items) => {
                for (i, inner) in items.iter().enumerate() {
                    visit(registry, inner, owner, path.item(name.as_str(), i), is_link, out)?;
                }
            }
            FieldData::Scalar(_) | FieldData::Scalars(_) => {}
        }
    }
    Ok(())
}

fn visit(
    registry: &TypeRegistry,
    inner: &Record,
    owner: NodeId,
    path: FieldPath,
    is_link: bool,
    out: &mut BTreeSet<LinkAddr>,
) -> RepoResult<()> {
    if !is_link {
        return collect_links(registry, inner, owner, &path, out);
    }
    if inner.has(link::KEY) {
        out.insert(LinkAddr::new(owner, path));
    }
    Ok(())
}
