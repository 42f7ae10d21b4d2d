//! Borrowing views over repeated fields.
//!
//! Each container holds the repository mutably for its lifetime, so every
//! change goes through the same read-only checks and modification
//! propagation as single-field access.

use std::ops::Range;

use cairn_schema::{FieldDescriptor, FieldKind, Record, SchemaError, TypeTag, Value};

use crate::error::{RepoError, RepoResult};
use crate::handle::{LinkAddr, ObjectHandle};
use crate::repository::Repository;

fn out_of_range(field: &str, index: usize, len: usize) -> RepoError {
    RepoError::Schema(SchemaError::IndexOutOfRange {
        field: field.to_string(),
        index,
        len,
    })
}

fn check_range(start: usize, stop: usize, len: usize) -> RepoResult<Range<usize>> {
    if start > stop || stop > len {
        return Err(RepoError::InvalidArgument(format!(
            "range {start}..{stop} is out of bounds for length {len}"
        )));
    }
    Ok(start..stop)
}

impl Repository {
    /// View over a repeated composite field. Link fields resolve their
    /// items; structural fields only support slot management.
    pub fn links(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<LinkContainer<'_>> {
        let field = self.field_desc(h, name)?;
        let tag = match &field.kind {
            FieldKind::RepeatedComposite(tag) => tag.clone(),
            _ => return Err(self.kind_mismatch(h, name, "repeated message")?),
        };
        Ok(LinkContainer {
            owner: h.clone(),
            is_link: field.is_link(),
            field: field.name,
            tag,
            repo: self,
        })
    }

    /// View over a repeated structural (non-link) composite field.
    pub fn items(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<ItemContainer<'_>> {
        let field = self.field_desc(h, name)?;
        let tag = match &field.kind {
            FieldKind::RepeatedComposite(_) if field.is_link() => {
                return Err(RepoError::InvalidArgument(format!(
                    "field {name:?} holds links; use links()"
                )))
            }
            FieldKind::RepeatedComposite(tag) => tag.clone(),
            _ => return Err(self.kind_mismatch(h, name, "repeated message")?),
        };
        Ok(ItemContainer {
            owner: h.clone(),
            field: field.name,
            tag,
            repo: self,
        })
    }

    /// View over a repeated scalar field.
    pub fn scalars(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<ScalarContainer<'_>> {
        let field = self.field_desc(h, name)?;
        if !matches!(field.kind, FieldKind::RepeatedScalar(_)) {
            return Err(self.kind_mismatch(h, name, "repeated scalar")?);
        }
        Ok(ScalarContainer {
            owner: h.clone(),
            field,
            repo: self,
        })
    }
}

/// Repeated composite field, usually of links.
pub struct LinkContainer<'r> {
    repo: &'r mut Repository,
    owner: ObjectHandle,
    field: String,
    tag: TypeTag,
    is_link: bool,
}

impl LinkContainer<'_> {
    pub fn len(&self) -> RepoResult<usize> {
        Ok(self.repo.record_at(&self.owner)?.messages(&self.field).len())
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        Ok(self.len()? == 0)
    }

    fn require_link(&self) -> RepoResult<()> {
        if !self.is_link {
            return Err(RepoError::IllegalLinkTarget(format!(
                "field {:?} holds {} records, not links",
                self.field, self.tag
            )));
        }
        Ok(())
    }

    /// Address of the link in slot `i`.
    pub fn get_link(&self, i: usize) -> RepoResult<LinkAddr> {
        self.require_link()?;
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field, i, len));
        }
        Ok(LinkAddr::new(self.owner.node, self.owner.path.item(self.field.as_str(), i)))
    }

    pub fn get_links(&self) -> RepoResult<Vec<LinkAddr>> {
        (0..self.len()?).map(|i| self.get_link(i)).collect()
    }

    /// Resolve the target of slot `i`.
    pub fn get(&mut self, i: usize) -> RepoResult<ObjectHandle> {
        let addr = self.get_link(i)?;
        self.repo.get_linked_object(addr)
    }

    /// Resolve the targets of slots `start..stop`.
    pub fn slice(&mut self, start: usize, stop: usize) -> RepoResult<Vec<ObjectHandle>> {
        check_range(start, stop, self.len()?)?
            .map(|i| self.get(i))
            .collect()
    }

    pub fn set_link(&mut self, i: usize, target: &ObjectHandle) -> RepoResult<()> {
        let addr = self.get_link(i)?;
        self.repo.set_linked_object(addr, target)
    }

    /// Append an empty slot and return its index.
    pub fn add(&mut self) -> RepoResult<usize> {
        let tag = self.tag.clone();
        let field = self.field.as_str();
        self.repo.edit(&self.owner, field, |record| {
            let items = record.messages_mut(field);
            items.push(Record::new(tag));
            Ok(items.len() - 1)
        })
    }

    /// Append a link to `target` and return its index.
    pub fn push(&mut self, target: &ObjectHandle) -> RepoResult<usize> {
        self.require_link()?;
        self.repo.validate_link_target(self.owner.node, target)?;
        let i = self.add()?;
        self.set_link(i, target)?;
        Ok(i)
    }

    pub fn delete(&mut self, i: usize) -> RepoResult<()> {
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field, i, len));
        }
        self.delete_range(i, i + 1)
    }

    /// Remove slots `start..stop`. Targets left without parents are
    /// released from the workspace.
    pub fn delete_range(&mut self, start: usize, stop: usize) -> RepoResult<()> {
        let range = check_range(start, stop, self.len()?)?;
        if range.is_empty() {
            return Ok(());
        }
        let field = self.field.as_str();
        self.repo.edit_relinking(&self.owner, field, |record| {
            record.messages_mut(field).drain(range);
            Ok(())
        })
    }
}

/// Repeated structural composite field.
pub struct ItemContainer<'r> {
    repo: &'r mut Repository,
    owner: ObjectHandle,
    field: String,
    tag: TypeTag,
}

impl ItemContainer<'_> {
    pub fn len(&self) -> RepoResult<usize> {
        Ok(self.repo.record_at(&self.owner)?.messages(&self.field).len())
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Handle to item `i`.
    pub fn get(&self, i: usize) -> RepoResult<ObjectHandle> {
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field, i, len));
        }
        Ok(self.owner.nested(self.owner.path.item(self.field.as_str(), i)))
    }

    /// Append an empty item and return a handle to it.
    pub fn add(&mut self) -> RepoResult<ObjectHandle> {
        let tag = self.tag.clone();
        let field = self.field.as_str();
        let i = self.repo.edit(&self.owner, field, |record| {
            let items = record.messages_mut(field);
            items.push(Record::new(tag));
            Ok(items.len() - 1)
        })?;
        Ok(self.owner.nested(self.owner.path.item(field, i)))
    }

    pub fn delete(&mut self, i: usize) -> RepoResult<()> {
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field, i, len));
        }
        self.delete_range(i, i + 1)
    }

    /// Remove items `start..stop`. Links inside them are dropped.
    pub fn delete_range(&mut self, start: usize, stop: usize) -> RepoResult<()> {
        let range = check_range(start, stop, self.len()?)?;
        if range.is_empty() {
            return Ok(());
        }
        let field = self.field.as_str();
        self.repo.edit_relinking(&self.owner, field, |record| {
            record.messages_mut(field).drain(range);
            Ok(())
        })
    }
}

/// Repeated scalar field. Every value is checked against the field type.
pub struct ScalarContainer<'r> {
    repo: &'r mut Repository,
    owner: ObjectHandle,
    field: FieldDescriptor,
}

impl ScalarContainer<'_> {
    fn values(&self) -> RepoResult<&[Value]> {
        Ok(self.repo.record_at(&self.owner)?.scalars(&self.field.name))
    }

    pub fn len(&self) -> RepoResult<usize> {
        Ok(self.values()?.len())
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, i: usize) -> RepoResult<Value> {
        let values = self.values()?;
        values
            .get(i)
            .cloned()
            .ok_or_else(|| out_of_range(&self.field.name, i, values.len()))
    }

    pub fn to_vec(&self) -> RepoResult<Vec<Value>> {
        Ok(self.values()?.to_vec())
    }

    pub fn slice(&self, start: usize, stop: usize) -> RepoResult<Vec<Value>> {
        let values = self.values()?;
        let range = check_range(start, stop, values.len())?;
        Ok(values[range].to_vec())
    }

    fn mutate<R>(&mut self, f: impl FnOnce(&mut Vec<Value>) -> RepoResult<R>) -> RepoResult<R> {
        let name = self.field.name.as_str();
        self.repo
            .edit(&self.owner, name, |record| f(record.scalars_mut(name)))
    }

    pub fn push(&mut self, value: Value) -> RepoResult<()> {
        self.field.check_value(&value)?;
        self.mutate(|values| {
            values.push(value);
            Ok(())
        })
    }

    pub fn insert(&mut self, i: usize, value: Value) -> RepoResult<()> {
        self.field.check_value(&value)?;
        let len = self.len()?;
        if i > len {
            return Err(out_of_range(&self.field.name, i, len));
        }
        self.mutate(|values| {
            values.insert(i, value);
            Ok(())
        })
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) -> RepoResult<()> {
        let values: Vec<Value> = values.into_iter().collect();
        for value in &values {
            self.field.check_value(value)?;
        }
        if values.is_empty() {
            return Ok(());
        }
        self.mutate(|existing| {
            existing.extend(values);
            Ok(())
        })
    }

    /// Remove the first occurrence of `value`.
    pub fn remove(&mut self, value: &Value) -> RepoResult<()> {
        let Some(i) = self.values()?.iter().position(|v| v == value) else {
            return Err(RepoError::InvalidArgument(format!(
                "value {value:?} is not in field {:?}",
                self.field.name
            )));
        };
        self.delete(i)
    }

    pub fn set(&mut self, i: usize, value: Value) -> RepoResult<()> {
        self.field.check_value(&value)?;
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field.name, i, len));
        }
        self.mutate(|values| {
            values[i] = value;
            Ok(())
        })
    }

    pub fn delete(&mut self, i: usize) -> RepoResult<()> {
        let len = self.len()?;
        if i >= len {
            return Err(out_of_range(&self.field.name, i, len));
        }
        self.delete_range(i, i + 1)
    }

    pub fn delete_range(&mut self, start: usize, stop: usize) -> RepoResult<()> {
        let range = check_range(start, stop, self.len()?)?;
        if range.is_empty() {
            return Ok(());
        }
        self.mutate(|values| {
            values.drain(range);
            Ok(())
        })
    }
}
