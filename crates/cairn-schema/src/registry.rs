use std::collections::HashMap;

use crate::builtin;
use crate::descriptor::{FieldDescriptor, FieldKind, MessageDescriptor};
use crate::error::{SchemaError, SchemaResult};
use crate::record::{FieldData, Record};
use crate::tag::TypeTag;

/// Table of every record type a repository can hold.
///
/// The engine's built-in types are always present; applications register
/// their own descriptors on top.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    types: HashMap<TypeTag, MessageDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
        };
        for desc in builtin::descriptors() {
            registry.register(desc);
        }
        registry
    }

    /// Register (or replace) a record type.
    pub fn register(&mut self, descriptor: MessageDescriptor) {
        self.types.insert(descriptor.tag.clone(), descriptor);
    }

    /// Builder-style registration.
    pub fn with(mut self, descriptor: MessageDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.types.contains_key(tag)
    }

    pub fn descriptor(&self, tag: &TypeTag) -> SchemaResult<&MessageDescriptor> {
        self.types
            .get(tag)
            .ok_or_else(|| SchemaError::UnknownType(tag.clone()))
    }

    pub fn field(&self, tag: &TypeTag, name: &str) -> SchemaResult<&FieldDescriptor> {
        self.descriptor(tag)?.field(name)
    }

    /// An empty record of a registered type.
    pub fn new_record(&self, tag: &TypeTag) -> SchemaResult<Record> {
        self.descriptor(tag)?;
        Ok(Record::new(tag.clone()))
    }

    /// Decode bytes into a record and check it against its descriptor.
    pub fn decode(&self, expected: &TypeTag, bytes: &[u8]) -> SchemaResult<Record> {
        let record = Record::decode(bytes)?;
        if record.tag() != expected {
            return Err(SchemaError::TypeMismatch {
                field: String::new(),
                expected: expected.to_string(),
                actual: record.tag().to_string(),
            });
        }
        self.validate(&record)?;
        Ok(record)
    }

    /// Check that every set field is declared and holds data of its declared kind.
    pub fn validate(&self, record: &Record) -> SchemaResult<()> {
        let desc = self.descriptor(record.tag())?;
        for (name, data) in record.fields() {
            let field = desc.field(name)?;
            match (&field.kind, data) {
                (FieldKind::Scalar(_), FieldData::Scalar(v)) => field.check_value(v)?,
                (FieldKind::RepeatedScalar(_), FieldData::Scalars(vs)) => {
                    for v in vs {
                        field.check_value(v)?;
                    }
                }
                (FieldKind::Composite(tag), FieldData::Message(inner)) => {
                    self.expect_tag(name, tag, inner)?;
                    self.validate(inner)?;
                }
                (FieldKind::RepeatedComposite(tag), FieldData::Messages(items)) => {
                    for inner in items {
                        self.expect_tag(name, tag, inner)?;
                        self.validate(inner)?;
                    }
                }
                (kind, data) => {
                    return Err(SchemaError::TypeMismatch {
                        field: name.clone(),
                        expected: kind.to_string(),
                        actual: data.kind_name().to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if all required fields are set, recursively.
    pub fn is_initialized(&self, record: &Record) -> SchemaResult<bool> {
        let desc = self.descriptor(record.tag())?;
        for field in &desc.fields {
            if field.required && !record.has(&field.name) {
                return Ok(false);
            }
        }
        for (_, data) in record.fields() {
            let complete = match data {
                FieldData::Message(inner) => self.is_initialized(inner)?,
                FieldData::Messages(items) => {
                    let mut all = true;
                    for inner in items {
                        all &= self.is_initialized(inner)?;
                    }
                    all
                }
                _ => true,
            };
            if !complete {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn expect_tag(&self, field: &str, expected: &TypeTag, record: &Record) -> SchemaResult<()> {
        if record.tag() != expected {
            return Err(SchemaError::TypeMismatch {
                field: field.to_string(),
                expected: expected.to_string(),
                actual: record.tag().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ScalarType, Value};

    fn person_tag() -> TypeTag {
        TypeTag::new("test", "Person")
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new().with(
            MessageDescriptor::new(person_tag())
                .required_scalar("name", ScalarType::Str)
                .scalar("id", ScalarType::Int)
                .link("manager"),
        )
    }

    #[test]
    fn builtins_are_always_registered() {
        let reg = TypeRegistry::default();
        assert!(reg.contains(&builtin::link::tag()));
        assert!(reg.contains(&builtin::commit_ref::tag()));
        assert!(reg.contains(&builtin::branch::tag()));
        assert!(reg.contains(&builtin::mutable_root::tag()));
        assert!(reg.contains(&builtin::parent_ref::tag()));
    }

    #[test]
    fn unknown_type_is_reported() {
        let reg = TypeRegistry::new();
        assert_eq!(
            reg.new_record(&person_tag()).unwrap_err(),
            SchemaError::UnknownType(person_tag())
        );
    }

    #[test]
    fn is_initialized_checks_required_fields() {
        let reg = registry();
        let mut rec = reg.new_record(&person_tag()).unwrap();
        assert!(!reg.is_initialized(&rec).unwrap());
        rec.set_scalar("name", Value::from("David"));
        assert!(reg.is_initialized(&rec).unwrap());
    }

    #[test]
    fn decode_validates_against_descriptor() {
        let reg = registry();
        let mut rec = Record::new(person_tag());
        rec.set_scalar("id", Value::from("not an int"));
        let bytes = rec.encode().unwrap();
        assert!(matches!(
            reg.decode(&person_tag(), &bytes),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_wrong_tag() {
        let reg = registry();
        let rec = Record::new(builtin::branch::tag());
        let bytes = rec.encode().unwrap();
        assert!(reg.decode(&person_tag(), &bytes).is_err());
    }

    #[test]
    fn validate_checks_nested_link_records() {
        let reg = registry();
        let mut rec = Record::new(person_tag());
        rec.set_scalar("name", Value::from("x"));
        rec.message_or_insert("manager", builtin::link::tag())
            .set_scalar(builtin::link::KEY, Value::from("local:2"));
        assert!(reg.validate(&rec).is_ok());

        let mut bad = Record::new(person_tag());
        bad.message_or_insert("manager", builtin::branch::tag());
        assert!(reg.validate(&bad).is_err());
    }
}
