//! Record types and fixtures shared by the repository tests.

use cairn_schema::{MessageDescriptor, ScalarType, TypeRegistry, TypeTag, Value};

use crate::{ObjectHandle, Repository, RepositoryConfig};

pub fn person() -> TypeTag {
    TypeTag::new("test", "Person")
}

pub fn phone() -> TypeTag {
    TypeTag::new("test", "PhoneNumber")
}

pub fn address_book() -> TypeTag {
    TypeTag::new("test", "AddressBook")
}

pub fn graph_node() -> TypeTag {
    TypeTag::new("test", "Node")
}

pub fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with(
            MessageDescriptor::new(person())
                .required_scalar("name", ScalarType::Str)
                .scalar("id", ScalarType::Int)
                .scalar("email", ScalarType::Str)
                .scalar("weight", ScalarType::Float)
                .repeated_composite("phones", phone())
                .repeated_scalar("tags", ScalarType::Str),
        )
        .with(
            MessageDescriptor::new(phone())
                .scalar("number", ScalarType::Str)
                .scalar("kind", ScalarType::Int),
        )
        .with(
            MessageDescriptor::new(address_book())
                .scalar("title", ScalarType::Str)
                .link("owner")
                .repeated_link("persons"),
        )
        .with(
            MessageDescriptor::new(graph_node())
                .scalar("value", ScalarType::Int)
                .link("child")
                .repeated_link("others"),
        )
}

pub fn repo() -> Repository {
    Repository::new(registry(), RepositoryConfig::default())
}

/// A repository with an address book as workspace root.
pub fn book_repo() -> (Repository, ObjectHandle) {
    let mut repo = repo();
    let root = repo.init_workspace(&address_book()).unwrap();
    (repo, root)
}

pub fn new_person(repo: &mut Repository, name: &str, id: i64) -> ObjectHandle {
    let p = repo.create_object(&person()).unwrap();
    repo.set_field(&p, "name", Value::from(name)).unwrap();
    repo.set_field(&p, "id", Value::from(id)).unwrap();
    p
}

pub fn title(repo: &mut Repository, book: &ObjectHandle) -> String {
    match repo.get_scalar(book, "title").unwrap() {
        Value::Str(s) => s,
        other => panic!("title is not a string: {other:?}"),
    }
}

pub fn set_title(repo: &mut Repository, book: &ObjectHandle, title: &str) {
    repo.set_field(book, "title", Value::from(title)).unwrap();
}
