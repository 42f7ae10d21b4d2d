use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a record type: a package plus a type name.
///
/// Structure elements and links carry the tag so a loader can find the
/// right descriptor without decoding anything first.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag {
    pub package: String,
    pub name: String,
}

impl TypeTag {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}
