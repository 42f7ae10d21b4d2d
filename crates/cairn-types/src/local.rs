use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::ObjectId;

const EPHEMERAL_PREFIX: &str = "local:";

/// Key of an object inside a repository workspace.
///
/// Uncommitted objects are keyed by a monotonic counter value that is only
/// meaningful inside one repository. Committing an object replaces its
/// ephemeral id with its content key.
///
/// The text form (`local:<n>` or 64 hex characters) is what link records
/// store, and it parses back losslessly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocalId {
    Ephemeral(u64),
    Content(ObjectId),
}

impl LocalId {
    /// The content key, if this id refers to a committed object.
    pub fn content(&self) -> Option<ObjectId> {
        match self {
            Self::Content(id) => Some(*id),
            Self::Ephemeral(_) => None,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral(_))
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral(n) => write!(f, "{EPHEMERAL_PREFIX}{n}"),
            Self::Content(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for LocalId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(counter) = s.strip_prefix(EPHEMERAL_PREFIX) {
            return counter
                .parse()
                .map(Self::Ephemeral)
                .map_err(|_| TypeError::InvalidLocalId(s.to_string()));
        }
        ObjectId::from_hex(s).map(Self::Content)
    }
}

impl From<ObjectId> for LocalId {
    fn from(id: ObjectId) -> Self {
        Self::Content(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ephemeral_text_form() {
        assert_eq!(LocalId::Ephemeral(17).to_string(), "local:17");
        assert_eq!("local:17".parse::<LocalId>().unwrap(), LocalId::Ephemeral(17));
    }

    #[test]
    fn content_text_form_is_plain_hex() {
        let id = ObjectId::from_bytes(b"content");
        let local = LocalId::from(id);
        assert_eq!(local.to_string(), id.to_hex());
        assert_eq!(local.content(), Some(id));
        assert!(!local.is_ephemeral());
    }

    #[test]
    fn bad_counter_is_rejected() {
        assert_eq!(
            "local:abc".parse::<LocalId>().unwrap_err(),
            TypeError::InvalidLocalId("local:abc".into())
        );
    }

    proptest! {
        #[test]
        fn ephemeral_roundtrip(n in any::<u64>()) {
            let id = LocalId::Ephemeral(n);
            prop_assert_eq!(id.to_string().parse::<LocalId>().unwrap(), id);
        }

        #[test]
        fn content_roundtrip(bytes in any::<[u8; 32]>()) {
            let id = LocalId::Content(ObjectId::from_hash(bytes));
            prop_assert_eq!(id.to_string().parse::<LocalId>().unwrap(), id);
        }
    }
}
