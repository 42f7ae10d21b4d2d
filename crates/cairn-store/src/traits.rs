use std::collections::BTreeMap;

use cairn_types::ObjectId;

use crate::element::StructureElement;
use crate::error::StoreResult;

/// Content-addressed element store.
///
/// Implementations must satisfy these invariants:
/// - Elements are immutable once written; writing an existing key is a no-op.
/// - `get` returning `None` means "not resident in this store", nothing more.
/// - Elements are verified before they are accepted.
/// - The store may be shared across repositories, so it must be `Send + Sync`.
pub trait ElementStore: Send + Sync {
    /// Read an element by key.
    fn get(&self, key: &ObjectId) -> StoreResult<Option<StructureElement>>;

    /// Write one element. Idempotent.
    fn put(&self, element: StructureElement) -> StoreResult<()>;

    /// Check whether an element is resident.
    fn contains(&self, key: &ObjectId) -> StoreResult<bool>;

    /// Write many elements.
    ///
    /// Default implementation calls `put()` for each element. Backends may
    /// override to batch round-trips.
    fn put_batch(&self, elements: BTreeMap<ObjectId, StructureElement>) -> StoreResult<()> {
        for element in elements.into_values() {
            self.put(element)?;
        }
        Ok(())
    }

    /// Read many elements, skipping the ones that are not resident.
    fn get_batch(&self, keys: &[ObjectId]) -> StoreResult<BTreeMap<ObjectId, StructureElement>> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(element) = self.get(key)? {
                found.insert(*key, element);
            }
        }
        Ok(found)
    }
}
