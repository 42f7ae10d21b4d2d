use std::collections::HashMap;
use std::sync::RwLock;

use cairn_types::ObjectId;
use tracing::debug;

use crate::element::StructureElement;
use crate::error::{StoreError, StoreResult};
use crate::traits::ElementStore;

/// In-memory, HashMap-based element store.
///
/// Intended for tests and embedding, and as the shared backend several
/// repositories in one process can publish to. Elements live behind a
/// `RwLock` and are cloned on read/write.
pub struct InMemoryElementStore {
    elements: RwLock<HashMap<ObjectId, StructureElement>>,
}

impl InMemoryElementStore {
    pub fn new() -> Self {
        Self {
            elements: RwLock::new(HashMap::new()),
        }
    }

    /// Number of elements currently stored.
    pub fn len(&self) -> usize {
        self.elements.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored element values.
    pub fn total_bytes(&self) -> u64 {
        self.elements
            .read()
            .expect("lock poisoned")
            .values()
            .map(|el| el.size() as u64)
            .sum()
    }

    /// Sorted list of all resident keys.
    pub fn all_keys(&self) -> Vec<ObjectId> {
        let map = self.elements.read().expect("lock poisoned");
        let mut keys: Vec<ObjectId> = map.keys().copied().collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryElementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementStore for InMemoryElementStore {
    fn get(&self, key: &ObjectId) -> StoreResult<Option<StructureElement>> {
        let map = self.elements.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn put(&self, element: StructureElement) -> StoreResult<()> {
        if element.key.is_null() {
            return Err(StoreError::NullKey);
        }
        element.verify()?;
        let mut map = self.elements.write().expect("lock poisoned");
        map.entry(element.key).or_insert(element);
        Ok(())
    }

    fn contains(&self, key: &ObjectId) -> StoreResult<bool> {
        let map = self.elements.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn put_batch(
        &self,
        elements: std::collections::BTreeMap<ObjectId, StructureElement>,
    ) -> StoreResult<()> {
        for element in elements.values() {
            if element.key.is_null() {
                return Err(StoreError::NullKey);
            }
            element.verify()?;
        }
        let count = elements.len();
        let mut map = self.elements.write().expect("lock poisoned");
        for (key, element) in elements {
            map.entry(key).or_insert(element);
        }
        debug!(count, total = map.len(), "published elements");
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryElementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryElementStore")
            .field("element_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use cairn_schema::TypeTag;

    use super::*;

    fn element(value: &str) -> StructureElement {
        StructureElement::from_parts(
            TypeTag::new("test", "Note"),
            value.as_bytes().to_vec(),
            true,
            BTreeSet::new(),
        )
    }

    #[test]
    fn put_and_get() {
        let store = InMemoryElementStore::new();
        let el = element("hello");
        store.put(el.clone()).unwrap();
        assert_eq!(store.get(&el.key).unwrap(), Some(el.clone()));
        assert!(store.contains(&el.key).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn miss_returns_none() {
        let store = InMemoryElementStore::new();
        assert_eq!(store.get(&ObjectId::from_bytes(b"nope")).unwrap(), None);
        assert!(!store.contains(&ObjectId::from_bytes(b"nope")).unwrap());
    }

    #[test]
    fn put_is_idempotent() {
        let store = InMemoryElementStore::new();
        store.put(element("x")).unwrap();
        store.put(element("x")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn corrupt_elements_are_rejected() {
        let store = InMemoryElementStore::new();
        let mut el = element("good");
        el.value = b"evil".to_vec();
        assert!(matches!(store.put(el.clone()), Err(StoreError::HashMismatch { .. })));

        let mut batch = BTreeMap::new();
        batch.insert(el.key, el);
        let ok = element("fine");
        batch.insert(ok.key, ok.clone());
        assert!(store.put_batch(batch).is_err());
        assert!(store.is_empty(), "a failed batch writes nothing");
    }

    #[test]
    fn null_key_is_rejected() {
        let store = InMemoryElementStore::new();
        let mut el = element("x");
        el.key = ObjectId::null();
        assert_eq!(store.put(el), Err(StoreError::NullKey));
    }

    #[test]
    fn batch_roundtrip() {
        let store = InMemoryElementStore::new();
        let batch: BTreeMap<_, _> = ["a", "b", "c"]
            .into_iter()
            .map(element)
            .map(|el| (el.key, el))
            .collect();
        let keys: Vec<_> = batch.keys().copied().collect();
        store.put_batch(batch).unwrap();
        assert_eq!(store.all_keys(), keys);

        let mut wanted = keys.clone();
        wanted.push(ObjectId::from_bytes(b"absent"));
        let got = store.get_batch(&wanted).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(store.total_bytes(), 3);
    }

    #[test]
    fn shared_across_threads() {
        let store = Arc::new(InMemoryElementStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.put(element(&format!("v{i}"))).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 4);
    }
}
