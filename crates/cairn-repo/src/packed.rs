//! Self-contained element bundles and explicit store transfer.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use cairn_schema::builtin::mutable_root;
use cairn_schema::TypeRegistry;
use cairn_store::{ElementStore, StructureElement};
use cairn_types::{LocalId, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::handle::ObjectHandle;
use crate::repository::Repository;

/// A committed object tree and every element it reaches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedStructure {
    pub root: ObjectId,
    pub elements: BTreeMap<ObjectId, StructureElement>,
}

impl PackedStructure {
    /// Check every element against its key.
    pub fn verify(&self) -> RepoResult<()> {
        verify_all(&self.elements)?;
        if !self.elements.contains_key(&self.root) {
            return Err(RepoError::CorruptObject {
                key: self.root,
                reason: "root element is missing from the pack".into(),
            });
        }
        Ok(())
    }
}

/// A repository's branch table and full commit history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedCommits {
    /// The branch table, hashed for transport only.
    pub mutable_root: StructureElement,
    pub elements: BTreeMap<ObjectId, StructureElement>,
}

fn verify_all(elements: &BTreeMap<ObjectId, StructureElement>) -> RepoResult<()> {
    for (key, element) in elements {
        let corrupt = |reason: String| {
            warn!(key = %key.short_hex(), %reason, "rejecting corrupt packed element");
            RepoError::CorruptObject { key: *key, reason }
        };
        element.verify().map_err(|e| corrupt(e.to_string()))?;
        if element.key != *key {
            return Err(corrupt(format!("element hashes to {}", element.key)));
        }
    }
    Ok(())
}

impl Repository {
    /// Every element reachable from `roots` through child keys.
    fn reachable(&mut self, roots: impl IntoIterator<Item = ObjectId>) -> RepoResult<BTreeMap<ObjectId, StructureElement>> {
        let mut out = BTreeMap::new();
        let mut queue: VecDeque<ObjectId> = roots.into_iter().collect();
        while let Some(key) = queue.pop_front() {
            if out.contains_key(&key) {
                continue;
            }
            let element = self.element_for(&key)?;
            queue.extend(element.child_keys.iter().copied());
            out.insert(key, element);
        }
        Ok(out)
    }

    /// Bundle the committed tree behind `h`. Fails with `NotCommitted` if it
    /// has uncommitted changes.
    pub fn pack_structure(&mut self, h: &ObjectHandle) -> RepoResult<PackedStructure> {
        let state = self.node(h)?;
        let root = match (&state.local_id, state.modified) {
            (LocalId::Content(key), false) => *key,
            _ => return Err(RepoError::NotCommitted),
        };
        let elements = self.reachable([root])?;
        debug!(root = %root.short_hex(), elements = elements.len(), "structure packed");
        Ok(PackedStructure { root, elements })
    }

    /// Load a packed tree. The returned root is read-only and standalone:
    /// it is not part of the workspace, and its links resolve on access.
    /// Objects first loaded through it are read-only as well.
    ///
    /// Every element is verified before anything is cached; a single bad
    /// element rejects the whole pack.
    pub fn unpack_structure(&mut self, packed: PackedStructure) -> RepoResult<ObjectHandle> {
        packed.verify()?;
        let root = packed.root;
        let count = packed.elements.len();
        for (key, element) in packed.elements {
            self.hashed_elements.entry(key).or_insert(element);
        }
        let (node, _) = self.materialize(&root, None, true)?;
        debug!(root = %root.short_hex(), elements = count, "structure unpacked");
        Ok(ObjectHandle::root(self.id, node))
    }

    /// Bundle the branch table with every commit and object it reaches.
    pub fn pack_commits(&mut self) -> RepoResult<PackedCommits> {
        let mut heads = BTreeSet::new();
        for key in self.branch_keys()? {
            heads.extend(self.get_branch(&key)?.heads);
        }
        let table = &self.arena.get(self.dotgit)?.record;
        let mutable_root = StructureElement::from_parts(
            table.tag().clone(),
            table.encode()?,
            heads.is_empty(),
            heads.clone(),
        );
        let elements = self.reachable(heads)?;
        debug!(elements = elements.len(), "commits packed");
        Ok(PackedCommits {
            mutable_root,
            elements,
        })
    }

    /// Rebuild a repository from [`pack_commits`](Self::pack_commits)
    /// output. No branch is current; check one out to get a workspace.
    pub fn from_packed_commits(
        registry: TypeRegistry,
        config: RepositoryConfig,
        packed: PackedCommits,
    ) -> RepoResult<Self> {
        verify_all(&packed.elements)?;
        let table_key = packed.mutable_root.key;
        packed
            .mutable_root
            .verify()
            .map_err(|e| RepoError::CorruptObject {
                key: table_key,
                reason: e.to_string(),
            })?;
        if packed.mutable_root.type_tag != mutable_root::tag() {
            return Err(RepoError::CorruptObject {
                key: table_key,
                reason: format!("expected a branch table, found {}", packed.mutable_root.type_tag),
            });
        }
        let table = registry.decode(&mutable_root::tag(), &packed.mutable_root.value)?;

        let mut repo = Self::new(registry, config);
        let dotgit = repo.dotgit;
        repo.arena.get_mut(dotgit)?.record = table;
        repo.find_child_links(dotgit)?;
        repo.hashed_elements.extend(packed.elements);
        let branches = repo.branch_keys()?.len();
        let repository = repo.repository_key()?;
        info!(
            repository = %repository,
            branches,
            elements = repo.hashed_elements.len(),
            "repository restored from pack"
        );
        Ok(repo)
    }

    /// Copy `keys` and everything they reach from `store` into the local
    /// cache. Returns the number of elements copied.
    pub fn pull(&mut self, store: &dyn ElementStore, keys: &[ObjectId]) -> RepoResult<usize> {
        let mut queue: VecDeque<ObjectId> = keys.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut copied = 0;
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            let element = match self.hashed_elements.get(&key) {
                Some(element) => element.clone(),
                None => {
                    let element = store
                        .get(&key)?
                        .ok_or_else(|| RepoError::ObjectNotResident(key.to_hex()))?;
                    if let Err(e) = element.verify() {
                        warn!(key = %key.short_hex(), error = %e, "rejecting corrupt element");
                        return Err(RepoError::CorruptObject {
                            key,
                            reason: e.to_string(),
                        });
                    }
                    self.hashed_elements.insert(key, element.clone());
                    copied += 1;
                    element
                }
            };
            queue.extend(element.child_keys.iter().copied());
        }
        debug!(requested = keys.len(), copied, "pulled elements");
        Ok(copied)
    }

    /// Publish every cached element `store` does not have yet. Returns the
    /// number of elements written.
    pub fn push(&self, store: &dyn ElementStore) -> RepoResult<usize> {
        let mut batch = BTreeMap::new();
        for (key, element) in &self.hashed_elements {
            if !store.contains(key)? {
                batch.insert(*key, element.clone());
            }
        }
        let written = batch.len();
        if written > 0 {
            store.put_batch(batch)?;
        }
        debug!(written, "pushed elements");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_schema::Value;
    use cairn_store::InMemoryElementStore;

    use super::*;
    use crate::branch::CheckoutOptions;
    use crate::testing::{book_repo, new_person, registry, repo, set_title, title};

    fn committed_book() -> (Repository, ObjectHandle, ObjectId) {
        let (mut repo, book) = book_repo();
        set_title(&mut repo, &book, "contacts");
        let p = new_person(&mut repo, "Ada", 1);
        repo.set_linked(&book, "owner", &p).unwrap();
        let commit = repo.commit_at("first", 10).unwrap();
        (repo, book, commit)
    }

    #[test]
    fn uncommitted_structures_cannot_be_packed() {
        let (mut repo, book) = book_repo();
        assert_eq!(repo.pack_structure(&book), Err(RepoError::NotCommitted));
    }

    #[test]
    fn packed_structure_unpacks_read_only_elsewhere() {
        let (mut source, book, _) = committed_book();
        let packed = source.pack_structure(&book).unwrap();
        assert_eq!(packed.elements.len(), 2);

        let mut target = repo();
        let copy = target.unpack_structure(packed).unwrap();
        assert!(target.is_read_only(&copy).unwrap());
        assert_eq!(target.record(&copy).unwrap(), source.record(&book).unwrap());
        assert_eq!(title(&mut target, &copy), "contacts");
        let owner = target.get_linked(&copy, "owner").unwrap().unwrap();
        assert_eq!(target.get_scalar(&owner, "name").unwrap(), Value::from("Ada"));
        assert!(matches!(
            target.set_field(&copy, "title", Value::from("mine")),
            Err(RepoError::ReadOnlyViolation(_))
        ));
        assert!(target.is_read_only(&owner).unwrap());
        assert_eq!(
            target.set_field(&owner, "name", Value::from("Mallory")),
            Err(RepoError::ReadOnlyViolation("name".into()))
        );
        assert!(!target.is_modified(&owner).unwrap());
        assert!(!target.is_modified(&copy).unwrap());
        assert_eq!(target.get_scalar(&owner, "name").unwrap(), Value::from("Ada"));
        assert_eq!(target.status(), crate::Status::NotInitialized);
    }

    #[test]
    fn tampered_packs_are_rejected_whole() {
        let (mut source, book, _) = committed_book();
        let mut packed = source.pack_structure(&book).unwrap();
        let victim = *packed.elements.keys().next().unwrap();
        packed.elements.get_mut(&victim).unwrap().value.push(b' ');

        let mut target = repo();
        assert!(matches!(
            target.unpack_structure(packed),
            Err(RepoError::CorruptObject { key, .. }) if key == victim
        ));
        assert_eq!(target.element_count(), 0);
    }

    #[test]
    fn packed_commits_restore_branches_and_history() {
        let (mut source, book, first) = committed_book();
        set_title(&mut source, &book, "renamed");
        let second = source.commit_at("second", 20).unwrap();
        let branch_key = source.current_branch_key().unwrap().to_string();

        let packed = source.pack_commits().unwrap();
        let mut restored = Repository::from_packed_commits(
            registry(),
            RepositoryConfig::default(),
            packed,
        )
        .unwrap();
        assert_eq!(restored.repository_key().unwrap(), source.repository_key().unwrap());
        assert_eq!(restored.get_branch(&branch_key).unwrap().heads, vec![second]);

        let head = restored.checkout(&branch_key, CheckoutOptions::head()).unwrap();
        assert_eq!(title(&mut restored, &head), "renamed");
        let old = restored
            .checkout(&branch_key, CheckoutOptions::at_commit(first))
            .unwrap();
        assert_eq!(title(&mut restored, &old), "contacts");
    }

    #[test]
    fn misses_fetch_from_the_store_only_when_configured() {
        let store = Arc::new(InMemoryElementStore::new());
        let (mut source, _, _) = committed_book();
        let branch_key = source.current_branch_key().unwrap().to_string();
        assert_eq!(source.push(store.as_ref()).unwrap(), 3);
        assert_eq!(source.push(store.as_ref()).unwrap(), 0);

        let mut table_only = source.pack_commits().unwrap();
        table_only.elements.clear();

        let mut local = Repository::from_packed_commits(
            registry(),
            RepositoryConfig::default(),
            table_only.clone(),
        )
        .unwrap()
        .with_store(store.clone());
        assert!(matches!(
            local.checkout(&branch_key, CheckoutOptions::head()),
            Err(RepoError::ObjectNotResident(_))
        ));

        let mut fetching = Repository::from_packed_commits(
            registry(),
            RepositoryConfig::fetching(),
            table_only,
        )
        .unwrap()
        .with_store(store);
        let head = fetching.checkout(&branch_key, CheckoutOptions::head()).unwrap();
        assert_eq!(title(&mut fetching, &head), "contacts");
    }

    #[test]
    fn pull_copies_reachable_elements() {
        let store = InMemoryElementStore::new();
        let (source, _, commit) = committed_book();
        source.push(&store).unwrap();

        let mut target = repo();
        assert_eq!(target.pull(&store, &[commit]).unwrap(), 3);
        assert_eq!(target.pull(&store, &[commit]).unwrap(), 0);
        assert!(target.element(&commit).is_some());
        assert!(matches!(
            target.pull(&store, &[ObjectId::from_bytes(b"missing")]),
            Err(RepoError::ObjectNotResident(_))
        ));
    }
}
