use std::collections::{BTreeMap, BTreeSet};

use cairn_schema::builtin::{commit_ref, link, parent_ref};
use cairn_schema::{Record, TypeTag, Value};
use cairn_store::StructureElement;
use cairn_types::{LocalId, ObjectId};
use tracing::debug;

use crate::arena::{NodeId, NodeState};
use crate::error::{RepoError, RepoResult};
use crate::handle::LinkAddr;
use crate::history::Relationship;
use crate::links::{rekey_link, write_link};
use crate::repository::Repository;

/// Elements produced by one commit, keyed by content hash.
pub(crate) type Accumulator = BTreeMap<ObjectId, StructureElement>;

/// What a commit ref records about its object root.
#[derive(Clone, Debug)]
pub(crate) struct RootLink {
    pub key: ObjectId,
    pub tag: TypeTag,
    pub isleaf: bool,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Repository {
    /// Commit the workspace, dated now. Returns the new commit key.
    pub fn commit(&mut self, comment: &str) -> RepoResult<ObjectId> {
        self.commit_at(comment, now_millis())
    }

    /// Commit the workspace with an explicit date (milliseconds since the
    /// epoch).
    ///
    /// Modified objects are serialized bottom-up, a commit ref chaining onto
    /// the current head (plus any queued merges) is created, and the branch
    /// is moved to it. Works from both `Modified` and `UpToDate`.
    pub fn commit_at(&mut self, comment: &str, date: i64) -> RepoResult<ObjectId> {
        let root = self.workspace_root.ok_or_else(|| {
            RepoError::InvalidRepositoryState("workspace is not initialized".into())
        })?;
        if self.detached_head {
            return Err(RepoError::InvalidRepositoryState(
                "cannot commit on a detached head; create a branch first".into(),
            ));
        }
        let (branch_node, branch_path) = self.current_branch_loc()?;
        let heads = self.head_keys(branch_node, &branch_path)?;
        if heads.len() > 1 {
            return Err(RepoError::InvalidRepositoryState(
                "branch has diverged and must be merged on read".into(),
            ));
        }

        let mut acc = Accumulator::new();
        let root_key = self.recurse_commit(root, &mut acc)?;
        let root_state = self.arena.get(root)?;
        let root_link = RootLink {
            key: root_key,
            tag: root_state.record.tag().clone(),
            isleaf: root_state.child_links.is_empty(),
        };

        let mut parents: Vec<(ObjectId, Relationship)> = heads
            .iter()
            .map(|head| (*head, Relationship::Parent))
            .collect();
        parents.extend(
            self.merged_from
                .iter()
                .filter(|key| !heads.contains(key))
                .map(|key| (*key, Relationship::MergedFrom)),
        );

        let key = self.create_commit_ref(date, comment, &root_link, &parents, &mut acc)?;
        self.set_heads(branch_node, &branch_path, &[key])?;
        let written = acc.len();
        self.publish(acc)?;
        self.merged_from.clear();
        debug!(
            commit = %key.short_hex(),
            root = %root_key.short_hex(),
            parents = parents.len(),
            written,
            "committed"
        );
        Ok(key)
    }

    /// Serialize `node` and everything modified below it, children first.
    ///
    /// Unmodified trees are not touched and just report their key. Each
    /// serialized tree is re-keyed to its content hash and every link
    /// pointing at it is rewritten before its parents are serialized.
    pub(crate) fn recurse_commit(&mut self, node: NodeId, acc: &mut Accumulator) -> RepoResult<ObjectId> {
        let state = self.arena.get(node)?;
        if !state.modified {
            return match &state.local_id {
                LocalId::Content(key) => Ok(*key),
                LocalId::Ephemeral(_) => Err(RepoError::InvalidRepositoryState(format!(
                    "object {} has never been committed",
                    state.local_id
                ))),
            };
        }

        let children: Vec<LinkAddr> = state.child_links.iter().cloned().collect();
        let mut child_keys = BTreeSet::new();
        for addr in children {
            let Some(key) = self.link_info(&addr)?.key else {
                continue;
            };
            let child_key = match self.resident(&key).filter(|child| *child != node) {
                Some(child) => {
                    let child_key = self.recurse_commit(child, acc)?;
                    let isleaf = self.arena.get(child)?.child_links.is_empty();
                    let owner = self.arena.get_mut(node)?;
                    if let Ok(link) = owner.record.at_mut(&addr.path) {
                        rekey_link(link, &LocalId::Content(child_key), Some(isleaf));
                    }
                    child_key
                }
                None => match key {
                    LocalId::Content(id) => id,
                    LocalId::Ephemeral(_) => {
                        return Err(RepoError::InvalidRepositoryState(format!(
                            "link {} points at a discarded object",
                            addr.path
                        )))
                    }
                },
            };
            child_keys.insert(child_key);
        }

        let state = self.arena.get_mut(node)?;
        let isleaf = state.child_links.is_empty();
        let element = StructureElement::from_parts(
            state.record.tag().clone(),
            state.record.encode()?,
            isleaf,
            child_keys,
        );
        let key = element.key;
        let old_id = std::mem::replace(&mut state.local_id, LocalId::Content(key));
        state.modified = false;
        let parents: Vec<LinkAddr> = state.parent_links.iter().cloned().collect();

        if self.workspace.get(&old_id) == Some(&node) {
            self.workspace.remove(&old_id);
            self.workspace.insert(LocalId::Content(key), node);
        }
        for addr in parents {
            if let Ok(owner) = self.arena.get_mut(addr.owner) {
                if owner.read_only {
                    continue;
                }
                if let Ok(link) = owner.record.at_mut(&addr.path) {
                    rekey_link(link, &LocalId::Content(key), Some(isleaf));
                }
            }
        }

        self.serialized += 1;
        debug!(key = %key.short_hex(), old = %old_id, "object serialized");
        acc.insert(key, element);
        Ok(key)
    }

    /// Build, hash and index a read-only commit ref.
    pub(crate) fn create_commit_ref(
        &mut self,
        date: i64,
        comment: &str,
        root: &RootLink,
        parents: &[(ObjectId, Relationship)],
        acc: &mut Accumulator,
    ) -> RepoResult<ObjectId> {
        let mut record = Record::new(commit_ref::tag());
        record.set_scalar(commit_ref::DATE, Value::Int(date));
        record.set_scalar(commit_ref::COMMENT, Value::Str(comment.to_string()));
        write_link(
            record.message_or_insert(commit_ref::OBJECT_ROOT, link::tag()),
            &LocalId::Content(root.key),
            &root.tag,
            root.isleaf,
        );

        let mut child_keys = BTreeSet::from([root.key]);
        for (parent, relationship) in parents {
            let mut pref = Record::new(parent_ref::tag());
            pref.set_scalar(parent_ref::RELATIONSHIP, Value::Int(relationship.code()));
            write_link(
                pref.message_or_insert(parent_ref::COMMIT_REF, link::tag()),
                &LocalId::Content(*parent),
                &commit_ref::tag(),
                false,
            );
            record.messages_mut(commit_ref::PARENT_REFS).push(pref);
            child_keys.insert(*parent);
        }
        self.registry.validate(&record)?;

        let element =
            StructureElement::from_parts(commit_ref::tag(), record.encode()?, false, child_keys);
        let key = element.key;
        if !self.commit_index.contains_key(&key) {
            let node = self
                .arena
                .insert(NodeState::new(record, LocalId::Content(key), false, true));
            self.find_child_links(node)?;
            self.commit_index.insert(key, node);
        }
        self.serialized += 1;
        acc.insert(key, element);
        Ok(key)
    }

    /// Move new elements into the local cache and the attached store.
    pub(crate) fn publish(&mut self, acc: Accumulator) -> RepoResult<()> {
        if acc.is_empty() {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.put_batch(acc.clone())?;
        }
        self.hashed_elements.extend(acc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_schema::Value;
    use cairn_store::{ElementStore, InMemoryElementStore};

    use super::*;
    use crate::repository::Status;
    use crate::testing::{address_book, book_repo, new_person, repo, set_title};

    fn book_with_owner() -> (Repository, crate::ObjectHandle, crate::ObjectHandle) {
        let (mut repo, book) = book_repo();
        set_title(&mut repo, &book, "contacts");
        let p = new_person(&mut repo, "Ada", 1);
        repo.set_linked(&book, "owner", &p).unwrap();
        (repo, book, p)
    }

    #[test]
    fn committed_keys_are_content_hashes() {
        let (mut repo, book, p) = book_with_owner();
        repo.commit_at("first", 10).unwrap();

        for h in [&book, &p] {
            let key = match repo.local_id(h).unwrap() {
                LocalId::Content(key) => key,
                other => panic!("expected a content key, got {other}"),
            };
            let bytes = repo.record(h).unwrap().encode().unwrap();
            let rebuilt = StructureElement::from_parts(repo.type_tag(h).unwrap(), bytes, true, BTreeSet::new());
            assert_eq!(rebuilt.key, key);
            assert!(repo.element(&key).unwrap().verify().is_ok());
        }
    }

    #[test]
    fn commit_rewrites_links_to_content_keys() {
        let (mut repo, book, p) = book_with_owner();
        repo.commit_at("first", 10).unwrap();
        let info = repo.link_info(&repo.get_link(&book, "owner").unwrap()).unwrap();
        assert_eq!(info.key, Some(repo.local_id(&p).unwrap()));
        assert!(info.isleaf);

        let root_key = match repo.local_id(&book).unwrap() {
            LocalId::Content(key) => key,
            other => panic!("root not committed: {other}"),
        };
        let element = repo.element(&root_key).unwrap();
        assert!(!element.isleaf);
        assert_eq!(element.child_keys.len(), 1);
    }

    #[test]
    fn commit_moves_the_branch_head() {
        let (mut repo, _book, _p) = book_with_owner();
        assert_eq!(repo.status(), Status::Modified);
        let first = repo.commit_at("first", 10).unwrap();
        assert_eq!(repo.status(), Status::UpToDate);
        assert_eq!(repo.get_branch("master").unwrap().heads, vec![first]);

        let second = repo.commit_at("second", 20).unwrap();
        assert_eq!(repo.get_branch("master").unwrap().heads, vec![second]);
        let info = repo.commit_info(&second).unwrap();
        assert_eq!(info.parents, vec![(first, Relationship::Parent)]);
        assert_eq!(info.comment, "second");
        assert_eq!(info.date, 20);
    }

    #[test]
    fn unchanged_recommit_serializes_only_the_commit_ref() {
        let (mut repo, _book, _p) = book_with_owner();
        let first = repo.commit_at("same", 10).unwrap();
        let after_first = repo.serialized_elements();
        assert_eq!(after_first, 3);

        let second = repo.commit_at("same", 10).unwrap();
        assert_eq!(repo.serialized_elements(), after_first + 1);
        assert_ne!(first, second, "the parent chain differs");
        assert_eq!(
            repo.commit_info(&first).unwrap().object_root,
            repo.commit_info(&second).unwrap().object_root
        );
    }

    #[test]
    fn identical_graphs_commit_to_identical_keys() {
        let (mut a, _, _) = book_with_owner();
        let (mut b, _, _) = book_with_owner();
        assert_eq!(a.commit_at("c", 5).unwrap(), b.commit_at("c", 5).unwrap());
    }

    #[test]
    fn commit_requires_a_workspace() {
        let mut repo = repo();
        assert!(matches!(repo.commit("nothing"), Err(RepoError::InvalidRepositoryState(_))));
    }

    #[test]
    fn commit_publishes_to_the_attached_store() {
        let store = Arc::new(InMemoryElementStore::new());
        let mut repo = repo().with_store(store.clone());
        let book = repo.init_workspace(&address_book()).unwrap();
        set_title(&mut repo, &book, "shared");
        let key = repo.commit("first").unwrap();
        assert!(store.contains(&key).unwrap());
        assert_eq!(store.len(), repo.element_count());
    }

    #[test]
    fn unmodified_commit_keeps_field_values() {
        let (mut repo, book, _p) = book_with_owner();
        repo.commit_at("first", 10).unwrap();
        repo.set_field(&book, "title", Value::from("renamed")).unwrap();
        repo.commit_at("second", 20).unwrap();
        assert_eq!(crate::testing::title(&mut repo, &book), "renamed");
    }
}
