//! Branches, checkout, reset, merging and history inspection.

use std::collections::{BTreeMap, HashSet};

use cairn_schema::builtin::{branch, commit_ref, mutable_root, parent_ref};
use cairn_schema::{FieldPath, Record, Value};
use cairn_types::{LocalId, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arena::{NodeId, NodeState};
use crate::commit::{now_millis, Accumulator, RootLink};
use crate::error::{RepoError, RepoResult};
use crate::handle::{LinkAddr, ObjectHandle};
use crate::history::{self, CommitNode, Relationship};
use crate::links::{new_link, read_link};
use crate::repository::{CurrentBranch, Repository, Status};

/// Branch key of the synthetic branch wrapping a detached checkout.
pub const DETACHED_BRANCH_KEY: &str = "detached head";

/// Comment recorded on commits created by merge-on-read.
pub const MERGE_BY_DATE_COMMENT: &str = "Merged divergent branch by date keeping the newest value";

/// Which commit of a branch to check out. At most one selector may be set;
/// with neither, the branch head is checked out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOptions {
    pub commit_id: Option<ObjectId>,
    /// Newest commit dated at or before this many milliseconds since the epoch.
    pub older_than: Option<i64>,
}

impl CheckoutOptions {
    pub fn head() -> Self {
        Self::default()
    }

    pub fn at_commit(commit_id: ObjectId) -> Self {
        Self {
            commit_id: Some(commit_id),
            older_than: None,
        }
    }

    pub fn older_than(date: i64) -> Self {
        Self {
            commit_id: None,
            older_than: Some(date),
        }
    }
}

/// A decoded commit ref.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub key: ObjectId,
    pub date: i64,
    pub comment: String,
    pub object_root: ObjectId,
    pub parents: Vec<(ObjectId, Relationship)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInfo {
    pub key: String,
    /// More than one head means the branch has diverged.
    pub heads: Vec<ObjectId>,
}

impl Repository {
    // ---- branch table ----

    /// Branch key for a nickname, or the name itself if it is not one.
    pub(crate) fn resolve_branch_name(&self, name: &str) -> String {
        self.nicknames
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Location of the branch row with `key` in the branch table.
    pub(crate) fn branch_path(&self, key: &str) -> RepoResult<(NodeId, FieldPath)> {
        let table = &self.arena.get(self.dotgit)?.record;
        table
            .messages(mutable_root::BRANCHES)
            .iter()
            .position(|row| row.scalar(branch::BRANCH_KEY).and_then(Value::as_str) == Some(key))
            .map(|i| (self.dotgit, FieldPath::root().item(mutable_root::BRANCHES, i)))
            .ok_or_else(|| RepoError::BranchNotFound(key.to_string()))
    }

    pub(crate) fn current_branch_loc(&self) -> RepoResult<(NodeId, FieldPath)> {
        match &self.current_branch {
            None => Err(RepoError::InvalidRepositoryState("no current branch".into())),
            Some(CurrentBranch::Attached(key)) => self.branch_path(key),
            Some(CurrentBranch::Detached(node)) => Ok((*node, FieldPath::root())),
        }
    }

    pub(crate) fn head_keys(&self, node: NodeId, path: &FieldPath) -> RepoResult<Vec<ObjectId>> {
        let row = self
            .arena
            .get(node)?
            .record
            .at(path)
            .map_err(|_| RepoError::InvalidAccess)?;
        row.messages(branch::COMMIT_REFS)
            .iter()
            .map(|link| match read_link(link)?.key {
                Some(LocalId::Content(id)) => Ok(id),
                other => Err(RepoError::InvalidRepositoryState(format!(
                    "branch head {other:?} is not a commit key"
                ))),
            })
            .collect()
    }

    /// Replace the heads of the branch row at `path`.
    pub(crate) fn set_heads(&mut self, node: NodeId, path: &FieldPath, heads: &[ObjectId]) -> RepoResult<()> {
        let before = self.link_targets(node)?;
        let row = self
            .arena
            .get_mut(node)?
            .record
            .at_mut(path)
            .map_err(|_| RepoError::InvalidAccess)?;
        let refs = row.messages_mut(branch::COMMIT_REFS);
        refs.clear();
        refs.extend(
            heads
                .iter()
                .map(|head| new_link(&LocalId::Content(*head), &commit_ref::tag(), false)),
        );
        self.relink(node, before)
    }

    /// Create a branch seeded with the current branch's head and make it
    /// current. A detached checkout becomes attached (and writable) again.
    pub fn branch(&mut self, nickname: Option<&str>) -> RepoResult<String> {
        if let Some(name) = nickname {
            if self.nicknames.contains_key(name) {
                return Err(RepoError::InvalidArgument(format!(
                    "branch nickname {name:?} is already in use"
                )));
            }
        }
        let heads = match self.current_branch {
            Some(_) => {
                let (node, path) = self.current_branch_loc()?;
                self.head_keys(node, &path)?
            }
            None => Vec::new(),
        };
        if heads.len() > 1 {
            return Err(RepoError::InvalidRepositoryState(
                "cannot branch from a diverged branch".into(),
            ));
        }

        let key = Uuid::now_v7().to_string();
        let mut row = Record::new(branch::tag());
        row.set_scalar(branch::BRANCH_KEY, Value::Str(key.clone()));
        let dotgit = self.dotgit;
        let rows = self
            .arena
            .get_mut(dotgit)?
            .record
            .messages_mut(mutable_root::BRANCHES);
        rows.push(row);
        let path = FieldPath::root().item(mutable_root::BRANCHES, rows.len() - 1);
        self.set_heads(dotgit, &path, &heads)?;
        if let Some(name) = nickname {
            self.nicknames.insert(name.to_string(), key.clone());
        }

        if let Some(CurrentBranch::Detached(old)) = self.current_branch.take() {
            self.drop_branch_node(old)?;
            self.detached_head = false;
            if let Some(root) = self.workspace_root {
                self.set_structure_flag(root, false)?;
            }
        }
        self.current_branch = Some(CurrentBranch::Attached(key.clone()));
        info!(branch = %key, nickname = nickname.unwrap_or_default(), "branch created");
        Ok(key)
    }

    fn create_detached_branch(&mut self, commit: ObjectId) -> RepoResult<NodeId> {
        let mut record = Record::new(branch::tag());
        record.set_scalar(branch::BRANCH_KEY, Value::Str(DETACHED_BRANCH_KEY.into()));
        let local_id = self.next_local_id();
        let node = self
            .arena
            .insert(NodeState::new(record, local_id, false, true));
        self.set_heads(node, &FieldPath::root(), &[commit])?;
        Ok(node)
    }

    fn drop_branch_node(&mut self, node: NodeId) -> RepoResult<()> {
        for (addr, target) in self.link_targets(node)? {
            if let Ok(state) = self.arena.get_mut(target) {
                state.parent_links.remove(&addr);
            }
        }
        self.arena.remove(node);
        Ok(())
    }

    pub fn branch_keys(&self) -> RepoResult<Vec<String>> {
        let table = &self.arena.get(self.dotgit)?.record;
        Ok(table
            .messages(mutable_root::BRANCHES)
            .iter()
            .filter_map(|row| row.scalar(branch::BRANCH_KEY).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Heads of a branch, by key or nickname.
    pub fn get_branch(&self, name: &str) -> RepoResult<BranchInfo> {
        let key = self.resolve_branch_name(name);
        let (node, path) = self.branch_path(&key)?;
        let heads = self.head_keys(node, &path)?;
        Ok(BranchInfo { key, heads })
    }

    /// Key of the current branch; `None` before the first branch exists or
    /// while detached.
    pub fn current_branch_key(&self) -> Option<&str> {
        match &self.current_branch {
            Some(CurrentBranch::Attached(key)) => Some(key.as_str()),
            _ => None,
        }
    }

    pub fn nicknames(&self) -> &BTreeMap<String, String> {
        &self.nicknames
    }

    // ---- commit refs ----

    pub(crate) fn load_commit(&mut self, key: &ObjectId) -> RepoResult<NodeId> {
        if let Some(node) = self.resident(&LocalId::Content(*key)) {
            return Ok(node);
        }
        self.load_object(key, Some(&commit_ref::tag()), false)
    }

    /// Decode a commit ref, loading it if needed.
    pub fn commit_info(&mut self, key: &ObjectId) -> RepoResult<CommitInfo> {
        let node = self.load_commit(key)?;
        let record = &self.arena.get(node)?.record;
        if *record.tag() != commit_ref::tag() {
            return Err(RepoError::CorruptObject {
                key: *key,
                reason: format!("expected a commit ref, found {}", record.tag()),
            });
        }
        let corrupt = |reason: &str| RepoError::CorruptObject {
            key: *key,
            reason: reason.to_string(),
        };

        let object_root = match record
            .message(commit_ref::OBJECT_ROOT)
            .map(read_link)
            .transpose()?
            .and_then(|link| link.key)
        {
            Some(LocalId::Content(id)) => id,
            _ => return Err(corrupt("commit has no object root")),
        };
        let mut parents = Vec::new();
        for pref in record.messages(commit_ref::PARENT_REFS) {
            let code = pref
                .scalar(parent_ref::RELATIONSHIP)
                .and_then(Value::as_int)
                .unwrap_or(0);
            let relationship =
                Relationship::from_code(code).ok_or_else(|| corrupt("unknown parent relationship"))?;
            let parent = match pref
                .message(parent_ref::COMMIT_REF)
                .map(read_link)
                .transpose()?
                .and_then(|link| link.key)
            {
                Some(LocalId::Content(id)) => id,
                _ => return Err(corrupt("parent ref without a commit key")),
            };
            parents.push((parent, relationship));
        }

        Ok(CommitInfo {
            key: *key,
            date: record
                .scalar(commit_ref::DATE)
                .and_then(Value::as_int)
                .unwrap_or_default(),
            comment: record
                .scalar(commit_ref::COMMENT)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            object_root,
            parents,
        })
    }

    pub(crate) fn commit_node(&mut self, key: &ObjectId) -> RepoResult<CommitNode> {
        let info = self.commit_info(key)?;
        Ok(CommitNode {
            date: info.date,
            parents: info.parents,
        })
    }

    /// First-parent history of a branch, newest first. A diverged branch
    /// lists each head's line in turn.
    pub fn log(&mut self, name: &str) -> RepoResult<Vec<CommitInfo>> {
        let BranchInfo { heads, .. } = self.get_branch(name)?;
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for head in heads {
            let mut next = Some(head);
            while let Some(key) = next {
                if !seen.insert(key) {
                    break;
                }
                let info = self.commit_info(&key)?;
                next = info
                    .parents
                    .iter()
                    .find(|(_, rel)| *rel == Relationship::Parent)
                    .map(|(parent, _)| *parent);
                out.push(info);
            }
        }
        Ok(out)
    }

    // ---- checkout ----

    /// Replace the workspace with a commit of `name` (a branch key or
    /// nickname).
    ///
    /// Without selectors the head is checked out and the branch stays
    /// current; a diverged head is merged by date first. Selecting a
    /// historical commit detaches: the workspace is read-only and commits
    /// are refused until a new branch is created.
    pub fn checkout(&mut self, name: &str, options: CheckoutOptions) -> RepoResult<ObjectHandle> {
        if self.status() == Status::Modified {
            return Err(RepoError::InvalidRepositoryState(
                "workspace has uncommitted changes; commit or reset first".into(),
            ));
        }
        if options.commit_id.is_some() && options.older_than.is_some() {
            return Err(RepoError::InvalidArgument(
                "commit_id and older_than cannot be combined".into(),
            ));
        }
        let key = self.resolve_branch_name(name);
        let (node, path) = self.branch_path(&key)?;
        let heads = self.head_keys(node, &path)?;
        if heads.is_empty() {
            return Err(RepoError::InvalidRepositoryState(format!(
                "branch {key} has no commits"
            )));
        }

        let (commit, detached) = match (options.commit_id, options.older_than) {
            (Some(target), _) => {
                let out = history::find_by_key(&heads, &target, |k| self.commit_node(k))?;
                let found = out.found.ok_or(RepoError::NoSuchCommit {
                    visited: out.visited,
                })?;
                (found, true)
            }
            (None, Some(bound)) => {
                let out = history::find_older_than(&heads, bound, |k| self.commit_node(k))?;
                let found = out.found.ok_or(RepoError::NoSuchCommit {
                    visited: out.visited,
                })?;
                (found, true)
            }
            (None, None) if heads.len() > 1 => {
                warn!(branch = %key, heads = heads.len(), "branch has diverged, merging by date");
                (self.merge_by_date(&key)?, false)
            }
            (None, None) => (heads[0], false),
        };

        self.discard_workspace(None);
        self.merged_from.clear();
        self.detached_head = detached;
        let current = if detached {
            CurrentBranch::Detached(self.create_detached_branch(commit)?)
        } else {
            CurrentBranch::Attached(key.clone())
        };
        self.current_branch = Some(current);
        let root = self.load_commit_root(commit)?;
        info!(branch = %key, commit = %commit.short_hex(), detached, "checked out");
        Ok(root)
    }

    /// Throw away uncommitted changes and reload the current head.
    pub fn reset(&mut self) -> RepoResult<ObjectHandle> {
        if self.status() != Status::Modified {
            return Err(RepoError::InvalidRepositoryState(
                "workspace has no changes to reset".into(),
            ));
        }
        let (node, path) = self.current_branch_loc()?;
        let head = match self.head_keys(node, &path)?.as_slice() {
            [head] => *head,
            [] => {
                return Err(RepoError::InvalidRepositoryState(
                    "branch has no commit to reset to".into(),
                ))
            }
            _ => {
                return Err(RepoError::InvalidRepositoryState(
                    "branch has diverged; check it out to merge it".into(),
                ))
            }
        };
        let keep = match self.current_branch {
            Some(CurrentBranch::Detached(node)) => Some(node),
            _ => None,
        };
        self.discard_workspace(keep);
        self.merged_from.clear();
        let root = self.load_commit_root(head)?;
        info!(commit = %head.short_hex(), "workspace reset");
        Ok(root)
    }

    /// Resolve a commit's object root as the new workspace root.
    fn load_commit_root(&mut self, commit: ObjectId) -> RepoResult<ObjectHandle> {
        let cref = self.load_commit(&commit)?;
        let addr = LinkAddr::new(cref, FieldPath::root().field(commit_ref::OBJECT_ROOT));
        let root = self.get_linked_object(addr)?;
        self.workspace_root = Some(root.node);
        self.load_links(root.node, self.config.load_leaves_on_checkout)?;
        if self.detached_head {
            self.set_structure_flag(root.node, true)?;
        }
        Ok(root)
    }

    // ---- merging ----

    /// Merge on read, dated now. See [`merge_by_date_at`](Self::merge_by_date_at).
    pub fn merge_by_date(&mut self, name: &str) -> RepoResult<ObjectId> {
        self.merge_by_date_at(name, now_millis())
    }

    /// Collapse a diverged branch into one commit whose object root is the
    /// newest head's. Ties go to the first head. The other heads are kept as
    /// `MergedFrom` parents. A single head is returned unchanged.
    pub fn merge_by_date_at(&mut self, name: &str, date: i64) -> RepoResult<ObjectId> {
        let key = self.resolve_branch_name(name);
        let (node, path) = self.branch_path(&key)?;
        let heads = self.head_keys(node, &path)?;
        match heads.as_slice() {
            [] => {
                return Err(RepoError::InvalidRepositoryState(format!(
                    "branch {key} has no commits"
                )))
            }
            [head] => return Ok(*head),
            _ => {}
        }

        let mut infos = Vec::with_capacity(heads.len());
        for head in &heads {
            infos.push(self.commit_info(head)?);
        }
        let dates: Vec<i64> = infos.iter().map(|info| info.date).collect();
        let primary = history::newest_head(&dates).unwrap_or(0);
        let winner = infos[primary].clone();

        let cref = self.load_commit(&winner.key)?;
        let root_info =
            self.link_info(&LinkAddr::new(cref, FieldPath::root().field(commit_ref::OBJECT_ROOT)))?;
        let root_link = RootLink {
            key: winner.object_root,
            tag: root_info.type_tag.ok_or_else(|| RepoError::CorruptObject {
                key: winner.key,
                reason: "object root link has no type".into(),
            })?,
            isleaf: root_info.isleaf,
        };

        let mut parents = vec![(winner.key, Relationship::Parent)];
        parents.extend(
            infos
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != primary)
                .map(|(_, info)| (info.key, Relationship::MergedFrom)),
        );

        let mut acc = Accumulator::new();
        let merged = self.create_commit_ref(date, MERGE_BY_DATE_COMMENT, &root_link, &parents, &mut acc)?;
        self.set_heads(node, &path, &[merged])?;
        self.publish(acc)?;
        info!(
            branch = %key,
            heads = heads.len(),
            kept = %winner.key.short_hex(),
            merged = %merged.short_hex(),
            "merged divergent branch by date"
        );
        Ok(merged)
    }

    /// Queue the head of another branch to be recorded as a `MergedFrom`
    /// parent of the next commit. Object content is not merged.
    pub fn merge(&mut self, name: &str) -> RepoResult<()> {
        let BranchInfo { key, heads } = self.get_branch(name)?;
        let head = match heads.as_slice() {
            [head] => *head,
            [] => {
                return Err(RepoError::InvalidRepositoryState(format!(
                    "branch {key} has no commits"
                )))
            }
            _ => {
                return Err(RepoError::InvalidRepositoryState(format!(
                    "branch {key} has diverged; merge it on read first"
                )))
            }
        };
        if !self.merged_from.contains(&head) {
            self.merged_from.push(head);
        }
        debug!(branch = %key, head = %head.short_hex(), "merge queued");
        Ok(())
    }
}
