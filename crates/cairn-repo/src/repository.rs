//! The repository: workspace, object resolution, field access and link
//! management.
//!
//! Commit, checkout and branch operations live in sibling modules as further
//! `impl Repository` blocks; this module owns the state they share.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use cairn_schema::builtin::{commit_ref, link, mutable_root};
use cairn_schema::{
    FieldDescriptor, FieldKind, FieldPath, PathSegment, Record, SchemaError, TypeRegistry, TypeTag,
    Value,
};
use cairn_store::{ElementStore, StructureElement};
use cairn_types::{LocalId, ObjectId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::arena::{Arena, NodeId, NodeState};
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::handle::{FieldValue, LinkAddr, LinkInfo, ObjectHandle, RepositoryId};
use crate::links::{collect_links, ensure_link_record, read_link, rekey_link, write_link};

/// Workspace status, derived from the workspace root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// No workspace root has been created or checked out.
    NotInitialized,
    /// The workspace root matches its last commit.
    UpToDate,
    /// The workspace holds uncommitted changes.
    Modified,
}

/// Where the current branch row lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CurrentBranch {
    /// A row of the branch table, by branch key.
    Attached(String),
    /// A synthetic branch node wrapping a checked-out historical commit.
    Detached(NodeId),
}

/// A versioned object graph.
///
/// The repository owns every node it hands out handles for. Mutations go
/// through it so modification can propagate up the graph and stale handles
/// can be refused.
pub struct Repository {
    pub(crate) id: RepositoryId,
    pub(crate) registry: TypeRegistry,
    pub(crate) config: RepositoryConfig,
    pub(crate) arena: Arena,
    /// Mutable and just-resolved objects, by local id.
    pub(crate) workspace: HashMap<LocalId, NodeId>,
    pub(crate) workspace_root: Option<NodeId>,
    /// Resolved commit refs. Always read-only.
    pub(crate) commit_index: HashMap<ObjectId, NodeId>,
    /// Local content-addressed element cache.
    pub(crate) hashed_elements: HashMap<ObjectId, StructureElement>,
    /// The branch table node.
    pub(crate) dotgit: NodeId,
    pub(crate) current_branch: Option<CurrentBranch>,
    pub(crate) detached_head: bool,
    object_counter: u64,
    /// Commit keys to record as `MergedFrom` parents on the next commit.
    pub(crate) merged_from: Vec<ObjectId>,
    pub(crate) nicknames: BTreeMap<String, String>,
    pub(crate) store: Option<Arc<dyn ElementStore>>,
    pub(crate) serialized: u64,
}

impl Repository {
    pub fn new(registry: TypeRegistry, config: RepositoryConfig) -> Self {
        let mut arena = Arena::default();
        let mut table = Record::new(mutable_root::tag());
        table.set_scalar(
            mutable_root::REPOSITORY_KEY,
            Value::Str(Uuid::now_v7().to_string()),
        );
        let dotgit = arena.insert(NodeState::new(table, LocalId::Ephemeral(0), false, false));
        Self {
            id: RepositoryId::next(),
            registry,
            config,
            arena,
            workspace: HashMap::new(),
            workspace_root: None,
            commit_index: HashMap::new(),
            hashed_elements: HashMap::new(),
            dotgit,
            current_branch: None,
            detached_head: false,
            object_counter: 0,
            merged_from: Vec::new(),
            nicknames: BTreeMap::new(),
            store: None,
            serialized: 0,
        }
    }

    /// Attach a shared element store. Commits publish to it; misses fetch
    /// from it when `fetch_on_miss` is configured.
    pub fn with_store(mut self, store: Arc<dyn ElementStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ---- state ----

    pub fn id(&self) -> RepositoryId {
        self.id
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn status(&self) -> Status {
        match self.workspace_root.and_then(|n| self.arena.get(n).ok()) {
            None => Status::NotInitialized,
            Some(root) if root.modified => Status::Modified,
            Some(_) => Status::UpToDate,
        }
    }

    pub fn workspace_root(&self) -> Option<ObjectHandle> {
        self.workspace_root
            .map(|node| ObjectHandle::root(self.id, node))
    }

    pub fn is_detached(&self) -> bool {
        self.detached_head
    }

    /// The unique key of this repository's branch table.
    pub fn repository_key(&self) -> RepoResult<String> {
        let table = &self.arena.get(self.dotgit)?.record;
        Ok(table
            .scalar(mutable_root::REPOSITORY_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// A cached element by key.
    pub fn element(&self, key: &ObjectId) -> Option<&StructureElement> {
        self.hashed_elements.get(key)
    }

    pub fn element_count(&self) -> usize {
        self.hashed_elements.len()
    }

    /// Number of objects serialized by commits so far.
    pub fn serialized_elements(&self) -> u64 {
        self.serialized
    }

    /// Number of live nodes held by this repository.
    pub fn live_objects(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn next_local_id(&mut self) -> LocalId {
        self.object_counter += 1;
        LocalId::Ephemeral(self.object_counter)
    }

    // ---- creation ----

    /// Create the workspace root (and the default branch if there is no
    /// current branch yet).
    pub fn init_workspace(&mut self, root_type: &TypeTag) -> RepoResult<ObjectHandle> {
        if self.workspace_root.is_some() {
            return Err(RepoError::InvalidRepositoryState(
                "workspace is already initialized".into(),
            ));
        }
        self.registry.descriptor(root_type)?;
        if self.current_branch.is_none() {
            let nickname = self.config.default_branch.clone();
            let nickname = (!self.nicknames.contains_key(&nickname)).then_some(nickname);
            self.branch(nickname.as_deref())?;
        }
        let root = self.create_object(root_type)?;
        self.workspace_root = Some(root.node);
        debug!(root_type = %root_type, "workspace initialized");
        Ok(root)
    }

    /// Create a fresh object in the workspace.
    pub fn create_object(&mut self, type_tag: &TypeTag) -> RepoResult<ObjectHandle> {
        let handle = self.create_object_detached(type_tag)?;
        let local_id = self.arena.get(handle.node)?.local_id.clone();
        self.workspace.insert(local_id, handle.node);
        Ok(handle)
    }

    /// Create a fresh object without registering it in the workspace. It
    /// joins the workspace when it is linked.
    pub fn create_object_detached(&mut self, type_tag: &TypeTag) -> RepoResult<ObjectHandle> {
        let record = self.registry.new_record(type_tag)?;
        let local_id = self.next_local_id();
        let node = self
            .arena
            .insert(NodeState::new(record, local_id, true, false));
        Ok(ObjectHandle::root(self.id, node))
    }

    // ---- handle checks ----

    pub(crate) fn node(&self, h: &ObjectHandle) -> RepoResult<&NodeState> {
        if h.repository != self.id {
            return Err(RepoError::CrossRepository);
        }
        self.arena.get(h.node)
    }

    pub(crate) fn record_at(&self, h: &ObjectHandle) -> RepoResult<&Record> {
        self.node(h)?
            .record
            .at(&h.path)
            .map_err(|_| RepoError::InvalidAccess)
    }

    fn record_at_mut(&mut self, h: &ObjectHandle) -> RepoResult<&mut Record> {
        if h.repository != self.id {
            return Err(RepoError::CrossRepository);
        }
        self.arena
            .get_mut(h.node)?
            .record
            .at_mut(&h.path)
            .map_err(|_| RepoError::InvalidAccess)
    }

    pub(crate) fn ensure_writable(&self, h: &ObjectHandle, field: &str) -> RepoResult<()> {
        if self.node(h)?.read_only {
            return Err(RepoError::ReadOnlyViolation(field.to_string()));
        }
        self.ensure_propagates(h.node, field)
    }

    /// Fail if marking `node` modified would have to rewrite a link held by
    /// a read-only tree. Commit refs are exempt: their links point at
    /// workspace roots, which drop their parent links when modified.
    pub(crate) fn ensure_propagates(&self, node: NodeId, field: &str) -> RepoResult<()> {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) || self.workspace_root == Some(current) {
                continue;
            }
            let Ok(state) = self.arena.get(current) else {
                continue;
            };
            if state.modified {
                continue;
            }
            for addr in &state.parent_links {
                match self.arena.get(addr.owner) {
                    Ok(owner) if is_commit_ref(owner) => {}
                    Ok(owner) if owner.read_only => {
                        return Err(RepoError::ReadOnlyViolation(field.to_string()));
                    }
                    Ok(_) => stack.push(addr.owner),
                    Err(_) => {}
                }
            }
        }
        Ok(())
    }

    pub(crate) fn field_desc(&self, h: &ObjectHandle, name: &str) -> RepoResult<FieldDescriptor> {
        let tag = self.record_at(h)?.tag();
        Ok(self.registry.field(tag, name)?.clone())
    }

    /// Returns `true` if the handle still refers to a live object.
    pub fn is_valid(&self, h: &ObjectHandle) -> bool {
        self.record_at(h).is_ok()
    }

    // ---- object metadata ----

    pub fn type_tag(&self, h: &ObjectHandle) -> RepoResult<TypeTag> {
        Ok(self.record_at(h)?.tag().clone())
    }

    /// The workspace key of the object's tree: ephemeral until committed.
    pub fn local_id(&self, h: &ObjectHandle) -> RepoResult<LocalId> {
        Ok(self.node(h)?.local_id.clone())
    }

    pub fn is_modified(&self, h: &ObjectHandle) -> RepoResult<bool> {
        Ok(self.node(h)?.modified)
    }

    pub fn is_read_only(&self, h: &ObjectHandle) -> RepoResult<bool> {
        Ok(self.node(h)?.read_only)
    }

    /// A copy of the record behind the handle.
    pub fn record(&self, h: &ObjectHandle) -> RepoResult<Record> {
        Ok(self.record_at(h)?.clone())
    }

    /// Returns `true` if all required fields are set, recursively.
    pub fn is_initialized(&self, h: &ObjectHandle) -> RepoResult<bool> {
        Ok(self.registry.is_initialized(self.record_at(h)?)?)
    }

    // ---- field access ----

    pub fn get_field(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<FieldValue> {
        let field = self.field_desc(h, name)?;
        let record = self.record_at(h)?;
        let value = match &field.kind {
            FieldKind::Scalar(ty) => FieldValue::Scalar(
                record
                    .scalar(name)
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(*ty)),
            ),
            FieldKind::RepeatedScalar(_) => FieldValue::Scalars(record.scalars(name).to_vec()),
            FieldKind::Composite(_) if field.is_link() => {
                let set = record.message(name).is_some_and(|l| l.has(link::KEY));
                if !set {
                    return Ok(FieldValue::Unset);
                }
                let addr = LinkAddr::new(h.node, h.path.field(name));
                FieldValue::Linked(self.get_linked_object(addr)?)
            }
            FieldKind::Composite(_) => match record.message(name) {
                Some(_) => FieldValue::Message(h.nested(h.path.field(name))),
                None => FieldValue::Unset,
            },
            FieldKind::RepeatedComposite(_) => FieldValue::Repeated(record.messages(name).len()),
        };
        Ok(value)
    }

    /// Read a singular scalar field (unset fields read as their default).
    pub fn get_scalar(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<Value> {
        match self.get_field(h, name)? {
            FieldValue::Scalar(v) => Ok(v),
            _ => Err(self.kind_mismatch(h, name, "scalar")?),
        }
    }

    pub fn set_field(&mut self, h: &ObjectHandle, name: &str, value: Value) -> RepoResult<()> {
        let field = self.field_desc(h, name)?;
        self.ensure_writable(h, name)?;
        if !matches!(field.kind, FieldKind::Scalar(_)) {
            return Err(self.kind_mismatch(h, name, "scalar")?);
        }
        field.check_value(&value)?;
        self.record_at_mut(h)?.set_scalar(name, value);
        self.mark_modified(h.node)
    }

    pub fn has_field(&self, h: &ObjectHandle, name: &str) -> RepoResult<bool> {
        self.field_desc(h, name)?;
        Ok(self.record_at(h)?.has(name))
    }

    /// Unset a field. Link targets dropped by this lose the parent link.
    pub fn clear_field(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<()> {
        self.field_desc(h, name)?;
        if !self.record_at(h)?.has(name) {
            return Ok(());
        }
        self.edit_relinking(h, name, |record| {
            record.clear(name);
            Ok(())
        })
    }

    /// The nested structural record in `name`, creating it if unset.
    pub fn composite(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<ObjectHandle> {
        let field = self.field_desc(h, name)?;
        let tag = match &field.kind {
            FieldKind::Composite(_) if field.is_link() => {
                return Err(RepoError::InvalidArgument(format!(
                    "field {name:?} is a link; use set_linked"
                )))
            }
            FieldKind::Composite(tag) => tag.clone(),
            _ => return Err(self.kind_mismatch(h, name, "message")?),
        };
        if self.record_at(h)?.message(name).is_none() {
            self.ensure_writable(h, name)?;
            self.record_at_mut(h)?.message_or_insert(name, tag);
            self.mark_modified(h.node)?;
        }
        Ok(h.nested(h.path.field(name)))
    }

    pub(crate) fn kind_mismatch(&self, h: &ObjectHandle, name: &str, actual: &str) -> RepoResult<RepoError> {
        let field = self.field_desc(h, name)?;
        Ok(RepoError::Schema(SchemaError::TypeMismatch {
            field: name.to_string(),
            expected: field.kind.to_string(),
            actual: actual.to_string(),
        }))
    }

    /// Apply `edit` to the record behind `h` and mark it modified.
    pub(crate) fn edit<R>(
        &mut self,
        h: &ObjectHandle,
        field: &str,
        edit: impl FnOnce(&mut Record) -> RepoResult<R>,
    ) -> RepoResult<R> {
        self.ensure_writable(h, field)?;
        let out = edit(self.record_at_mut(h)?)?;
        self.mark_modified(h.node)?;
        Ok(out)
    }

    /// Like [`edit`](Self::edit) for changes that may add, move or drop link
    /// records: the tree's child links are rescanned afterwards and targets
    /// that lost their last parent are released.
    pub(crate) fn edit_relinking<R>(
        &mut self,
        h: &ObjectHandle,
        field: &str,
        edit: impl FnOnce(&mut Record) -> RepoResult<R>,
    ) -> RepoResult<R> {
        self.ensure_writable(h, field)?;
        let before = self.link_targets(h.node)?;
        let out = edit(self.record_at_mut(h)?)?;
        self.relink(h.node, before)?;
        self.mark_modified(h.node)?;
        Ok(out)
    }

    // ---- links ----

    /// Address of the singular link field `name`.
    pub fn get_link(&self, h: &ObjectHandle, name: &str) -> RepoResult<LinkAddr> {
        let field = self.field_desc(h, name)?;
        if !field.is_link() || field.kind.is_repeated() {
            return Err(RepoError::NotALink(name.to_string()));
        }
        Ok(LinkAddr::new(h.node, h.path.field(name)))
    }

    /// Resolve a singular link field. `None` if unset.
    pub fn get_linked(&mut self, h: &ObjectHandle, name: &str) -> RepoResult<Option<ObjectHandle>> {
        let addr = self.get_link(h, name)?;
        if self.link_info(&addr)?.key.is_none() {
            return Ok(None);
        }
        self.get_linked_object(addr).map(Some)
    }

    /// Point the singular link field `name` at `target`.
    pub fn set_linked(&mut self, h: &ObjectHandle, name: &str, target: &ObjectHandle) -> RepoResult<()> {
        self.node(h)?;
        self.set_linked_object(LinkAddr::new(h.node, h.path.field(name)), target)
    }

    pub fn link_info(&self, addr: &LinkAddr) -> RepoResult<LinkInfo> {
        let owner = self.arena.get(addr.owner)?;
        match owner.record.at(&addr.path) {
            Ok(record) => read_link(record),
            Err(_) => match addr.path.split_last() {
                Some((parent, PathSegment::Field(_)))
                    if owner.record.at(&parent).is_ok() =>
                {
                    Ok(LinkInfo::empty())
                }
                _ => Err(RepoError::InvalidAccess),
            },
        }
    }

    /// Descriptor of the field a link address points into.
    fn link_field(&self, addr: &LinkAddr) -> RepoResult<FieldDescriptor> {
        let (parent, last) = addr
            .path
            .split_last()
            .ok_or_else(|| RepoError::IllegalLinkTarget("a link must be a field".into()))?;
        let owner = self.arena.get(addr.owner)?;
        let container = owner
            .record
            .at(&parent)
            .map_err(|_| RepoError::InvalidAccess)?;
        let field = self.registry.field(container.tag(), last.field())?;
        let shape_ok = match last {
            PathSegment::Field(_) => !field.kind.is_repeated(),
            PathSegment::Item(..) => field.kind.is_repeated(),
        };
        if !field.is_link() || !shape_ok {
            return Err(RepoError::IllegalLinkTarget(format!(
                "field {:?} of {} is not a link",
                field.name,
                container.tag()
            )));
        }
        Ok(field.clone())
    }

    /// Checks shared by every way of pointing a link of `owner` at `target`.
    pub(crate) fn validate_link_target(&self, owner: NodeId, target: &ObjectHandle) -> RepoResult<()> {
        self.node(target)?;
        if !target.is_root() {
            return Err(RepoError::IllegalLinkTarget(
                "link targets must be the root of their tree".into(),
            ));
        }
        let owner_state = self.arena.get(owner)?;
        if owner_state.read_only {
            return Err(RepoError::ReadOnlyViolation("link".into()));
        }
        self.ensure_propagates(owner, "link")?;
        if target.node == owner || self.node_in_parents(owner, target.node) {
            return Err(RepoError::RecursiveStructure);
        }
        Ok(())
    }

    /// Point the link at `addr` to `target`.
    ///
    /// Registers the link as a parent of the target, detaches the previous
    /// target (discarding it if nothing else links to it), and marks the
    /// owning tree modified.
    pub fn set_linked_object(&mut self, addr: LinkAddr, target: &ObjectHandle) -> RepoResult<()> {
        self.validate_link_target(addr.owner, target)?;
        self.link_field(&addr)?;

        let previous = self
            .link_info(&addr)?
            .key
            .and_then(|key| self.resident(&key));

        let target_state = self.arena.get(target.node)?;
        let key = target_state.local_id.clone();
        let tag = target_state.record.tag().clone();
        let isleaf = target_state.child_links.is_empty();

        let owner = self.arena.get_mut(addr.owner)?;
        write_link(ensure_link_record(&mut owner.record, &addr.path)?, &key, &tag, isleaf);
        owner.child_links.insert(addr.clone());

        self.arena
            .get_mut(target.node)?
            .parent_links
            .insert(addr.clone());
        if self.resident(&key) != Some(target.node) {
            self.workspace.insert(key, target.node);
        }

        if let Some(old) = previous.filter(|old| *old != target.node) {
            if let Ok(state) = self.arena.get_mut(old) {
                state.parent_links.remove(&addr);
            }
            self.release(old);
        }
        self.mark_modified(addr.owner)
    }

    /// Resolve a link: workspace, then commit index, then the element cache
    /// (and the attached store, if configured to fetch). The link becomes a
    /// parent link of the target. Objects loaded through a read-only tree
    /// other than a commit ref are read-only.
    pub fn get_linked_object(&mut self, addr: LinkAddr) -> RepoResult<ObjectHandle> {
        let info = self.link_info(&addr)?;
        let key = info
            .key
            .ok_or_else(|| RepoError::InvalidArgument(format!("link {} is not set", addr.path)))?;
        let node = match self.resident(&key) {
            Some(node) => node,
            None => match key {
                LocalId::Content(id) => {
                    let owner = self.arena.get(addr.owner)?;
                    let inherited = owner.read_only && !is_commit_ref(owner);
                    self.load_object(&id, info.type_tag.as_ref(), inherited)?
                }
                LocalId::Ephemeral(_) => return Err(RepoError::ObjectNotResident(key.to_string())),
            },
        };
        if node != addr.owner {
            self.arena.get_mut(node)?.parent_links.insert(addr);
        }
        Ok(ObjectHandle::root(self.id, node))
    }

    /// A live node already holding `key`, without loading anything.
    pub(crate) fn resident(&self, key: &LocalId) -> Option<NodeId> {
        if let Some(node) = self.workspace.get(key) {
            if self.arena.is_live(*node) {
                return Some(*node);
            }
        }
        match key {
            LocalId::Content(id) => self
                .commit_index
                .get(id)
                .copied()
                .filter(|node| self.arena.is_live(*node)),
            LocalId::Ephemeral(_) => None,
        }
    }

    /// Returns `true` if `candidate` is an ancestor of `owner`.
    pub fn in_parents(&self, owner: &ObjectHandle, candidate: &ObjectHandle) -> RepoResult<bool> {
        self.node(owner)?;
        self.node(candidate)?;
        Ok(self.node_in_parents(owner.node, candidate.node))
    }

    pub(crate) fn node_in_parents(&self, owner: NodeId, candidate: NodeId) -> bool {
        let mut stack = vec![owner];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            let Ok(state) = self.arena.get(node) else {
                continue;
            };
            for addr in &state.parent_links {
                if addr.owner == candidate {
                    return true;
                }
                stack.push(addr.owner);
            }
        }
        false
    }

    /// Recompute the child links of `node` from its record.
    pub(crate) fn find_child_links(&mut self, node: NodeId) -> RepoResult<()> {
        let mut found = BTreeSet::new();
        let state = self.arena.get(node)?;
        collect_links(&self.registry, &state.record, node, &FieldPath::root(), &mut found)?;
        self.arena.get_mut(node)?.child_links = found;
        Ok(())
    }

    /// Resident targets of the child links of `node`.
    pub(crate) fn link_targets(&self, node: NodeId) -> RepoResult<Vec<(LinkAddr, NodeId)>> {
        let state = self.arena.get(node)?;
        let mut targets = Vec::new();
        for addr in &state.child_links {
            let Ok(info) = self.link_info(addr) else {
                continue;
            };
            if let Some(target) = info.key.and_then(|key| self.resident(&key)) {
                targets.push((addr.clone(), target));
            }
        }
        Ok(targets)
    }

    /// Re-register the links of `node` after its record changed shape.
    pub(crate) fn relink(&mut self, node: NodeId, before: Vec<(LinkAddr, NodeId)>) -> RepoResult<()> {
        for (addr, target) in &before {
            if let Ok(state) = self.arena.get_mut(*target) {
                state.parent_links.remove(addr);
            }
        }
        self.find_child_links(node)?;
        let after = self.link_targets(node)?;
        for (addr, target) in &after {
            if *target != node {
                self.arena.get_mut(*target)?.parent_links.insert(addr.clone());
            }
        }
        for (_, old) in before {
            if !after.iter().any(|(_, t)| *t == old) {
                self.release(old);
            }
        }
        Ok(())
    }

    /// Discard a workspace object that nothing links to any more.
    pub(crate) fn release(&mut self, node: NodeId) {
        let Ok(state) = self.arena.get(node) else {
            return;
        };
        let in_workspace = self.workspace.get(&state.local_id) == Some(&node);
        if !state.parent_links.is_empty() || !in_workspace || self.workspace_root == Some(node) {
            return;
        }
        let local_id = state.local_id.clone();
        let children = self.link_targets(node).unwrap_or_default();
        self.workspace.remove(&local_id);
        for (addr, child) in children {
            if let Ok(state) = self.arena.get_mut(child) {
                state.parent_links.remove(&addr);
            }
        }
        self.arena.remove(node);
        debug!(local_id = %local_id, "released unlinked object");
    }

    // ---- modification propagation ----

    /// Mark `node` modified and propagate to everything that links to it.
    ///
    /// Each newly modified tree gets a fresh ephemeral id, is re-keyed in the
    /// workspace, and every parent link is rewritten to the new id before
    /// the parent itself is marked. The workspace root drops its parent
    /// links instead: its only parent is the commit it was checked out from.
    pub(crate) fn mark_modified(&mut self, node: NodeId) -> RepoResult<()> {
        self.arena.get(node)?;
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.arena.get(current) {
                Ok(state) if !state.modified => {}
                _ => continue,
            }
            let new_id = self.next_local_id();
            let is_root = self.workspace_root == Some(current);
            let state = self.arena.get_mut(current)?;
            state.modified = true;
            let old_id = std::mem::replace(&mut state.local_id, new_id.clone());
            let parents: Vec<LinkAddr> = if is_root {
                state.parent_links.clear();
                Vec::new()
            } else {
                state.parent_links.iter().cloned().collect()
            };
            if self.workspace.get(&old_id) == Some(&current) {
                self.workspace.remove(&old_id);
            }
            self.workspace.insert(new_id.clone(), current);

            let mut dead = Vec::new();
            for addr in parents {
                match self.arena.get_mut(addr.owner) {
                    Ok(owner) if is_commit_ref(owner) => dead.push(addr),
                    Ok(owner) if owner.read_only => {
                        return Err(RepoError::ReadOnlyViolation(addr.path.to_string()));
                    }
                    Ok(owner) => {
                        if let Ok(link) = owner.record.at_mut(&addr.path) {
                            rekey_link(link, &new_id, None);
                        }
                        stack.push(addr.owner);
                    }
                    Err(_) => dead.push(addr),
                }
            }
            if !dead.is_empty() {
                let state = self.arena.get_mut(current)?;
                for addr in &dead {
                    state.parent_links.remove(addr);
                }
            }
            debug!(old = %old_id, new = %new_id, "object modified");
        }
        Ok(())
    }

    // ---- loading ----

    /// Load a cached element into a new node and register it: commit refs
    /// in the commit index, everything else in the workspace.
    /// Loaded objects are read-only on a detached head or when `read_only`
    /// is set.
    pub(crate) fn load_object(
        &mut self,
        key: &ObjectId,
        expected: Option<&TypeTag>,
        read_only: bool,
    ) -> RepoResult<NodeId> {
        let read_only = read_only || self.detached_head;
        let (node, is_commit) = self.materialize(key, expected, read_only)?;
        if is_commit {
            self.commit_index.insert(*key, node);
        } else {
            self.workspace.insert(LocalId::Content(*key), node);
        }
        Ok(node)
    }

    /// Build an unregistered node from the element for `key`.
    ///
    /// The element is verified first; a hash mismatch is reported as
    /// `CorruptObject` and nothing is loaded. Commit refs are always
    /// read-only.
    pub(crate) fn materialize(
        &mut self,
        key: &ObjectId,
        expected: Option<&TypeTag>,
        read_only: bool,
    ) -> RepoResult<(NodeId, bool)> {
        let element = self.element_for(key)?;
        if let Err(e) = element.verify() {
            warn!(key = %key.short_hex(), error = %e, "rejecting corrupt element");
            return Err(RepoError::CorruptObject {
                key: *key,
                reason: e.to_string(),
            });
        }
        if element.key != *key {
            warn!(key = %key.short_hex(), "element cached under the wrong key");
            return Err(RepoError::CorruptObject {
                key: *key,
                reason: format!("element hashes to {}", element.key),
            });
        }
        if let Some(tag) = expected.filter(|tag| **tag != element.type_tag) {
            return Err(RepoError::CorruptObject {
                key: *key,
                reason: format!("link expects {tag}, element holds {}", element.type_tag),
            });
        }
        let record = self.registry.decode(&element.type_tag, &element.value)?;
        let is_commit = element.type_tag == commit_ref::tag();
        let node = self.arena.insert(NodeState::new(
            record,
            LocalId::Content(*key),
            false,
            read_only || is_commit,
        ));
        self.find_child_links(node)?;
        debug!(key = %key.short_hex(), type_tag = %element.type_tag, "loaded element");
        Ok((node, is_commit))
    }

    /// The element for `key` from the local cache, or from the attached
    /// store when fetching on miss is enabled.
    pub(crate) fn element_for(&mut self, key: &ObjectId) -> RepoResult<StructureElement> {
        if let Some(element) = self.hashed_elements.get(key) {
            return Ok(element.clone());
        }
        let store = match &self.store {
            Some(store) if self.config.fetch_on_miss => Arc::clone(store),
            _ => return Err(RepoError::ObjectNotResident(key.to_hex())),
        };
        let element = store
            .get(key)?
            .ok_or_else(|| RepoError::ObjectNotResident(key.to_hex()))?;
        debug!(key = %key.short_hex(), "fetched element from store");
        self.hashed_elements.insert(*key, element.clone());
        Ok(element)
    }

    /// Resolve child links breadth-first from `node`, stopping at leaves
    /// unless `load_leaves` is set.
    pub(crate) fn load_links(&mut self, node: NodeId, load_leaves: bool) -> RepoResult<()> {
        let mut queue = VecDeque::from([node]);
        let mut seen = HashSet::from([node]);
        while let Some(current) = queue.pop_front() {
            let links: Vec<LinkAddr> = self.arena.get(current)?.child_links.iter().cloned().collect();
            for addr in links {
                if !load_leaves && self.link_info(&addr)?.isleaf {
                    continue;
                }
                let child = self.get_linked_object(addr)?;
                if seen.insert(child.node) {
                    queue.push_back(child.node);
                }
            }
        }
        Ok(())
    }

    // ---- read-only structures ----

    /// Make `h`'s tree and every resident tree below it read-only.
    pub fn set_structure_read_only(&mut self, h: &ObjectHandle) -> RepoResult<()> {
        self.node(h)?;
        self.set_structure_flag(h.node, true)
    }

    /// Make `h`'s tree and every resident tree below it writable again.
    pub fn set_structure_read_write(&mut self, h: &ObjectHandle) -> RepoResult<()> {
        self.node(h)?;
        self.set_structure_flag(h.node, false)
    }

    pub(crate) fn set_structure_flag(&mut self, node: NodeId, read_only: bool) -> RepoResult<()> {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let targets = self.link_targets(current)?;
            self.arena.get_mut(current)?.read_only = read_only;
            stack.extend(targets.into_iter().map(|(_, t)| t));
        }
        Ok(())
    }

    // ---- workspace lifecycle ----

    /// Invalidate every node except the branch table, resolved commit refs
    /// and `keep`. Handles into the old workspace fail from here on.
    pub(crate) fn discard_workspace(&mut self, keep: Option<NodeId>) {
        let mut survivors: HashSet<NodeId> = self.commit_index.values().copied().collect();
        survivors.insert(self.dotgit);
        survivors.extend(keep);
        let mut discarded = 0usize;
        for node in self.arena.live_ids() {
            if !survivors.contains(&node) {
                self.arena.remove(node);
                discarded += 1;
            }
        }
        for node in &survivors {
            let live: Vec<LinkAddr> = match self.arena.get(*node) {
                Ok(state) => state
                    .parent_links
                    .iter()
                    .filter(|addr| self.arena.is_live(addr.owner))
                    .cloned()
                    .collect(),
                Err(_) => continue,
            };
            if let Ok(state) = self.arena.get_mut(*node) {
                state.parent_links = live.into_iter().collect();
            }
        }
        self.workspace.clear();
        self.workspace_root = None;
        debug!(discarded, "workspace discarded");
    }
}

fn is_commit_ref(state: &NodeState) -> bool {
    *state.record.tag() == commit_ref::tag()
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("workspace", &self.workspace.len())
            .field("commit_index", &self.commit_index.len())
            .field("hashed_elements", &self.hashed_elements.len())
            .field("detached_head", &self.detached_head)
            .field("store", &self.store.is_some())
            .finish()
    }
}
