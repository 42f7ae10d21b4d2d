//! Generation-checked storage for wrapped records.
//!
//! Every composite tree the repository knows about (workspace objects,
//! resolved commit refs, the branch table) is one slot here. Removing a node
//! bumps its slot generation, so any [`NodeId`] handed out earlier fails
//! closed with `InvalidAccess` instead of reaching whatever reuses the slot.

use std::collections::BTreeSet;

use cairn_schema::Record;
use cairn_types::LocalId;

use crate::error::{RepoError, RepoResult};
use crate::handle::LinkAddr;

/// Stable index of a node plus the generation it was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Bookkeeping shared by a whole composite tree, held once at its root.
#[derive(Clone, Debug)]
pub(crate) struct NodeState {
    pub record: Record,
    pub local_id: LocalId,
    pub modified: bool,
    pub read_only: bool,
    /// Link fields (in other nodes) that point at this node.
    pub parent_links: BTreeSet<LinkAddr>,
    /// Link fields inside this node's tree.
    pub child_links: BTreeSet<LinkAddr>,
}

impl NodeState {
    pub fn new(record: Record, local_id: LocalId, modified: bool, read_only: bool) -> Self {
        Self {
            record,
            local_id,
            modified,
            read_only,
            parent_links: BTreeSet::new(),
            child_links: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<NodeState>,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Arena {
    pub fn insert(&mut self, node: NodeState) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: NodeId) -> RepoResult<&NodeState> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(RepoError::InvalidAccess)
    }

    pub fn get_mut(&mut self, id: NodeId) -> RepoResult<&mut NodeState> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(RepoError::InvalidAccess)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    /// Discard a node. Every outstanding copy of `id` becomes stale.
    pub fn remove(&mut self, id: NodeId) -> Option<NodeState> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    /// Ids of all live nodes, in slot order.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.is_some())
            .map(|(index, slot)| NodeId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use cairn_schema::TypeTag;

    use super::*;

    fn state(n: u64) -> NodeState {
        NodeState::new(Record::new(TypeTag::new("t", "T")), LocalId::Ephemeral(n), true, false)
    }

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::default();
        let id = arena.insert(state(1));
        assert_eq!(arena.get(id).unwrap().local_id, LocalId::Ephemeral(1));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn removed_ids_fail_closed() {
        let mut arena = Arena::default();
        let id = arena.insert(state(1));
        assert!(arena.remove(id).is_some());
        assert_eq!(arena.get(id).unwrap_err(), RepoError::InvalidAccess);
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn reused_slot_does_not_revive_stale_ids() {
        let mut arena = Arena::default();
        let old = arena.insert(state(1));
        arena.remove(old);
        let new = arena.insert(state(2));
        assert_ne!(old, new);
        assert!(arena.get(old).is_err());
        assert_eq!(arena.get(new).unwrap().local_id, LocalId::Ephemeral(2));
        assert_eq!(arena.live_ids(), vec![new]);
    }
}
