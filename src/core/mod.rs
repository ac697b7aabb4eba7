//! CRDT primitives shared by the reference replicated state.
//!
//! - [`OpId`] - Unique operation identifiers (per-peer contiguous counters)
//! - [`Stamp`] - Lamport stamp used to order concurrent writes
//! - [`StateVector`] - Version vector for tracking peer state
//! - [`Sequence`] - RGA-based ordered sequence with tombstones
//! - [`LwwRegister`] - Last-writer-wins register for single values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PeerId = u64;

/// Identifies one operation. `counter` is contiguous per peer, so a
/// [`StateVector`] entry of `n` means every op `1..=n` from that peer is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub counter: u64,
    pub peer: PeerId,
}

impl OpId {
    pub fn new(peer: PeerId, counter: u64) -> Self {
        Self { counter, peer }
    }
}

/// Lamport stamp. Ties between peers break on the peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub lamport: u64,
    pub peer: PeerId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    peers: BTreeMap<PeerId, u64>,
}

impl StateVector {
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer: PeerId) -> Option<u64> {
        self.peers.get(&peer).copied()
    }

    pub fn set(&mut self, peer: PeerId, counter: u64) {
        self.peers.insert(peer, counter);
    }

    /// Whether the op is already covered by this vector.
    pub fn contains(&self, id: &OpId) -> bool {
        self.get(id.peer).is_some_and(|seen| id.counter <= seen)
    }

    /// Counter the next op from `peer` must carry to be causally ready.
    pub fn next_for(&self, peer: PeerId) -> u64 {
        self.get(peer).unwrap_or(0) + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, u64)> + '_ {
        self.peers.iter().map(|(peer, counter)| (*peer, *counter))
    }
}

/// One entry of a [`Sequence`]. Deleted entries stay behind as tombstones
/// so inserts anchored on them still find their place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<K, T> {
    pub id: K,
    pub after: Option<K>,
    pub stamp: Stamp,
    pub value: T,
    pub deleted: bool,
}

/// RGA sequence. Every element is inserted after an anchor (or at the
/// start); siblings of one anchor are ordered newest first and the sequence
/// order is a depth-first walk of the resulting tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence<K, T> {
    elements: BTreeMap<K, Element<K, T>>,
    children: BTreeMap<Option<K>, Vec<K>>,
}

impl<K: Ord + Copy, T> Default for Sequence<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, T> Sequence<K, T> {
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// Number of elements, tombstones included.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.elements.contains_key(id)
    }

    pub fn get(&self, id: &K) -> Option<&Element<K, T>> {
        self.elements.get(id)
    }

    pub fn get_mut(&mut self, id: &K) -> Option<&mut Element<K, T>> {
        self.elements.get_mut(id)
    }

    /// Inserts `value` right after `after`. Returns `false` when the anchor
    /// is unknown. A known id is left untouched.
    pub fn insert(&mut self, id: K, after: Option<K>, stamp: Stamp, value: T) -> bool {
        if self.elements.contains_key(&id) {
            return true;
        }
        if let Some(anchor) = after
            && !self.elements.contains_key(&anchor)
        {
            return false;
        }

        let elements = &self.elements;
        let siblings = self.children.entry(after).or_default();
        let position = siblings.partition_point(|sibling| {
            elements
                .get(sibling)
                .is_some_and(|existing| (existing.stamp, existing.id) > (stamp, id))
        });
        siblings.insert(position, id);
        self.elements.insert(
            id,
            Element {
                id,
                after,
                stamp,
                value,
                deleted: false,
            },
        );
        true
    }

    /// Tombstones `id`. Returns `false` when it is unknown.
    pub fn delete(&mut self, id: &K) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                element.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Element ids in sequence order, tombstones included.
    pub fn order(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.elements.len());
        let mut stack: Vec<K> = self
            .children
            .get(&None)
            .map(|roots| roots.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(kids) = self.children.get(&Some(id)) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element<K, T>> + '_ {
        self.order()
            .into_iter()
            .filter_map(move |id| self.elements.get(&id))
    }

    /// Live elements in sequence order.
    pub fn visible(&self) -> impl Iterator<Item = &Element<K, T>> + '_ {
        self.iter().filter(|element| !element.deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwwRegister<T> {
    value: T,
    stamp: Stamp,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Stores `value` if `stamp` is not older than the current one.
    /// Returns whether the write won.
    pub fn set(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp >= self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    /// Returns a clone of the current value. Consider using `get_ref()` to avoid allocation.
    pub fn get(&self) -> T {
        self.value.clone()
    }

    /// Returns a reference to the current value (zero-cost).
    #[inline]
    pub fn get_ref(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(lamport: u64, peer: PeerId) -> Stamp {
        Stamp { lamport, peer }
    }

    #[test]
    fn test_lww_later_stamp_wins() {
        let mut register = LwwRegister::new("a", stamp(1, 1));
        assert!(register.set("b", stamp(2, 1)));
        assert!(!register.set("c", stamp(1, 9)));
        assert_eq!(register.get(), "b");
    }

    #[test]
    fn test_lww_tie_breaks_on_peer() {
        let mut left = LwwRegister::new("base", stamp(1, 1));
        let mut right = left.clone();

        left.set("from-2", stamp(3, 2));
        left.set("from-5", stamp(3, 5));
        right.set("from-5", stamp(3, 5));
        right.set("from-2", stamp(3, 2));

        assert_eq!(left.get_ref(), right.get_ref());
        assert_eq!(*left.get_ref(), "from-5");
    }

    fn values(sequence: &Sequence<u32, char>) -> String {
        sequence.visible().map(|element| element.value).collect()
    }

    #[test]
    fn test_sequence_orders_newer_siblings_first() {
        let mut seq = Sequence::new();
        assert!(seq.insert(1, None, stamp(1, 1), 'a'));
        assert!(seq.insert(2, Some(1), stamp(2, 1), 'c'));
        assert!(seq.insert(3, Some(1), stamp(3, 2), 'b'));
        assert_eq!(values(&seq), "abc");
        assert!(!seq.insert(9, Some(7), stamp(4, 1), 'x'));
    }

    #[test]
    fn test_sequence_converges_in_any_order() {
        let ops = [
            (1, None, stamp(1, 1), 'h'),
            (2, Some(1), stamp(2, 1), 'i'),
            (3, Some(1), stamp(2, 2), 'o'),
            (4, None, stamp(3, 3), '>'),
        ];
        let mut forward = Sequence::new();
        for (id, after, at, value) in ops {
            forward.insert(id, after, at, value);
        }
        let mut backward = Sequence::new();
        for (id, after, at, value) in ops.iter().rev().copied() {
            if !backward.insert(id, after, at, value) {
                // Anchor not there yet: deliver it first, then retry.
                backward.insert(1, None, stamp(1, 1), 'h');
                backward.insert(id, after, at, value);
            }
        }
        assert_eq!(values(&forward), values(&backward));
        assert_eq!(values(&forward), ">hoi");
    }

    #[test]
    fn test_sequence_tombstone_keeps_anchor() {
        let mut seq = Sequence::new();
        seq.insert(1, None, stamp(1, 1), 'a');
        seq.insert(2, Some(1), stamp(2, 1), 'b');
        assert!(seq.delete(&1));
        assert!(seq.insert(3, Some(1), stamp(3, 1), 'x'));
        assert_eq!(values(&seq), "xb");
        assert_eq!(seq.len(), 3);
        assert!(!seq.delete(&8));
    }

    #[test]
    fn test_state_vector_contains_and_next() {
        let mut sv = StateVector::new();
        assert!(sv.is_empty());
        sv.set(7, 3);
        assert!(sv.contains(&OpId::new(7, 2)));
        assert!(!sv.contains(&OpId::new(7, 4)));
        assert!(!sv.contains(&OpId::new(8, 1)));
        assert_eq!(sv.next_for(7), 4);
        assert_eq!(sv.next_for(8), 1);
    }
}
