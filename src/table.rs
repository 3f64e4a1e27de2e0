use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::mem;

/// Smallest pair-slot capacity ever allocated. Power of two.
pub(crate) const MIN_CAPACITY: usize = 4;

/// Largest pair-slot capacity. Power of two. Once the table reaches this
/// size the emergency threshold is pinned and the next growth request fails.
pub(crate) const MAX_CAPACITY: usize = 1 << 29;

/// Capacity used by `IdentityMap::new`, corresponding to an expected maximum
/// size of 21 at the 2/3 load factor.
pub(crate) const DEFAULT_CAPACITY: usize = 32;

/// Identity reserved for the logical null key. `Rc` allocations are never at
/// address zero, so this cannot collide with a real key.
pub(crate) const NULL_IDENTITY: usize = 0;

/// A stored key: either the private null sentinel or a strong reference to
/// the key object. Holding the `Rc` keeps the identity address stable and
/// unique for the lifetime of the entry.
pub(crate) enum Key<K> {
    Null,
    Ref(Rc<K>),
}

impl<K> Clone for Key<K> {
    fn clone(&self) -> Self {
        match self {
            Key::Null => Key::Null,
            Key::Ref(key) => Key::Ref(Rc::clone(key)),
        }
    }
}

impl<K> Key<K> {
    pub(crate) fn from_option(key: Option<Rc<K>>) -> Self {
        match key {
            None => Key::Null,
            Some(key) => Key::Ref(key),
        }
    }

    pub(crate) fn to_option(&self) -> Option<Rc<K>> {
        match self {
            Key::Null => None,
            Key::Ref(key) => Some(Rc::clone(key)),
        }
    }

    pub(crate) fn identity(&self) -> usize {
        match self {
            Key::Null => NULL_IDENTITY,
            Key::Ref(key) => Rc::as_ptr(key) as usize,
        }
    }
}

/// Identity of a lookup key. Must agree with `Key::identity` for the same
/// object.
pub(crate) fn identity_of<K>(key: Option<&Rc<K>>) -> usize {
    key.map_or(NULL_IDENTITY, |key| Rc::as_ptr(key) as usize)
}

/// One pair-slot: a key and its value, occupying adjacent positions.
pub(crate) type Slot<K, V> = (Key<K>, Rc<V>);

/// Home pair-slot for an identity. The scramble multiplies by -127 so that
/// the low address bits, which are constant for heap allocations, do not
/// collapse every key onto a handful of slots. `capacity` must be a power of
/// two.
#[inline]
pub(crate) fn probe(identity: usize, capacity: usize) -> usize {
    identity.wrapping_sub(identity << 7) & (capacity - 1)
}

/// Next pair-slot in the circular probe sequence.
#[inline]
pub(crate) fn next_index(i: usize, capacity: usize) -> usize {
    if i + 1 < capacity { i + 1 } else { 0 }
}

/// Smallest power-of-two capacity whose 2/3 threshold accommodates
/// `expected` entries: at least `3 * expected / 2`, clamped to
/// `[MIN_CAPACITY, MAX_CAPACITY]`.
pub(crate) fn capacity_for(expected: usize) -> usize {
    let min_capacity = expected.saturating_mul(3) / 2;
    if min_capacity > MAX_CAPACITY {
        MAX_CAPACITY
    } else {
        min_capacity.next_power_of_two().max(MIN_CAPACITY)
    }
}

/// An entry that lives at `i` but hashes home to `r` stays reachable only
/// while every slot on the cyclic path `r -> i` is occupied. A gap at `d`
/// breaks its probe chain exactly when `d` lies on that path, in which case
/// the entry must be relocated into `d`. `d` can never equal `i`: `i` holds
/// an entry and `d` is vacant.
#[inline]
fn gap_blocks_probe_path(r: usize, d: usize, i: usize) -> bool {
    if r <= i { r <= d && d <= i } else { d >= r || d <= i }
}

fn empty_slots<K, V>(capacity: usize) -> Box<[Option<Slot<K, V>>]> {
    let mut slots = Vec::new();
    slots.resize_with(capacity, || None);
    slots.into_boxed_slice()
}

/// The backing store: a power-of-two run of pair-slots plus the size,
/// threshold, and modification bookkeeping. All probing, growth, and
/// gap-closing lives here; `IdentityMap` and the views are thin shells over
/// this type behind a shared handle.
pub(crate) struct Table<K, V> {
    slots: Box<[Option<Slot<K, V>>]>,
    len: usize,
    threshold: usize,
    mod_count: u64,
}

impl<K, V> Table<K, V> {
    /// `capacity` must be a power of two in `[MIN_CAPACITY, MAX_CAPACITY]`.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!((MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity));
        Self {
            slots: empty_slots(capacity),
            len: 0,
            threshold: capacity * 2 / 3,
            mod_count: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn threshold(&self) -> usize {
        self.threshold
    }

    pub(crate) fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub(crate) fn slots(&self) -> &[Option<Slot<K, V>>] {
        &self.slots
    }

    /// Index of the pair-slot holding `identity`, if present. The shared scan
    /// pattern: start at the home slot, walk the circular probe sequence, and
    /// treat the first vacant slot as an authoritative miss.
    pub(crate) fn find(&self, identity: usize) -> Option<usize> {
        let capacity = self.slots.len();
        let mut i = probe(identity, capacity);
        loop {
            match &self.slots[i] {
                Some((key, _)) if key.identity() == identity => return Some(i),
                Some(_) => i = next_index(i, capacity),
                None => return None,
            }
        }
    }

    pub(crate) fn lookup(&self, identity: usize) -> Option<&Slot<K, V>> {
        self.find(identity).and_then(|i| self.slots[i].as_ref())
    }

    pub(crate) fn contains_mapping(&self, identity: usize, value: *const V) -> bool {
        self.lookup(identity)
            .is_some_and(|(_, stored)| Rc::as_ptr(stored) == value)
    }

    pub(crate) fn contains_value(&self, value: *const V) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|(_, stored)| Rc::as_ptr(stored) == value)
    }

    /// Inserts or replaces. Replacing the value of an existing key is not a
    /// structural modification and leaves `mod_count` untouched.
    pub(crate) fn insert(&mut self, key: Key<K>, value: Rc<V>) -> Option<Rc<V>> {
        let capacity = self.slots.len();
        let identity = key.identity();
        let mut i = probe(identity, capacity);
        while let Some((existing, stored)) = &mut self.slots[i] {
            if existing.identity() == identity {
                return Some(mem::replace(stored, value));
            }
            i = next_index(i, capacity);
        }

        self.mod_count = self.mod_count.wrapping_add(1);
        self.slots[i] = Some((key, value));
        self.len += 1;
        if self.len >= self.threshold {
            let target = capacity * 2;
            self.resize(target);
        }
        None
    }

    /// Grows the table to `new_capacity` pair-slots (a power of two),
    /// rehoming every live entry into a fresh table by plain linear probing.
    /// Nothing is deleted, so gap-closing is not involved. No-op when the
    /// table is already at least that large.
    ///
    /// # Panics
    ///
    /// When the table is at `MAX_CAPACITY` and the emergency threshold is
    /// already pinned: the map cannot accept further distinct keys.
    pub(crate) fn resize(&mut self, new_capacity: usize) {
        let old_capacity = self.slots.len();
        if old_capacity == MAX_CAPACITY {
            if self.threshold == MAX_CAPACITY - 1 {
                panic!("identity map capacity exhausted");
            }
            self.threshold = MAX_CAPACITY - 1;
            return;
        }
        if old_capacity >= new_capacity {
            return;
        }

        // Structural for open iterators: they read the live table, so a
        // rehome must trip the fail-fast check rather than let a traversal
        // continue over scrambled indices.
        self.mod_count = self.mod_count.wrapping_add(1);
        self.threshold = new_capacity * 2 / 3;
        let old_slots = mem::replace(&mut self.slots, empty_slots(new_capacity));
        for slot in old_slots.into_vec() {
            if let Some((key, value)) = slot {
                let mut i = probe(key.identity(), new_capacity);
                while self.slots[i].is_some() {
                    i = next_index(i, new_capacity);
                }
                self.slots[i] = Some((key, value));
            }
        }
    }

    pub(crate) fn remove(&mut self, identity: usize) -> Option<Slot<K, V>> {
        let i = self.find(identity)?;
        Some(self.remove_at(i))
    }

    /// Removes the mapping only if the stored value is `value` by identity.
    pub(crate) fn remove_mapping(&mut self, identity: usize, value: *const V) -> bool {
        match self.find(identity) {
            Some(i) if self.slots[i].as_ref().is_some_and(|(_, v)| Rc::as_ptr(v) == value) => {
                self.remove_at(i);
                true
            }
            _ => false,
        }
    }

    /// Removes the first mapping (in slot order) whose value is `value` by
    /// identity.
    pub(crate) fn remove_value(&mut self, value: *const V) -> bool {
        let found = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some((_, v)) if Rc::as_ptr(v) == value));
        match found {
            Some(i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    /// Vacates an occupied pair-slot and closes the gap.
    pub(crate) fn remove_at(&mut self, index: usize) -> Slot<K, V> {
        self.mod_count = self.mod_count.wrapping_add(1);
        self.len -= 1;
        let slot = self.slots[index].take();
        self.close_deletion(index);
        debug_assert!(slot.is_some());
        slot.expect("remove_at on a vacant slot")
    }

    /// Restores the "continuous chain, ends at first empty slot" invariant
    /// after slot `d` was vacated. Scans forward until the first vacant slot;
    /// any entry whose probe path crosses the gap is relocated into it, and
    /// the scan continues from the slot it vacated in turn. Adapted from
    /// Knuth's deletion algorithm for linear probing.
    fn close_deletion(&mut self, mut d: usize) {
        let capacity = self.slots.len();
        let mut i = next_index(d, capacity);
        while let Some((key, _)) = &self.slots[i] {
            let r = probe(key.identity(), capacity);
            if gap_blocks_probe_path(r, d, i) {
                self.slots[d] = self.slots[i].take();
                d = i;
            }
            i = next_index(i, capacity);
        }
    }

    /// Removal driven by an iterator positioned on the live table. Performs
    /// the same gap-closing as `remove_at`, with one safeguard: if an
    /// already-visited entry (index below `deleted_slot`, reached after the
    /// scan wrapped) is about to be relocated into the unvisited region at or
    /// past `deleted_slot`, a plain swap would hand that entry out a second
    /// time on a later step. At the first such event the not-yet-visited tail
    /// `slots[deleted_slot..]` is cloned and returned so the iterator can
    /// finish its traversal over the frozen copy; the live table is still
    /// compacted normally underneath.
    pub(crate) fn remove_during_scan(
        &mut self,
        deleted_slot: usize,
    ) -> Option<Box<[Option<Slot<K, V>>]>> {
        self.mod_count = self.mod_count.wrapping_add(1);
        self.len -= 1;
        self.slots[deleted_slot] = None;

        let capacity = self.slots.len();
        let mut snapshot = None;
        let mut d = deleted_slot;
        let mut i = next_index(d, capacity);
        while let Some((key, _)) = &self.slots[i] {
            let r = probe(key.identity(), capacity);
            if gap_blocks_probe_path(r, d, i) {
                if i < deleted_slot && d >= deleted_slot && snapshot.is_none() {
                    // The copy keeps its gap at `d`; it is only ever
                    // traversed, never searched, so that is harmless.
                    snapshot = Some(self.slots[deleted_slot..].to_vec().into_boxed_slice());
                }
                self.slots[d] = self.slots[i].take();
                d = i;
            }
            i = next_index(i, capacity);
        }
        snapshot
    }

    /// Replaces the value in an occupied slot, returning the old value.
    /// `None` when the slot is vacant (the entry was removed underneath the
    /// caller).
    pub(crate) fn replace_value_at(&mut self, index: usize, value: Rc<V>) -> Option<Rc<V>> {
        self.slots[index]
            .as_mut()
            .map(|(_, stored)| mem::replace(stored, value))
    }

    /// Nulls every slot in place and resets the size. Always a structural
    /// modification, even on an empty table.
    pub(crate) fn clear(&mut self) {
        self.mod_count = self.mod_count.wrapping_add(1);
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.len = 0;
    }

    /// Shallow duplicate: a fresh slot array sharing the same key and value
    /// objects. The copy starts with a fresh modification history.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            len: self.len,
            threshold: self.threshold,
            mod_count: 0,
        }
    }
}
