//! Live views over an [`IdentityMap`] and their iterators.
//!
//! A view holds nothing but a handle to the map's table: every operation
//! forwards to the map, and mutation through a view is immediately visible
//! through the map and every other view. Iterators are *fail-fast* — they
//! record the map's modification counter at creation and panic on a
//! best-effort basis if the map is structurally modified behind their back —
//! and they support safe in-place removal of the entry most recently handed
//! out.
//!
//! [`IdentityMap`]: crate::map::IdentityMap

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::mem;

use crate::map::SharedTable;
use crate::table::Slot;
use crate::table::Table;
use crate::table::identity_of;

const MODIFIED: &str = "identity map structurally modified during iteration";
const NO_CURRENT: &str = "iterator remove called with no current entry";
const REMOVED: &str = "entry was removed";

/// The traversal machinery shared by all three iterators.
///
/// Normally reads the live table directly. After a removal through the
/// iterator that had to relocate an already-visited entry into unvisited
/// territory, the traversal rebinds — at most once — to a private snapshot of
/// the remaining tail while deletions keep going to the live table.
struct RawIter<K, V> {
    table: SharedTable<K, V>,
    snapshot: Option<Box<[Option<Slot<K, V>>]>>,
    index: usize,
    expected_mod_count: u64,
    last_returned: Option<usize>,
}

impl<K, V> RawIter<K, V> {
    fn new(table: SharedTable<K, V>) -> Self {
        let expected_mod_count = table.borrow().mod_count();
        Self {
            table,
            snapshot: None,
            index: 0,
            expected_mod_count,
            last_returned: None,
        }
    }

    fn check_mod_count(&self, table: &Table<K, V>) {
        if table.mod_count() != self.expected_mod_count {
            panic!("{MODIFIED}");
        }
    }

    /// Advances to the next occupied pair-slot and returns a clone of it.
    fn next_slot(&mut self) -> Option<Slot<K, V>> {
        let table = self.table.borrow();
        self.check_mod_count(&table);
        let slots = match &self.snapshot {
            Some(snapshot) => &snapshot[..],
            None => table.slots(),
        };
        while self.index < slots.len() {
            let index = self.index;
            self.index += 1;
            if let Some(slot) = &slots[index] {
                self.last_returned = Some(index);
                return Some(slot.clone());
            }
        }
        None
    }

    /// Clone of the slot most recently returned by `next_slot`.
    fn current_slot(&self) -> Slot<K, V> {
        let Some(index) = self.last_returned else {
            panic!("{REMOVED}");
        };
        let table = self.table.borrow();
        let slots = match &self.snapshot {
            Some(snapshot) => &snapshot[..],
            None => table.slots(),
        };
        match &slots[index] {
            Some(slot) => slot.clone(),
            None => panic!("{REMOVED}"),
        }
    }

    /// Removes the entry most recently returned by `next_slot` from the map,
    /// closing the probe-chain gap exactly like `IdentityMap::remove`.
    ///
    /// When traversing the live table, gap-closing may relocate an
    /// already-visited entry into the unvisited region; at the first such
    /// event the unvisited tail is frozen into a private snapshot so the
    /// traversal can neither repeat that entry nor skip one, while the
    /// actual deletion still happens against the live table.
    fn remove_last(&mut self) {
        let Some(deleted) = self.last_returned else {
            panic!("{NO_CURRENT}");
        };
        let mut table = self.table.borrow_mut();
        self.check_mod_count(&table);
        self.last_returned = None;
        // Back the cursor up so whatever gets relocated into the vacated
        // slot is revisited.
        self.index = deleted;

        if let Some(snapshot) = &mut self.snapshot {
            // The frozen copy is never searched, so there is no gap to
            // close in it; the real deletion replays through the table.
            let Some((key, _)) = snapshot[deleted].take() else {
                panic!("{REMOVED}");
            };
            table.remove(key.identity());
        } else if let Some(tail) = table.remove_during_scan(deleted) {
            self.snapshot = Some(tail);
            self.index = 0;
        }
        self.expected_mod_count = table.mod_count();
    }

    /// Replaces the value of the entry most recently returned, writing
    /// through to the live table when traversing a snapshot.
    fn set_value(&mut self, value: Rc<V>) -> Rc<V> {
        let Some(index) = self.last_returned else {
            panic!("{REMOVED}");
        };
        if let Some(snapshot) = &mut self.snapshot {
            let Some((key, stored)) = snapshot[index].as_mut() else {
                panic!("{REMOVED}");
            };
            let previous = mem::replace(stored, Rc::clone(&value));
            let key = key.clone();
            self.table.borrow_mut().insert(key, value);
            previous
        } else {
            match self.table.borrow_mut().replace_value_at(index, value) {
                Some(previous) => previous,
                None => panic!("{REMOVED}"),
            }
        }
    }
}

/// An iterator over the keys of an `IdentityMap`. The logical null key is
/// yielded as `None`.
///
/// Created by [`KeySet::iter`]. Supports removing the most recently yielded
/// key's mapping via [`remove`](KeyIter::remove).
pub struct KeyIter<K, V> {
    raw: RawIter<K, V>,
}

impl<K, V> Iterator for KeyIter<K, V> {
    type Item = Option<Rc<K>>;

    /// # Panics
    ///
    /// If the map was structurally modified since this iterator was created,
    /// other than through this iterator.
    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next_slot().map(|(key, _)| key.to_option())
    }
}

impl<K, V> KeyIter<K, V> {
    /// Removes the mapping for the most recently yielded key.
    ///
    /// # Panics
    ///
    /// If called before `next`, or twice without an intervening `next`, or
    /// if the map was structurally modified behind this iterator's back.
    pub fn remove(&mut self) {
        self.raw.remove_last();
    }
}

/// An iterator over the values of an `IdentityMap`.
///
/// Created by [`Values::iter`]. Supports removing the most recently yielded
/// value's mapping via [`remove`](ValueIter::remove).
pub struct ValueIter<K, V> {
    raw: RawIter<K, V>,
}

impl<K, V> Iterator for ValueIter<K, V> {
    type Item = Rc<V>;

    /// # Panics
    ///
    /// If the map was structurally modified since this iterator was created,
    /// other than through this iterator.
    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next_slot().map(|(_, value)| value)
    }
}

impl<K, V> ValueIter<K, V> {
    /// Removes the mapping whose value was most recently yielded.
    ///
    /// # Panics
    ///
    /// If called before `next`, or twice without an intervening `next`, or
    /// if the map was structurally modified behind this iterator's back.
    pub fn remove(&mut self) {
        self.raw.remove_last();
    }
}

/// A cursor over the entries of an `IdentityMap`.
///
/// Entries are not materialized: the cursor itself is the entry handle, with
/// [`key`], [`value`], and [`set_value`] bound to the entry most recently
/// reached by [`advance`]. Accessing the handle after [`remove`] panics.
///
/// ```rust
/// # use std::rc::Rc;
/// # use identity_map::IdentityMap;
/// let map = IdentityMap::new();
/// map.insert(Some(Rc::new('a')), Rc::new(1));
///
/// let mut entries = map.entry_set().iter();
/// while entries.advance() {
///     let previous = entries.set_value(Rc::new(*entries.value() + 1));
///     assert_eq!(previous, Rc::new(1));
/// }
/// ```
///
/// [`advance`]: EntryIter::advance
/// [`key`]: EntryIter::key
/// [`value`]: EntryIter::value
/// [`set_value`]: EntryIter::set_value
/// [`remove`]: EntryIter::remove
pub struct EntryIter<K, V> {
    raw: RawIter<K, V>,
}

impl<K, V> EntryIter<K, V> {
    /// Moves the cursor to the next entry, returning `false` when the
    /// traversal is exhausted.
    ///
    /// # Panics
    ///
    /// If the map was structurally modified since this cursor was created,
    /// other than through this cursor.
    pub fn advance(&mut self) -> bool {
        self.raw.next_slot().is_some()
    }

    /// The current entry's key (`None` for the null key).
    ///
    /// # Panics
    ///
    /// If there is no current entry or it was removed.
    pub fn key(&self) -> Option<Rc<K>> {
        self.raw.current_slot().0.to_option()
    }

    /// The current entry's value.
    ///
    /// # Panics
    ///
    /// If there is no current entry or it was removed.
    pub fn value(&self) -> Rc<V> {
        self.raw.current_slot().1
    }

    /// Replaces the current entry's value, returning the previous one.
    ///
    /// # Panics
    ///
    /// If there is no current entry or it was removed.
    pub fn set_value(&mut self, value: Rc<V>) -> Rc<V> {
        self.raw.set_value(value)
    }

    /// Removes the current entry from the map.
    ///
    /// # Panics
    ///
    /// If called before `advance`, or twice without an intervening
    /// `advance`, or if the map was structurally modified behind this
    /// cursor's back.
    pub fn remove(&mut self) {
        self.raw.remove_last();
    }
}

/// The live set view of an `IdentityMap`'s keys, created by
/// [`IdentityMap::key_set`](crate::map::IdentityMap::key_set).
pub struct KeySet<K, V> {
    table: SharedTable<K, V>,
}

impl<K, V> KeySet<K, V> {
    pub(crate) fn new(table: SharedTable<K, V>) -> Self {
        Self { table }
    }

    /// Number of keys, equal to the map's length.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Whether the backing map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity-based membership, equivalent to `contains_key` on the map.
    pub fn contains(&self, key: Option<&Rc<K>>) -> bool {
        self.table.borrow().find(identity_of(key)).is_some()
    }

    /// Removes `key`'s mapping from the backing map. Returns whether a
    /// mapping was removed.
    pub fn remove(&self, key: Option<&Rc<K>>) -> bool {
        self.table.borrow_mut().remove(identity_of(key)).is_some()
    }

    /// Empties the backing map.
    pub fn clear(&self) {
        self.table.borrow_mut().clear();
    }

    /// Iterates the keys in unspecified order.
    pub fn iter(&self) -> KeyIter<K, V> {
        KeyIter {
            raw: RawIter::new(Rc::clone(&self.table)),
        }
    }
}

impl<K, V> Clone for KeySet<K, V> {
    fn clone(&self) -> Self {
        Self::new(Rc::clone(&self.table))
    }
}

impl<K, V> IntoIterator for KeySet<K, V> {
    type Item = Option<Rc<K>>;
    type IntoIter = KeyIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The live collection view of an `IdentityMap`'s values, created by
/// [`IdentityMap::values`](crate::map::IdentityMap::values).
pub struct Values<K, V> {
    table: SharedTable<K, V>,
}

impl<K, V> Values<K, V> {
    pub(crate) fn new(table: SharedTable<K, V>) -> Self {
        Self { table }
    }

    /// Number of values, equal to the map's length.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Whether the backing map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity-based membership, equivalent to `contains_value` on the map.
    pub fn contains(&self, value: &Rc<V>) -> bool {
        self.table.borrow().contains_value(Rc::as_ptr(value))
    }

    /// Removes one mapping whose value is `value` by identity. Returns
    /// whether a mapping was removed.
    pub fn remove(&self, value: &Rc<V>) -> bool {
        self.table.borrow_mut().remove_value(Rc::as_ptr(value))
    }

    /// Empties the backing map.
    pub fn clear(&self) {
        self.table.borrow_mut().clear();
    }

    /// Iterates the values in unspecified order.
    pub fn iter(&self) -> ValueIter<K, V> {
        ValueIter {
            raw: RawIter::new(Rc::clone(&self.table)),
        }
    }
}

impl<K, V> Clone for Values<K, V> {
    fn clone(&self) -> Self {
        Self::new(Rc::clone(&self.table))
    }
}

impl<K, V> IntoIterator for Values<K, V> {
    type Item = Rc<V>;
    type IntoIter = ValueIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The live set view of an `IdentityMap`'s entries, created by
/// [`IdentityMap::entry_set`](crate::map::IdentityMap::entry_set).
pub struct EntrySet<K, V> {
    table: SharedTable<K, V>,
}

impl<K, V> EntrySet<K, V> {
    pub(crate) fn new(table: SharedTable<K, V>) -> Self {
        Self { table }
    }

    /// Number of entries, equal to the map's length.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Whether the backing map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the map contains exactly this (key, value) pair, both
    /// compared by identity.
    pub fn contains(&self, key: Option<&Rc<K>>, value: &Rc<V>) -> bool {
        self.table
            .borrow()
            .contains_mapping(identity_of(key), Rc::as_ptr(value))
    }

    /// Removes the entry for `key` only if its value is `value` by
    /// identity. Returns whether a mapping was removed.
    pub fn remove(&self, key: Option<&Rc<K>>, value: &Rc<V>) -> bool {
        self.table
            .borrow_mut()
            .remove_mapping(identity_of(key), Rc::as_ptr(value))
    }

    /// Empties the backing map.
    pub fn clear(&self) {
        self.table.borrow_mut().clear();
    }

    /// Returns the entry cursor; see [`EntryIter`].
    pub fn iter(&self) -> EntryIter<K, V> {
        EntryIter {
            raw: RawIter::new(Rc::clone(&self.table)),
        }
    }
}

impl<K, V> Clone for EntrySet<K, V> {
    fn clone(&self) -> Self {
        Self::new(Rc::clone(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use std::collections::HashMap;
    use std::collections::HashSet;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use crate::map::IdentityMap;

    use super::*;

    fn identity<K>(key: &Option<Rc<K>>) -> usize {
        identity_of(key.as_ref())
    }

    fn filled(n: usize) -> (IdentityMap<usize, usize>, Vec<Rc<usize>>) {
        let map = IdentityMap::new();
        let keys: Vec<Rc<usize>> = (0..n).map(Rc::new).collect();
        for (i, key) in keys.iter().enumerate() {
            map.insert(Some(key.clone()), Rc::new(i));
        }
        (map, keys)
    }

    #[test]
    fn key_iterator_yields_each_key_once() {
        let (map, keys) = filled(50);
        map.insert(None, Rc::new(999));

        let yielded: Vec<Option<Rc<usize>>> = map.key_set().iter().collect();
        assert_eq!(yielded.len(), 51);
        let identities: HashSet<usize> = yielded.iter().map(identity).collect();
        assert_eq!(identities.len(), 51);
        for key in &keys {
            assert!(identities.contains(&identity_of(Some(key))));
        }
        assert!(yielded.iter().any(Option::is_none));
    }

    #[test]
    fn value_iterator_yields_each_value_once() {
        let (map, _keys) = filled(40);
        let values: Vec<Rc<usize>> = map.values().iter().collect();
        assert_eq!(values.len(), 40);
        let contents: HashSet<usize> = values.iter().map(|v| **v).collect();
        assert_eq!(contents, (0..40).collect());
    }

    #[test]
    fn views_forward_to_the_map() {
        let (map, keys) = filled(10);
        let key_set = map.key_set();
        let values = map.values();
        let entries = map.entry_set();

        assert_eq!(key_set.len(), 10);
        assert!(!values.is_empty());
        assert!(key_set.contains(Some(&keys[3])));
        assert!(key_set.remove(Some(&keys[3])));
        assert!(!key_set.remove(Some(&keys[3])));
        assert_eq!(map.len(), 9);
        assert_eq!(entries.len(), 9);

        entries.clear();
        assert!(map.is_empty());
        assert!(key_set.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn values_view_removes_by_identity_only() {
        let map = IdentityMap::new();
        let key = Rc::new(1);
        let value = Rc::new(7);
        let lookalike = Rc::new(7);
        map.insert(Some(key.clone()), value.clone());

        let values = map.values();
        assert!(values.contains(&value));
        assert!(!values.contains(&lookalike));
        assert!(!values.remove(&lookalike));
        assert!(values.remove(&value));
        assert!(map.is_empty());
    }

    #[test]
    fn entry_set_matches_full_mappings() {
        let map = IdentityMap::new();
        let key = Rc::new(1);
        let value = Rc::new(2);
        let other_value = Rc::new(2);
        map.insert(Some(key.clone()), value.clone());

        let entries = map.entry_set();
        assert!(entries.contains(Some(&key), &value));
        assert!(!entries.contains(Some(&key), &other_value));
        assert!(!entries.remove(Some(&key), &other_value));
        assert_eq!(map.len(), 1);
        assert!(entries.remove(Some(&key), &value));
        assert!(map.is_empty());
    }

    #[test]
    #[should_panic(expected = "structurally modified during iteration")]
    fn insert_behind_iterator_trips_fail_fast() {
        let (map, _keys) = filled(10);
        let mut iter = map.key_set().iter();
        iter.next();
        map.insert(Some(Rc::new(1000)), Rc::new(0));
        iter.next();
    }

    #[test]
    #[should_panic(expected = "structurally modified during iteration")]
    fn remove_behind_iterator_trips_fail_fast() {
        let (map, keys) = filled(10);
        let mut iter = map.values().iter();
        iter.next();
        map.remove(Some(&keys[5]));
        iter.next();
    }

    #[test]
    #[should_panic(expected = "structurally modified during iteration")]
    fn iterator_remove_after_external_mutation_trips_fail_fast() {
        let (map, _keys) = filled(10);
        let mut iter = map.key_set().iter();
        iter.next();
        map.insert(Some(Rc::new(1000)), Rc::new(0));
        iter.remove();
    }

    #[test]
    fn value_replacement_does_not_trip_iterators() {
        let (map, keys) = filled(10);
        let mut iter = map.key_set().iter();
        iter.next();
        map.insert(Some(keys[0].clone()), Rc::new(12345));
        assert_eq!(iter.by_ref().count(), 9);
    }

    #[test]
    fn fresh_iterator_works_after_a_trip() {
        let (map, _keys) = filled(5);
        let mut iter = map.key_set().iter();
        iter.next();
        map.insert(None, Rc::new(0));
        // The tripped iterator is unusable, but a fresh one sees the new map.
        assert_eq!(map.key_set().iter().count(), 6);
    }

    #[test]
    #[should_panic(expected = "no current entry")]
    fn remove_before_next_panics() {
        let (map, _keys) = filled(3);
        map.key_set().iter().remove();
    }

    #[test]
    #[should_panic(expected = "no current entry")]
    fn double_remove_panics() {
        let (map, _keys) = filled(3);
        let mut iter = map.key_set().iter();
        iter.next();
        iter.remove();
        iter.remove();
    }

    #[test]
    fn iterator_remove_deletes_from_the_map() {
        let (map, keys) = filled(30);
        let mut iter = map.key_set().iter();
        let mut removed = HashSet::new();
        let mut position = 0usize;
        while let Some(key) = iter.next() {
            if position % 2 == 0 {
                removed.insert(identity(&key));
                iter.remove();
            }
            position += 1;
        }
        assert_eq!(map.len(), 15);
        for key in &keys {
            let ident = identity_of(Some(key));
            assert_eq!(map.contains_key(Some(key)), !removed.contains(&ident));
        }
    }

    #[test]
    fn entry_cursor_reads_and_writes() {
        let map = IdentityMap::new();
        let key = Rc::new('k');
        let value = Rc::new(1);
        map.insert(Some(key.clone()), value.clone());

        let mut entries = map.entry_set().iter();
        assert!(entries.advance());
        assert!(Rc::ptr_eq(&entries.key().unwrap(), &key));
        assert!(Rc::ptr_eq(&entries.value(), &value));

        let previous = entries.set_value(Rc::new(2));
        assert!(Rc::ptr_eq(&previous, &value));
        assert_eq!(map.get(Some(&key)), Some(Rc::new(2)));
        assert_eq!(*entries.value(), 2);

        assert!(!entries.advance());
    }

    #[test]
    fn entry_cursor_null_key_reads_as_none() {
        let map: IdentityMap<u32, u32> = IdentityMap::new();
        map.insert(None, Rc::new(9));
        let mut entries = map.entry_set().iter();
        assert!(entries.advance());
        assert!(entries.key().is_none());
        assert_eq!(*entries.value(), 9);
    }

    #[test]
    #[should_panic(expected = "entry was removed")]
    fn entry_key_after_remove_panics() {
        let (map, _keys) = filled(3);
        let mut entries = map.entry_set().iter();
        assert!(entries.advance());
        entries.remove();
        entries.key();
    }

    #[test]
    #[should_panic(expected = "entry was removed")]
    fn entry_set_value_before_advance_panics() {
        let (map, _keys) = filled(3);
        let mut entries = map.entry_set().iter();
        entries.set_value(Rc::new(0));
    }

    #[test]
    fn draining_via_iterator_visits_everything_exactly_once() {
        for n in [1usize, 2, 7, 64, 100, 321] {
            let (map, keys) = filled(n);
            let mut seen = HashSet::new();
            let mut iter = map.key_set().iter();
            while let Some(key) = iter.next() {
                assert!(seen.insert(identity(&key)), "duplicate visit, n={n}");
                iter.remove();
            }
            assert_eq!(seen.len(), n, "missed visits, n={n}");
            assert!(map.is_empty());
            for key in &keys {
                assert!(!map.contains_key(Some(key)));
            }
        }
    }

    // Regression target for the snapshot fallback: removing through an open
    // iterator must never repeat an already-visited entry or skip a live
    // one, even when gap-closing relocates entries across the cursor. The
    // risky interleavings depend on where the allocator puts the keys, so
    // hammer many seeds and sizes.
    #[test]
    fn randomized_removal_during_iteration_never_skips_or_repeats() {
        for seed in 0..20u64 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let n = rng.random_range(20..200);
            let (map, keys) = filled(n);

            let mut visited = HashSet::new();
            let mut kept: HashMap<usize, usize> = HashMap::new();
            let mut entries = map.entry_set().iter();
            while entries.advance() {
                let ident = identity(&entries.key());
                assert!(visited.insert(ident), "repeat visit, seed={seed}");
                if rng.random_bool(0.5) {
                    entries.remove();
                } else {
                    kept.insert(ident, *entries.value());
                }
            }

            assert_eq!(visited.len(), n, "skipped visit, seed={seed}");
            assert_eq!(map.len(), kept.len(), "size drift, seed={seed}");
            for key in &keys {
                let ident = identity_of(Some(key));
                match kept.get(&ident) {
                    Some(value) => assert_eq!(map.get(Some(key)), Some(Rc::new(*value))),
                    None => assert!(!map.contains_key(Some(key))),
                }
            }
        }
    }

    #[test]
    fn set_value_during_randomized_removal_sticks() {
        for seed in 0..10u64 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let (map, keys) = filled(100);

            let mut expected: HashMap<usize, usize> = HashMap::new();
            let mut entries = map.entry_set().iter();
            while entries.advance() {
                let ident = identity(&entries.key());
                if rng.random_bool(0.3) {
                    entries.remove();
                } else if rng.random_bool(0.5) {
                    entries.set_value(Rc::new(ident));
                    expected.insert(ident, ident);
                } else {
                    expected.insert(ident, *entries.value());
                }
            }

            for key in &keys {
                let ident = identity_of(Some(key));
                match expected.get(&ident) {
                    Some(value) => assert_eq!(map.get(Some(key)), Some(Rc::new(*value))),
                    None => assert!(!map.contains_key(Some(key))),
                }
            }
        }
    }

    #[test]
    fn into_iterator_on_views() {
        let (map, _keys) = filled(12);
        assert_eq!(map.key_set().into_iter().count(), 12);
        let total: usize = map.values().into_iter().map(|v| *v).sum();
        assert_eq!(total, (0..12).sum::<usize>());
    }
}
