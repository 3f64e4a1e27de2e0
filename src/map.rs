//! The map type itself; see [`IdentityMap`].

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt::Debug;
use core::hash::Hash;
use core::hash::Hasher;

use crate::table::DEFAULT_CAPACITY;
use crate::table::Key;
use crate::table::Slot;
use crate::table::Table;
use crate::table::capacity_for;
use crate::table::identity_of;
use crate::views::EntrySet;
use crate::views::KeySet;
use crate::views::Values;

/// The table handle shared between a map, its views, and its iterators.
pub(crate) type SharedTable<K, V> = Rc<RefCell<Table<K, V>>>;

/// A map from `Rc<K>` keys to `Rc<V>` values that compares keys (and, where
/// relevant, values) by reference identity: two keys are the same entry if
/// and only if they are the same `Rc` allocation.
///
/// This intentionally violates the usual map contract of comparing keys by
/// `Eq`. It is meant for the rare workloads that need reference semantics,
/// such as node tables for object-graph transformations or proxy-object
/// registries.
///
/// One logical null key is supported, spelled `None`. Lookups take
/// `Option<&Rc<K>>`: the reference must come from the same `Rc` that was
/// inserted, since that allocation's address *is* the key's identity.
///
/// The map, its views ([`key_set`], [`values`], [`entry_set`]), and its
/// iterators share a single handle, so mutation through any of them is
/// visible through all of them. None of these types are `Send` or `Sync`;
/// the structure is single-threaded by construction.
///
/// # Examples
///
/// ```rust
/// use std::rc::Rc;
///
/// use identity_map::IdentityMap;
///
/// let map = IdentityMap::new();
/// let first = Rc::new("k".to_string());
/// let second = Rc::new("k".to_string());
///
/// map.insert(Some(first.clone()), Rc::new(1));
/// map.insert(Some(second.clone()), Rc::new(2));
///
/// // Value-equal keys are still two distinct entries.
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.get(Some(&first)), Some(Rc::new(1)));
/// assert_eq!(map.get(Some(&second)), Some(Rc::new(2)));
/// ```
///
/// [`key_set`]: IdentityMap::key_set
/// [`values`]: IdentityMap::values
/// [`entry_set`]: IdentityMap::entry_set
pub struct IdentityMap<K, V> {
    table: SharedTable<K, V>,
}

impl<K, V> IdentityMap<K, V> {
    /// Creates an empty map with the default expected maximum size (21).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use identity_map::IdentityMap;
    /// let map: IdentityMap<u32, u32> = IdentityMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::from_table(Table::with_capacity(DEFAULT_CAPACITY))
    }

    /// Creates an empty map sized to hold at least `expected` entries before
    /// growing. The backing table is the smallest power of two at least
    /// 1.5 × `expected`, clamped to the supported range.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use identity_map::IdentityMap;
    /// let map: IdentityMap<u32, u32> = IdentityMap::with_capacity(100);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity(expected: usize) -> Self {
        Self::from_table(Table::with_capacity(capacity_for(expected)))
    }

    fn from_table(table: Table<K, V>) -> Self {
        Self {
            table: Rc::new(RefCell::new(table)),
        }
    }

    pub(crate) fn shared_table(&self) -> &SharedTable<K, V> {
        &self.table
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries the map can hold before it grows.
    pub fn capacity(&self) -> usize {
        self.table.borrow().threshold()
    }

    /// Returns the value mapped to `key`, or `None` if `key` is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::rc::Rc;
    /// # use identity_map::IdentityMap;
    /// let map = IdentityMap::new();
    /// let key = Rc::new('a');
    /// map.insert(Some(key.clone()), Rc::new(1));
    /// map.insert(None, Rc::new(2));
    ///
    /// assert_eq!(map.get(Some(&key)), Some(Rc::new(1)));
    /// assert_eq!(map.get(None), Some(Rc::new(2)));
    /// assert_eq!(map.get(Some(&Rc::new('a'))), None); // different identity
    /// ```
    pub fn get(&self, key: Option<&Rc<K>>) -> Option<Rc<V>> {
        self.table
            .borrow()
            .lookup(identity_of(key))
            .map(|(_, value)| Rc::clone(value))
    }

    /// Returns `true` if `key` is present in the map.
    pub fn contains_key(&self, key: Option<&Rc<K>>) -> bool {
        self.table.borrow().find(identity_of(key)).is_some()
    }

    /// Returns `true` if some entry's value is `value` by identity. Linear
    /// in the table capacity.
    pub fn contains_value(&self, value: &Rc<V>) -> bool {
        self.table.borrow().contains_value(Rc::as_ptr(value))
    }

    /// Maps `key` to `value`, returning the previously mapped value if the
    /// key was already present. Replacing the value of an existing key is
    /// not a structural modification and does not disturb open iterators.
    ///
    /// # Panics
    ///
    /// When the map already holds the maximum supported number of distinct
    /// keys and cannot grow further.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::rc::Rc;
    /// # use identity_map::IdentityMap;
    /// let map = IdentityMap::new();
    /// let key = Rc::new('a');
    ///
    /// assert_eq!(map.insert(Some(key.clone()), Rc::new(1)), None);
    /// assert_eq!(map.insert(Some(key.clone()), Rc::new(2)), Some(Rc::new(1)));
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn insert(&self, key: Option<Rc<K>>, value: Rc<V>) -> Option<Rc<V>> {
        self.table.borrow_mut().insert(Key::from_option(key), value)
    }

    /// Removes `key` from the map, returning its value if it was present.
    /// The vacated probe-chain gap is closed immediately; the table never
    /// carries tombstones.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::rc::Rc;
    /// # use identity_map::IdentityMap;
    /// let map = IdentityMap::new();
    /// let key = Rc::new('a');
    /// map.insert(Some(key.clone()), Rc::new(1));
    ///
    /// assert_eq!(map.remove(Some(&key)), Some(Rc::new(1)));
    /// assert_eq!(map.remove(Some(&key)), None);
    /// ```
    pub fn remove(&self, key: Option<&Rc<K>>) -> Option<Rc<V>> {
        self.table
            .borrow_mut()
            .remove(identity_of(key))
            .map(|(_, value)| value)
    }

    /// Removes every entry. The table keeps its allocated capacity.
    pub fn clear(&self) {
        self.table.borrow_mut().clear();
    }

    /// Copies every entry of `source` into this map, replacing values of
    /// keys already present. The table is conservatively pre-expanded for
    /// `source.len()` entries so the replay does not resize repeatedly.
    /// Copying a map into itself is a no-op.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::rc::Rc;
    /// # use identity_map::IdentityMap;
    /// let from = IdentityMap::new();
    /// let key = Rc::new('a');
    /// from.insert(Some(key.clone()), Rc::new(1));
    ///
    /// let to = IdentityMap::new();
    /// to.insert(None, Rc::new(0));
    /// to.insert_all(&from);
    ///
    /// assert_eq!(to.len(), 2);
    /// assert_eq!(to.get(Some(&key)), Some(Rc::new(1)));
    /// ```
    pub fn insert_all(&self, source: &IdentityMap<K, V>) {
        if Rc::ptr_eq(&self.table, &source.table) {
            return;
        }
        let len = source.len();
        if len == 0 {
            return;
        }
        {
            let mut table = self.table.borrow_mut();
            if len > table.threshold() {
                table.resize(capacity_for(len));
            }
        }
        let pairs: alloc::vec::Vec<Slot<K, V>> = source
            .table
            .borrow()
            .slots()
            .iter()
            .flatten()
            .cloned()
            .collect();
        let mut table = self.table.borrow_mut();
        for (key, value) in pairs {
            table.insert(key, value);
        }
    }

    /// Returns the live set view of the map's keys.
    ///
    /// The view is backed by the map: removal through the view (or its
    /// iterator) removes the mapping, and `clear` empties the map. All
    /// handles returned by this method are interchangeable.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::rc::Rc;
    /// # use identity_map::IdentityMap;
    /// let map = IdentityMap::new();
    /// let key = Rc::new('a');
    /// map.insert(Some(key.clone()), Rc::new(1));
    ///
    /// let keys = map.key_set();
    /// assert!(keys.contains(Some(&key)));
    /// assert!(keys.remove(Some(&key)));
    /// assert!(map.is_empty());
    /// ```
    pub fn key_set(&self) -> KeySet<K, V> {
        KeySet::new(Rc::clone(&self.table))
    }

    /// Returns the live collection view of the map's values.
    pub fn values(&self) -> Values<K, V> {
        Values::new(Rc::clone(&self.table))
    }

    /// Returns the live set view of the map's entries. Its iterator doubles
    /// as the entry handle; see [`EntryIter`](crate::views::EntryIter).
    pub fn entry_set(&self) -> EntrySet<K, V> {
        EntrySet::new(Rc::clone(&self.table))
    }
}

impl<K, V> Default for IdentityMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow duplication: the clone gets its own slot array but shares the key
/// and value objects with the original, so the two maps agree on every
/// identity. Structural changes to one are invisible to the other.
impl<K, V> Clone for IdentityMap<K, V> {
    fn clone(&self) -> Self {
        Self::from_table(self.table.borrow().duplicate())
    }
}

/// Identity-based equality: two maps are equal iff they have the same size
/// and every (key, value) pair of one is a pair of the other by reference.
impl<K, V> PartialEq for IdentityMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.table, &other.table) {
            return true;
        }
        let ours = self.table.borrow();
        let theirs = other.table.borrow();
        ours.len() == theirs.len()
            && theirs
                .slots()
                .iter()
                .flatten()
                .all(|(key, value)| ours.contains_mapping(key.identity(), Rc::as_ptr(value)))
    }
}

impl<K, V> Eq for IdentityMap<K, V> {}

/// Order-independent: the wrapping sum over entries of
/// `identity(key) ^ identity(value)`, so equal maps hash alike regardless of
/// slot layout. The null key contributes identity 0.
impl<K, V> Hash for IdentityMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let table = self.table.borrow();
        let mut sum: usize = 0;
        for (key, value) in table.slots().iter().flatten() {
            sum = sum.wrapping_add(key.identity() ^ Rc::as_ptr(value) as usize);
        }
        state.write_usize(sum);
    }
}

impl<K, V> Debug for IdentityMap<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let table = self.table.borrow();
        f.debug_map()
            .entries(
                table
                    .slots()
                    .iter()
                    .flatten()
                    .map(|(key, value)| (key.to_option(), Rc::clone(value))),
            )
            .finish()
    }
}

impl<K, V> Extend<(Option<Rc<K>>, Rc<V>)> for IdentityMap<K, V> {
    fn extend<T: IntoIterator<Item = (Option<Rc<K>>, Rc<V>)>>(&mut self, iter: T) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        {
            let mut table = self.table.borrow_mut();
            if lower > table.threshold() {
                table.resize(capacity_for(lower));
            }
        }
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V> FromIterator<(Option<Rc<K>>, Rc<V>)> for IdentityMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (Option<Rc<K>>, Rc<V>)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}
