use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;

use crate::DefaultHashBuilder;
use crate::raw;
use crate::raw::EMPTY;
use crate::raw::MIN_CAPACITY;
use crate::raw::OnMatch;
use crate::raw::Placement;
use crate::raw::Storage;

/// A flat hash map using block-striped Robin Hood probing with vectorized
/// tag scanning.
///
/// `FlatMap<K, V, S>` stores key-value pairs in open-addressed storage
/// probed 16 slots at a time. Each slot carries a one-byte tag derived from
/// the key's hash, so most candidate slots are rejected by a single vector
/// comparison without touching the keys, and a one-byte displacement count
/// that drives Robin Hood eviction: an entry that has traveled farther from
/// its home block displaces a resident that has traveled less far.
///
/// The table doubles in capacity once occupancy would pass 90% and never
/// shrinks. All operations assume exclusive access; there is no internal
/// synchronization.
///
/// # Examples
///
/// ```rust
/// use block_robin::FlatMap;
///
/// let mut map = FlatMap::new();
/// map.insert("a", 1u32);
/// map.insert("b", 2u32);
///
/// assert_eq!(map.get(&"a"), Some(&1));
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.remove(&"b"), Some(2));
/// assert!(!map.contains_key(&"b"));
/// ```
#[derive(Clone)]
pub struct FlatMap<K, V, S = DefaultHashBuilder> {
    storage: Storage<K, V>,
    len: usize,
    hash_builder: S,
}

impl<K, V, S> Debug for FlatMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            map.entry(k, v);
        }
        map.finish()
    }
}

impl<K, V, S> Default for FlatMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_capacity_and_hasher(MIN_CAPACITY, S::default())
    }
}

// Pinning `S` here (rather than bounding a generic `S: Default`) lets
// `FlatMap::new()` infer the hasher without a turbofish or annotation.
#[cfg(feature = "foldhash")]
impl<K, V> FlatMap<K, V, DefaultHashBuilder>
where
    K: Hash + Eq,
{
    /// Creates an empty map with the default capacity of one 16-slot block.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let map: FlatMap<u64, u64> = FlatMap::new();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 16);
    /// ```
    pub fn new() -> Self {
        Self::with_capacity_and_hasher(MIN_CAPACITY, DefaultHashBuilder::default())
    }

    /// Creates an empty map with at least `capacity` slots.
    ///
    /// The slot count is rounded up to a power of two, with a minimum of one
    /// 16-slot block.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let map: FlatMap<u64, u64> = FlatMap::with_capacity(100);
    /// assert_eq!(map.capacity(), 128);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> FlatMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates an empty map that hashes with `hash_builder`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use block_robin::FlatMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: FlatMap<u64, u64, _> = FlatMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(MIN_CAPACITY, hash_builder)
    }

    /// Creates an empty map with at least `capacity` slots, hashing with
    /// `hash_builder`.
    ///
    /// The slot count is rounded up to a power of two, with a minimum of one
    /// 16-slot block.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let capacity = capacity.next_power_of_two().max(MIN_CAPACITY);
        Self {
            storage: Storage::with_capacity(capacity),
            len: 0,
            hash_builder,
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1u64, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the total number of slots, always a power of two and at
    /// least 16.
    ///
    /// This is the raw slot-array length, not a fill watermark: the map
    /// doubles it once occupancy would pass 90%.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Inserts a key-value pair, returning the previous value if the key
    /// was already present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// assert_eq!(map.insert(37u64, "a"), None);
    /// assert_eq!(map.insert(37u64, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let h = self.hashed(&key);

        // The load check runs before we know whether this is an overwrite,
        // so replacing an existing key at the threshold still grows the
        // table.
        if (self.len + 1) * 10 > self.capacity() * 9 {
            return self.grow_insert(h, key, value);
        }

        match self.storage.insert_with(h, key, value, OnMatch::Replace) {
            Placement::Replaced(old) => Some(old),
            Placement::Inserted => {
                self.len += 1;
                None
            }
            Placement::Exhausted(key, value) => {
                // The entry left in hand may be a resident displaced along
                // the way rather than the caller's pair; its own hash seeds
                // the retry against the grown table.
                let h = self.hashed(&key);
                self.grow_insert(h, key, value)
            }
        }
    }

    /// Returns a reference to the value stored for `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// map.insert(1u64, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<&V> {
        if self.len == 0 {
            return None;
        }
        let h = self.hashed(key);
        let slot = self.storage.find(h, key)?;
        self.storage.slots[slot].as_ref().map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value stored for `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// map.insert(1u64, 10);
    /// if let Some(v) = map.get_mut(&1) {
    ///     *v += 1;
    /// }
    /// assert_eq!(map.get(&1), Some(&11));
    /// ```
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.len == 0 {
            return None;
        }
        let h = self.hashed(key);
        let slot = self.storage.find(h, key)?;
        self.storage.slots[slot].as_mut().map(|(_, v)| v)
    }

    /// Returns `true` if the map stores a value for `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// map.insert(1u64, "a");
    /// assert!(map.contains_key(&1));
    /// assert!(!map.contains_key(&2));
    /// ```
    pub fn contains_key(&self, key: &K) -> bool {
        if self.len == 0 {
            return false;
        }
        let h = self.hashed(key);
        self.storage.find(h, key).is_some()
    }

    /// Removes `key` from the map, returning its value if it was present.
    ///
    /// Removal clears the slot's tag but does not re-pack the probe chain:
    /// neighbouring displacement counts stay as they were. Lookups stop at
    /// the first block holding no entry displaced as far as the probe has
    /// traveled, so interleaving heavy removal with reinsertion on a long
    /// collision chain can leave a surviving far-displaced key unreachable
    /// (still counted by [`len`], but not found) until the table grows or
    /// is rebuilt. Deletion-heavy workloads should prefer periodic rebuilds
    /// over in-place churn.
    ///
    /// [`len`]: FlatMap::len
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// map.insert(1u64, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if self.len == 0 {
            return None;
        }
        let h = self.hashed(key);
        let slot = self.storage.find(h, key)?;
        match self.storage.slots[slot].take() {
            Some((_, value)) => {
                self.storage.tags[slot] = EMPTY;
                self.len -= 1;
                Some(value)
            }
            None => unreachable!("removing an empty slot"),
        }
    }

    /// Removes all entries, keeping the current capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::with_capacity(64);
    /// map.insert(1u64, "a");
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 64);
    /// ```
    pub fn clear(&mut self) {
        // Displacement bytes are left as-is: stale values only lengthen
        // probes and are rewritten when a slot is next filled.
        for (tag, slot) in self
            .storage
            .tags
            .iter_mut()
            .zip(self.storage.slots.iter_mut())
        {
            if *tag != EMPTY {
                *tag = EMPTY;
                *slot = None;
            }
        }
        self.len = 0;
    }

    #[inline(always)]
    fn hashed(&self, key: &K) -> u64 {
        raw::finalize(self.hash_builder.hash_one(key))
    }

    /// Doubles the table and retries the pending entry against the grown
    /// arrays, then replays every live slot of the old table in ascending
    /// index order.
    ///
    /// The pending entry goes in first; if an old slot then turns out to
    /// hold the same key, the replay keeps the pending value and drops the
    /// stale one, so an overwrite that lands on the growth threshold still
    /// resolves to the newest value.
    #[cold]
    #[inline(never)]
    fn grow_insert(&mut self, h: u64, key: K, value: V) -> Option<V> {
        let mut grown = Storage::with_capacity(self.capacity() * 2);
        match grown.insert_with(h, key, value, OnMatch::Replace) {
            Placement::Inserted => {}
            _ => unreachable!("doubled table rejected the pending entry"),
        }

        // Single ownership handoff: from here on the map's storage is the
        // grown table, and the old arrays are drained then dropped.
        let mut old = mem::replace(&mut self.storage, grown);

        let mut superseded = None;
        for slot in 0..old.capacity() {
            if old.tags[slot] == EMPTY {
                continue;
            }
            if let Some((k, v)) = old.slots[slot].take() {
                let h = self.hashed(&k);
                match self.storage.insert_with(h, k, v, OnMatch::Keep) {
                    Placement::Inserted => {}
                    Placement::Replaced(stale) => {
                        // The pending entry already superseded this key in
                        // the old table; the newer value stays.
                        superseded = Some(stale);
                    }
                    Placement::Exhausted(..) => {
                        unreachable!("probe budget exhausted while rehashing into a doubled table")
                    }
                }
            }
        }

        if superseded.is_none() {
            self.len += 1;
        }
        superseded
    }
}

impl<K, V, S> FlatMap<K, V, S> {
    /// Returns an iterator over all key-value pairs in an unspecified
    /// order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_robin::FlatMap;
    ///
    /// let mut map = FlatMap::new();
    /// map.insert(1u64, "a");
    /// map.insert(2u64, "b");
    ///
    /// let mut keys: Vec<u64> = map.iter().map(|(&k, _)| k).collect();
    /// keys.sort();
    /// assert_eq!(keys, [1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.storage.slots.iter(),
        }
    }
}

/// Iterator over a map's key-value pairs in an unspecified order.
///
/// Created by [`FlatMap::iter`].
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Option<(K, V)>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Some((k, v)) = slot {
                return Some((k, v));
            }
        }
        None
    }
}
