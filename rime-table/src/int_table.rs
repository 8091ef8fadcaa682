use {
    crate::{Error, Result, int_hash, scatter::Core},
    std::fmt,
};

/// Map from integer keys to values.
///
/// Keys below the size of the array part are stored in a dense array
/// and are found without hashing. All other keys live in the hash part.
/// The array part is only resized by [`compact`].
///
/// [`compact`]: `Self::compact`
pub struct IntTable<V>
{
    /// Dense part. `None` marks an empty slot.
    array: Vec<Option<V>>,
    array_count: usize,
    hash: Core<u64, V>,
}

/// Position of a forward iteration over a table.
///
/// A cursor does not borrow the table.
/// Modifying the table invalidates the cursor, after which
/// [`IntTable::done`] is still safe to call,
/// but the entries it visits are unspecified.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cursor(pub (crate) usize);

impl<V> IntTable<V>
{
    /// Create an empty table that does not allocate until used.
    pub fn new() -> Self
    {
        Self{array: Vec::new(), array_count: 0, hash: Core::new_empty()}
    }

    /// Create a table with an array part of `array_size` slots
    /// and a hash part of `2^hash_size_lg2` slots.
    pub fn with_sizes(array_size: usize, hash_size_lg2: u8) -> Result<Self>
    {
        let mut array = Vec::new();
        array.try_reserve_exact(array_size).map_err(|_| Error::AllocFailed)?;
        array.resize_with(array_size, || None);
        let hash = Core::with_size_lg2(hash_size_lg2)?;
        Ok(Self{array, array_count: 0, hash})
    }

    /// Number of entries in the table.
    pub fn count(&self) -> usize
    {
        self.array_count + self.hash.count()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool
    {
        self.count() == 0
    }

    /// Size of the dense array part.
    pub fn array_size(&self) -> usize
    {
        self.array.len()
    }

    fn array_index(&self, key: u64) -> Option<usize>
    {
        usize::try_from(key).ok().filter(|&i| i < self.array.len())
    }

    /// Insert a key that must not already be present.
    ///
    /// On failure the table is unchanged.
    pub fn insert(&mut self, key: u64, val: V) -> Result<()>
    {
        if let Some(i) = self.array_index(key) {
            let slot = &mut self.array[i];
            if slot.is_some() {
                return Err(Error::KeyExists);
            }
            *slot = Some(val);
            self.array_count += 1;
            return Ok(());
        }
        let hash = int_hash(key);
        if self.hash.lookup(&key, hash).is_some() {
            return Err(Error::KeyExists);
        }
        self.hash.insert(key, hash, val)
    }

    /// Look up the value for a key.
    pub fn lookup(&self, key: u64) -> Option<&V>
    {
        match self.array_index(key) {
            Some(i) => self.array[i].as_ref(),
            None => self.hash.lookup(&key, int_hash(key)),
        }
    }

    /// Look up the value for a 32-bit key.
    ///
    /// The array part is checked inline.
    #[inline]
    pub fn lookup32(&self, key: u32) -> Option<&V>
    {
        let i = key as usize;
        if i < self.array.len() {
            return self.array[i].as_ref();
        }
        self.hash.lookup(&(key as u64), int_hash(key as u64))
    }

    /// Look up a mutable reference to the value for a key.
    pub fn lookup_mut(&mut self, key: u64) -> Option<&mut V>
    {
        match self.array_index(key) {
            Some(i) => self.array[i].as_mut(),
            None => self.hash.lookup_mut(&key, int_hash(key)),
        }
    }

    /// Whether the key is present.
    pub fn contains(&self, key: u64) -> bool
    {
        self.lookup(key).is_some()
    }

    /// Remove a key and return its value.
    pub fn remove(&mut self, key: u64) -> Option<V>
    {
        match self.array_index(key) {
            Some(i) => {
                let val = self.array[i].take();
                if val.is_some() {
                    self.array_count -= 1;
                }
                val
            },
            None => self.hash.remove(&key, int_hash(key)).map(|(_, v)| v),
        }
    }

    /// Replace the value of a present key in place, returning the old value.
    ///
    /// If the key is absent, nothing changes and `None` is returned.
    /// Cursors stay valid.
    pub fn replace(&mut self, key: u64, val: V) -> Option<V>
    {
        self.lookup_mut(key).map(|slot| std::mem::replace(slot, val))
    }

    /// Insert a value under the key equal to the current count.
    ///
    /// Used together with [`pop`] this treats the table as a stack
    /// as long as no other keys are inserted.
    ///
    /// [`pop`]: `Self::pop`
    pub fn push(&mut self, val: V) -> Result<()>
    {
        self.insert(self.count() as u64, val)
    }

    /// Remove the value under the key one below the current count.
    pub fn pop(&mut self) -> Option<V>
    {
        let count = self.count();
        if count == 0 {
            return None;
        }
        self.remove(count as u64 - 1)
    }

    /// Rebuild the table for the current contents.
    ///
    /// The array part becomes the largest prefix of the key space
    /// that is more than half full, and the hash part is shrunk
    /// to fit the remaining keys. Invalidates cursors.
    /// On allocation failure the table is unchanged.
    pub fn compact(&mut self) -> Result<()>
    {
        let mut keys = Vec::new();
        keys.try_reserve_exact(self.count()).map_err(|_| Error::AllocFailed)?;
        keys.extend(self.iter().map(|(k, _)| k));
        keys.sort_unstable();

        let array_size = dense_prefix(&keys);
        let in_array = keys.partition_point(|&k| k < array_size as u64);

        let mut array = Vec::new();
        array.try_reserve_exact(array_size).map_err(|_| Error::AllocFailed)?;
        array.resize_with(array_size, || None);
        let mut hash = Core::with_capacity(keys.len() - in_array)?;

        // Nothing below allocates.
        let old_array = std::mem::take(&mut self.array);
        let entries = old_array.into_iter().enumerate()
            .filter_map(|(k, v)| Some((k as u64, v?)))
            .chain(self.hash.drain());
        for (key, val) in entries {
            match usize::try_from(key).ok().filter(|&i| i < array_size) {
                Some(i) => array[i] = Some(val),
                None => hash.insert(key, int_hash(key), val)?,
            }
        }

        self.array = array;
        self.array_count = in_array;
        self.hash = hash;
        Ok(())
    }

    /// Iterate over all entries, array part first.
    pub fn iter(&self) -> impl Iterator<Item=(u64, &V)> + '_
    {
        let array = self.array.iter().enumerate()
            .filter_map(|(k, v)| Some((k as u64, v.as_ref()?)));
        let hash = (0 .. self.hash.size())
            .filter_map(|i| self.hash.slot(i))
            .map(|e| (e.key, &e.val));
        array.chain(hash)
    }

    /// Iterate over all values mutably, in the same order as [`iter`].
    ///
    /// [`iter`]: `Self::iter`
    pub fn values_mut(&mut self) -> impl Iterator<Item=&mut V> + '_
    {
        let array = self.array.iter_mut().filter_map(Option::as_mut);
        let hash = self.hash.slots_mut().map(|e| &mut e.val);
        array.chain(hash)
    }

    /// Cursor at the first entry.
    pub fn begin(&self) -> Cursor
    {
        self.settle(Cursor(0))
    }

    /// Move the cursor to the next entry.
    pub fn advance(&self, cursor: &mut Cursor)
    {
        *cursor = self.settle(Cursor(cursor.0 + 1));
    }

    /// Whether the cursor is past the last entry.
    pub fn done(&self, cursor: &Cursor) -> bool
    {
        self.entry_at(cursor.0).is_none()
    }

    /// Key and value at the cursor.
    pub fn at(&self, cursor: &Cursor) -> Option<(u64, &V)>
    {
        self.entry_at(cursor.0)
    }

    fn entry_at(&self, pos: usize) -> Option<(u64, &V)>
    {
        if pos < self.array.len() {
            return self.array[pos].as_ref().map(|v| (pos as u64, v));
        }
        self.hash.slot(pos - self.array.len()).map(|e| (e.key, &e.val))
    }

    /// First occupied position at or after the cursor.
    fn settle(&self, cursor: Cursor) -> Cursor
    {
        let mut pos = cursor.0;
        while pos < self.array.len() && self.array[pos].is_none() {
            pos += 1;
        }
        if pos < self.array.len() {
            return Cursor(pos);
        }
        let end = self.array.len() + self.hash.size();
        let hpos = pos - self.array.len();
        match self.hash.next_occupied(hpos) {
            Some(i) => Cursor(self.array.len() + i),
            None => Cursor(end),
        }
    }
}

/// Largest size `n` such that more than half of `0 .. n` are keys,
/// trimmed to one past the largest key below it.
fn dense_prefix(sorted_keys: &[u64]) -> usize
{
    let mut best = 0;
    let mut candidate: u64 = 1;
    while let Some(&max) = sorted_keys.last() {
        if candidate > max.saturating_add(1).next_power_of_two() {
            break;
        }
        let below = sorted_keys.partition_point(|&k| k < candidate);
        if below as u64 * 2 > candidate {
            best = below;
        }
        match candidate.checked_mul(2) {
            Some(c) => candidate = c,
            None => break,
        }
    }
    match best {
        0 => 0,
        n => sorted_keys[n - 1] as usize + 1,
    }
}

impl<V> Default for IntTable<V>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<V> Clone for IntTable<V>
    where V: Clone
{
    fn clone(&self) -> Self
    {
        let mut copy = Self::new();
        for (k, v) in self.iter() {
            // Keys are distinct, and copying does not fail short of OOM.
            let _ = copy.insert(k, v.clone());
        }
        copy
    }
}

impl<V> fmt::Debug for IntTable<V>
    where V: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::{collection::btree_map, proptest}};

    #[test]
    fn duplicate_key()
    {
        let mut t = IntTable::with_sizes(4, 2).unwrap();
        t.insert(1, "a").unwrap();
        t.insert(100, "b").unwrap();
        assert_eq!(t.insert(1, "c"), Err(Error::KeyExists));
        assert_eq!(t.insert(100, "c"), Err(Error::KeyExists));
        assert_eq!(t.lookup(1), Some(&"a"));
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn stack()
    {
        let mut t = IntTable::new();
        for i in 0 .. 10 {
            t.push(i * 10).unwrap();
        }
        assert_eq!(t.lookup32(3), Some(&30));
        for i in (0 .. 10).rev() {
            assert_eq!(t.pop(), Some(i * 10));
        }
        assert_eq!(t.pop(), None);
    }

    #[test]
    fn compact_moves_small_keys_to_array()
    {
        let mut t = IntTable::new();
        for k in [0, 1, 2, 3, 5, 1000] {
            t.insert(k, k).unwrap();
        }
        assert_eq!(t.array_size(), 0);
        t.compact().unwrap();
        assert_eq!(t.array_size(), 6);
        for k in [0, 1, 2, 3, 5, 1000] {
            assert_eq!(t.lookup(k), Some(&k));
        }
        assert_eq!(t.lookup(4), None);
    }

    #[test]
    fn replace_keeps_cursor()
    {
        let mut t = IntTable::new();
        t.insert(7, 1).unwrap();
        t.insert(8, 2).unwrap();
        let mut cursor = t.begin();
        let (key, _) = t.at(&cursor).unwrap();
        assert_eq!(t.replace(key, 10), Some(key as i32 - 6));
        assert_eq!(t.replace(9, 3), None);
        t.advance(&mut cursor);
        assert!(!t.done(&cursor));
        t.advance(&mut cursor);
        assert!(t.done(&cursor));
    }

    #[test]
    fn done_on_invalidated_cursor()
    {
        let mut t = IntTable::new();
        for k in 0 .. 50 {
            t.insert(k * 7, ()).unwrap();
        }
        let mut cursor = t.begin();
        for _ in 0 .. 40 {
            t.advance(&mut cursor);
        }
        for k in 0 .. 50 {
            t.remove(k * 7);
        }
        t.compact().unwrap();
        assert!(t.done(&cursor));
        assert_eq!(t.at(&cursor), None);
    }

    proptest!
    {
        #[test]
        fn round_trip(entries in btree_map(0u64 .. 2000, 0u32 .. 100, 0 .. 200),
                      array_size in 0usize .. 64,
                      reverse: bool)
        {
            let mut t = IntTable::with_sizes(array_size, 0).unwrap();
            let mut order: Vec<_> = entries.iter().collect();
            if reverse {
                order.reverse();
            }
            for &(&k, &v) in &order {
                t.insert(k, v).unwrap();
            }
            assert_eq!(t.count(), entries.len());
            for (&k, &v) in &entries {
                assert_eq!(t.lookup(k), Some(&v));
            }
            for (&k, &v) in &entries {
                assert_eq!(t.remove(k), Some(v));
                assert_eq!(t.lookup(k), None);
            }
            assert!(t.is_empty());
        }

        #[test]
        fn compact_idempotent(entries in btree_map(0u64 .. 500, 0u32 .. 100, 0 .. 100),
                              removed in btree_map(0u64 .. 500, 0u8 .. 1, 0 .. 50))
        {
            let mut t = IntTable::new();
            for (&k, &v) in &entries {
                t.insert(k, v).unwrap();
            }
            for &k in removed.keys() {
                t.remove(k);
            }
            t.compact().unwrap();
            let count = t.count();
            let array_size = t.array_size();
            t.compact().unwrap();
            assert_eq!(t.count(), count);
            assert_eq!(t.array_size(), array_size);
            for k in 0 .. 500 {
                let expected = entries.get(&k).filter(|_| !removed.contains_key(&k));
                assert_eq!(t.lookup(k), expected);
            }
        }

        #[test]
        fn cursor_visits_every_entry(entries in btree_map(0u64 .. 10_000, 0u8 .. 1, 0 .. 100))
        {
            let mut t = IntTable::new();
            for &k in entries.keys() {
                t.insert(k, ()).unwrap();
            }
            let mut seen = Vec::new();
            let mut cursor = t.begin();
            while !t.done(&cursor) {
                seen.push(t.at(&cursor).unwrap().0);
                t.advance(&mut cursor);
            }
            seen.sort_unstable();
            let expected: Vec<u64> = entries.keys().copied().collect();
            assert_eq!(seen, expected);
        }
    }
}
