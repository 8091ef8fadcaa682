use {
    crate::{Cursor, Error, Result, scatter::Core, str_hash},
    std::fmt,
};

/// Map from string keys to values.
///
/// Keys are hashed with [`murmur_hash2`] and copied into the table.
///
/// [`murmur_hash2`]: `crate::murmur_hash2`
pub struct StrTable<V>
{
    hash: Core<Box<str>, V>,
}

impl<V> StrTable<V>
{
    /// Create an empty table that does not allocate until used.
    pub fn new() -> Self
    {
        Self{hash: Core::new_empty()}
    }

    /// Create a table with `2^size_lg2` slots.
    pub fn with_size_lg2(size_lg2: u8) -> Result<Self>
    {
        Ok(Self{hash: Core::with_size_lg2(size_lg2)?})
    }

    /// Number of entries in the table.
    pub fn count(&self) -> usize
    {
        self.hash.count()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool
    {
        self.count() == 0
    }

    /// Insert a key that must not already be present.
    ///
    /// On failure the table is unchanged.
    pub fn insert(&mut self, key: &str, val: V) -> Result<()>
    {
        let hash = str_hash(key);
        if self.hash.lookup(key, hash).is_some() {
            return Err(Error::KeyExists);
        }
        let mut owned = String::new();
        owned.try_reserve_exact(key.len()).map_err(|_| Error::AllocFailed)?;
        owned.push_str(key);
        self.hash.insert(owned.into_boxed_str(), hash, val)
    }

    /// Look up the value for a key.
    pub fn lookup(&self, key: &str) -> Option<&V>
    {
        self.hash.lookup(key, str_hash(key))
    }

    /// Look up a mutable reference to the value for a key.
    pub fn lookup_mut(&mut self, key: &str) -> Option<&mut V>
    {
        self.hash.lookup_mut(key, str_hash(key))
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool
    {
        self.lookup(key).is_some()
    }

    /// Remove a key and return its value.
    pub fn remove(&mut self, key: &str) -> Option<V>
    {
        self.hash.remove(key, str_hash(key)).map(|(_, v)| v)
    }

    /// Replace the value of a present key in place, returning the old value.
    ///
    /// If the key is absent, nothing changes and `None` is returned.
    /// Cursors stay valid.
    pub fn replace(&mut self, key: &str, val: V) -> Option<V>
    {
        self.lookup_mut(key).map(|slot| std::mem::replace(slot, val))
    }

    /// Shrink the table to fit its contents. Invalidates cursors.
    pub fn compact(&mut self) -> Result<()>
    {
        self.hash.compact()
    }

    /// Iterate over all entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item=(&str, &V)> + '_
    {
        (0 .. self.hash.size())
            .filter_map(|i| self.hash.slot(i))
            .map(|e| (&*e.key, &e.val))
    }

    /// Cursor at the first entry.
    pub fn begin(&self) -> Cursor
    {
        Cursor(self.hash.next_occupied(0).unwrap_or(self.hash.size()))
    }

    /// Move the cursor to the next entry.
    pub fn advance(&self, cursor: &mut Cursor)
    {
        let next = self.hash.next_occupied(cursor.0 + 1);
        *cursor = Cursor(next.unwrap_or(self.hash.size()));
    }

    /// Whether the cursor is past the last entry.
    ///
    /// Safe to call on a cursor invalidated by modification.
    pub fn done(&self, cursor: &Cursor) -> bool
    {
        self.hash.slot(cursor.0).is_none()
    }

    /// Key and value at the cursor.
    pub fn at(&self, cursor: &Cursor) -> Option<(&str, &V)>
    {
        self.hash.slot(cursor.0).map(|e| (&*e.key, &e.val))
    }
}

impl<V> Default for StrTable<V>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<V> Clone for StrTable<V>
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

impl<V> fmt::Debug for StrTable<V>
    where V: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_map().entries(self.iter()).finish()
    }
}
