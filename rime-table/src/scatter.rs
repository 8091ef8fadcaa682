//! Chained scatter table with Brent's variation.
//!
//! Every key has a main position, its hash masked by the table size.
//! Colliding keys are chained through the free slots of the table itself.
//! The invariant maintained by insertion is that if any key has main
//! position `mp`, then the key stored at `mp` also has main position `mp`.
//! That makes the slot at the main position the head of the only chain
//! that lookup has to walk.

use {
    crate::{Error, Result},
    std::borrow::Borrow,
};

/// Maximum load factor is `MAX_LOAD_NUM / MAX_LOAD_DEN`.
const MAX_LOAD_NUM: usize = 7;
const MAX_LOAD_DEN: usize = 8;

pub (crate) struct Entry<K, V>
{
    pub (crate) key: K,
    pub (crate) val: V,
    hash: u32,
    next: Option<usize>,
}

pub (crate) struct Core<K, V>
{
    slots: Vec<Option<Entry<K, V>>>,
    count: usize,

    /// Free slots are searched for downward from here.
    last_free: usize,
}

impl<K, V> Core<K, V>
{
    /// Create a table without slots.
    pub fn new_empty() -> Self
    {
        Self{slots: Vec::new(), count: 0, last_free: 0}
    }

    /// Create a table with `2^size_lg2` slots.
    ///
    /// A `size_lg2` of zero creates a table without slots,
    /// which allocates on first insertion.
    pub fn with_size_lg2(size_lg2: u8) -> Result<Self>
    {
        let size = if size_lg2 == 0 { 0 } else { 1usize << size_lg2 };
        Ok(Self{slots: alloc_slots(size)?, count: 0, last_free: size})
    }

    pub fn count(&self) -> usize
    {
        self.count
    }

    pub fn size(&self) -> usize
    {
        self.slots.len()
    }

    fn mask(&self) -> usize
    {
        self.slots.len().wrapping_sub(1)
    }

    fn main_position(&self, hash: u32) -> usize
    {
        hash as usize & self.mask()
    }

    /// Find the slot holding `key`.
    fn find<Q>(&self, key: &Q, hash: u32) -> Option<usize>
        where K: Borrow<Q>
            , Q: Eq + ?Sized
    {
        if self.slots.is_empty() {
            return None;
        }
        let mp = self.main_position(hash);
        let head = self.slots[mp].as_ref()?;
        if self.main_position(head.hash) != mp {
            // The slot is borrowed by another chain.
            return None;
        }
        let mut i = Some(mp);
        while let Some(index) = i {
            let entry = self.slots[index].as_ref()?;
            if entry.hash == hash && entry.key.borrow() == key {
                return Some(index);
            }
            i = entry.next;
        }
        None
    }

    pub fn lookup<Q>(&self, key: &Q, hash: u32) -> Option<&V>
        where K: Borrow<Q>
            , Q: Eq + ?Sized
    {
        let index = self.find(key, hash)?;
        self.slots[index].as_ref().map(|e| &e.val)
    }

    pub fn lookup_mut<Q>(&mut self, key: &Q, hash: u32) -> Option<&mut V>
        where K: Borrow<Q>
            , Q: Eq + ?Sized
    {
        let index = self.find(key, hash)?;
        self.slots[index].as_mut().map(|e| &mut e.val)
    }

    /// Insert a key that is known to be absent.
    ///
    /// On allocation failure the table is left unchanged.
    pub fn insert(&mut self, key: K, hash: u32, val: V) -> Result<()>
    {
        if (self.count + 1) * MAX_LOAD_DEN > self.size() * MAX_LOAD_NUM {
            let size = if self.size() == 0 { 4 } else { self.size() * 2 };
            self.resize(size)?;
        }
        self.insert_no_grow(key, hash, val);
        Ok(())
    }

    fn insert_no_grow(&mut self, key: K, hash: u32, val: V)
    {
        let mp = self.main_position(hash);
        let new = Entry{key, val, hash, next: None};

        let colliding_hash = match &self.slots[mp] {
            Some(colliding) => colliding.hash,
            None => {
                self.slots[mp] = Some(new);
                self.count += 1;
                return;
            },
        };

        let free = self.free_slot();
        let colliding_mp = self.main_position(colliding_hash);

        if colliding_mp == mp {
            // The colliding key is at home.
            // Link the new key into the chain right after the head.
            let head = self.slots[mp].as_mut().map(|e| &mut e.next);
            let after = head.and_then(|next| next.replace(free));
            self.slots[free] = Some(Entry{next: after, ..new});
        } else {
            // The colliding key is squatting in our main position.
            // Move it to the free slot and take the main position.
            let mut prev = colliding_mp;
            loop {
                let next = self.slots[prev].as_ref().and_then(|e| e.next);
                if next == Some(mp) {
                    break;
                }
                match next {
                    Some(n) => prev = n,
                    None => unreachable!("broken collision chain"),
                }
            }
            if let Some(e) = self.slots[prev].as_mut() {
                e.next = Some(free);
            }
            self.slots[free] = self.slots[mp].take();
            self.slots[mp] = Some(new);
        }
        self.count += 1;
    }

    /// Find an empty slot.
    ///
    /// The load factor guarantees that there is one.
    fn free_slot(&mut self) -> usize
    {
        for _ in 0 .. 2 {
            while self.last_free > 0 {
                self.last_free -= 1;
                if self.slots[self.last_free].is_none() {
                    return self.last_free;
                }
            }
            // Slots freed by removal sit above the cursor.
            self.last_free = self.size();
        }
        unreachable!("table is full")
    }

    pub fn remove<Q>(&mut self, key: &Q, hash: u32) -> Option<(K, V)>
        where K: Borrow<Q>
            , Q: Eq + ?Sized
    {
        let index = self.find(key, hash)?;
        let mp = self.main_position(hash);

        let removed = if index == mp {
            let next = self.slots[mp].as_ref().and_then(|e| e.next);
            match next {
                // Pull the successor into the head position.
                Some(n) => {
                    let successor = self.slots[n].take();
                    std::mem::replace(&mut self.slots[mp], successor)
                },
                None => self.slots[mp].take(),
            }
        } else {
            let mut prev = mp;
            loop {
                let next = self.slots[prev].as_ref().and_then(|e| e.next);
                if next == Some(index) {
                    break;
                }
                match next {
                    Some(n) => prev = n,
                    None => unreachable!("broken collision chain"),
                }
            }
            let removed = self.slots[index].take();
            let after = removed.as_ref().and_then(|e| e.next);
            if let Some(e) = self.slots[prev].as_mut() {
                e.next = after;
            }
            removed
        };

        self.count -= 1;
        removed.map(|e| (e.key, e.val))
    }

    /// Rehash every entry into a table with `size` slots.
    fn resize(&mut self, size: usize) -> Result<()>
    {
        let fresh = alloc_slots(size)?;
        let old = std::mem::replace(&mut self.slots, fresh);
        self.count = 0;
        self.last_free = size;
        for entry in old.into_iter().flatten() {
            self.insert_no_grow(entry.key, entry.hash, entry.val);
        }
        Ok(())
    }

    /// Create a table that holds `n` entries without growing.
    pub fn with_capacity(n: usize) -> Result<Self>
    {
        let size = size_for(n);
        Ok(Self{slots: alloc_slots(size)?, count: 0, last_free: size})
    }

    /// Resize to the smallest size that keeps the current entries
    /// under the maximum load factor.
    pub fn compact(&mut self) -> Result<()>
    {
        self.resize(size_for(self.count))
    }

    /// Take every entry out of the table, leaving it empty.
    pub fn drain(&mut self) -> impl Iterator<Item=(K, V)> + '_
    {
        self.count = 0;
        self.last_free = self.size();
        self.slots.iter_mut().filter_map(Option::take).map(|e| (e.key, e.val))
    }

    /// Slot at the given position, if occupied.
    pub fn slot(&self, index: usize) -> Option<&Entry<K, V>>
    {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item=&mut Entry<K, V>> + '_
    {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Position of the first occupied slot at or after `from`.
    pub fn next_occupied(&self, from: usize) -> Option<usize>
    {
        (from .. self.size()).find(|&i| self.slots[i].is_some())
    }
}

/// Smallest table size that holds `n` entries under the load factor.
fn size_for(n: usize) -> usize
{
    if n == 0 {
        return 0;
    }
    let mut size = 4;
    while n * MAX_LOAD_DEN > size * MAX_LOAD_NUM {
        size *= 2;
    }
    size
}

fn alloc_slots<K, V>(size: usize) -> Result<Vec<Option<Entry<K, V>>>>
{
    let mut slots = Vec::new();
    slots.try_reserve_exact(size).map_err(|_| Error::AllocFailed)?;
    slots.resize_with(size, || None);
    Ok(slots)
}
