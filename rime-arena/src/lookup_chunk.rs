use {
    crate::serial::SerialArena,
    std::{
        ptr,
        sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering::{Acquire, Relaxed, Release}},
    },
};

const FIRST_CHUNK_CAPACITY: usize = 4;

/// Append-only map from thread keys to serial arenas.
///
/// Lookups never lock. Appends must be serialized by the caller;
/// the arena holds its mutex while appending.
/// Entries are published by a release store of the chunk length,
/// and new chunks by a release store of the head pointer.
pub (crate) struct LookupChunks
{
    head: AtomicPtr<Chunk>,
}

struct Chunk
{
    /// The chunk appended before this one.
    next: *mut Chunk,
    len: AtomicUsize,
    entries: Box<[Entry]>,
}

struct Entry
{
    key: AtomicU64,
    serial: AtomicPtr<SerialArena>,
}

impl LookupChunks
{
    pub fn new() -> Self
    {
        Self{head: AtomicPtr::new(ptr::null_mut())}
    }

    /// Find the serial arena of a thread.
    pub fn find(&self, key: u64) -> Option<*mut SerialArena>
    {
        let mut chunk = self.head.load(Acquire);
        while !chunk.is_null() {
            // SAFETY: Published chunks live until the arena is reset or dropped,
            //         neither of which can race with a shared borrow.
            let c = unsafe { &*chunk };
            let len = c.len.load(Acquire);
            for entry in &c.entries[.. len] {
                if entry.key.load(Relaxed) == key {
                    return Some(entry.serial.load(Relaxed));
                }
            }
            chunk = c.next;
        }
        None
    }

    /// Append an entry.
    ///
    /// # Safety
    ///
    /// No other append may run concurrently.
    pub unsafe fn push(&self, key: u64, serial: *mut SerialArena)
    {
        let mut head = self.head.load(Relaxed);
        let full = head.is_null() || {
            let c = &*head;
            c.len.load(Relaxed) == c.entries.len()
        };
        if full {
            let capacity = match head.is_null() {
                true => FIRST_CHUNK_CAPACITY,
                false => (&(*head).entries).len() * 2,
            };
            let entries = (0 .. capacity)
                .map(|_| Entry{key: AtomicU64::new(0), serial: AtomicPtr::new(ptr::null_mut())})
                .collect();
            let chunk = Box::new(Chunk{next: head, len: AtomicUsize::new(0), entries});
            head = Box::into_raw(chunk);
            self.head.store(head, Release);
        }
        let c = &*head;
        let len = c.len.load(Relaxed);
        c.entries[len].key.store(key, Relaxed);
        c.entries[len].serial.store(serial, Relaxed);
        c.len.store(len + 1, Release);
    }

    /// Every serial arena in the map, most recently added first.
    pub fn serials(&self) -> impl Iterator<Item=*mut SerialArena> + '_
    {
        let mut chunk = self.head.load(Acquire);
        let mut index = 0;
        std::iter::from_fn(move || {
            while !chunk.is_null() {
                // SAFETY: As in find.
                let c = unsafe { &*chunk };
                let len = c.len.load(Acquire);
                if index < len {
                    index += 1;
                    return Some(c.entries[len - index].serial.load(Relaxed));
                }
                chunk = c.next;
                index = 0;
            }
            None
        })
    }

    /// Remove every entry, freeing the chunks but not the serial arenas.
    pub fn clear(&mut self)
    {
        let mut chunk = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        while !chunk.is_null() {
            // SAFETY: Chunks were created by Box::into_raw and are unreachable now.
            let c = unsafe { Box::from_raw(chunk) };
            chunk = c.next;
        }
    }
}

impl Drop for LookupChunks
{
    fn drop(&mut self)
    {
        self.clear();
    }
}
