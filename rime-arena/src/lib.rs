//! Region allocator for message objects.
//!
//! An [`Arena`] hands out memory from large blocks
//! and frees all of it at once when it is dropped or reset.
//! Objects that need dropping register a cleanup record,
//! and cleanups run newest first.
//!
//! Each thread allocates from its own serial arena,
//! so allocation takes no locks once a thread has been seen.

#![warn(missing_docs)]

pub use self::{
    block::ARENA_ALIGN_DEFAULT,
    cleanup::{Destructor, drop_erased},
    micro_string::*,
    options::*,
};

use {
    self::{
        block::Block,
        cleanup::Record,
        lookup_chunk::LookupChunks,
        serial::SerialArena,
    },
    std::{
        alloc::Layout,
        marker::PhantomData,
        mem::{self, needs_drop},
        ptr::NonNull,
        sync::{Mutex, PoisonError},
    },
};

mod array_cache;
mod block;
mod cleanup;
mod lookup_chunk;
mod micro_string;
mod options;
mod serial;
mod thread_cache;

/// Region allocator.
///
/// The lifetime `'b` is that of the initial block donated by the user,
/// if any; arenas without one are `Arena<'static>`.
pub struct Arena<'b>
{
    /// Identity in the thread caches.
    /// Replaced on reset so stale cache entries never match.
    id: u64,

    /// Serial arena of the thread that created or last reset the arena.
    head: Box<SerialArena>,

    /// Serial arenas of other threads.
    sides: LookupChunks,
    sides_lock: Mutex<()>,

    options: ArenaOptions,
    initial_block: PhantomData<&'b mut [u8]>,
}

// SAFETY: Serial arenas are only mutated by their owning threads,
//         and side serial arenas are published through atomics.
//         Only objects that are Send may be given to the arena,
//         so their destructors may run on any thread.
unsafe impl Send for Arena<'_> { }
unsafe impl Sync for Arena<'_> { }

impl Arena<'static>
{
    /// Create an arena with default options.
    pub fn new() -> Self
    {
        Self::with_options(ArenaOptions::default())
    }

    /// Create an arena with the given options.
    pub fn with_options(options: ArenaOptions) -> Self
    {
        Self::build(options, None)
    }
}

impl<'b> Arena<'b>
{
    /// Create an arena whose first block is `initial`.
    ///
    /// The arena never frees the block; it is reused across resets.
    /// Blocks too small to hold anything are ignored.
    pub fn with_initial_block(initial: &'b mut [u8], options: ArenaOptions) -> Self
    {
        let len = initial.len();
        // SAFETY: The borrow keeps the memory valid and exclusive for 'b.
        let block = NonNull::new(initial.as_mut_ptr())
            .and_then(|ptr| unsafe { Block::donated(ptr, len) });
        Self::build(options, block)
    }

    fn build(options: ArenaOptions, first: Option<Box<Block>>) -> Self
    {
        let head = SerialArena::new(thread_cache::thread_key(), options, first);
        Self{
            id: thread_cache::next_arena_id(),
            head: Box::new(head),
            sides: LookupChunks::new(),
            sides_lock: Mutex::new(()),
            options,
            initial_block: PhantomData,
        }
    }

    /// The current thread's serial arena, created on first use.
    fn serial(&self) -> &SerialArena
    {
        if let Some(serial) = thread_cache::lookup(self.id) {
            // SAFETY: Serial arenas live as long as the arena id is current.
            return unsafe { &*serial };
        }
        let serial = self.serial_slow();
        thread_cache::store(self.id, serial);
        serial
    }

    #[cold]
    fn serial_slow(&self) -> &SerialArena
    {
        let key = thread_cache::thread_key();
        if self.head.owner == key {
            return &self.head;
        }
        if let Some(serial) = self.sides.find(key) {
            // SAFETY: Side serial arenas live until reset or drop.
            return unsafe { &*serial };
        }

        let _guard = self.sides_lock.lock()
            .unwrap_or_else(PoisonError::into_inner);
        let serial = Box::into_raw(Box::new(SerialArena::new(key, self.options, None)));
        tracing::debug!(arena = self.id, thread = key, "new serial arena");
        // SAFETY: Appends are serialized by the lock.
        unsafe { self.sides.push(key, serial); }
        // SAFETY: Just allocated, freed only on reset or drop.
        unsafe { &*serial }
    }

    /// Allocate `size` bytes aligned to [`ARENA_ALIGN_DEFAULT`].
    pub fn allocate(&self, size: usize) -> NonNull<u8>
    {
        let layout = Layout::from_size_align(size, ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate an object this large");
        self.allocate_aligned(layout)
    }

    /// Allocate memory for `layout`.
    pub fn allocate_aligned(&self, layout: Layout) -> NonNull<u8>
    {
        // SAFETY: The serial arena belongs to this thread.
        unsafe { self.serial().allocate(layout) }
    }

    /// Move `value` into the arena.
    ///
    /// If `T` needs dropping, it is dropped when the arena is reset or dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T>(&self, value: T) -> &mut T
        where T: Send
    {
        let layout = Layout::new::<T>();
        let serial = self.serial();
        // SAFETY: The serial arena belongs to this thread,
        //         and the memory is fresh and fits a T.
        unsafe {
            let ptr = match needs_drop::<T>() && layout.align() <= 2 * ARENA_ALIGN_DEFAULT {
                true => serial.push_embedded(layout, drop_erased::<T>),
                false => {
                    let ptr = serial.allocate(layout);
                    if needs_drop::<T>() {
                        serial.push_cleanup(Record::DynamicPointer(ptr.as_ptr(), drop_erased::<T>));
                    }
                    ptr
                },
            };
            let ptr = ptr.cast::<T>().as_ptr();
            ptr.write(value);
            &mut *ptr
        }
    }

    /// Move a string into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_string(&self, value: String) -> &mut String
    {
        let serial = self.serial();
        // SAFETY: As in alloc.
        unsafe {
            let ptr = serial.allocate(Layout::new::<String>()).cast::<String>().as_ptr();
            ptr.write(value);
            serial.push_cleanup(Record::String(ptr));
            &mut *ptr
        }
    }

    /// Allocate an empty micro string in the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_micro_string(&self) -> &mut MicroString<'_>
    {
        let serial = self.serial();
        // SAFETY: As in alloc. Micro strings only own heap vectors,
        //         which may be dropped on any thread.
        unsafe {
            let ptr = serial.allocate(Layout::new::<MicroString>()).cast::<MicroString>().as_ptr();
            ptr.write(MicroString::new());
            serial.push_cleanup(Record::MicroString(ptr.cast()));
            &mut *ptr
        }
    }

    /// Give a boxed object to the arena.
    ///
    /// The box is dropped when the arena is reset or dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn own<T>(&self, value: Box<T>) -> &mut T
        where T: Send
    {
        &mut **self.alloc(value)
    }

    /// Run `dtor` on `object` when the arena is reset or dropped.
    ///
    /// # Safety
    ///
    /// `object` must stay valid until then, and `dtor`
    /// must be safe to call on it from any thread.
    /// `object` must be at least 4-aligned.
    pub unsafe fn add_cleanup(&self, object: *mut u8, dtor: Destructor)
    {
        self.serial().push_cleanup(Record::DynamicPointer(object, dtor));
    }

    /// Allocate a buffer for at least `bytes` bytes of array elements.
    ///
    /// Buffers donated with [`donate_array`] are reused.
    ///
    /// [`donate_array`]: `Self::donate_array`
    pub fn allocate_array(&self, bytes: usize) -> NonNull<u8>
    {
        // SAFETY: The serial arena belongs to this thread.
        unsafe { self.serial().allocate_array(bytes) }
    }

    /// Return an array buffer so later array allocations can reuse it.
    ///
    /// # Safety
    ///
    /// The buffer must have been allocated from this arena,
    /// hold at least `bytes` bytes, and not be used afterwards.
    pub unsafe fn donate_array(&self, buffer: NonNull<u8>, bytes: usize)
    {
        self.serial().donate_array(buffer, bytes);
    }

    /// Bytes handed out by the arena.
    pub fn space_used(&self) -> usize
    {
        self.serials().map(SerialArena::space_used).sum()
    }

    /// Bytes of all blocks owned or borrowed by the arena.
    pub fn space_allocated(&self) -> usize
    {
        self.serials().map(SerialArena::space_allocated).sum()
    }

    fn serials(&self) -> impl Iterator<Item=&SerialArena>
    {
        // SAFETY: Side serial arenas live until reset or drop.
        let sides = self.sides.serials().map(|s| unsafe { &*s });
        sides.chain(std::iter::once(&*self.head))
    }

    /// Run all cleanups and free every block but the first.
    ///
    /// Returns the number of bytes the arena had allocated.
    pub fn reset(&mut self) -> usize
    {
        let allocated = self.space_allocated();
        let calls = self.destroy_sides();
        // SAFETY: Exclusive access; objects are unreachable after reset.
        let calls = calls + unsafe {
            let calls = self.head.run_cleanups();
            self.head.reset_to_first_block();
            calls
        };

        self.id = thread_cache::next_arena_id();
        self.head.owner = thread_cache::thread_key();

        tracing::debug!(allocated, cleanups = calls, "reset arena");
        allocated
    }

    /// Run the cleanups of the side serial arenas and free them.
    fn destroy_sides(&mut self) -> usize
    {
        let mut calls = 0;
        for serial in self.sides.serials() {
            // SAFETY: Exclusive access, and nothing refers to them afterwards.
            unsafe {
                calls += (*serial).run_cleanups();
                drop(Box::from_raw(serial));
            }
        }
        self.sides.clear();
        calls
    }
}

impl Drop for Arena<'_>
{
    fn drop(&mut self)
    {
        self.destroy_sides();
        // SAFETY: Exclusive access.
        unsafe { self.head.run_cleanups(); }
    }
}

impl Default for Arena<'static>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl std::fmt::Debug for Arena<'_>
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        f.debug_struct("Arena")
            .field("space_used", &self.space_used())
            .field("space_allocated", &self.space_allocated())
            .finish_non_exhaustive()
    }
}

// Cleanup records tag the low two bits of object pointers.
const _: () = assert!(mem::align_of::<MicroString<'static>>() >= 4);

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::proptest,
        std::sync::{Arc, atomic::{AtomicUsize, Ordering::SeqCst}},
    };

    struct Logged(u32, Arc<Mutex<Vec<u32>>>);

    impl Drop for Logged
    {
        fn drop(&mut self)
        {
            self.1.lock().unwrap().push(self.0);
        }
    }

    proptest!
    {
        #[test]
        fn cleanups_run_newest_first(sizes in proptest::collection::vec(0usize .. 300, 1 .. 100))
        {
            let log = Arc::new(Mutex::new(Vec::new()));
            let arena = Arena::with_options(ArenaOptions{start_block_size: 64, max_block_size: 512});
            for (i, &size) in sizes.iter().enumerate() {
                arena.allocate(size);
                match i % 3 {
                    0 => { arena.alloc(Logged(i as u32, log.clone())); },
                    1 => { arena.own(Box::new(Logged(i as u32, log.clone()))); },
                    _ => { arena.alloc([Logged(i as u32, log.clone())]); },
                }
            }
            drop(arena);
            let expected: Vec<u32> = (0 .. sizes.len() as u32).rev().collect();
            assert_eq!(*log.lock().unwrap(), expected);
        }
    }

    #[test]
    fn threads_allocate_concurrently()
    {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted(String);

        impl Drop for Counted
        {
            fn drop(&mut self)
            {
                DROPS.fetch_add(1, SeqCst);
            }
        }

        let arena = Arena::new();
        std::thread::scope(|s| {
            for t in 0 .. 8 {
                let arena = &arena;
                s.spawn(move || {
                    for i in 0 .. 10_000 {
                        let value = arena.alloc(Counted(format!("{t}:{i}")));
                        assert_eq!(value.0, format!("{t}:{i}"));
                    }
                });
            }
        });
        assert_eq!(DROPS.load(SeqCst), 0);
        assert!(arena.space_used() >= 80_000 * mem::size_of::<Counted>());
        drop(arena);
        assert_eq!(DROPS.load(SeqCst), 80_000);
    }

    #[test]
    fn reset_keeps_first_block()
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut arena = Arena::with_options(ArenaOptions{start_block_size: 128, max_block_size: 1024});
        for i in 0 .. 50 {
            arena.alloc_string(format!("string {i}"));
            arena.alloc(Logged(i, log.clone()));
        }
        let allocated = arena.space_allocated();
        assert_eq!(arena.reset(), allocated);
        assert_eq!(log.lock().unwrap().len(), 50);
        assert_eq!(arena.space_used(), 0);
        assert_eq!(arena.space_allocated(), 128);

        let s = arena.alloc_micro_string();
        s.set(b"after reset", &arena);
        assert_eq!(s.as_bytes(), b"after reset");
    }

    #[test]
    fn donated_block_is_used_first()
    {
        let mut buffer = [0u8; 1024];
        let range = buffer.as_ptr_range();
        let range = range.start as usize .. range.end as usize;
        {
            let arena = Arena::with_initial_block(&mut buffer, ArenaOptions::default());
            let p = arena.allocate(100);
            assert!(range.contains(&(p.as_ptr() as usize)));
            assert!(arena.space_allocated() <= 1024);
            arena.allocate(2000);
            assert!(arena.space_allocated() > 1024);
        }
        buffer[0] = 1;
    }

    #[test]
    fn donated_arrays_are_reused()
    {
        let arena = Arena::new();
        let a = arena.allocate_array(40);
        unsafe { arena.donate_array(a, 64); }
        let b = arena.allocate_array(50);
        assert_eq!(a, b);
        let c = arena.allocate_array(50);
        assert_ne!(a, c);
    }

    #[test]
    fn alloc_without_drop_has_no_cleanup()
    {
        let arena = Arena::new();
        let value = arena.alloc(42u64);
        *value += 1;
        assert_eq!(*value, 43);
        assert_eq!(arena.space_used(), 8);
    }
}
