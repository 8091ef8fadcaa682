use {
    crate::{
        ArenaOptions,
        array_cache::ArrayCache,
        block::{Block, round_up},
        cleanup::{self, DYNAMIC_HEADER, Destructor, Record},
        ARENA_ALIGN_DEFAULT,
    },
    std::{
        alloc::Layout,
        cell::UnsafeCell,
        ptr::NonNull,
        sync::atomic::{AtomicUsize, Ordering::Relaxed},
    },
};

/// Blocks and caches used by a single thread.
///
/// Only the owning thread touches the state.
/// The counters may be read from any thread.
pub (crate) struct SerialArena
{
    /// Thread key of the owning thread.
    pub (crate) owner: u64,

    state: UnsafeCell<SerialState>,

    space_used: AtomicUsize,
    space_allocated: AtomicUsize,
}

struct SerialState
{
    /// The current block, linked to the blocks before it.
    head: Option<Box<Block>>,
    array_cache: ArrayCache,
    last_block_size: usize,
    options: ArenaOptions,
}

impl SerialArena
{
    pub fn new(owner: u64, options: ArenaOptions, first: Option<Box<Block>>) -> Self
    {
        let allocated = first.as_ref().map_or(0, |b| b.len());
        let state = SerialState{
            head: first,
            array_cache: ArrayCache::new(),
            last_block_size: allocated,
            options,
        };
        Self{
            owner,
            state: UnsafeCell::new(state),
            space_used: AtomicUsize::new(0),
            space_allocated: AtomicUsize::new(allocated),
        }
    }

    /// Bytes handed out to objects, arrays, and cleanup records.
    pub fn space_used(&self) -> usize
    {
        self.space_used.load(Relaxed)
    }

    /// Bytes of all blocks, donated ones included.
    pub fn space_allocated(&self) -> usize
    {
        self.space_allocated.load(Relaxed)
    }

    /// # Safety
    ///
    /// Must be called on the owning thread,
    /// and the result must not outlive the call that obtained it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state(&self) -> &mut SerialState
    {
        &mut *self.state.get()
    }

    /// Allocate memory for an object.
    ///
    /// # Safety
    ///
    /// Must be called on the owning thread.
    pub unsafe fn allocate(&self, layout: Layout) -> NonNull<u8>
    {
        let state = self.state();
        let ptr = match state.head.as_mut().and_then(|b| b.try_alloc(layout)) {
            Some(ptr) => ptr,
            None => {
                // Room for the worst-case alignment adjustment.
                let need = layout.size().saturating_add(layout.align());
                self.new_block(state, need)
                    .try_alloc(layout)
                    .expect("Cannot allocate a block this large")
            },
        };
        self.space_used.fetch_add(layout.size(), Relaxed);
        ptr
    }

    /// Write a cleanup record for an object allocated elsewhere.
    ///
    /// # Safety
    ///
    /// Must be called on the owning thread.
    /// The record must describe a live object of the arena's lifetime.
    pub unsafe fn push_cleanup(&self, record: Record)
    {
        let size = record.size();
        let at = self.reserve_cleanup(size, 0, ARENA_ALIGN_DEFAULT);
        record.write(at.as_ptr());
    }

    /// Reserve a cleanup record with an embedded object of `layout`.
    ///
    /// Returns where the object goes.
    /// Alignments above 16 are not supported.
    ///
    /// # Safety
    ///
    /// Must be called on the owning thread.
    /// The caller must initialize the object before the arena drops.
    pub unsafe fn push_embedded(&self, layout: Layout, dtor: Destructor) -> NonNull<u8>
    {
        debug_assert!(layout.align() <= 2 * ARENA_ALIGN_DEFAULT);
        let size = round_up(layout.size(), ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate an object this large");
        let record = Record::Dynamic(size, dtor);
        let at = self.reserve_cleanup(record.size(), DYNAMIC_HEADER, layout.align());
        record.write(at.as_ptr());
        NonNull::new_unchecked(at.as_ptr().add(DYNAMIC_HEADER))
    }

    /// Reserve `size` bytes of cleanup records such that
    /// the byte at `offset` within them is `align`-aligned.
    unsafe fn reserve_cleanup(&self, size: usize, offset: usize, align: usize) -> NonNull<u8>
    {
        let state = self.state();
        let padding = align.saturating_sub(ARENA_ALIGN_DEFAULT);
        let need = size + padding;

        if !matches!(&state.head, Some(b) if b.remaining() >= need) {
            self.new_block(state, need);
        }
        let block = state.head.as_deref_mut()
            .expect("a block with room was just ensured");

        let (limit, _) = block.cleanup_region();
        if (limit as usize - size + offset) % align != 0 {
            let pad = Record::Padding(padding);
            let at = block.try_push_cleanup(pad.size())
                .expect("reserved room for padding");
            pad.write(at.as_ptr());
        }
        let at = block.try_push_cleanup(size)
            .expect("reserved room for record");

        self.space_used.fetch_add(size, Relaxed);
        at
    }

    fn new_block<'s>(&self, state: &'s mut SerialState, need: usize) -> &'s mut Block
    {
        let size = state.options.next_block_size(state.last_block_size)
            .max(need);
        let mut block = Block::new(size);
        tracing::trace!(size = block.len(), "allocated arena block");

        state.last_block_size = block.len();
        self.space_allocated.fetch_add(block.len(), Relaxed);

        block.next = state.head.take();
        &mut **state.head.insert(block)
    }

    /// Allocate a buffer for at least `bytes` bytes of array elements,
    /// reusing a donated buffer if one is cached.
    ///
    /// # Safety
    ///
    /// Must be called on the owning thread.
    pub unsafe fn allocate_array(&self, bytes: usize) -> NonNull<u8>
    {
        let bucket = ArrayCache::bucket_for_request(bytes);
        if let Some(buffer) = self.state().array_cache.pop(bucket) {
            return buffer;
        }
        let size = ArrayCache::bucket_size(bucket);
        let layout = Layout::from_size_align(size, ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate an array this large");
        self.allocate(layout)
    }

    /// Return an array buffer to the cache.
    ///
    /// # Safety
    ///
    /// Must be called on the owning thread.
    /// The buffer must have come from this arena, hold `bytes` bytes,
    /// and not be used afterwards.
    pub unsafe fn donate_array(&self, buffer: NonNull<u8>, bytes: usize)
    {
        if let Some(bucket) = ArrayCache::bucket_for_return(bytes) {
            self.state().array_cache.push(bucket, buffer);
        }
    }

    /// Run every cleanup record, newest first.
    ///
    /// Returns the number of destructors called.
    ///
    /// # Safety
    ///
    /// No other thread may use the serial arena,
    /// and objects with cleanups are dead afterwards.
    pub unsafe fn run_cleanups(&self) -> usize
    {
        let mut calls = 0;
        let mut block = self.state().head.as_deref_mut();
        while let Some(b) = block {
            let (start, end) = b.cleanup_region();
            calls += cleanup::run(start, end);
            b.clear();
            block = b.next.as_deref_mut();
        }
        calls
    }

    /// Free every block but the first and empty it.
    ///
    /// # Safety
    ///
    /// Cleanups must have run.
    pub unsafe fn reset_to_first_block(&self)
    {
        let state = self.state();
        let mut blocks = state.head.take();
        let mut first = None;
        while let Some(mut block) = blocks {
            blocks = block.next.take();
            first = Some(block);
        }
        if let Some(block) = &mut first {
            block.clear();
        }

        let allocated = first.as_ref().map_or(0, |b| b.len());
        state.head = first;
        state.array_cache.clear();
        state.last_block_size = allocated;
        self.space_used.store(0, Relaxed);
        self.space_allocated.store(allocated, Relaxed);
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::cleanup::drop_erased, std::rc::Rc};

    #[test]
    fn grows_new_blocks()
    {
        let options = ArenaOptions{start_block_size: 64, max_block_size: 256};
        let serial = SerialArena::new(1, options, None);
        let layout = Layout::from_size_align(48, 8).unwrap();
        unsafe {
            for _ in 0 .. 10 {
                serial.allocate(layout);
            }
        }
        assert_eq!(serial.space_used(), 480);
        assert!(serial.space_allocated() >= 480);
    }

    #[test]
    fn embedded_alignment()
    {
        let serial = SerialArena::new(1, ArenaOptions::default(), None);
        unsafe fn nothing(_: *mut u8) { }
        for align in [1, 2, 4, 8, 16] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let p = unsafe { serial.push_embedded(layout, nothing) };
            assert_eq!(p.as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn cleanups_then_reset()
    {
        let counter = Rc::new(());
        let serial = SerialArena::new(1, ArenaOptions{start_block_size: 64, max_block_size: 64}, None);
        unsafe {
            for _ in 0 .. 20 {
                let layout = Layout::new::<Rc<()>>();
                let p = serial.push_embedded(layout, drop_erased::<Rc<()>>);
                p.as_ptr().cast::<Rc<()>>().write(counter.clone());
            }
            assert_eq!(Rc::strong_count(&counter), 21);
            assert_eq!(serial.run_cleanups(), 20);
            serial.reset_to_first_block();
        }
        assert_eq!(Rc::strong_count(&counter), 1);
        assert_eq!(serial.space_used(), 0);
        assert_eq!(serial.space_allocated(), 64);
    }
}
