use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    ptr::NonNull,
};

/// Alignment of every block and of every allocation by default.
pub const ARENA_ALIGN_DEFAULT: usize = 8;

/// Memory block owned or borrowed by a serial arena.
///
/// Objects are allocated from the bottom of the block upward.
/// Cleanup records are written from the top of the block downward.
/// The block is full when the two meet.
///
/// ```text
/// ptr                pos          limit             ptr + len
///  | objects ...      | free space  | cleanups ...    |
/// ```
pub (crate) struct Block
{
    ptr: NonNull<u8>,
    len: usize,

    /// `ptr`-relative offset of the next object, a multiple of
    /// [`ARENA_ALIGN_DEFAULT`].
    pos: usize,

    /// `ptr`-relative offset of the most recent cleanup record.
    limit: usize,

    /// Whether the memory was allocated by the arena.
    /// Donated memory is not freed.
    owned: bool,

    /// The block that was current before this one.
    pub (crate) next: Option<Box<Block>>,
}

impl Block
{
    /// Allocate a block of `len` bytes.
    pub fn new(len: usize) -> Box<Self>
    {
        let len = round_up(len.max(ARENA_ALIGN_DEFAULT), ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate a block this large");

        let layout = Layout::from_size_align(len, ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate a block this large");

        // SAFETY: len is non-zero.
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr)
            else { handle_alloc_error(layout) };

        Box::new(Self{ptr, len, pos: 0, limit: len, owned: true, next: None})
    }

    /// Wrap memory donated by the user.
    ///
    /// The start is rounded up to [`ARENA_ALIGN_DEFAULT`].
    /// Returns [`None`] if nothing usable remains after alignment.
    ///
    /// # Safety
    ///
    /// The memory must stay valid and unused by anything else
    /// for as long as the block exists.
    pub unsafe fn donated(ptr: NonNull<u8>, len: usize) -> Option<Box<Self>>
    {
        let skip = ptr.as_ptr().align_offset(ARENA_ALIGN_DEFAULT);
        let len = len.checked_sub(skip)? & !(ARENA_ALIGN_DEFAULT - 1);
        if len == 0 {
            return None;
        }
        let ptr = NonNull::new_unchecked(ptr.as_ptr().add(skip));
        Some(Box::new(Self{ptr, len, pos: 0, limit: len, owned: false, next: None}))
    }

    /// Number of bytes that make up the block.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Bytes between the allocation cursor and the cleanup records.
    pub fn remaining(&self) -> usize
    {
        self.limit - self.pos
    }

    /// Whether this block was donated by the user.
    pub fn is_donated(&self) -> bool
    {
        !self.owned
    }

    /// Allocate memory for an object within the block.
    ///
    /// The start of the object is rounded up to `layout.align()`
    /// and its end to [`ARENA_ALIGN_DEFAULT`].
    /// If the block has insufficient space,
    /// this method returns [`None`] and nothing changes.
    pub fn try_alloc(&mut self, layout: Layout) -> Option<NonNull<u8>>
    {
        let base = self.ptr.as_ptr() as usize;
        let start = round_up(base + self.pos, layout.align())? - base;
        let end = round_up(start.checked_add(layout.size())?, ARENA_ALIGN_DEFAULT)?;
        if end > self.limit {
            return None;
        }
        self.pos = end;
        // SAFETY: start is within the block.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(start)) })
    }

    /// Reserve `size` bytes for a cleanup record below the current limit.
    ///
    /// `size` must be a multiple of [`ARENA_ALIGN_DEFAULT`].
    pub fn try_push_cleanup(&mut self, size: usize) -> Option<NonNull<u8>>
    {
        debug_assert_eq!(size % ARENA_ALIGN_DEFAULT, 0);
        if size > self.remaining() {
            return None;
        }
        self.limit -= size;
        // SAFETY: limit is within the block.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(self.limit)) })
    }

    /// The region holding cleanup records, most recent first.
    pub fn cleanup_region(&self) -> (*mut u8, *mut u8)
    {
        // SAFETY: Both offsets are within the block.
        unsafe {
            (self.ptr.as_ptr().add(self.limit), self.ptr.as_ptr().add(self.len))
        }
    }

    /// Forget all objects and cleanup records.
    ///
    /// The caller must have run the cleanups first.
    pub fn clear(&mut self)
    {
        self.pos = 0;
        self.limit = self.len;
    }

    /// Whether `p` points into this block.
    pub fn contains(&self, p: *const u8) -> bool
    {
        let base = self.ptr.as_ptr() as usize;
        (base .. base + self.len).contains(&(p as usize))
    }
}

impl Drop for Block
{
    fn drop(&mut self)
    {
        // Unlink iteratively so long chains do not recurse.
        let mut next = self.next.take();
        while let Some(mut block) = next {
            next = block.next.take();
        }

        if self.owned {
            // SAFETY: This is the layout we allocated with.
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.len, ARENA_ALIGN_DEFAULT);
                dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

/// Round `n` up to a multiple of `align`, a power of two.
pub (crate) fn round_up(n: usize, align: usize) -> Option<usize>
{
    Some(n.checked_add(align - 1)? & !(align - 1))
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn donated_block_is_aligned()
    {
        let mut memory = [0u8; 100];
        let ptr = NonNull::new(memory.as_mut_ptr()).unwrap();
        let mut block = unsafe { Block::donated(ptr, memory.len()) }.unwrap();
        assert!(block.is_donated());
        let p = block.try_alloc(Layout::new::<u64>()).unwrap();
        assert_eq!(p.as_ptr() as usize % ARENA_ALIGN_DEFAULT, 0);
        assert!(block.contains(p.as_ptr()));
    }

    proptest!
    {
        #[test]
        fn allocations_meet_cleanups(sizes in proptest::collection::vec(0usize .. 64, 0 .. 64),
                                     cleanups in proptest::collection::vec(1usize .. 4, 0 .. 16))
        {
            let mut block = Block::new(1024);
            let mut objects = Vec::new();
            for &size in &sizes {
                if let Some(p) = block.try_alloc(Layout::from_size_align(size, 1).unwrap()) {
                    objects.push((p.as_ptr() as usize, size));
                }
            }
            let mut records = Vec::new();
            for &words in &cleanups {
                if let Some(p) = block.try_push_cleanup(words * 8) {
                    records.push(p.as_ptr() as usize);
                }
            }
            // Objects never overlap cleanup records.
            let (low, _) = block.cleanup_region();
            for &(start, size) in &objects {
                assert!(start + size <= low as usize);
                assert_eq!(start % ARENA_ALIGN_DEFAULT, 0);
            }
            // Records grow downward.
            for pair in records.windows(2) {
                assert!(pair[1] < pair[0]);
            }
        }

        #[test]
        fn over_aligned(align_lg2 in 0u32 .. 8, size in 0usize .. 100)
        {
            let mut block = Block::new(4096);
            block.try_alloc(Layout::from_size_align(3, 1).unwrap()).unwrap();
            let align = 1 << align_lg2;
            let layout = Layout::from_size_align(size, align).unwrap();
            let p = block.try_alloc(layout).unwrap();
            assert_eq!(p.as_ptr() as usize % align, 0);
        }
    }
}
