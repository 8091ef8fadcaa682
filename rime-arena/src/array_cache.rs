use {
    smallvec::SmallVec,
    std::ptr::NonNull,
};

/// Smallest buffer the cache keeps, large enough for the freelist link.
pub const MIN_ARRAY_BYTES: usize = 16;

/// Freelists of reclaimed array buffers, bucketed by power-of-two size.
///
/// Bucket `i` holds buffers of at least `MIN_ARRAY_BYTES << i` bytes.
/// Each free buffer stores the next buffer of its bucket in its first word.
pub (crate) struct ArrayCache
{
    buckets: SmallVec<[Option<NonNull<u8>>; 8]>,
}

impl ArrayCache
{
    pub fn new() -> Self
    {
        Self{buckets: SmallVec::new()}
    }

    /// Bucket that satisfies a request of `bytes`.
    pub fn bucket_for_request(bytes: usize) -> usize
    {
        let size = bytes.max(MIN_ARRAY_BYTES).next_power_of_two();
        (size.trailing_zeros() - MIN_ARRAY_BYTES.trailing_zeros()) as usize
    }

    /// Bucket that a returned buffer of `bytes` can serve,
    /// or [`None`] if it is too small to keep.
    pub fn bucket_for_return(bytes: usize) -> Option<usize>
    {
        if bytes < MIN_ARRAY_BYTES {
            return None;
        }
        let floor = usize::BITS - 1 - bytes.leading_zeros();
        Some((floor - MIN_ARRAY_BYTES.trailing_zeros()) as usize)
    }

    /// Size in bytes of the buffers in a bucket.
    pub fn bucket_size(bucket: usize) -> usize
    {
        MIN_ARRAY_BYTES << bucket
    }

    /// Take a buffer from a bucket.
    pub fn pop(&mut self, bucket: usize) -> Option<NonNull<u8>>
    {
        let slot = self.buckets.get_mut(bucket)?;
        let head = (*slot)?;
        // SAFETY: Free buffers store their successor in the first word.
        let next = unsafe { head.as_ptr().cast::<Option<NonNull<u8>>>().read() };
        *slot = next;
        Some(head)
    }

    /// Return a buffer to a bucket.
    ///
    /// # Safety
    ///
    /// The buffer must be at least [`bucket_size`] bytes,
    /// word-aligned, and not used by anything else.
    ///
    /// [`bucket_size`]: `Self::bucket_size`
    pub unsafe fn push(&mut self, bucket: usize, buffer: NonNull<u8>)
    {
        if bucket >= self.buckets.len() {
            self.buckets.resize(bucket + 1, None);
        }
        buffer.as_ptr().cast::<Option<NonNull<u8>>>().write(self.buckets[bucket]);
        self.buckets[bucket] = Some(buffer);
    }

    /// Forget every buffer.
    ///
    /// Used when the blocks holding them are released.
    pub fn clear(&mut self)
    {
        self.buckets.clear();
    }
}
