/// Allocation policy of an arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArenaOptions
{
    /// Size of the first block each serial arena allocates.
    pub start_block_size: usize,

    /// Blocks double in size up to this cap.
    /// Requests that do not fit get a block of their own size.
    pub max_block_size: usize,
}

impl ArenaOptions
{
    /// Size of the block that follows one of `prev` bytes.
    pub fn next_block_size(&self, prev: usize) -> usize
    {
        prev.saturating_mul(2).min(self.max_block_size).max(self.start_block_size)
    }
}

impl Default for ArenaOptions
{
    fn default() -> Self
    {
        Self{start_block_size: 256, max_block_size: 32 * 1024}
    }
}
