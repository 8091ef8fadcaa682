//! Hash functions for table keys.

/// MurmurHash2, 32-bit, by Austin Appleby.
///
/// Reads the key in little-endian 4-byte words
/// so that the result does not depend on the host.
pub fn murmur_hash2(key: &[u8], seed: u32) -> u32
{
    const M: u32 = 0x5bd1e995;
    const R: u32 = 24;

    let mut h = seed ^ key.len() as u32;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 { h ^= (tail[2] as u32) << 16; }
    if tail.len() >= 2 { h ^= (tail[1] as u32) << 8; }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Hash an integer key.
#[inline]
pub fn int_hash(key: u64) -> u32
{
    (key ^ (key >> 32)) as u32
}

/// Hash a string key with seed zero.
#[inline]
pub fn str_hash(key: &str) -> u32
{
    murmur_hash2(key.as_bytes(), 0)
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn empty_key()
    {
        assert_eq!(murmur_hash2(b"", 0), 0);
    }

    proptest!
    {
        #[test]
        fn deterministic(key: Vec<u8>, seed: u32)
        {
            assert_eq!(murmur_hash2(&key, seed), murmur_hash2(&key, seed));
        }

        #[test]
        fn tail_bytes_matter(key: Vec<u8>, last: u8)
        {
            let mut a = key.clone();
            let mut b = key;
            a.push(last);
            b.push(last.wrapping_add(1));
            // Same length, one differing byte in the tail or last word.
            assert_ne!(murmur_hash2(&a, 0), murmur_hash2(&b, 0));
        }
    }
}
