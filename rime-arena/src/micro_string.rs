//! Compact byte strings for arena-owned messages.
//!
//! A [`MicroString`] picks the cheapest representation for its payload.
//! Short payloads live inline, in the string itself.
//! Longer payloads live in buffers allocated from an [`Arena`],
//! and very long payloads in a heap vector to amortize the header.

use {
    crate::{Arena, block::round_up, ARENA_ALIGN_DEFAULT},
    std::{fmt, marker::PhantomData, ptr::NonNull, slice},
};

/// Number of bytes stored inline.
///
/// One word minus the length byte on 64-bit little-endian targets.
/// Other targets only store the empty string inline.
pub const INLINE_CAPACITY: usize =
    if cfg!(all(target_pointer_width = "64", target_endian = "little")) { 7 } else { 0 };

/// Payloads at least this long are kept in a heap vector.
pub const STRING_THRESHOLD: usize = 1024;

/// Largest payload of the micro representation.
const MICRO_MAX: usize = u8::MAX as usize;

/// Byte string whose buffers are owned by an arena.
///
/// Dropping the string frees the heap vector of the [`String`] representation.
/// Arena buffers are freed with the arena.
///
/// [`String`]: `RepKind::String`
pub struct MicroString<'a>
{
    rep: Rep<'a>,
}

/// Which representation a [`MicroString`] uses.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RepKind
{
    Inline,
    Micro,
    Owned,
    Alias,
    String,
    Unowned,
}

enum Rep<'a>
{
    Inline{len: u8, bytes: [u8; INLINE_CAPACITY]},
    Micro{ptr: NonNull<u8>, len: u8, capacity: u8, arena: PhantomData<&'a ()>},
    Owned{ptr: NonNull<u8>, len: u32, capacity: u32, arena: PhantomData<&'a ()>},
    Alias(&'a [u8]),
    String(Vec<u8>),
    Unowned(&'static [u8]),
}

impl<'a> MicroString<'a>
{
    /// The empty string.
    pub const fn new() -> Self
    {
        Self{rep: Rep::Inline{len: 0, bytes: [0; INLINE_CAPACITY]}}
    }

    /// String backed by immortal, immutable memory.
    ///
    /// Used for default values; assigning it to another string
    /// shares the memory instead of copying it.
    pub const fn unowned(bytes: &'static [u8]) -> Self
    {
        Self{rep: Rep::Unowned(bytes)}
    }

    /// The representation in use.
    pub fn kind(&self) -> RepKind
    {
        match self.rep {
            Rep::Inline{..}  => RepKind::Inline,
            Rep::Micro{..}   => RepKind::Micro,
            Rep::Owned{..}   => RepKind::Owned,
            Rep::Alias(_)    => RepKind::Alias,
            Rep::String(_)   => RepKind::String,
            Rep::Unowned(_)  => RepKind::Unowned,
        }
    }

    /// The payload.
    pub fn as_bytes(&self) -> &[u8]
    {
        match &self.rep {
            Rep::Inline{len, bytes} => &bytes[.. *len as usize],
            // SAFETY: The arena outlives 'a and the buffer holds len bytes.
            Rep::Micro{ptr, len, ..} =>
                unsafe { slice::from_raw_parts(ptr.as_ptr(), *len as usize) },
            Rep::Owned{ptr, len, ..} =>
                unsafe { slice::from_raw_parts(ptr.as_ptr(), *len as usize) },
            Rep::Alias(bytes) => bytes,
            Rep::String(vec) => vec,
            Rep::Unowned(bytes) => bytes,
        }
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize
    {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Bytes the current buffer can hold without reallocating.
    ///
    /// Aliased and unowned strings are immutable and report their length.
    pub fn capacity(&self) -> usize
    {
        match &self.rep {
            Rep::Inline{..} => INLINE_CAPACITY,
            Rep::Micro{capacity, ..} => *capacity as usize,
            Rep::Owned{capacity, ..} => *capacity as usize,
            Rep::String(vec) => vec.capacity(),
            Rep::Alias(bytes) | Rep::Unowned(bytes) => bytes.len(),
        }
    }

    /// Copy `bytes` into the string.
    ///
    /// The current buffer is reused if it is large enough.
    /// Otherwise the cheapest representation for the payload is chosen.
    pub fn set(&mut self, bytes: &[u8], arena: &'a Arena<'_>)
    {
        if self.try_overwrite(bytes) {
            return;
        }
        self.rep = Self::fresh(bytes, arena);
    }

    /// Make the string refer to caller-owned memory.
    ///
    /// Copies of the string copy the bytes.
    pub fn set_alias(&mut self, bytes: &'a [u8])
    {
        self.rep = Rep::Alias(bytes);
    }

    /// Take ownership of a heap vector.
    ///
    /// Vectors shorter than [`STRING_THRESHOLD`] are copied instead.
    pub fn set_vec(&mut self, vec: Vec<u8>, arena: &'a Arena<'_>)
    {
        if vec.len() >= STRING_THRESHOLD {
            self.rep = Rep::String(vec);
        } else {
            self.set(&vec, arena);
        }
    }

    /// Copy the payload of `other`.
    ///
    /// Unowned strings are shared rather than copied.
    pub fn assign(&mut self, other: &MicroString<'_>, arena: &'a Arena<'_>)
    {
        match other.rep {
            Rep::Unowned(bytes) => self.rep = Rep::Unowned(bytes),
            _ => self.set(other.as_bytes(), arena),
        }
    }

    /// Overwrite the payload in place if the buffer is mutable and fits.
    fn try_overwrite(&mut self, new: &[u8]) -> bool
    {
        match &mut self.rep {
            Rep::Inline{len, bytes} if new.len() <= INLINE_CAPACITY => {
                bytes[.. new.len()].copy_from_slice(new);
                *len = new.len() as u8;
            },
            Rep::Micro{ptr, len, capacity, ..} if new.len() <= *capacity as usize => {
                // SAFETY: The buffer holds capacity bytes and cannot overlap new,
                //         since new is borrowed while self is borrowed mutably.
                unsafe { ptr.as_ptr().copy_from_nonoverlapping(new.as_ptr(), new.len()) };
                *len = new.len() as u8;
            },
            Rep::Owned{ptr, len, capacity, ..} if new.len() <= *capacity as usize => {
                // SAFETY: As above.
                unsafe { ptr.as_ptr().copy_from_nonoverlapping(new.as_ptr(), new.len()) };
                *len = new.len() as u32;
            },
            Rep::String(vec) if new.len() <= vec.capacity() => {
                vec.clear();
                vec.extend_from_slice(new);
            },
            _ => return false,
        }
        true
    }

    fn fresh(bytes: &[u8], arena: &'a Arena<'_>) -> Rep<'a>
    {
        let n = bytes.len();
        if n <= INLINE_CAPACITY {
            let mut inline = [0; INLINE_CAPACITY];
            inline[.. n].copy_from_slice(bytes);
            return Rep::Inline{len: n as u8, bytes: inline};
        }
        if n >= STRING_THRESHOLD {
            return Rep::String(bytes.to_vec());
        }

        let capacity = round_up(n, ARENA_ALIGN_DEFAULT)
            .expect("Cannot allocate a string this large");
        let ptr = arena.allocate(capacity);
        // SAFETY: The buffer holds capacity >= n bytes.
        unsafe { ptr.as_ptr().copy_from_nonoverlapping(bytes.as_ptr(), n) };

        if n <= MICRO_MAX {
            let capacity = capacity.min(MICRO_MAX) as u8;
            Rep::Micro{ptr, len: n as u8, capacity, arena: PhantomData}
        } else {
            Rep::Owned{ptr, len: n as u32, capacity: capacity as u32, arena: PhantomData}
        }
    }
}

impl Default for MicroString<'_>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl fmt::Debug for MicroString<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("MicroString")
            .field("kind", &self.kind())
            .field("bytes", &self.as_bytes().escape_ascii().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn cheapest_rep()
    {
        let arena = Arena::new();
        let mut s = MicroString::new();
        assert_eq!(s.kind(), RepKind::Inline);

        s.set(&[b'x'; 200], &arena);
        assert_eq!(s.kind(), RepKind::Micro);

        s.set(&[b'y'; 600], &arena);
        assert_eq!(s.kind(), RepKind::Owned);

        s.set(&[b'z'; 2000], &arena);
        assert_eq!(s.kind(), RepKind::String);
        assert_eq!(s.as_bytes(), &[b'z'; 2000][..]);
    }

    #[test]
    fn setter_reuses_buffer()
    {
        let arena = Arena::new();
        let mut s = MicroString::new();
        s.set(&[b'x'; 600], &arena);
        let used = arena.space_used();
        s.set(b"hello, world", &arena);
        assert_eq!(s.kind(), RepKind::Owned);
        assert_eq!(s.as_bytes(), b"hello, world");
        assert_eq!(arena.space_used(), used);
    }

    #[test]
    fn unowned_propagates()
    {
        let default = MicroString::unowned(b"default value");
        let arena = Arena::new();
        let mut s = MicroString::new();
        s.assign(&default, &arena);
        assert_eq!(s.kind(), RepKind::Unowned);
        assert_eq!(s.as_bytes().as_ptr(), default.as_bytes().as_ptr());
    }

    #[test]
    fn alias_copies_on_assign()
    {
        let arena = Arena::new();
        let backing = b"borrowed bytes".to_vec();
        let mut a = MicroString::new();
        a.set_alias(&backing);
        assert_eq!(a.kind(), RepKind::Alias);

        let mut b = MicroString::new();
        b.assign(&a, &arena);
        assert_ne!(b.kind(), RepKind::Alias);
        assert_eq!(b.as_bytes(), &backing[..]);
    }

    proptest!
    {
        #[test]
        fn set_then_read(writes in proptest::collection::vec(
            proptest::collection::vec(proptest::num::u8::ANY, 0 .. 1500), 1 .. 8))
        {
            let arena = Arena::new();
            let mut s = MicroString::new();
            for bytes in &writes {
                s.set(bytes, &arena);
                assert_eq!(s.as_bytes(), &bytes[..]);
                assert!(s.capacity() >= s.len());
            }
        }
    }
}
