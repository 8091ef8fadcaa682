//! Cleanup records.
//!
//! Records live at the top of each block and are written downward,
//! so walking a block's cleanup region from low to high addresses
//! visits the most recent record first.
//!
//! The first word of every record identifies its shape:
//!
//! | First word           | Words | Meaning                                         |
//! |----------------------|-------|-------------------------------------------------|
//! | `0`                  | 1     | Padding.                                        |
//! | `ptr \| STRING`      | 1     | Drop the `String` at `ptr`.                     |
//! | `ptr \| MICRO`       | 1     | Drop the [`MicroString`] at `ptr`.              |
//! | `ptr \| DYN_POINTER` | 2     | Call the destructor in word 1 on `ptr`.         |
//! | `size << 2 \| DYN`   | 2 + n | Object of `size` bytes embedded after the header; call the destructor in word 1 on it, or skip it if the destructor is null. |
//!
//! [`MicroString`]: `crate::MicroString`

use {
    crate::{ARENA_ALIGN_DEFAULT, MicroString},
    std::{mem::size_of, ptr},
};

/// Type-erased destructor.
pub type Destructor = unsafe fn(*mut u8);

const TAG_MASK: usize = 0b11;
const TAG_DYNAMIC: usize = 0;
const TAG_STRING: usize = 1;
const TAG_MICRO_STRING: usize = 2;
const TAG_DYNAMIC_POINTER: usize = 3;

const WORD: usize = size_of::<usize>();

/// Size of the header of a dynamic record.
pub (crate) const DYNAMIC_HEADER: usize = 2 * WORD;

/// Drop a `T` through a type-erased pointer.
///
/// # Safety
///
/// `p` must point to a valid `T` that is not used afterwards.
pub unsafe fn drop_erased<T>(p: *mut u8)
{
    ptr::drop_in_place(p.cast::<T>());
}

/// Shapes of records the arena writes.
#[derive(Clone, Copy)]
pub (crate) enum Record
{
    String(*mut String),
    MicroString(*mut MicroString<'static>),
    DynamicPointer(*mut u8, Destructor),

    /// Header of an embedded object of the given size.
    /// The object follows the header.
    Dynamic(usize, Destructor),

    /// Skip this many bytes.
    Padding(usize),
}

impl Record
{
    /// Bytes occupied by the record, including any embedded object.
    pub fn size(&self) -> usize
    {
        match self {
            Record::String(..) | Record::MicroString(..) => WORD,
            Record::DynamicPointer(..) => 2 * WORD,
            Record::Dynamic(size, _) => DYNAMIC_HEADER + size,
            Record::Padding(size) => *size,
        }
    }

    /// Write the record header at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be word-aligned and have room for [`size`] bytes.
    /// Pointers stored in tagged words must be at least 4-aligned.
    ///
    /// [`size`]: `Self::size`
    pub unsafe fn write(self, at: *mut u8)
    {
        let words = at.cast::<usize>();
        match self {
            Record::String(p) =>
                words.write(tagged(p.cast(), TAG_STRING)),
            Record::MicroString(p) =>
                words.write(tagged(p.cast(), TAG_MICRO_STRING)),
            Record::DynamicPointer(p, dtor) => {
                words.write(tagged(p, TAG_DYNAMIC_POINTER));
                words.add(1).write(dtor as usize);
            },
            Record::Dynamic(size, dtor) => {
                debug_assert_eq!(size % ARENA_ALIGN_DEFAULT, 0);
                words.write(size << 2 | TAG_DYNAMIC);
                words.add(1).write(dtor as usize);
            },
            Record::Padding(size) => {
                if size == WORD {
                    words.write(0);
                } else {
                    // A dynamic record with a null destructor.
                    words.write((size - DYNAMIC_HEADER) << 2 | TAG_DYNAMIC);
                    words.add(1).write(0);
                }
            },
        }
    }
}

fn tagged(p: *mut u8, tag: usize) -> usize
{
    let addr = p as usize;
    debug_assert_eq!(addr & TAG_MASK, 0, "cleanup object is under-aligned");
    addr | tag
}

/// Run every record in `[start, end)`, lowest address first.
///
/// Returns the number of destructors called.
///
/// # Safety
///
/// The region must consist of records written by [`Record::write`],
/// whose objects are still alive. They are dead afterwards.
pub (crate) unsafe fn run(start: *mut u8, end: *mut u8) -> usize
{
    let mut calls = 0;
    let mut p = start;
    while p < end {
        let words = p.cast::<usize>();
        let first = words.read();
        if first == 0 {
            p = p.add(WORD);
            continue;
        }
        let object = (first & !TAG_MASK) as *mut u8;
        match first & TAG_MASK {
            TAG_STRING => {
                ptr::drop_in_place(object.cast::<String>());
                calls += 1;
                p = p.add(WORD);
            },
            TAG_MICRO_STRING => {
                ptr::drop_in_place(object.cast::<MicroString<'static>>());
                calls += 1;
                p = p.add(WORD);
            },
            TAG_DYNAMIC_POINTER => {
                let dtor: Destructor = std::mem::transmute(words.add(1).read());
                dtor(object);
                calls += 1;
                p = p.add(2 * WORD);
            },
            _ => {
                let size = first >> 2;
                let dtor = words.add(1).read();
                if dtor != 0 {
                    let dtor: Destructor = std::mem::transmute(dtor);
                    dtor(p.add(DYNAMIC_HEADER));
                    calls += 1;
                }
                p = p.add(DYNAMIC_HEADER + size);
            },
        }
    }
    calls
}
