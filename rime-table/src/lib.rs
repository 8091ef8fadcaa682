//! Hash tables backing every registry of the runtime.
//!
//! [`IntTable`] maps integer keys to values
//! and keeps small keys in a dense array part.
//! [`StrTable`] maps string keys to values.
//! Both share the same chained scatter core.
//!
//! Values are homogeneous per table by construction:
//! the value type is a type parameter.

#![warn(missing_docs)]

pub use self::{hash::*, int_table::*, str_table::*};

use thiserror::Error;

mod hash;
mod int_table;
mod scatter;
mod str_table;

/// Result of table operations.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned by table operations.
///
/// A failed operation leaves the table unchanged.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error
{
    #[error("Key already present in table")]
    KeyExists,

    #[error("Allocation failed while growing table")]
    AllocFailed,
}
