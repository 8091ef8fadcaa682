use thiserror::Error;

/// Result of runtime operations.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned by runtime operations.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error
{
    #[error("Unterminated or overlong varint")]
    MalformedVarint,

    #[error("Length-delimited field runs past its enclosing frame")]
    MalformedDelimited,

    #[error("Nesting limit exceeded")]
    DepthExceeded,

    #[error("Invalid tag: field number 0 or reserved wire type")]
    InvalidTag,

    #[error("End-group tag does not match the open group")]
    MismatchedEndGroup,

    #[error("Input ended inside a message")]
    Truncated,

    #[error("Duplicate name {0:?}")]
    NameConflict(String),

    #[error("Duplicate field number {0}")]
    NumberConflict(u32),

    #[error("Definition already belongs to another parent")]
    OwnedElsewhere,

    #[error("Invalid name {0:?}")]
    InvalidName(String),

    #[error("Unresolved symbol {0:?}")]
    UnresolvedSymbol(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Allocation failed")]
    AllocFailed,

    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Set of definitions to freeze is not closed under references")]
    ClosureIncomplete,

    #[error("Object is frozen")]
    Frozen,

    #[error("Handler closure type does not match the closure at its selector")]
    ClosureTypeMismatch,

    #[error("Object is not frozen")]
    NotFrozen,

    #[error("Too many objects to freeze at once")]
    TooManyObjects,

    #[error("Decoder program too large for its instruction encoding")]
    ProgramTooLarge,
}

impl Error
{
    /// Numeric code of the error within [`RIME_ERRORS`].
    ///
    /// [`RIME_ERRORS`]: `crate::RIME_ERRORS`
    pub fn code(&self) -> i32
    {
        match self {
            Error::MalformedVarint    => 1,
            Error::MalformedDelimited => 2,
            Error::DepthExceeded      => 3,
            Error::InvalidTag         => 4,
            Error::MismatchedEndGroup => 5,
            Error::Truncated          => 6,
            Error::NameConflict(_)    => 7,
            Error::NumberConflict(_)  => 8,
            Error::OwnedElsewhere     => 9,
            Error::InvalidName(_)     => 10,
            Error::UnresolvedSymbol(_) => 11,
            Error::InvalidField(_)    => 12,
            Error::AllocFailed        => 13,
            Error::HandlerError(_)    => 14,
            Error::ClosureIncomplete  => 15,
            Error::Frozen             => 16,
            Error::ClosureTypeMismatch => 17,
            Error::NotFrozen          => 18,
            Error::TooManyObjects     => 19,
            Error::ProgramTooLarge    => 20,
        }
    }
}

impl From<rime_table::Error> for Error
{
    fn from(other: rime_table::Error) -> Self
    {
        match other {
            rime_table::Error::AllocFailed => Error::AllocFailed,
            // Callers check for duplicates before inserting,
            // so this only surfaces for keys without a name.
            rime_table::Error::KeyExists => Error::NameConflict(String::new()),
        }
    }
}
