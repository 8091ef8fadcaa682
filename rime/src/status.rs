use {
    crate::{Error, Result},
    std::fmt::{self, Write},
};

/// Capacity of the message buffer of a [`Status`].
pub const STATUS_MAX_MESSAGE: usize = 128;

/// Named space of error codes.
#[derive(Debug)]
pub struct ErrorSpace
{
    /// Name of the space, for messages.
    pub name: &'static str,
}

/// Error space of [`Error::code`].
pub static RIME_ERRORS: ErrorSpace = ErrorSpace{name: "rime"};

/// Fixed-size error carrier.
///
/// Handlers report errors by writing them into a status.
/// A status never allocates; messages longer than
/// [`STATUS_MAX_MESSAGE`] bytes are truncated.
#[derive(Clone)]
pub struct Status
{
    ok: bool,
    code: i32,
    space: Option<&'static ErrorSpace>,
    len: u8,
    message: [u8; STATUS_MAX_MESSAGE],
}

impl Status
{
    /// A successful status.
    pub const fn new() -> Self
    {
        Self{ok: true, code: 0, space: None, len: 0, message: [0; STATUS_MAX_MESSAGE]}
    }

    /// Whether no error was recorded.
    pub fn ok(&self) -> bool
    {
        self.ok
    }

    /// Code of the recorded error, or zero.
    pub fn code(&self) -> i32
    {
        self.code
    }

    /// Space of the recorded error code.
    pub fn space(&self) -> Option<&'static ErrorSpace>
    {
        self.space
    }

    /// The recorded message, possibly truncated.
    pub fn message(&self) -> &str
    {
        // Writes only ever truncate at character boundaries.
        std::str::from_utf8(&self.message[.. self.len as usize])
            .unwrap_or_default()
    }

    /// Record an error with a code in `space`.
    pub fn set(&mut self, space: &'static ErrorSpace, code: i32, message: fmt::Arguments)
    {
        self.ok = false;
        self.code = code;
        self.space = Some(space);
        self.len = 0;
        let _ = self.write_fmt(message);
    }

    /// Record an error without a code, as handlers do.
    pub fn set_message(&mut self, message: &str)
    {
        self.set(&RIME_ERRORS, Error::HandlerError(String::new()).code(), format_args!("{message}"));
    }

    /// Record a runtime error.
    pub fn set_error(&mut self, error: &Error)
    {
        self.set(&RIME_ERRORS, error.code(), format_args!("{error}"));
    }

    /// Forget any recorded error.
    pub fn clear(&mut self)
    {
        *self = Self::new();
    }

    /// Convert the status into a result.
    ///
    /// Errors recorded from another space, or by a handler,
    /// become [`Error::HandlerError`] carrying the message.
    pub fn to_result(&self) -> Result<()>
    {
        if self.ok {
            return Ok(());
        }
        let is_ours = self.space.map_or(false, |s| std::ptr::eq(s, &RIME_ERRORS));
        let error = match self.code {
            1 if is_ours => Error::MalformedVarint,
            2 if is_ours => Error::MalformedDelimited,
            3 if is_ours => Error::DepthExceeded,
            4 if is_ours => Error::InvalidTag,
            5 if is_ours => Error::MismatchedEndGroup,
            6 if is_ours => Error::Truncated,
            _ => Error::HandlerError(self.message().to_owned()),
        };
        Err(error)
    }
}

impl Write for Status
{
    fn write_str(&mut self, s: &str) -> fmt::Result
    {
        let len = self.len as usize;
        let mut take = s.len().min(STATUS_MAX_MESSAGE - len);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.message[len .. len + take].copy_from_slice(&s.as_bytes()[.. take]);
        self.len = (len + take) as u8;
        Ok(())
    }
}

impl Default for Status
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl fmt::Debug for Status
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.ok {
            true => write!(f, "Status(ok)"),
            false => write!(
                f, "Status({}:{}, {:?})",
                self.space.map_or("?", |s| s.name), self.code, self.message(),
            ),
        }
    }
}
