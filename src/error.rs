use std::{fmt, io, result};

/// Result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

/// Error taxonomy for the binary B+tree engine.
///
/// Every fallible operation in this crate returns one of these variants.
/// `RollbackError` is special: it is attached to the error that triggered
/// a transaction rollback (see [crate::txn]) when the rollback itself also
/// fails, so callers can see both failures.
#[derive(Debug)]
pub enum Error {
    /// A key or metadata value could not be encoded: wrong type, or a
    /// string/record-pointer longer than 255 bytes.
    EncodingError(String),
    /// `add()` on a unique-keys tree attempted to insert a key that is
    /// already present.
    DuplicateKey(String),
    /// `update()` or `find()` could not locate the requested key.
    KeyNotFound(String),
    /// `update()` or `remove()` on a non-unique tree could not find a
    /// value matching the supplied record pointer.
    ValueNotFound(String),
    /// A leaf body, ext_data block, or the file-level free-space tail is
    /// exhausted and auto-grow is disabled (or inapplicable).
    NoSpace(String),
    /// A relative offset exceeds the magnitude representable in its
    /// encoded width (31-bit or 47-bit signed).
    OffsetOverflow(i64),
    /// The allocator's reclaimed-region bookkeeping exceeds 50% of the
    /// original file length; a full rebuild is overdue.
    RebuildRequired(String),
    /// A named lock could not be acquired before its timeout elapsed.
    LockTimeout(String),
    /// The byte source was read past its logical end.
    Eof(String),
    /// The underlying byte source (file or buffer) failed.
    IoError(io::Error),
    /// A read returned fewer bytes than requested.
    PartialRead(String, usize, usize),
    /// A write persisted fewer bytes than requested.
    PartialWrite(String, usize, usize),
    /// An on-disk structure failed a basic sanity check (bad flag byte,
    /// truncated header, corrupt marker, ...).
    InvalidFormat(String),
    /// A worker thread used by the transaction engine or streaming
    /// builder panicked or disconnected its channel.
    ThreadFail(String),
    /// Rollback, triggered by the wrapped original error, itself failed.
    RollbackError(Box<Error>, Box<Error>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EncodingError(msg) => write!(f, "encoding error: {}", msg),
            Error::DuplicateKey(key) => write!(f, "duplicate key: {}", key),
            Error::KeyNotFound(key) => write!(f, "key not found: {}", key),
            Error::ValueNotFound(key) => write!(f, "value not found for key: {}", key),
            Error::NoSpace(msg) => write!(f, "no space: {}", msg),
            Error::OffsetOverflow(n) => write!(f, "offset overflow: {}", n),
            Error::RebuildRequired(msg) => write!(f, "rebuild required: {}", msg),
            Error::LockTimeout(name) => write!(f, "lock timeout: {}", name),
            Error::Eof(msg) => write!(f, "eof: {}", msg),
            Error::IoError(err) => write!(f, "io error: {}", err),
            Error::PartialRead(msg, want, got) => {
                write!(f, "partial read: {} {}/{}", msg, got, want)
            }
            Error::PartialWrite(msg, want, got) => {
                write!(f, "partial write: {} {}/{}", msg, got, want)
            }
            Error::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Error::ThreadFail(msg) => write!(f, "thread failure: {}", msg),
            Error::RollbackError(original, rollback) => write!(
                f,
                "rollback failed: {} (while recovering from: {})",
                rollback, original
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::RollbackError(_, rollback) => Some(rollback.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl Error {
    /// Attach a rollback-time failure to the error that caused the
    /// rollback, per §4.J / §7 of the design: both failures must remain
    /// visible to the caller.
    pub fn with_rollback_failure(self, rollback_err: Error) -> Error {
        Error::RollbackError(Box::new(self), Box::new(rollback_err))
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;
