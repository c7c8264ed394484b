//! Structured error kinds for change-list dispatch, lowered to `io::Error`
//! at the public boundary so the crate's surface stays `io::Result`-only,
//! matching the teacher crate's convention.

use std::fmt;
use std::io;

/// A discriminated reason a single change was rejected. Kept distinct from
/// `io::Error` internally so dispatch code can match on *why* before
/// deciding whether to echo an `EV_ERROR` receipt or bail out of the whole
/// submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// `change.filter` did not name one of the seven supported filters.
    InvalidFilter,
    /// `EV_ADD` was not accompanied by any recognizable flag.
    InvalidFlags,
    /// `EV_DELETE`/`EV_ENABLE`/`EV_DISABLE` targeted a `(filter, ident)`
    /// with no knote.
    NoSuchEntry,
    /// A filter-specific kernel resource could not be allocated.
    Os(i32),
}

impl QueueError {
    /// The errno BSD kqueue would report for this condition.
    pub fn errno(&self) -> i32 {
        match *self {
            QueueError::InvalidFilter => libc::EINVAL,
            QueueError::InvalidFlags => libc::EINVAL,
            QueueError::NoSuchEntry => libc::ENOENT,
            QueueError::Os(errno) => errno,
        }
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QueueError::InvalidFilter => write!(f, "no such filter"),
            QueueError::InvalidFlags => write!(f, "invalid combination of flags"),
            QueueError::NoSuchEntry => write!(f, "no such entry"),
            QueueError::Os(errno) => {
                write!(f, "{}", io::Error::from_raw_os_error(errno))
            }
        }
    }
}

impl std::error::Error for QueueError {}

impl From<QueueError> for io::Error {
    fn from(err: QueueError) -> io::Error {
        io::Error::from_raw_os_error(err.errno())
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> QueueError {
        QueueError::Os(err.raw_os_error().unwrap_or(libc::EIO))
    }
}
