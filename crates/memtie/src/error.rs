use std::fmt;

use nix::errno::Errno;

use crate::{bridge::BridgeFunction, sys::Syscall};

/// Result type returned by every bridge operation.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the address/buffer bridge.
///
/// Each variant maps onto one host-level exception kind, so bindings can translate
/// without inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The function was called with the wrong number of arguments.
    Argument {
        function: BridgeFunction,
        expected: usize,
        actual: usize,
    },
    /// A value could not be coerced to the expected kind, or a buffer view was required.
    Type(&'static str),
    /// An arbitrary-precision integer does not fit the native type losslessly.
    Range(&'static str),
    /// The underlying system call reported failure.
    Os { errno: Errno, syscall: Syscall },
}

/// Error code hosts attach to argument count errors.
pub const WRONG_ARG_COUNT: &str = "ERR_WRONG_ARG_COUNT";

/// Host-level exception kinds a [`BridgeError`] translates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    ArgumentError,
    TypeError,
    RangeError,
    #[strum(serialize = "OSError")]
    OsError,
}

impl BridgeError {
    /// Creates an `Os` error from the current thread's `errno`.
    #[must_use]
    pub fn last_os_error(syscall: Syscall) -> Self {
        Self::Os {
            errno: Errno::last(),
            syscall,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::ArgumentError,
            Self::Type(_) => ErrorKind::TypeError,
            Self::Range(_) => ErrorKind::RangeError,
            Self::Os { .. } => ErrorKind::OsError,
        }
    }

    /// Returns the OS error code for `Os` errors.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Returns the name of the failing system call for `Os` errors.
    #[must_use]
    pub fn syscall(&self) -> Option<Syscall> {
        match self {
            Self::Os { syscall, .. } => Some(*syscall),
            _ => None,
        }
    }

    /// The `code` property a host attaches to the exception: `ERR_WRONG_ARG_COUNT` for
    /// arity errors and the errno name (e.g. `EBADF`) for OS errors.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Argument { .. } => Some(WRONG_ARG_COUNT.to_owned()),
            Self::Os { errno, .. } => Some(format!("{errno:?}")),
            Self::Type(_) | Self::Range(_) => None,
        }
    }

    /// The exception message shown by the host.
    ///
    /// OS errors read like node's own errno exceptions, `"EBADF, Bad file number"`;
    /// everything else uses [`Display`](fmt::Display).
    #[must_use]
    pub fn host_message(&self) -> String {
        match self {
            Self::Os { errno, .. } => format!("{errno:?}, {}", errno.desc()),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument {
                function,
                expected,
                actual,
            } => write!(
                f,
                "Wrong number of arguments: {function}() takes {expected} but {actual} were given"
            ),
            Self::Type(msg) | Self::Range(msg) => f.write_str(msg),
            Self::Os { errno, syscall } => write!(f, "{syscall}: {errno:?}, {}", errno.desc()),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<BridgeError> for std::io::Error {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Os { errno, .. } => Self::from_raw_os_error(errno as i32),
            other => Self::new(std::io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
