//! Throwing bridge errors as JavaScript exceptions.
//!
//! | error           | thrown as    | extra properties                         |
//! |-----------------|--------------|------------------------------------------|
//! | `ArgumentError` | `TypeError`  | `code = "ERR_WRONG_ARG_COUNT"`           |
//! | `TypeError`     | `TypeError`  |                                          |
//! | `RangeError`    | `RangeError` |                                          |
//! | `OSError`       | `Error`      | `errno`, `code` (e.g. `"EBADF"`), `syscall` |
//!
//! OS errors follow node's own errno exceptions, so the message reads
//! `"EBADF, Bad file number"`. Tie errors other than OS errors are plain `Error`s.

use std::{ffi::CString, ptr};

use memtie::{BridgeError, ErrorKind, TieError};
use napi::{Error, Result, sys};

use crate::convert::{check, create_string, set_named};

/// Failure of a single call.
pub(crate) enum CallError {
    /// The bridge rejected the call.
    Bridge(BridgeError),
    /// A buffer-tie operation failed.
    Tie(TieError),
    /// The binding itself failed, or JavaScript code it called threw.
    Napi(Error),
}

pub(crate) type CallResult<T> = std::result::Result<T, CallError>;

impl From<BridgeError> for CallError {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(err)
    }
}

impl From<TieError> for CallError {
    fn from(err: TieError) -> Self {
        match err {
            TieError::Bridge(err) => Self::Bridge(err),
            other => Self::Tie(other),
        }
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        Self::Napi(err)
    }
}

/// Ends a raw callback: returns the value, or throws the error and returns null.
///
/// An exception already pending (thrown by a `valueOf` the binding called) is left in
/// place.
///
/// # Safety
///
/// `env` must be valid for the current callback scope.
pub(crate) unsafe fn finish(env: sys::napi_env, result: CallResult<sys::napi_value>) -> sys::napi_value {
    let err = match result {
        Ok(value) => return value,
        Err(err) => err,
    };
    let mut pending = false;
    // SAFETY: [DH] - env is valid for this callback
    let status = unsafe { sys::napi_is_exception_pending(env, &raw mut pending) };
    if status == sys::Status::napi_ok && pending {
        return ptr::null_mut();
    }
    let thrown = match &err {
        // SAFETY: [DH] - env is valid for this callback
        CallError::Bridge(err) => unsafe { throw_bridge_error(env, err) },
        // SAFETY: [DH] - as above
        CallError::Tie(err) => unsafe { throw_error(env, &err.to_string()) },
        // SAFETY: [DH] - as above
        CallError::Napi(err) => unsafe { throw_error(env, &err.reason) },
    };
    if let Err(throw_err) = thrown {
        log::error!("failed to throw an exception: {}", throw_err.reason);
    }
    ptr::null_mut()
}

/// Throws `err` as a pending exception in `env`.
///
/// # Safety
///
/// `env` must be valid for the current callback scope.
pub(crate) unsafe fn throw_bridge_error(env: sys::napi_env, err: &BridgeError) -> Result<()> {
    // SAFETY: [DH] - env is valid, the created strings live in the current handle scope
    let message = unsafe { create_string(env, &err.host_message()) }?;
    let code = match err.code() {
        // SAFETY: [DH] - as above
        Some(code) => unsafe { create_string(env, &code) }?,
        None => ptr::null_mut(),
    };

    let mut error = ptr::null_mut();
    let status = match err.kind() {
        // SAFETY: [DH] - code is null or a string and message is a string, both in env
        ErrorKind::ArgumentError | ErrorKind::TypeError => unsafe {
            sys::napi_create_type_error(env, code, message, &raw mut error)
        },
        // SAFETY: [DH] - as above
        ErrorKind::RangeError => unsafe { sys::napi_create_range_error(env, code, message, &raw mut error) },
        // SAFETY: [DH] - as above
        ErrorKind::OsError => unsafe { sys::napi_create_error(env, code, message, &raw mut error) },
    };
    check(status, "creating error")?;

    if let BridgeError::Os { errno, syscall } = err {
        let mut errno_value = ptr::null_mut();
        // SAFETY: [DH] - env is valid and errno_value is valid on success
        let status = unsafe { sys::napi_create_int32(env, *errno as i32, &raw mut errno_value) };
        check(status, "napi_create_int32")?;
        // SAFETY: [DH] - error and the property values all belong to env
        unsafe {
            set_named(env, error, c"errno", errno_value)?;
            set_named(env, error, c"syscall", create_string(env, <&str>::from(*syscall))?)?;
        }
    }

    // SAFETY: [DH] - error was created above
    let status = unsafe { sys::napi_throw(env, error) };
    check(status, "napi_throw")
}

/// Throws a plain `Error` with `message`.
///
/// # Safety
///
/// `env` must be valid for the current callback scope.
pub(crate) unsafe fn throw_error(env: sys::napi_env, message: &str) -> Result<()> {
    let message = CString::new(message.replace('\0', " ")).map_err(|e| Error::from_reason(e.to_string()))?;
    // SAFETY: [DH] - message is a valid C string for the duration of the call
    let status = unsafe { sys::napi_throw_error(env, ptr::null(), message.as_ptr()) };
    check(status, "napi_throw_error")
}
