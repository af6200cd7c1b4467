//! Thin wrappers over the system calls the bridge forwards to.
//!
//! Every wrapper makes exactly one call, captures `errno` on failure and tags the
//! error with the [`Syscall`] that produced it. Nothing is retried, including on `EINTR`.

use std::{
    ffi::{CStr, c_void},
    os::fd::RawFd,
};

use nix::errno::Errno;

use crate::error::{BridgeError, BridgeResult};

/// System calls reachable through the bridge and the tie layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, serde::Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Syscall {
    MemfdCreate,
    Mmap,
    Munmap,
    Ftruncate,
    Close,
}

fn check(res: libc::c_int, syscall: Syscall) -> BridgeResult<libc::c_int> {
    Errno::result(res).map_err(|errno| {
        log::debug!("{syscall} failed: {errno:?}");
        BridgeError::Os { errno, syscall }
    })
}

/// Creates an anonymous memory file, returning its descriptor.
pub fn memfd_create(name: &CStr, flags: i32) -> BridgeResult<RawFd> {
    // SAFETY: [DH] - `name` is a valid NUL-terminated string for the duration of the call
    let res = unsafe { libc::memfd_create(name.as_ptr(), flags.cast_unsigned()) };
    let fd = check(res, Syscall::MemfdCreate)?;
    log::debug!("memfd_create({name:?}, {flags:#x}) = {fd}");
    Ok(fd)
}

/// Maps `len` bytes, returning the start of the new mapping.
///
/// # Safety
///
/// With `MAP_FIXED` any existing mapping at `addr` is silently replaced; the caller
/// must own that range and ensure nothing still references the replaced pages.
pub unsafe fn mmap(
    addr: *mut c_void,
    len: usize,
    prot: i32,
    flags: i32,
    fd: RawFd,
    offset: libc::off_t,
) -> BridgeResult<*mut c_void> {
    // SAFETY: [DH] - forwarded verbatim, the caller upholds the MAP_FIXED contract
    let res = unsafe { libc::mmap(addr, len, prot, flags, fd, offset) };
    if res == libc::MAP_FAILED {
        let err = BridgeError::last_os_error(Syscall::Mmap);
        log::debug!("mmap({addr:p}, {len}, {prot:#x}, {flags:#x}, {fd}, {offset}) failed: {err}");
        return Err(err);
    }
    log::debug!("mmap({addr:p}, {len}, {prot:#x}, {flags:#x}, {fd}, {offset}) = {res:p}");
    Ok(res)
}

/// Removes the mapping covering `[addr, addr + len)`.
///
/// # Safety
///
/// The caller must guarantee no live reference points into the unmapped range.
pub unsafe fn munmap(addr: *mut c_void, len: usize) -> BridgeResult<()> {
    // SAFETY: [DH] - the caller guarantees the range is no longer referenced
    check(unsafe { libc::munmap(addr, len) }, Syscall::Munmap)?;
    log::debug!("munmap({addr:p}, {len})");
    Ok(())
}

/// Sets the size of the file behind `fd`.
pub fn ftruncate(fd: RawFd, len: libc::off_t) -> BridgeResult<()> {
    // SAFETY: [DH] - plain integer arguments, an invalid fd is reported through errno
    check(unsafe { libc::ftruncate(fd, len) }, Syscall::Ftruncate)?;
    Ok(())
}

/// Closes `fd`.
pub fn close(fd: RawFd) -> BridgeResult<()> {
    // SAFETY: [DH] - plain integer argument, an invalid fd is reported through errno
    check(unsafe { libc::close(fd) }, Syscall::Close)?;
    log::debug!("close({fd})");
    Ok(())
}
