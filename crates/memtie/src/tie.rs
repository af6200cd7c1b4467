//! Memfd-backed buffers whose pages can be tied into other buffers.
//!
//! A [`MemFdBuffer`] is a shared mapping of an anonymous memory file. Tying maps a range
//! of that file over a page-aligned region of some other buffer with `MAP_FIXED`, so
//! both regions are backed by the same physical pages and writes on either side show up
//! on the other. Untying drops fresh private anonymous pages over the region again,
//! which detaches it and leaves it zero-filled.
//!
//! Unlike the bridge, this layer owns what it creates: the buffer closes its descriptor
//! and unmaps its own mapping on drop. Ties outlive both because they map the file
//! directly.

use std::{fmt, os::fd::RawFd, ptr};

use crate::{
    bridge,
    error::BridgeError,
    sys,
    value::{BufferView, OUT_OF_RANGE},
};

const PROT_READ_WRITE: i32 = libc::PROT_READ | libc::PROT_WRITE;

/// Errors raised by the tie layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TieError {
    /// The buffer's descriptor has already been closed.
    Closed,
    /// `offset + size` exceeds the destination buffer.
    DestinationOutOfBounds { offset: usize, size: usize, len: usize },
    /// `offset + size` exceeds the memfd buffer.
    SourceOutOfBounds { offset: usize, size: usize, len: usize },
    /// A system call or coercion failed.
    Bridge(BridgeError),
}

impl fmt::Display for TieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("fd already closed"),
            Self::DestinationOutOfBounds { offset, size, len } => {
                write!(f, "destination size out of bounds: {offset} + {size} > {len}")
            }
            Self::SourceOutOfBounds { offset, size, len } => {
                write!(f, "source size out of bounds: {offset} + {size} > {len}")
            }
            Self::Bridge(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for TieError {}

impl From<BridgeError> for TieError {
    fn from(error: BridgeError) -> Self {
        Self::Bridge(error)
    }
}

/// Returns `true` when `[offset, offset + size)` does not fit in `len` bytes.
fn out_of_bounds(offset: usize, size: usize, len: usize) -> bool {
    offset.checked_add(size).is_none_or(|end| end > len)
}

/// A read/write shared mapping of an anonymous memory file.
#[derive(Debug)]
pub struct MemFdBuffer {
    /// `None` once [`MemFdBuffer::close`] has run.
    fd: Option<RawFd>,
    /// The buffer's own mapping of the whole file.
    view: BufferView,
}

impl MemFdBuffer {
    /// Opens a memfd of `size` bytes with `MFD_CLOEXEC` and maps it.
    pub fn open(name: &str, size: usize) -> Result<Self, TieError> {
        Self::open_with_flags(name, size, libc::MFD_CLOEXEC.cast_signed())
    }

    /// Opens a memfd of `size` bytes with the given `memfd_create` flags and maps it.
    ///
    /// The descriptor is closed again if sizing or mapping fails.
    pub fn open_with_flags(name: &str, size: usize, flags: i32) -> Result<Self, TieError> {
        let fd = bridge::open_memfd(name, flags)?;
        match Self::map_file(fd, size) {
            Ok(address) => {
                log::debug!("opened memfd buffer {name:?}: fd={fd} size={size} at {address:#x}");
                Ok(Self {
                    fd: Some(fd),
                    view: BufferView::new(address, size),
                })
            }
            Err(err) => {
                if let Err(close_err) = sys::close(fd) {
                    log::warn!("failed to close memfd {fd} after error: {close_err}");
                }
                Err(err.into())
            }
        }
    }

    fn map_file(fd: RawFd, size: usize) -> Result<usize, BridgeError> {
        let len = libc::off_t::try_from(size).map_err(|_| BridgeError::Range(OUT_OF_RANGE))?;
        sys::ftruncate(fd, len)?;
        // SAFETY: [DH] - no address hint and no MAP_FIXED, the kernel picks a free range
        unsafe { bridge::map(ptr::null_mut(), size, PROT_READ_WRITE, libc::MAP_SHARED, fd, 0) }
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.view.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// The buffer's own mapping.
    #[must_use]
    pub fn view(&self) -> BufferView {
        self.view
    }

    /// The memfd descriptor, while it is still open.
    #[must_use]
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Ties `size` bytes of this buffer, starting at `src_offset`, over `dst` at
    /// `dst_offset`.
    ///
    /// `size` defaults to the smaller of the two buffers. Offsets and size must be page
    /// aligned or the kernel rejects the mapping with `EINVAL`.
    ///
    /// # Safety
    ///
    /// `dst` must describe memory the caller owns and that nothing else maps or frees
    /// while tied: the pages under `[dst + dst_offset, dst + dst_offset + size)` are
    /// replaced in place and stay replaced until [`Tie::untie`].
    pub unsafe fn tie(
        &self,
        dst: BufferView,
        dst_offset: usize,
        size: Option<usize>,
        src_offset: usize,
    ) -> Result<Tie, TieError> {
        let fd = self.fd.ok_or(TieError::Closed)?;
        let size = size.unwrap_or_else(|| self.len().min(dst.len()));
        if out_of_bounds(dst_offset, size, dst.len()) {
            return Err(TieError::DestinationOutOfBounds {
                offset: dst_offset,
                size,
                len: dst.len(),
            });
        }
        if out_of_bounds(src_offset, size, self.len()) {
            return Err(TieError::SourceOutOfBounds {
                offset: src_offset,
                size,
                len: self.len(),
            });
        }
        let address = dst
            .address()
            .checked_add(dst_offset)
            .ok_or(TieError::DestinationOutOfBounds {
                offset: dst_offset,
                size,
                len: dst.len(),
            })?;
        let offset = libc::off_t::try_from(src_offset).map_err(|_| BridgeError::Range(OUT_OF_RANGE))?;

        // SAFETY: [DH] - the caller owns the destination range
        let mapped = unsafe {
            bridge::map(
                ptr::with_exposed_provenance_mut(address),
                size,
                PROT_READ_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                fd,
                offset,
            )
        }?;
        log::debug!("tied {size} bytes of fd {fd} at offset {src_offset} to {mapped:#x}");
        Ok(Tie {
            view: BufferView::new(mapped, size),
        })
    }

    /// Closes the descriptor. Mappings, including ties, remain valid.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), TieError> {
        if let Some(fd) = self.fd.take() {
            sys::close(fd)?;
        }
        Ok(())
    }

    /// Fills `[offset, offset + len)` with `value`.
    pub fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), TieError> {
        self.check_range(offset, len)?;
        // SAFETY: [DH] - the range is inside our own read/write mapping
        unsafe { ptr::write_bytes(self.view.as_mut_ptr().add(offset), value, len) };
        Ok(())
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), TieError> {
        self.check_range(offset, buf.len())?;
        // SAFETY: [DH] - the range is inside our own mapping and cannot overlap `buf`,
        // which is a distinct borrow
        unsafe { ptr::copy_nonoverlapping(self.view.as_mut_ptr().add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Copies `data` into the buffer at `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), TieError> {
        self.check_range(offset, data.len())?;
        // SAFETY: [DH] - the range is inside our own read/write mapping
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.view.as_mut_ptr().add(offset), data.len()) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), TieError> {
        if out_of_bounds(offset, len, self.len()) {
            return Err(TieError::SourceOutOfBounds {
                offset,
                size: len,
                len: self.len(),
            });
        }
        Ok(())
    }
}

impl Drop for MemFdBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close memfd buffer: {err}");
        }
        // SAFETY: [DH] - the mapping was created in `open_with_flags` and is only
        // reachable through `self`
        if let Err(err) = unsafe { bridge::unmap(self.view.as_mut_ptr().cast(), self.view.len()) } {
            log::warn!("failed to unmap memfd buffer: {err}");
        }
    }
}

/// A region of some buffer currently backed by a memfd.
#[derive(Debug)]
#[must_use = "a tie stays in place until `untie` is called"]
pub struct Tie {
    view: BufferView,
}

impl Tie {
    /// The tied region.
    #[must_use]
    pub fn view(&self) -> BufferView {
        self.view
    }

    /// Replaces the tied region with private anonymous pages.
    ///
    /// The region keeps its address but reads as zeros afterwards; the memfd keeps its
    /// contents.
    pub fn untie(self) -> Result<(), TieError> {
        // SAFETY: [DH] - the range was handed to us by the caller in `MemFdBuffer::tie`
        unsafe {
            bridge::map(
                self.view.as_mut_ptr().cast(),
                self.view.len(),
                PROT_READ_WRITE,
                libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        }?;
        log::debug!("untied {} bytes at {:#x}", self.view.len(), self.view.address());
        Ok(())
    }
}
