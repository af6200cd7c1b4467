//! The address/buffer bridge.
//!
//! Five operations, each a direct pass-through to one OS primitive (or none, for the
//! two buffer conversions). [`Bridge::call`] is the host-facing entry point: it checks
//! arity, runs the typed parsers from [`crate::value`], invokes the primitive and wraps
//! the result as a [`HostValue`]. The typed functions below it are usable directly from
//! Rust.
//!
//! The bridge keeps no state about what it creates: descriptors and mappings belong to
//! the caller from the moment they are returned.

use std::{
    ffi::{CString, c_void},
    os::fd::RawFd,
};

use crate::{
    error::{BridgeError, BridgeResult},
    sys::{self, Syscall},
    tracer::{CallTracer, NoopTracer},
    value::{BufferView, HostValue},
};

/// Functions exposed to the host, under their exported names.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    serde::Serialize,
)]
pub enum BridgeFunction {
    /// `openMemFD(name, flags)` → `memfd_create`
    #[strum(serialize = "openMemFD")]
    #[serde(rename = "openMemFD")]
    OpenMemFd,
    /// `alias(address, length)`, no system call
    #[strum(serialize = "alias")]
    #[serde(rename = "alias")]
    Alias,
    /// `map(address, length, prot, flags, fd, offset)` → `mmap`
    #[strum(serialize = "map")]
    #[serde(rename = "map")]
    Map,
    /// `unmap(address, length)` → `munmap`
    #[strum(serialize = "unmap")]
    #[serde(rename = "unmap")]
    Unmap,
    /// `bufferData(buffer)`, no system call
    #[strum(serialize = "bufferData")]
    #[serde(rename = "bufferData")]
    BufferData,
}

impl BridgeFunction {
    /// Every exposed function, in registration order.
    pub const ALL: [Self; 5] = [Self::OpenMemFd, Self::Alias, Self::Map, Self::Unmap, Self::BufferData];

    /// Number of arguments the function requires.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::OpenMemFd | Self::Alias | Self::Unmap => 2,
            Self::Map => 6,
            Self::BufferData => 1,
        }
    }

    /// The system call the function forwards to, if any.
    #[must_use]
    pub const fn syscall(self) -> Option<Syscall> {
        match self {
            Self::OpenMemFd => Some(Syscall::MemfdCreate),
            Self::Map => Some(Syscall::Mmap),
            Self::Unmap => Some(Syscall::Munmap),
            Self::Alias | Self::BufferData => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Host-facing dispatcher, generic over a [`CallTracer`] that observes every call.
#[derive(Debug, Default)]
pub struct Bridge<Tr: CallTracer = NoopTracer> {
    tracer: Tr,
}

impl Bridge {
    /// Creates a bridge without tracing.
    #[must_use]
    pub fn untraced() -> Self {
        Self { tracer: NoopTracer }
    }
}

impl<Tr: CallTracer> Bridge<Tr> {
    #[must_use]
    pub fn new(tracer: Tr) -> Self {
        Self { tracer }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    /// Calls `function` with host-supplied arguments.
    ///
    /// Arity is checked before anything else, so a wrong argument count never reaches
    /// the OS. Coercion failures abort the call at the first bad argument.
    ///
    /// # Safety
    ///
    /// Addresses are taken on trust. `map` with `MAP_FIXED` and `unmap` can pull memory
    /// out from under live references, and the view returned by `alias` is dereferenced
    /// by the host. The caller vouches for every address it passes.
    pub unsafe fn call(&mut self, function: BridgeFunction, args: &[HostValue]) -> BridgeResult<HostValue> {
        self.tracer.on_call(function, args);
        // SAFETY: [DH] - the caller's contract is forwarded unchanged
        let result = unsafe { dispatch(function, args) };
        match &result {
            Ok(value) => self.tracer.on_return(function, value),
            Err(err) => self.tracer.on_error(function, err),
        }
        result
    }
}

/// Checks the argument count and hands back a fixed-size array of arguments.
fn expect_args<const N: usize>(function: BridgeFunction, args: &[HostValue]) -> BridgeResult<&[HostValue; N]> {
    <&[HostValue; N]>::try_from(args).map_err(|_| BridgeError::Argument {
        function,
        expected: N,
        actual: args.len(),
    })
}

/// # Safety
///
/// See [`Bridge::call`].
unsafe fn dispatch(function: BridgeFunction, args: &[HostValue]) -> BridgeResult<HostValue> {
    match function {
        BridgeFunction::OpenMemFd => {
            let [name, flags] = expect_args::<2>(function, args)?;
            let name = name.to_text()?;
            let flags = flags.to_int32()?;
            open_memfd(&name, flags).map(HostValue::from)
        }
        BridgeFunction::Alias => {
            let [address, length] = expect_args::<2>(function, args)?;
            let address = address.parse_address()?;
            let length = length.parse_size()?;
            // SAFETY: [DH] - the caller vouches for the address
            Ok(HostValue::Buffer(unsafe { alias(address, length) }))
        }
        BridgeFunction::Map => {
            let [address, length, prot, flags, fd, offset] = expect_args::<6>(function, args)?;
            let address = address.parse_pointer()?;
            let length = length.parse_size()?;
            let prot = prot.to_int32()?;
            let flags = flags.to_int32()?;
            let fd = fd.to_int32()?;
            let offset = offset.parse_offset()?;
            // SAFETY: [DH] - the caller vouches for the address
            unsafe { map(address, length, prot, flags, fd, offset) }.map(HostValue::address)
        }
        BridgeFunction::Unmap => {
            let [address, length] = expect_args::<2>(function, args)?;
            let address = address.parse_pointer()?;
            let length = length.parse_size()?;
            // SAFETY: [DH] - the caller vouches for the address
            unsafe { unmap(address, length) }?;
            Ok(HostValue::Undefined)
        }
        BridgeFunction::BufferData => {
            let [buffer] = expect_args::<1>(function, args)?;
            Ok(HostValue::address(buffer_address(buffer.as_buffer()?)))
        }
    }
}

/// Creates an anonymous memory file. The descriptor is owned by the caller.
///
/// Text after an embedded NUL is ignored, as it would be by the C interface.
pub fn open_memfd(name: &str, flags: i32) -> BridgeResult<RawFd> {
    let name = name.split('\0').next().unwrap_or_default();
    let name = CString::new(name).map_err(|_| BridgeError::Type("Expected a string"))?;
    sys::memfd_create(&name, flags)
}

/// Describes `[address, address + length)` as a buffer view without copying or owning it.
///
/// # Safety
///
/// The region must stay mapped for as long as anything reads or writes through the
/// returned view. Nothing here checks that the address is mapped at all.
#[must_use]
pub unsafe fn alias(address: usize, length: usize) -> BufferView {
    BufferView::new(address, length)
}

/// Maps memory and returns the mapping's address at full pointer width.
///
/// # Safety
///
/// See [`sys::mmap`].
pub unsafe fn map(
    address: *mut c_void,
    length: usize,
    prot: i32,
    flags: i32,
    fd: RawFd,
    offset: libc::off_t,
) -> BridgeResult<usize> {
    // SAFETY: [DH] - forwarded contract
    let mapped = unsafe { sys::mmap(address, length, prot, flags, fd, offset) }?;
    Ok(mapped.expose_provenance())
}

/// Unmaps `[address, address + length)`.
///
/// # Safety
///
/// See [`sys::munmap`].
pub unsafe fn unmap(address: *mut c_void, length: usize) -> BridgeResult<()> {
    // SAFETY: [DH] - forwarded contract
    unsafe { sys::munmap(address, length) }
}

/// Returns the native address backing a buffer view.
#[must_use]
pub fn buffer_address(view: BufferView) -> usize {
    view.address()
}
