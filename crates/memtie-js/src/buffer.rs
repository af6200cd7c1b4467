//! `openMemFDBuffer(name, size, flags = MFD_CLOEXEC)`.
//!
//! Returns an `ArrayBuffer` over a shared mapping of a fresh memfd, with two methods:
//!
//! - `tie(dst, doffset = 0, dsize = min(size, dst.byteLength), soffset = 0)` maps part of
//!   the memfd over `dst` and returns an `untie()` function. Calling `untie` a second time
//!   does nothing.
//! - `close()` closes the descriptor. Existing ties and the buffer itself stay mapped.
//!
//! ```javascript
//! const memory = new WebAssembly.Memory({ initial: 1 });
//! const src = openMemFDBuffer('wasm-heap', 65536);
//! const untie = src.tie(memory.buffer, 8192, 4096, 4096);
//! src.close();
//! // writes through memory.buffer[8192..12288] now land in src[4096..8192]
//! untie();
//! ```
//!
//! The memfd buffer is unmapped once the `ArrayBuffer` and both of its methods have been
//! collected.

use std::{
    cell::{Cell, RefCell},
    ffi::{CStr, c_void},
    ptr,
    rc::Rc,
};

use memtie::{HostValue, MemFdBuffer, Tie, TieError};
use napi::{Error, Result, sys};

use crate::{
    convert::{callback_info, check, host_args, host_to_js, set_named},
    create_function,
    exceptions::{CallResult, finish},
};

type SharedBuffer = Rc<RefCell<MemFdBuffer>>;

const UNDEFINED: &HostValue = &HostValue::Undefined;

/// The argument at `index`, or `None` when it is missing or `undefined`.
fn optional(args: &[HostValue], index: usize) -> Option<&HostValue> {
    args.get(index).filter(|value| !matches!(value, HostValue::Undefined))
}

pub(crate) unsafe extern "C" fn open_memfd_buffer(
    env: sys::napi_env,
    info: sys::napi_callback_info,
) -> sys::napi_value {
    // SAFETY: [DH] - node passes a valid env and callback info
    let result = unsafe { open(env, info) };
    // SAFETY: [DH] - env is valid for this callback
    unsafe { finish(env, result) }
}

unsafe fn open(env: sys::napi_env, info: sys::napi_callback_info) -> CallResult<sys::napi_value> {
    // SAFETY: [DH] - node passes a valid env and callback info
    let (argv, _) = unsafe { callback_info(env, info) }?;
    // SAFETY: [DH] - every argument handle is valid for this callback
    let args = unsafe { host_args(env, &argv) }?;
    let name = args.first().unwrap_or(UNDEFINED).to_text()?;
    let size = args.get(1).unwrap_or(UNDEFINED).parse_size()?;
    let flags = match optional(&args, 2) {
        Some(flags) => flags.to_int32()?,
        None => libc::MFD_CLOEXEC.cast_signed(),
    };

    let buffer = MemFdBuffer::open_with_flags(&name, size, flags)?;
    let view = buffer.view();
    let shared: SharedBuffer = Rc::new(RefCell::new(buffer));

    let hint = Box::into_raw(Box::new(Rc::clone(&shared)));
    let mut array_buffer = ptr::null_mut();
    // SAFETY: [DH] - the view stays mapped until the finalizer drops the last reference
    let status = unsafe {
        sys::napi_create_external_arraybuffer(
            env,
            view.as_mut_ptr().cast(),
            view.len(),
            Some(drop_boxed::<SharedBuffer>),
            hint.cast(),
            &raw mut array_buffer,
        )
    };
    if status != sys::Status::napi_ok {
        // SAFETY: [DH] - the finalizer was not registered, so the box is still ours
        drop(unsafe { Box::from_raw(hint) });
        check(status, "napi_create_external_arraybuffer")?;
    }

    // SAFETY: [DH] - tie and close expect a SharedBuffer as their data
    unsafe {
        let tie_fn = function_with_state(env, c"tie", tie, Rc::clone(&shared))?;
        let close_fn = function_with_state(env, c"close", close, shared)?;
        set_named(env, array_buffer, c"tie", tie_fn)?;
        set_named(env, array_buffer, c"close", close_fn)?;
    }
    Ok(array_buffer)
}

unsafe extern "C" fn tie(env: sys::napi_env, info: sys::napi_callback_info) -> sys::napi_value {
    // SAFETY: [DH] - node passes a valid env and callback info
    let result = unsafe { tie_buffer(env, info) };
    // SAFETY: [DH] - env is valid for this callback
    unsafe { finish(env, result) }
}

unsafe fn tie_buffer(env: sys::napi_env, info: sys::napi_callback_info) -> CallResult<sys::napi_value> {
    // SAFETY: [DH] - node passes a valid env and callback info
    let (argv, data) = unsafe { callback_info(env, info) }?;
    // SAFETY: [DH] - data is the SharedBuffer boxed for this function, alive as long as it is
    let shared = unsafe { &*data.cast::<SharedBuffer>() };
    let is_open = shared
        .try_borrow()
        .map_err(|_| Error::from_reason("memfd buffer is in use"))?
        .is_open();
    if !is_open {
        return Err(TieError::Closed.into());
    }

    // SAFETY: [DH] - every argument handle is valid for this callback
    let args = unsafe { host_args(env, &argv) }?;
    let dst = args.first().unwrap_or(UNDEFINED).as_buffer()?;
    let dst_offset = optional(&args, 1).map(HostValue::parse_size).transpose()?.unwrap_or(0);
    let size = optional(&args, 2).map(HostValue::parse_size).transpose()?;
    let src_offset = optional(&args, 3).map(HostValue::parse_size).transpose()?.unwrap_or(0);

    let buffer = shared
        .try_borrow()
        .map_err(|_| Error::from_reason("memfd buffer is in use"))?;
    // SAFETY: [DH] - JavaScript callers take responsibility for the buffers they tie over
    let tied = unsafe { buffer.tie(dst, dst_offset, size, src_offset) }?;
    // SAFETY: [DH] - untie expects a Cell<Option<Tie>> as its data
    unsafe { function_with_state(env, c"untie", untie, Cell::new(Some(tied))) }.map_err(Into::into)
}

unsafe extern "C" fn untie(env: sys::napi_env, info: sys::napi_callback_info) -> sys::napi_value {
    // SAFETY: [DH] - node passes a valid env and callback info
    let result = unsafe { untie_buffer(env, info) };
    // SAFETY: [DH] - env is valid for this callback
    unsafe { finish(env, result) }
}

unsafe fn untie_buffer(env: sys::napi_env, info: sys::napi_callback_info) -> CallResult<sys::napi_value> {
    // SAFETY: [DH] - node passes a valid env and callback info
    let (_, data) = unsafe { callback_info(env, info) }?;
    // SAFETY: [DH] - data is the Cell boxed for this function, alive as long as it is
    let tied = unsafe { &*data.cast::<Cell<Option<Tie>>>() };
    if let Some(tie) = tied.take() {
        tie.untie()?;
    }
    // SAFETY: [DH] - env is valid for this callback
    unsafe { host_to_js(env, &HostValue::Undefined) }.map_err(Into::into)
}

unsafe extern "C" fn close(env: sys::napi_env, info: sys::napi_callback_info) -> sys::napi_value {
    // SAFETY: [DH] - node passes a valid env and callback info
    let result = unsafe { close_buffer(env, info) };
    // SAFETY: [DH] - env is valid for this callback
    unsafe { finish(env, result) }
}

unsafe fn close_buffer(env: sys::napi_env, info: sys::napi_callback_info) -> CallResult<sys::napi_value> {
    // SAFETY: [DH] - node passes a valid env and callback info
    let (_, data) = unsafe { callback_info(env, info) }?;
    // SAFETY: [DH] - data is the SharedBuffer boxed for this function, alive as long as it is
    let shared = unsafe { &*data.cast::<SharedBuffer>() };
    shared
        .try_borrow_mut()
        .map_err(|_| Error::from_reason("memfd buffer is in use"))?
        .close()?;
    // SAFETY: [DH] - env is valid for this callback
    unsafe { host_to_js(env, &HostValue::Undefined) }.map_err(Into::into)
}

/// Creates a function whose callback data is `state`, dropped when the function is
/// collected.
///
/// # Safety
///
/// `callback` must read its data as a `T`.
unsafe fn function_with_state<T>(
    env: sys::napi_env,
    name: &CStr,
    callback: unsafe extern "C" fn(sys::napi_env, sys::napi_callback_info) -> sys::napi_value,
    state: T,
) -> Result<sys::napi_value> {
    let data = Box::into_raw(Box::new(state));
    // SAFETY: [DH] - data points to a live T, as callback expects
    let function = match unsafe { create_function(env, name, callback, data.cast()) } {
        Ok(function) => function,
        Err(err) => {
            // SAFETY: [DH] - no function holds data, so the box is still ours
            drop(unsafe { Box::from_raw(data) });
            return Err(err);
        }
    };
    // SAFETY: [DH] - the finalizer frees data exactly once, after the function is collected
    let status = unsafe {
        sys::napi_add_finalizer(
            env,
            function,
            ptr::null_mut(),
            Some(drop_boxed::<T>),
            data.cast(),
            ptr::null_mut(),
        )
    };
    if status != sys::Status::napi_ok {
        // SAFETY: [DH] - the function is never handed to JavaScript, so nothing calls it
        drop(unsafe { Box::from_raw(data) });
        check(status, "napi_add_finalizer")?;
    }
    Ok(function)
}

/// Finalizer dropping the `Box<T>` passed as the finalize hint.
unsafe extern "C" fn drop_boxed<T>(_env: sys::napi_env, _data: *mut c_void, hint: *mut c_void) {
    // SAFETY: [DH] - every hint registered with this finalizer comes from Box::<T>::into_raw
    drop(unsafe { Box::from_raw(hint.cast::<T>()) });
}
