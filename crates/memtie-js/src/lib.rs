// napi macros generate code that triggers some clippy lints
#![allow(clippy::needless_pass_by_value)]

//! Node.js bindings for memtie.
//!
//! The addon exports the five bridge functions, `openMemFDBuffer`, and the `MFD_*`,
//! `PROT_*` and `MAP_*` constants:
//!
//! ```javascript
//! const { openMemFD, map, alias, bufferData, unmap, MFD_CLOEXEC, PROT_READ, PROT_WRITE, MAP_SHARED } =
//!     require('memtie');
//!
//! const fd = openMemFD('scratch', MFD_CLOEXEC);
//! const addr = map(0n, 4096, PROT_READ | PROT_WRITE, MAP_SHARED, fd, 0);
//! const buf = alias(addr, 4096); // an ArrayBuffer over the mapping, no copy
//! bufferData(buf) === addr; // true
//! unmap(addr, 4096);
//! ```
//!
//! Functions are registered as raw N-API callbacks rather than `#[napi]` functions so
//! that every call sees its exact argument count and the untouched JavaScript values.
//! Constants are read-only, enumerable properties of the exports object.

mod buffer;
mod convert;
mod exceptions;

use std::{
    ffi::{CStr, CString, c_void},
    ptr,
};

use memtie::{Bridge, BridgeError, BridgeFunction, CONSTANTS};
use napi::{bindgen_prelude::*, sys};
use napi_derive::napi;

use crate::{
    convert::{callback_info, check, create_string, host_args, host_to_js, set_named},
    exceptions::{CallResult, finish},
};

#[napi(module_exports)]
pub fn init(exports: Object, env: Env) -> Result<()> {
    // SAFETY: [DH] - env and exports are the handles node passed to module init
    unsafe { define_constants(env.raw(), exports.raw()) }?;
    for (index, function) in BridgeFunction::ALL.into_iter().enumerate() {
        let name = CString::new(function.name()).map_err(|e| Error::from_reason(e.to_string()))?;
        // SAFETY: [DH] - the data pointer only carries an index and is never dereferenced
        unsafe {
            export_function(
                env.raw(),
                exports.raw(),
                &name,
                trampoline,
                ptr::without_provenance_mut(index),
            )
        }?;
    }
    // SAFETY: [DH] - the callback ignores its data pointer
    unsafe {
        export_function(
            env.raw(),
            exports.raw(),
            c"openMemFDBuffer",
            buffer::open_memfd_buffer,
            ptr::null_mut(),
        )
    }?;
    log::debug!(
        "registered {} functions and {} constants",
        BridgeFunction::ALL.len() + 1,
        CONSTANTS.len()
    );
    Ok(())
}

/// Defines every constant as a non-writable, non-configurable, enumerable property.
unsafe fn define_constants(env: sys::napi_env, exports: sys::napi_value) -> Result<()> {
    let mut descriptors = Vec::with_capacity(CONSTANTS.len());
    for constant in CONSTANTS {
        // SAFETY: [DH] - env is valid during module init
        let name = unsafe { create_string(env, constant.name) }?;
        let mut value = ptr::null_mut();
        // SAFETY: [DH] - as above, and value is valid on success
        let status = unsafe { sys::napi_create_int32(env, constant.value, &raw mut value) };
        check(status, "napi_create_int32")?;
        descriptors.push(sys::napi_property_descriptor {
            utf8name: ptr::null(),
            name,
            method: None,
            getter: None,
            setter: None,
            value,
            attributes: sys::PropertyAttributes::enumerable,
            data: ptr::null_mut(),
        });
    }
    // SAFETY: [DH] - descriptors is valid for its length and every handle belongs to env
    let status = unsafe { sys::napi_define_properties(env, exports, descriptors.len(), descriptors.as_ptr()) };
    check(status, "napi_define_properties")
}

/// Creates a function named `name` and sets it as `exports[name]`.
///
/// # Safety
///
/// `data` must be whatever `callback` expects to find in its callback data.
pub(crate) unsafe fn export_function(
    env: sys::napi_env,
    exports: sys::napi_value,
    name: &CStr,
    callback: unsafe extern "C" fn(sys::napi_env, sys::napi_callback_info) -> sys::napi_value,
    data: *mut c_void,
) -> Result<()> {
    // SAFETY: [DH] - forwarded from the caller
    let function = unsafe { create_function(env, name, callback, data) }?;
    // SAFETY: [DH] - exports and function belong to env
    unsafe { set_named(env, exports, name, function) }
}

/// Creates a JavaScript function backed by a raw callback.
///
/// # Safety
///
/// `data` must be whatever `callback` expects to find in its callback data.
pub(crate) unsafe fn create_function(
    env: sys::napi_env,
    name: &CStr,
    callback: unsafe extern "C" fn(sys::napi_env, sys::napi_callback_info) -> sys::napi_value,
    data: *mut c_void,
) -> Result<sys::napi_value> {
    let name_len = name
        .to_bytes()
        .len()
        .try_into()
        .map_err(|_| Error::from_reason("function name too long"))?;
    let mut function = ptr::null_mut();
    // SAFETY: [DH] - name is a valid C string for the duration of the call
    let status = unsafe {
        sys::napi_create_function(
            env,
            name.as_ptr(),
            name_len,
            Some(callback),
            data,
            &raw mut function,
        )
    };
    check(status, "napi_create_function")?;
    Ok(function)
}

/// Entry point of every bridge function; the callback data carries the function's
/// index in [`BridgeFunction::ALL`].
unsafe extern "C" fn trampoline(env: sys::napi_env, info: sys::napi_callback_info) -> sys::napi_value {
    // SAFETY: [DH] - node passes a valid env and callback info
    let result = unsafe { invoke(env, info) };
    // SAFETY: [DH] - env is valid for this callback
    unsafe { finish(env, result) }
}

unsafe fn invoke(env: sys::napi_env, info: sys::napi_callback_info) -> CallResult<sys::napi_value> {
    // SAFETY: [DH] - node passes a valid env and callback info
    let (argv, data) = unsafe { callback_info(env, info) }?;
    let function = BridgeFunction::ALL
        .get(data.addr())
        .copied()
        .ok_or_else(|| Error::from_reason("unknown bridge function"))?;
    // no valueOf runs for a call that fails on arity
    if argv.len() != function.arity() {
        return Err(BridgeError::Argument {
            function,
            expected: function.arity(),
            actual: argv.len(),
        }
        .into());
    }

    // SAFETY: [DH] - every argument handle is valid for this callback
    let args = unsafe { host_args(env, &argv) }?;
    // SAFETY: [DH] - JavaScript callers take responsibility for the addresses they pass
    let result = unsafe { Bridge::untraced().call(function, &args) }?;
    // SAFETY: [DH] - alias views stay valid for as long as the caller keeps the range mapped
    unsafe { host_to_js(env, &result) }.map_err(Into::into)
}
