//! Conversion between raw N-API values and memtie's [`HostValue`].
//!
//! The bridge needs to see exactly what the caller passed (a BigInt is not a number, an
//! `ArrayBuffer` is not any other object), so values are classified with `napi_typeof`
//! and read through the raw N-API calls rather than the typed napi-rs wrappers.
//!
//! Objects other than `ArrayBuffer`s are first reduced to a primitive the way the
//! engine's ToPrimitive does (`Symbol.toPrimitive`, then `valueOf`, then `toString`), so
//! `[4096]` or `{ valueOf() { return 1 } }` coerce like they would in JavaScript.

use std::{
    ffi::{CStr, c_char, c_int, c_void},
    ptr,
};

use memtie::{BridgeError, BufferView, HostValue, bigint_from_words, bigint_to_words};
use napi::{Error, Result, sys};

use crate::exceptions::CallResult;

const CANNOT_CONVERT_OBJECT: &str = "Cannot convert object to primitive value";

/// Turns a non-ok N-API status into an error naming the failing call.
pub(crate) fn check(status: sys::napi_status, call: &str) -> Result<()> {
    if status == sys::Status::napi_ok {
        Ok(())
    } else {
        Err(Error::from_reason(format!("{call} failed with status {status}")))
    }
}

/// Reads the arguments and the callback data of the current call.
///
/// # Safety
///
/// `env` and `info` must be the handles node passed to the running callback.
pub(crate) unsafe fn callback_info(
    env: sys::napi_env,
    info: sys::napi_callback_info,
) -> Result<(Vec<sys::napi_value>, *mut c_void)> {
    let mut argc = 0;
    let mut data = ptr::null_mut();
    // SAFETY: [DH] - a zero capacity with a null argv asks for the count only
    let status =
        unsafe { sys::napi_get_cb_info(env, info, &raw mut argc, ptr::null_mut(), ptr::null_mut(), &raw mut data) };
    check(status, "napi_get_cb_info")?;

    let mut argv = vec![ptr::null_mut(); argc];
    // SAFETY: [DH] - argv has room for argc values
    let status = unsafe {
        sys::napi_get_cb_info(env, info, &raw mut argc, argv.as_mut_ptr(), ptr::null_mut(), ptr::null_mut())
    };
    check(status, "napi_get_cb_info")?;
    Ok((argv, data))
}

/// Converts every argument of a call.
///
/// # Safety
///
/// Every handle in `argv` must be valid for the current callback scope.
pub(crate) unsafe fn host_args(env: sys::napi_env, argv: &[sys::napi_value]) -> CallResult<Vec<HostValue>> {
    argv.iter()
        .map(|&value| {
            // SAFETY: [DH] - guaranteed by the caller
            unsafe { js_to_host(env, value) }
        })
        .collect()
}

/// Reads a JavaScript value into a [`HostValue`].
///
/// # Safety
///
/// `env` and `value` must be valid handles for the current callback scope.
pub(crate) unsafe fn js_to_host(env: sys::napi_env, value: sys::napi_value) -> CallResult<HostValue> {
    // SAFETY: [DH] - guaranteed by the caller
    let value_type = unsafe { type_of(env, value) }?;
    match value_type {
        sys::ValueType::napi_undefined => Ok(HostValue::Undefined),
        sys::ValueType::napi_null => Ok(HostValue::Null),
        sys::ValueType::napi_boolean => {
            let mut result = false;
            // SAFETY: [DH] - value is a boolean
            let status = unsafe { sys::napi_get_value_bool(env, value, &raw mut result) };
            check(status, "napi_get_value_bool")?;
            Ok(HostValue::Bool(result))
        }
        sys::ValueType::napi_number => {
            let mut result = 0.0;
            // SAFETY: [DH] - value is a number
            let status = unsafe { sys::napi_get_value_double(env, value, &raw mut result) };
            check(status, "napi_get_value_double")?;
            Ok(HostValue::Number(result))
        }
        sys::ValueType::napi_string => {
            // SAFETY: [DH] - value is a string
            let text = unsafe { read_string(env, value) }?;
            Ok(HostValue::String(text))
        }
        sys::ValueType::napi_bigint => {
            // SAFETY: [DH] - value is a bigint
            let bigint = unsafe { read_bigint(env, value) }?;
            Ok(HostValue::BigInt(bigint))
        }
        sys::ValueType::napi_symbol => Ok(HostValue::Symbol),
        sys::ValueType::napi_object | sys::ValueType::napi_function => {
            // SAFETY: [DH] - value is an object
            if let Some(view) = unsafe { read_array_buffer(env, value) }? {
                return Ok(HostValue::Buffer(view));
            }
            // SAFETY: [DH] - value is an object
            let primitive = unsafe { to_primitive(env, value) }?;
            // SAFETY: [DH] - primitive was just created in this scope and is not an object
            unsafe { js_to_host(env, primitive) }
        }
        _ => Ok(HostValue::Object),
    }
}

unsafe fn type_of(env: sys::napi_env, value: sys::napi_value) -> Result<sys::napi_valuetype> {
    let mut value_type: sys::napi_valuetype = 0;
    // SAFETY: [DH] - all arguments are valid and value_type is valid on success
    let status = unsafe { sys::napi_typeof(env, value, &raw mut value_type) };
    check(status, "napi_typeof")?;
    Ok(value_type)
}

unsafe fn is_object(env: sys::napi_env, value: sys::napi_value) -> Result<bool> {
    // SAFETY: [DH] - forwarded from the caller
    let value_type = unsafe { type_of(env, value) }?;
    Ok(matches!(
        value_type,
        sys::ValueType::napi_object | sys::ValueType::napi_function
    ))
}

unsafe fn get_named(env: sys::napi_env, object: sys::napi_value, name: &CStr) -> Result<sys::napi_value> {
    let mut result = ptr::null_mut();
    // SAFETY: [DH] - name is a valid C string and object belongs to env
    let status = unsafe { sys::napi_get_named_property(env, object, name.as_ptr(), &raw mut result) };
    check(status, "napi_get_named_property")?;
    Ok(result)
}

/// Calls `function` with `this` bound to `receiver`. A throwing function leaves its
/// exception pending and surfaces here as an error.
unsafe fn call_function(
    env: sys::napi_env,
    receiver: sys::napi_value,
    function: sys::napi_value,
    args: &[sys::napi_value],
) -> Result<sys::napi_value> {
    let mut result = ptr::null_mut();
    // SAFETY: [DH] - args is valid for args.len() values and every handle belongs to env
    let status =
        unsafe { sys::napi_call_function(env, receiver, function, args.len(), args.as_ptr(), &raw mut result) };
    check(status, "napi_call_function")?;
    Ok(result)
}

/// ECMAScript ToPrimitive with the "number" hint.
unsafe fn to_primitive(env: sys::napi_env, object: sys::napi_value) -> CallResult<sys::napi_value> {
    let mut global = ptr::null_mut();
    // SAFETY: [DH] - env is valid
    let status = unsafe { sys::napi_get_global(env, &raw mut global) };
    check(status, "napi_get_global")?;
    // SAFETY: [DH] - global and the Symbol constructor belong to env
    let to_primitive_key = unsafe { get_named(env, get_named(env, global, c"Symbol")?, c"toPrimitive") }?;

    let mut exotic = ptr::null_mut();
    // SAFETY: [DH] - object and key belong to env
    let status = unsafe { sys::napi_get_property(env, object, to_primitive_key, &raw mut exotic) };
    check(status, "napi_get_property")?;
    // SAFETY: [DH] - exotic was just read from object
    match unsafe { type_of(env, exotic) }? {
        sys::ValueType::napi_undefined | sys::ValueType::napi_null => {}
        sys::ValueType::napi_function => {
            // SAFETY: [DH] - env is valid
            let hint = unsafe { create_string(env, "number") }?;
            // SAFETY: [DH] - exotic is callable and all handles belong to env
            let result = unsafe { call_function(env, object, exotic, &[hint]) }?;
            // SAFETY: [DH] - result was just returned by the call
            if unsafe { is_object(env, result) }? {
                return Err(BridgeError::Type(CANNOT_CONVERT_OBJECT).into());
            }
            return Ok(result);
        }
        _ => return Err(BridgeError::Type(CANNOT_CONVERT_OBJECT).into()),
    }

    for method_name in [c"valueOf", c"toString"] {
        // SAFETY: [DH] - object belongs to env
        let method = unsafe { get_named(env, object, method_name) }?;
        // SAFETY: [DH] - method was just read from object
        if unsafe { type_of(env, method) }? != sys::ValueType::napi_function {
            continue;
        }
        // SAFETY: [DH] - method is callable and both handles belong to env
        let result = unsafe { call_function(env, object, method, &[]) }?;
        // SAFETY: [DH] - result was just returned by the call
        if !unsafe { is_object(env, result) }? {
            return Ok(result);
        }
    }
    Err(BridgeError::Type(CANNOT_CONVERT_OBJECT).into())
}

unsafe fn read_string(env: sys::napi_env, value: sys::napi_value) -> Result<String> {
    let mut len = 0;
    // SAFETY: [DH] - a null buffer asks for the length only
    let status = unsafe { sys::napi_get_value_string_utf8(env, value, ptr::null_mut(), 0, &raw mut len) };
    check(status, "napi_get_value_string_utf8")?;
    // room for the terminating NUL napi always writes
    let mut buf = vec![0u8; len + 1];
    let mut written = 0;
    // SAFETY: [DH] - buf has len + 1 bytes
    let status = unsafe {
        sys::napi_get_value_string_utf8(
            env,
            value,
            buf.as_mut_ptr().cast::<c_char>(),
            buf.len(),
            &raw mut written,
        )
    };
    check(status, "napi_get_value_string_utf8")?;
    buf.truncate(written);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

unsafe fn read_bigint(env: sys::napi_env, value: sys::napi_value) -> Result<num_bigint::BigInt> {
    let mut word_count = 0;
    // SAFETY: [DH] - null sign and word pointers ask for the word count only
    let status = unsafe {
        sys::napi_get_value_bigint_words(env, value, ptr::null_mut(), &raw mut word_count, ptr::null_mut())
    };
    check(status, "napi_get_value_bigint_words")?;
    let mut sign_bit: c_int = 0;
    let mut words = vec![0u64; word_count];
    // SAFETY: [DH] - words has room for word_count entries
    let status = unsafe {
        sys::napi_get_value_bigint_words(
            env,
            value,
            &raw mut sign_bit,
            &raw mut word_count,
            words.as_mut_ptr(),
        )
    };
    check(status, "napi_get_value_bigint_words")?;
    Ok(bigint_from_words(sign_bit != 0, &words))
}

unsafe fn read_array_buffer(env: sys::napi_env, value: sys::napi_value) -> Result<Option<BufferView>> {
    let mut is_array_buffer = false;
    // SAFETY: [DH] - value is an object
    let status = unsafe { sys::napi_is_arraybuffer(env, value, &raw mut is_array_buffer) };
    check(status, "napi_is_arraybuffer")?;
    if !is_array_buffer {
        return Ok(None);
    }
    let mut data = ptr::null_mut();
    let mut byte_length = 0;
    // SAFETY: [DH] - value is an ArrayBuffer
    let status = unsafe { sys::napi_get_arraybuffer_info(env, value, &raw mut data, &raw mut byte_length) };
    check(status, "napi_get_arraybuffer_info")?;
    Ok(Some(BufferView::new(data.expose_provenance(), byte_length)))
}

/// Creates the JavaScript value returned to the caller.
///
/// Buffer views become external `ArrayBuffer`s with no finalizer: the memory is
/// neither copied nor freed when the buffer is collected.
///
/// # Safety
///
/// `env` must be valid for the current callback scope, and any buffer view must stay
/// mapped for as long as JavaScript can reach the resulting `ArrayBuffer`.
pub(crate) unsafe fn host_to_js(env: sys::napi_env, value: &HostValue) -> Result<sys::napi_value> {
    let mut result = ptr::null_mut();
    let status = match value {
        // SAFETY: [DH] - env is valid and result is valid on success
        HostValue::Undefined => unsafe { sys::napi_get_undefined(env, &raw mut result) },
        // SAFETY: [DH] - as above
        HostValue::Null => unsafe { sys::napi_get_null(env, &raw mut result) },
        // SAFETY: [DH] - as above
        HostValue::Bool(b) => unsafe { sys::napi_get_boolean(env, *b, &raw mut result) },
        // SAFETY: [DH] - as above
        HostValue::Number(n) => unsafe { sys::napi_create_double(env, *n, &raw mut result) },
        // SAFETY: [DH] - as above
        HostValue::String(s) => return unsafe { create_string(env, s) },
        HostValue::BigInt(b) => {
            let (negative, words) = bigint_to_words(b);
            // SAFETY: [DH] - words is valid for words.len() entries
            unsafe {
                sys::napi_create_bigint_words(
                    env,
                    c_int::from(negative),
                    words.len(),
                    words.as_ptr(),
                    &raw mut result,
                )
            }
        }
        // SAFETY: [DH] - the caller keeps the viewed range mapped
        HostValue::Buffer(view) => unsafe {
            sys::napi_create_external_arraybuffer(
                env,
                view.as_mut_ptr().cast(),
                view.len(),
                None,
                ptr::null_mut(),
                &raw mut result,
            )
        },
        HostValue::Symbol | HostValue::Object => {
            return Err(Error::from_reason(format!(
                "cannot return a {} to JavaScript",
                value.type_name()
            )));
        }
    };
    check(status, "creating return value")?;
    Ok(result)
}

/// Creates a JavaScript string.
///
/// # Safety
///
/// `env` must be valid for the current callback scope.
pub(crate) unsafe fn create_string(env: sys::napi_env, s: &str) -> Result<sys::napi_value> {
    let mut result = ptr::null_mut();
    let len = s
        .len()
        .try_into()
        .map_err(|_| Error::from_reason("string too long"))?;
    // SAFETY: [DH] - s is valid for len bytes and result is valid on success
    let status = unsafe { sys::napi_create_string_utf8(env, s.as_ptr().cast::<c_char>(), len, &raw mut result) };
    check(status, "napi_create_string_utf8")?;
    Ok(result)
}

/// Sets `object[name] = value` as a plain data property.
///
/// # Safety
///
/// `object` and `value` must belong to `env`.
pub(crate) unsafe fn set_named(
    env: sys::napi_env,
    object: sys::napi_value,
    name: &CStr,
    value: sys::napi_value,
) -> Result<()> {
    // SAFETY: [DH] - name is a valid C string and both values belong to env
    let status = unsafe { sys::napi_set_named_property(env, object, name.as_ptr(), value) };
    check(status, "napi_set_named_property")
}
