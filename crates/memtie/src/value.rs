//! Host values and the typed parsing functions that coerce them to native types.
//!
//! A binding converts each dynamic argument into a [`HostValue`] once; from then on the
//! bridge only deals with the parsers below, each returning either the native value or
//! the exact [`BridgeError`] kind the host should raise.
//!
//! The conversions follow ECMAScript semantics (ToNumber, ToInt32, ToUint32, ToBigInt,
//! ToString) because the only host binding is Node.js.

use std::{ffi::c_void, fmt};

use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};

use crate::error::{BridgeError, BridgeResult};

/// Error message for values that cannot become an int32.
pub const EXPECTED_INT32: &str = "Expected an int32";
/// Error message for values that cannot become an address.
pub const EXPECTED_ADDRESS: &str = "Expected an address";
/// Error message for values that are not buffer views.
pub const EXPECTED_BUFFER: &str = "Expected an ArrayBuffer";
/// Error message for wide integers that do not fit the native type.
pub const OUT_OF_RANGE: &str = "Out of range";

/// A dynamic value received from (or returned to) the host runtime.
#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    #[strum(serialize = "bigint")]
    BigInt(BigInt),
    String(String),
    /// A buffer view such as an `ArrayBuffer`.
    #[strum(serialize = "arraybuffer")]
    Buffer(BufferView),
    Symbol,
    /// Any other object; only its primitive coercions matter here.
    Object,
}

/// A contiguous memory region exposed to the host without ownership.
///
/// A view is only an address/length pair: creating one is safe, reading through it
/// is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferView {
    address: usize,
    len: usize,
}

impl BufferView {
    #[must_use]
    pub const fn new(address: usize, len: usize) -> Self {
        Self { address, len }
    }

    /// Describes an existing slice, exposing its provenance so the address can be
    /// turned back into a pointer later.
    #[must_use]
    pub fn from_slice(slice: &mut [u8]) -> Self {
        Self {
            address: slice.as_mut_ptr().expose_provenance(),
            len: slice.len(),
        }
    }

    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        std::ptr::with_exposed_provenance_mut(self.address)
    }

    /// Borrows the viewed memory.
    ///
    /// # Safety
    ///
    /// `[address, address + len)` must be mapped, readable and not mutated through
    /// another path for the lifetime `'a`.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: [DH] - the caller guarantees the range is mapped and readable
        unsafe { std::slice::from_raw_parts(self.as_mut_ptr(), self.len) }
    }

    /// Mutably borrows the viewed memory.
    ///
    /// # Safety
    ///
    /// `[address, address + len)` must be mapped, writable and not accessed through
    /// another path for the lifetime `'a`.
    #[must_use]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: [DH] - the caller guarantees exclusive access to a writable range
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }
}

impl HostValue {
    /// Wraps a native address as the wide integer the host receives.
    #[must_use]
    pub fn address(address: usize) -> Self {
        Self::BigInt(BigInt::from(address))
    }

    /// The host-facing type name, e.g. `"number"` or `"bigint"`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.into()
    }

    /// Coerces to a 32-bit signed integer using standard numeric conversion.
    pub fn to_int32(&self) -> BridgeResult<i32> {
        let number = match self {
            Self::Number(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Null => 0.0,
            Self::Undefined | Self::Buffer(_) | Self::Object => f64::NAN,
            Self::String(s) => string_to_number(s),
            Self::BigInt(_) | Self::Symbol => {
                log::trace!("cannot coerce {} to int32", self.type_name());
                return Err(BridgeError::Type(EXPECTED_INT32));
            }
        };
        Ok(number_to_int32(number))
    }

    /// Coerces to a native pointer-width unsigned integer.
    ///
    /// Numbers go through unsigned 32-bit conversion. BigInts, and values the host
    /// would coerce to one, must fit `usize` exactly or the call fails with a range
    /// error.
    pub fn parse_address(&self) -> BridgeResult<usize> {
        match self {
            Self::Number(n) => Ok(number_to_uint32(*n) as usize),
            Self::BigInt(b) => bigint_to_usize(b),
            Self::Bool(b) => Ok(usize::from(*b)),
            Self::String(s) => match string_to_bigint(s) {
                Some(b) => bigint_to_usize(&b),
                None => Err(BridgeError::Type(EXPECTED_ADDRESS)),
            },
            Self::Undefined | Self::Null | Self::Buffer(_) | Self::Symbol | Self::Object => {
                log::trace!("cannot coerce {} to an address", self.type_name());
                Err(BridgeError::Type(EXPECTED_ADDRESS))
            }
        }
    }

    /// Coerces to a byte length. Same rules as [`HostValue::parse_address`].
    pub fn parse_size(&self) -> BridgeResult<usize> {
        self.parse_address()
    }

    /// Coerces to a file offset; it must additionally fit `off_t`.
    pub fn parse_offset(&self) -> BridgeResult<libc::off_t> {
        let offset = self.parse_address()?;
        libc::off_t::try_from(offset).map_err(|_| BridgeError::Range(OUT_OF_RANGE))
    }

    /// Reinterprets an address as a native pointer. The address is not validated.
    pub fn parse_pointer(&self) -> BridgeResult<*mut c_void> {
        self.parse_address().map(std::ptr::with_exposed_provenance_mut)
    }

    /// Returns the buffer view, or a type error for anything else.
    pub fn as_buffer(&self) -> BridgeResult<BufferView> {
        match self {
            Self::Buffer(view) => Ok(*view),
            _ => Err(BridgeError::Type(EXPECTED_BUFFER)),
        }
    }

    /// Converts to text the way the host stringifies values.
    pub fn to_text(&self) -> BridgeResult<String> {
        match self {
            Self::Symbol => Err(BridgeError::Type("Cannot convert a Symbol value to a string")),
            other => Ok(other.to_string()),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write_number(f, *n),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::String(s) => f.write_str(s),
            Self::Buffer(_) => f.write_str("[object ArrayBuffer]"),
            Self::Symbol => f.write_str("Symbol()"),
            Self::Object => f.write_str("[object Object]"),
        }
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<BigInt> for HostValue {
    fn from(value: BigInt) -> Self {
        Self::BigInt(value)
    }
}

impl From<BufferView> for HostValue {
    fn from(value: BufferView) -> Self {
        Self::Buffer(value)
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        // covers -0 too
        f.write_str("0")
    } else {
        write!(f, "{n}")
    }
}

fn bigint_to_usize(value: &BigInt) -> BridgeResult<usize> {
    u64::try_from(value)
        .ok()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| {
            log::trace!("bigint {value} does not fit a native address");
            BridgeError::Range(OUT_OF_RANGE)
        })
}

/// ECMAScript ToInt32.
#[must_use]
#[expect(clippy::cast_possible_truncation, reason = "value is reduced modulo 2^32 first")]
#[expect(clippy::cast_sign_loss, reason = "value is non-negative after rem_euclid")]
pub fn number_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    (wrapped as u32).cast_signed()
}

/// ECMAScript ToUint32.
#[must_use]
#[expect(clippy::cast_possible_truncation, reason = "value is reduced modulo 2^32 first")]
#[expect(clippy::cast_sign_loss, reason = "value is non-negative after rem_euclid")]
pub fn number_to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Rebuilds a BigInt from little-endian 64-bit magnitude words and a sign, the layout
/// hosts use to hand over wide integers.
#[must_use]
pub fn bigint_from_words(negative: bool, words: &[u64]) -> BigInt {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_bytes_le(sign, &bytes)
}

/// Splits a BigInt into its sign and little-endian 64-bit magnitude words.
///
/// Zero has no words and is never negative.
#[must_use]
pub fn bigint_to_words(value: &BigInt) -> (bool, Vec<u64>) {
    let (sign, words) = value.to_u64_digits();
    (sign == Sign::Minus, words)
}

/// ECMAScript WhiteSpace and LineTerminator: Unicode `White_Space` minus U+0085, plus
/// the byte order mark.
fn is_js_whitespace(c: char) -> bool {
    (c.is_whitespace() && c != '\u{85}') || c == '\u{feff}'
}

/// Splits a `0x`/`0o`/`0b` prefix off, returning the radix and the digits.
fn split_radix(s: &str) -> Option<(u32, &str)> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'0' {
        return None;
    }
    let radix = match bytes[1] {
        b'x' | b'X' => 16,
        b'o' | b'O' => 8,
        b'b' | b'B' => 2,
        _ => return None,
    };
    Some((radix, &s[2..]))
}

fn parse_digits(digits: &str, radix: u32) -> Option<BigInt> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

/// ECMAScript StringToNumber. Invalid input yields NaN.
#[must_use]
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return 0.0;
    }
    if let Some((radix, digits)) = split_radix(s) {
        return parse_digits(digits, radix).and_then(|b| b.to_f64()).unwrap_or(f64::NAN);
    }
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned == "Infinity" {
        return if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    // rust also accepts "inf" and "nan", the host does not
    if !unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// ECMAScript StringToBigInt. Returns `None` where the host would throw.
#[must_use]
pub fn string_to_bigint(s: &str) -> Option<BigInt> {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return Some(BigInt::zero());
    }
    if let Some((radix, digits)) = split_radix(s) {
        return parse_digits(digits, radix);
    }
    let (negative, digits) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let value = parse_digits(digits, 10)?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_wraps_modulo_2_pow_32() {
        assert_eq!(number_to_int32(4_294_967_295.0), -1);
        assert_eq!(number_to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(number_to_int32(-1.9), -1);
        assert_eq!(number_to_int32(f64::NAN), 0);
        assert_eq!(number_to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn uint32_wraps_negative_numbers() {
        assert_eq!(number_to_uint32(-1.0), u32::MAX);
        assert_eq!(number_to_uint32(4_294_967_301.0), 5);
        assert_eq!(number_to_uint32(12.7), 12);
    }

    #[test]
    fn string_to_number_follows_host_rules() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn string_to_bigint_rejects_fractions() {
        assert_eq!(string_to_bigint("0xff"), Some(BigInt::from(255)));
        assert_eq!(string_to_bigint("-7"), Some(BigInt::from(-7)));
        assert_eq!(string_to_bigint(" "), Some(BigInt::zero()));
        assert_eq!(string_to_bigint("1.5"), None);
        assert_eq!(string_to_bigint("1_000"), None);
        assert_eq!(string_to_bigint("-0x1"), None);
    }

    #[test]
    fn host_whitespace_is_trimmed() {
        assert_eq!(string_to_number("\u{feff}42"), 42.0);
        assert_eq!(string_to_number("\u{a0}7\u{2028}"), 7.0);
        assert!(string_to_number("\u{85}1").is_nan());
        assert_eq!(string_to_bigint("\u{feff}0x10\u{3000}"), Some(BigInt::from(16)));
        assert_eq!(string_to_bigint("\u{85}1"), None);
    }

    #[test]
    fn number_display_matches_host() {
        assert_eq!(HostValue::Number(3.0).to_string(), "3");
        assert_eq!(HostValue::Number(-0.0).to_string(), "0");
        assert_eq!(HostValue::Number(0.5).to_string(), "0.5");
        assert_eq!(HostValue::Number(f64::NAN).to_string(), "NaN");
    }
}
