//! Tests for the argument coercion rules applied to host values.

use memtie::{
    BridgeError, BufferView, EXPECTED_ADDRESS, EXPECTED_INT32, HostValue, OUT_OF_RANGE, bigint_from_words,
    bigint_to_words,
};
use num_bigint::BigInt;
use pretty_assertions::assert_eq;

fn big(n: impl Into<BigInt>) -> HostValue {
    HostValue::BigInt(n.into())
}

// =============================================================================
// int32
// =============================================================================

#[test]
fn int32_from_primitives() {
    let cases = [
        (HostValue::Number(7.9), 7),
        (HostValue::Number(-7.9), -7),
        (HostValue::Number(4_294_967_296.0 + 3.0), 3),
        (HostValue::Bool(true), 1),
        (HostValue::Null, 0),
        (HostValue::Undefined, 0),
        (HostValue::from("0x20"), 32),
        (HostValue::from(" -12 "), -12),
        (HostValue::from("nope"), 0),
        (HostValue::Object, 0),
        (HostValue::Buffer(BufferView::new(0x1000, 1)), 0),
    ];
    for (value, expected) in cases {
        assert_eq!(value.to_int32(), Ok(expected), "coercing {value:?}");
    }
}

#[test]
fn int32_rejects_bigint_and_symbol() {
    assert_eq!(big(1).to_int32(), Err(BridgeError::Type(EXPECTED_INT32)));
    assert_eq!(HostValue::Symbol.to_int32(), Err(BridgeError::Type(EXPECTED_INT32)));
}

// =============================================================================
// address / size
// =============================================================================

#[test]
fn numbers_use_unsigned_32_bit_conversion() {
    assert_eq!(HostValue::Number(4096.0).parse_address(), Ok(4096));
    assert_eq!(HostValue::Number(-1.0).parse_address(), Ok(u32::MAX as usize));
    assert_eq!(HostValue::Number(4_294_967_296.0 + 8.0).parse_size(), Ok(8));
    assert_eq!(HostValue::Number(f64::NAN).parse_size(), Ok(0));
}

#[test]
fn bigints_must_fit_losslessly() {
    assert_eq!(big(usize::MAX).parse_address(), Ok(usize::MAX));
    assert_eq!(big(0).parse_address(), Ok(0));
    assert_eq!(
        HostValue::BigInt(BigInt::from(usize::MAX) + 1).parse_address(),
        Err(BridgeError::Range(OUT_OF_RANGE))
    );
    assert_eq!(big(-1).parse_size(), Err(BridgeError::Range(OUT_OF_RANGE)));
}

#[test]
fn strings_with_host_whitespace_coerce() {
    assert_eq!(HostValue::from("\u{feff}42").to_int32(), Ok(42));
    assert_eq!(HostValue::from("\u{feff}0x1000\n").parse_address(), Ok(0x1000));
}

#[test]
fn bigint_coercible_values_are_accepted() {
    assert_eq!(HostValue::Bool(true).parse_address(), Ok(1));
    assert_eq!(HostValue::from("0x7fff0000").parse_address(), Ok(0x7fff_0000));
    assert_eq!(HostValue::from("").parse_address(), Ok(0));
    assert_eq!(
        HostValue::from("-5").parse_address(),
        Err(BridgeError::Range(OUT_OF_RANGE))
    );
    assert_eq!(
        HostValue::from("4096.5").parse_address(),
        Err(BridgeError::Type(EXPECTED_ADDRESS))
    );
}

#[test]
fn non_numeric_values_are_not_addresses() {
    for value in [
        HostValue::Undefined,
        HostValue::Null,
        HostValue::Symbol,
        HostValue::Object,
        HostValue::Buffer(BufferView::new(1, 1)),
    ] {
        assert_eq!(value.parse_address(), Err(BridgeError::Type(EXPECTED_ADDRESS)), "{value:?}");
    }
}

#[test]
fn pointer_is_the_address_reinterpreted() {
    let pointer = big(0xdead_b000u32).parse_pointer().unwrap();
    assert_eq!(pointer.addr(), 0xdead_b000);
}

#[test]
fn offset_must_fit_off_t() {
    assert_eq!(big(4096).parse_offset(), Ok(4096));
    #[cfg(target_pointer_width = "64")]
    assert_eq!(big(u64::MAX).parse_offset(), Err(BridgeError::Range(OUT_OF_RANGE)));
}

// =============================================================================
// text and buffers
// =============================================================================

#[test]
fn text_conversion_stringifies() {
    assert_eq!(HostValue::from("memfd").to_text().unwrap(), "memfd");
    assert_eq!(HostValue::Number(12.0).to_text().unwrap(), "12");
    assert_eq!(HostValue::Bool(false).to_text().unwrap(), "false");
    assert_eq!(HostValue::Undefined.to_text().unwrap(), "undefined");
    assert_eq!(big(-3).to_text().unwrap(), "-3");
    assert!(HostValue::Symbol.to_text().is_err());
}

#[test]
fn type_names() {
    assert_eq!(HostValue::Number(1.0).type_name(), "number");
    assert_eq!(big(1).type_name(), "bigint");
    assert_eq!(HostValue::Buffer(BufferView::new(0, 0)).type_name(), "arraybuffer");
    assert_eq!(HostValue::Undefined.type_name(), "undefined");
}

#[test]
fn address_values_are_bigints() {
    assert_eq!(HostValue::address(0x1000), big(0x1000));
}

// =============================================================================
// bigint words
// =============================================================================

#[test]
fn bigint_words_keep_sign_and_width() {
    assert_eq!(bigint_from_words(false, &[u64::MAX, 1]), (BigInt::from(1) << 64) + u64::MAX);
    assert_eq!(bigint_from_words(true, &[5]), BigInt::from(-5));
    // -0n collapses to zero
    assert_eq!(bigint_from_words(true, &[]), BigInt::from(0));
    assert_eq!(bigint_from_words(true, &[0, 0]), BigInt::from(0));

    assert_eq!(bigint_to_words(&BigInt::from(-5)), (true, vec![5]));
    assert_eq!(bigint_to_words(&BigInt::from(0)), (false, vec![]));
    assert_eq!(
        bigint_to_words(&-((BigInt::from(1) << 64_u32) + 2_u64)),
        (true, vec![2, 1])
    );
}

#[test]
fn negative_bigint_words_are_not_addresses() {
    let value = HostValue::BigInt(bigint_from_words(true, &[4096]));
    assert_eq!(value.parse_address(), Err(BridgeError::Range(OUT_OF_RANGE)));
}
