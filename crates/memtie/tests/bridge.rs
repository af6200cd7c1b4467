//! Tests for the host-facing bridge.
//!
//! Every call goes through `Bridge::call` with `HostValue` arguments, exactly as a
//! binding would drive it.

use memtie::{
    Bridge, BridgeError, BridgeFunction, CallEvent, ErrorKind, HostValue, OUT_OF_RANGE, RecordingTracer, Syscall,
    sys,
};
use nix::errno::Errno;
use num_bigint::BigInt;
use pretty_assertions::assert_eq;

const PAGE: usize = 4096;

fn call(function: BridgeFunction, args: &[HostValue]) -> Result<HostValue, BridgeError> {
    // SAFETY: tests only pass addresses they mapped themselves, or invalid ones that
    // the kernel rejects
    unsafe { Bridge::untraced().call(function, args) }
}

fn num(n: impl Into<f64>) -> HostValue {
    HostValue::Number(n.into())
}

fn big(n: impl Into<BigInt>) -> HostValue {
    HostValue::BigInt(n.into())
}

fn constant(name: &str) -> HostValue {
    num(memtie::constants::lookup(name).unwrap())
}

fn prot_rw() -> HostValue {
    num(libc::PROT_READ | libc::PROT_WRITE)
}

fn anon_private() -> HostValue {
    num(libc::MAP_PRIVATE | libc::MAP_ANONYMOUS)
}

fn as_address(value: &HostValue) -> usize {
    match value {
        HostValue::BigInt(b) => usize::try_from(b).unwrap(),
        other => panic!("expected a BigInt address, got {other:?}"),
    }
}

fn as_fd(value: &HostValue) -> i32 {
    match value {
        HostValue::Number(n) => {
            assert_eq!(n.fract(), 0.0);
            memtie::number_to_int32(*n)
        }
        other => panic!("expected a numeric fd, got {other:?}"),
    }
}

// =============================================================================
// openMemFD
// =============================================================================

#[test]
fn open_memfd_returns_non_negative_fd() {
    let result = call(BridgeFunction::OpenMemFd, &["test".into(), constant("MFD_CLOEXEC")]).unwrap();
    let fd = as_fd(&result);
    assert!(fd >= 0, "fd should be non-negative, got {fd}");
    sys::close(fd).unwrap();
}

#[test]
fn open_memfd_accepts_non_string_name() {
    let result = call(BridgeFunction::OpenMemFd, &[num(42), num(0)]).unwrap();
    sys::close(as_fd(&result)).unwrap();
}

#[test]
fn open_memfd_invalid_flags_reports_einval() {
    let err = call(BridgeFunction::OpenMemFd, &["test".into(), num(-1)]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Os {
            errno: Errno::EINVAL,
            syscall: Syscall::MemfdCreate,
        }
    );
    assert_eq!(err.kind(), ErrorKind::OsError);
}

#[test]
fn os_errors_carry_errno_code_and_message() {
    let err = call(
        BridgeFunction::Map,
        &[num(0), num(PAGE as u32), prot_rw(), constant("MAP_SHARED"), num(9999), num(0)],
    )
    .unwrap_err();
    assert_eq!(err.code().as_deref(), Some("EBADF"));
    assert_eq!(err.host_message(), format!("EBADF, {}", Errno::EBADF.desc()));
    assert_eq!(err.to_string(), format!("mmap: {}", err.host_message()));
}

#[test]
fn only_arity_and_os_errors_have_codes() {
    let err = call(BridgeFunction::Unmap, &[num(0)]).unwrap_err();
    assert_eq!(err.code().as_deref(), Some(memtie::WRONG_ARG_COUNT));
    assert_eq!(
        err.host_message(),
        "Wrong number of arguments: unmap() takes 2 but 1 were given"
    );
    assert_eq!(BridgeError::Type(memtie::EXPECTED_INT32).code(), None);
    assert_eq!(BridgeError::Range(OUT_OF_RANGE).code(), None);
    assert_eq!(BridgeError::Range(OUT_OF_RANGE).host_message(), "Out of range");
}

#[test]
fn open_memfd_rejects_bigint_flags() {
    let err = call(BridgeFunction::OpenMemFd, &["test".into(), big(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn open_memfd_truncates_name_at_nul() {
    let fd = memtie::open_memfd("before\0after", 0).unwrap();
    let link = std::fs::read_link(format!("/proc/self/fd/{fd}")).unwrap();
    assert_eq!(link.to_string_lossy(), "/memfd:before (deleted)");
    sys::close(fd).unwrap();
}

// =============================================================================
// map / unmap
// =============================================================================

#[test]
fn map_then_unmap_anonymous_region() {
    let addr = call(
        BridgeFunction::Map,
        &[num(0), num(4 * PAGE as u32), prot_rw(), anon_private(), num(-1), num(0)],
    )
    .unwrap();
    let address = as_address(&addr);
    assert_ne!(address, 0);
    assert_eq!(address % PAGE, 0);

    let result = call(BridgeFunction::Unmap, &[addr, num(4 * PAGE as u32)]).unwrap();
    assert_eq!(result, HostValue::Undefined);
}

#[test]
fn map_returns_full_width_address() {
    let addr = call(
        BridgeFunction::Map,
        &[num(0), num(PAGE as u32), prot_rw(), anon_private(), num(-1), num(0)],
    )
    .unwrap();
    let address = as_address(&addr);
    // on 64-bit linux mappings live far above 4 GiB, so a 32-bit result would be truncated
    #[cfg(target_pointer_width = "64")]
    assert!(address > u32::MAX as usize, "address {address:#x} looks truncated");
    call(BridgeFunction::Unmap, &[big(address), num(PAGE as u32)]).unwrap();
}

#[test]
fn map_shared_with_bad_fd_reports_ebadf() {
    let err = call(
        BridgeFunction::Map,
        &[num(0), num(PAGE as u32), prot_rw(), constant("MAP_SHARED"), num(9999), num(0)],
    )
    .unwrap_err();
    assert_eq!(err.errno(), Some(Errno::EBADF));
    assert_eq!(err.syscall(), Some(Syscall::Mmap));
}

#[test]
fn map_memfd_shares_pages_between_mappings() {
    let fd = memtie::open_memfd("shared", 0).unwrap();
    sys::ftruncate(fd, PAGE as libc::off_t).unwrap();
    let args = [
        num(0),
        num(PAGE as u32),
        prot_rw(),
        constant("MAP_SHARED"),
        num(fd),
        num(0),
    ];
    let first = as_address(&call(BridgeFunction::Map, &args).unwrap());
    let second = as_address(&call(BridgeFunction::Map, &args).unwrap());
    assert_ne!(first, second);

    // SAFETY: both addresses are live read/write mappings of one page
    unsafe {
        let a = memtie::alias(first, PAGE).as_mut_slice();
        let b = memtie::alias(second, PAGE).as_slice();
        a[10] = 7;
        assert_eq!(b[10], 7);
    }

    call(BridgeFunction::Unmap, &[big(first), num(PAGE as u32)]).unwrap();
    call(BridgeFunction::Unmap, &[big(second), num(PAGE as u32)]).unwrap();
    sys::close(fd).unwrap();
}

#[test]
fn unmap_unaligned_address_reports_einval() {
    let err = call(BridgeFunction::Unmap, &[num(1), num(PAGE as u32)]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Os {
            errno: Errno::EINVAL,
            syscall: Syscall::Munmap,
        }
    );
}

#[test]
fn map_offset_beyond_off_t_is_range_error() {
    let err = call(
        BridgeFunction::Map,
        &[num(0), num(PAGE as u32), prot_rw(), anon_private(), num(-1), big(u64::MAX)],
    )
    .unwrap_err();
    assert_eq!(err, BridgeError::Range(OUT_OF_RANGE));
}

// =============================================================================
// alias / bufferData
// =============================================================================

#[test]
fn buffer_data_round_trips_alias() {
    for (address, length) in [(0usize, 0usize), (0x1000, 16), (usize::MAX, 0), (0x7fff_0000_1234, 1 << 20)] {
        let view = call(BridgeFunction::Alias, &[big(address), big(length)]).unwrap();
        let HostValue::Buffer(buffer) = &view else {
            panic!("alias should return a buffer view, got {view:?}");
        };
        assert_eq!(buffer.len(), length);
        let round_trip = call(BridgeFunction::BufferData, &[view]).unwrap();
        assert_eq!(round_trip, big(address));
    }
}

#[test]
fn alias_does_not_copy() {
    let mut data = vec![1u8, 2, 3, 4];
    let address = data.as_mut_ptr().expose_provenance();
    let view = call(BridgeFunction::Alias, &[big(address), num(4)]).unwrap();
    let view = view.as_buffer().unwrap();
    // SAFETY: `data` outlives the view and is not touched while the slice is live
    unsafe { view.as_mut_slice()[0] = 9 };
    assert_eq!(data[0], 9);
}

#[test]
fn buffer_data_rejects_non_buffers() {
    for value in [num(0), big(0), "buf".into(), HostValue::Null, HostValue::Object] {
        let err = call(BridgeFunction::BufferData, &[value]).unwrap_err();
        assert_eq!(err, BridgeError::Type(memtie::EXPECTED_BUFFER));
    }
}

#[test]
fn alias_bigint_out_of_range() {
    let too_big = BigInt::from(u64::MAX) + 1;
    let err = call(BridgeFunction::Alias, &[big(too_big), num(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RangeError);

    let err = call(BridgeFunction::Alias, &[big(-1), num(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RangeError);
}

// =============================================================================
// arity
// =============================================================================

#[test]
fn wrong_arity_is_argument_error() {
    for function in BridgeFunction::ALL {
        for count in [0, function.arity() - 1, function.arity() + 1] {
            let args = vec![num(0); count];
            let err = call(function, &args).unwrap_err();
            assert_eq!(
                err,
                BridgeError::Argument {
                    function,
                    expected: function.arity(),
                    actual: count,
                }
            );
        }
    }
}

#[test]
fn wrong_arity_wins_over_bad_values() {
    // a symbol would be a type error, but arity is checked first
    let err = call(BridgeFunction::OpenMemFd, &[HostValue::Symbol]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentError);
}

#[test]
fn wrong_arity_never_reaches_the_os() {
    let mut bridge = Bridge::new(RecordingTracer::new());
    // MAP_FIXED at address 0x1000 would fail loudly if it were ever attempted
    let args = [num(PAGE as u32), num(PAGE as u32), prot_rw(), num(libc::MAP_FIXED)];
    // SAFETY: the call is rejected before any mapping happens
    let err = unsafe { bridge.call(BridgeFunction::Map, &args) }.unwrap_err();
    assert_eq!(err.errno(), None);
    let events = bridge.into_tracer().into_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[1],
        CallEvent::Error {
            function: BridgeFunction::Map,
            error: BridgeError::Argument { actual: 4, .. },
        }
    ));
}

// =============================================================================
// tracing
// =============================================================================

#[test]
fn recording_tracer_sees_calls_and_results() {
    let mut bridge = Bridge::new(RecordingTracer::new());
    // SAFETY: alias/bufferData never dereference the address
    let view = unsafe { bridge.call(BridgeFunction::Alias, &[num(0x2000), num(8)]) }.unwrap();
    // SAFETY: as above
    let _ = unsafe { bridge.call(BridgeFunction::BufferData, &[num(1)]) };
    assert_eq!(bridge.tracer().error_count(), 1);
    assert_eq!(
        bridge.tracer().events()[..2].to_vec(),
        vec![
            CallEvent::Call {
                function: BridgeFunction::Alias,
                args: vec![num(0x2000), num(8)],
            },
            CallEvent::Return {
                function: BridgeFunction::Alias,
                value: view,
            },
        ]
    );
}

#[test]
fn function_names_match_exports() {
    let names: Vec<&str> = BridgeFunction::ALL.iter().map(|f| f.name()).collect();
    assert_eq!(names, ["openMemFD", "alias", "map", "unmap", "bufferData"]);
    assert_eq!("bufferData".parse::<BridgeFunction>().unwrap(), BridgeFunction::BufferData);
    assert_eq!(BridgeFunction::Map.syscall(), Some(Syscall::Mmap));
    assert_eq!(BridgeFunction::Alias.syscall(), None);
}
