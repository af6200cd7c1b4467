#![doc = include_str!("../../../README.md")]

mod bridge;
pub mod constants;
mod error;
pub mod sys;
pub mod tie;
pub mod tracer;
mod value;

pub use crate::{
    bridge::{Bridge, BridgeFunction, alias, buffer_address, map, open_memfd, unmap},
    constants::{CONSTANTS, Constant, ConstantGroup},
    error::{BridgeError, BridgeResult, ErrorKind, WRONG_ARG_COUNT},
    sys::Syscall,
    tie::{MemFdBuffer, Tie, TieError},
    tracer::{CallEvent, CallTracer, NoopTracer, RecordingTracer, StderrTracer},
    value::{
        BufferView, EXPECTED_ADDRESS, EXPECTED_BUFFER, EXPECTED_INT32, HostValue, OUT_OF_RANGE, bigint_from_words,
        bigint_to_words, number_to_int32, number_to_uint32, string_to_bigint, string_to_number,
    },
};
