//! Crate-wide error types.
//!
//! Per spec: parsers are total functions over their input. A malformed
//! field or message never propagates an error past the sentence/frame
//! boundary it occurred in -- it leaves a sentinel (`None`) in the
//! affected fix field instead. The error types here are used for the
//! small set of operations that *do* have a meaningful failure mode:
//! out-of-range buffer reads, checksum/CRC/parity mismatches the lexer
//! needs to see in order to decide whether to shift or resync, and
//! malformed framing the lexer itself rejects before a parser ever runs.

use thiserror::Error;

/// Error from the bit/byte extractors (spec.md 4.1).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BitsError {
    #[error("out of range: offset {offset} + width {width} > buffer length {len}")]
    OutOfRange {
        offset: usize,
        width: usize,
        len: usize,
    },
}

/// Error from the ISGPS 30-bit transport (spec.md 4.3).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum IsgpsError {
    #[error("input octet tag bits were not 0b10")]
    BadTag,
    #[error("parity check failed")]
    ParityFail,
    #[error("word buffer overflowed before message completed")]
    Overflow,
}

/// Error surfaced by a single-sentence/frame NMEA decode. These are
/// caught at the dispatch boundary and never abort a session.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NmeaError {
    #[error("sentence does not start with $ or !")]
    NotNmea,
    #[error("sentence of type {0:?} does not match decoder for {1}")]
    WrongSentence(crate::nmea::SentenceKind, &'static str),
    #[error("malformed field: {0}")]
    Malformed(&'static str),
    #[error("sentence too long: {0} bytes")]
    TooLong(usize),
}

/// Error from an RTCM v3 frame: CRC mismatch is recoverable (drop frame).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Rtcm3Error {
    #[error("CRC-24Q mismatch: computed {computed:#08x}, wanted {wanted:#08x}")]
    CrcMismatch { computed: u32, wanted: u32 },
    #[error("frame shorter than header implies")]
    Truncated,
}

/// Top-level error, used where a caller-facing `Result` is warranted
/// (construction, configuration). Parser internals use the narrower
/// types above and never surface this type to the dispatch loop.
#[derive(Debug, Error)]
pub enum GpsdError {
    #[error(transparent)]
    Bits(#[from] BitsError),
    #[error(transparent)]
    Isgps(#[from] IsgpsError),
    #[error(transparent)]
    Nmea(#[from] NmeaError),
    #[error(transparent)]
    Rtcm3(#[from] Rtcm3Error),
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}
