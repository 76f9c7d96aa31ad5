use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failure to decode a single frame, measurement or device response.
///
/// These are per-record failures: the acquisition loop logs them and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("data frame has no preceding frame to splice with")]
    MissingPredecessor,
    #[error("header frame too short: {len} bytes (need at least {min})")]
    ShortHeader { len: usize, min: usize },
    #[error("measurement has {got} values, {expected} needed for {nodes} nodes")]
    ShortMeasurement {
        got: usize,
        expected: usize,
        nodes: usize,
    },
    #[error("response too short: {len} bytes (need at least {min})")]
    ResponseTooShort { len: usize, min: usize },
}

pub type Result<T> = std::result::Result<T, DriverError>;
