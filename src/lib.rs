//! Protocol driver and real-time acquisition pipeline for serial EIT instruments.
//!
//! The crate covers the whole path from the serial port to disk:
//!
//! 1. [`command`] encodes the binary configuration protocol and [`response`]
//!    decodes the device's pipelined query replies into a [`ConfigRecord`].
//! 2. [`reassembler`] turns the measurement byte stream into frames and
//!    decodes measurements split across consecutive frames.
//! 3. [`pipeline`] runs a reader thread (port to queue) and a processor
//!    thread (queue to [`cycle_writer`] and [`live`]) with a draining shutdown.
//!
//! # Frame splicing
//!
//! Measurement floats are not self-contained in one frame: each data frame is
//! decoded together with the frame received immediately before it. Nothing
//! checks that the two belong together, so a dropped frame misaligns the data
//! that follows until the stream realigns on its own.

pub mod command;
pub mod config;
pub mod cycle_writer;
pub mod device;
mod errors;
pub mod frame;
pub mod live;
pub mod logging;
pub mod pipeline;
pub mod reassembler;
pub mod response;
pub mod session;

#[cfg(feature = "python")]
mod python;

pub use config::SessionConfig;
pub use cycle_writer::CycleFileWriter;
pub use device::{EitDevice, Transport};
pub use errors::*;
pub use frame::{ElectrodePair, Frame, HeaderFrame};
pub use live::{DisplayChannelReceiver, LiveDataRouter, LiveSamples};
pub use pipeline::{AcquisitionPipeline, PipelineSummary, Processor, StopSignal};
pub use reassembler::{FrameDecoder, FrameEvent, FrameReassembler};
pub use response::{ConfigRecord, FrequencyScale, OutputFlags};
pub use session::Session;
