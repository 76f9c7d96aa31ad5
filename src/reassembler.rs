//! Byte-stream reassembly and frame classification.
//!
//! [`FrameReassembler`] turns an arbitrarily chunked byte stream into complete
//! [`Frame`]s. [`FrameDecoder`] classifies each frame, tracks the anchor pair
//! that delimits sweep cycles and decodes data frames against the frame
//! received immediately before them.

use log::{debug, trace};

use crate::errors::DecodeError;
use crate::frame::{decode_split_floats, ElectrodePair, Frame, HeaderFrame, FRAME_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InFrame,
}

/// Marker-driven frame reassembly state machine.
///
/// Bytes outside a frame are discarded until the next `0xB4`, so the stream
/// resynchronises on its own. A frame still open when the stream ends is
/// simply never emitted.
#[derive(Debug)]
pub struct FrameReassembler {
    state: State,
    buffer: Vec<u8>,
    expected_len: usize,
    discarded: u64,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buffer: Vec::with_capacity(256),
            expected_len: 0,
            discarded: 0,
        }
    }

    /// Feed one byte; returns a frame when this byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::Idle => {
                if byte == FRAME_MARKER {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.expected_len = 0;
                    self.state = State::InFrame;
                } else {
                    self.discarded += 1;
                }
                None
            }
            State::InFrame => {
                self.buffer.push(byte);
                if self.buffer.len() == 2 {
                    // length field L covers type + payload; frame is L + 3 bytes
                    self.expected_len = byte as usize + 1 + 2;
                    return None;
                }
                if self.buffer.len() > 2 && self.buffer.len() == self.expected_len {
                    self.state = State::Idle;
                    let frame = Frame::from_bytes(std::mem::take(&mut self.buffer));
                    trace!("frame complete: {} bytes", frame.len());
                    return Some(frame);
                }
                None
            }
        }
    }

    /// Feed a chunk, collecting every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        chunk.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Whether a frame is currently being collected.
    pub fn in_frame(&self) -> bool {
        self.state == State::InFrame
    }

    /// Bytes dropped while searching for a frame marker.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// A classified, decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Header frame. `anchor` is set when its pair equals the session's anchor
    /// pair, i.e. it starts a sweep cycle.
    Header { header: HeaderFrame, anchor: bool },
    /// Measurement floats decoded across this frame and its predecessor.
    Data(Vec<f32>),
}

/// Classifies frames and carries the state needed across frames.
///
/// The predecessor used for split measurements is positional: whatever frame
/// completed immediately before is assumed to be the other half.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    anchor: Option<ElectrodePair>,
    previous: Option<Frame>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair of the first header seen in this session.
    pub fn anchor(&self) -> Option<ElectrodePair> {
        self.anchor
    }

    /// Decode one frame. The frame is retained as the predecessor of the next
    /// one whether or not decoding succeeds.
    pub fn decode(&mut self, frame: Frame) -> Result<FrameEvent, DecodeError> {
        let event = self.classify(&frame);
        self.previous = Some(frame);
        event
    }

    fn classify(&mut self, frame: &Frame) -> Result<FrameEvent, DecodeError> {
        if frame.is_header() {
            let header = frame.header()?;
            let anchor = *self.anchor.get_or_insert_with(|| {
                debug!("anchor pair set to ({})", header.pair);
                header.pair
            });
            return Ok(FrameEvent::Header {
                header,
                anchor: header.pair == anchor,
            });
        }
        let previous = self
            .previous
            .as_ref()
            .ok_or(DecodeError::MissingPredecessor)?;
        Ok(FrameEvent::Data(decode_split_floats(previous, frame)))
    }
}
