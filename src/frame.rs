//! Frames of the instrument's measurement stream.
//!
//! Wire layout of every frame:
//!
//! ```text
//! [0xB4] [L] [type] [payload: L-1 bytes] [trailer]      total = L + 3
//! ```
//!
//! A header frame (`type == 1`) carries the electrode pair of the excitation
//! step (outgoing at offset 3, incoming at offset 4) and a big-endian 32-bit
//! counter at offsets 5..9. Any other type is a data frame.
//!
//! Measurement floats are split across two frames: the bytes from offset 9 up
//! to (excluding) the trailer of the previous frame, followed by the same range
//! of the current frame, decode as consecutive big-endian `f32`s.

use std::fmt;

use serde::Deserialize;

use crate::errors::DecodeError;

/// Start-of-frame marker
pub const FRAME_MARKER: u8 = 0xB4;

/// Type byte identifying a header frame
pub const HEADER_TYPE: u8 = 1;

/// Offset of the first payload byte contributing to split measurements
pub const PAYLOAD_OFFSET: usize = 9;

/// Smallest frame that still holds a complete header
pub const MIN_HEADER_LEN: usize = PAYLOAD_OFFSET + 1;

/// An excitation step: current injected on `incoming`, drained on `outgoing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "(u16, u16)")]
pub struct ElectrodePair {
    pub incoming: u16,
    pub outgoing: u16,
}

impl ElectrodePair {
    pub fn new(incoming: u16, outgoing: u16) -> Self {
        Self { incoming, outgoing }
    }
}

impl From<(u16, u16)> for ElectrodePair {
    fn from((incoming, outgoing): (u16, u16)) -> Self {
        Self::new(incoming, outgoing)
    }
}

impl fmt::Display for ElectrodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.incoming, self.outgoing)
    }
}

/// One complete frame as received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wrap a complete frame. The reassembler guarantees `len == L + 3`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Frame type byte (offset 2).
    #[inline]
    pub fn type_byte(&self) -> Option<u8> {
        self.bytes.get(2).copied()
    }

    #[inline]
    pub fn is_header(&self) -> bool {
        self.type_byte() == Some(HEADER_TYPE)
    }

    /// Bytes this frame contributes to a split measurement: offset 9 up to the trailer.
    pub fn split_payload(&self) -> &[u8] {
        let end = self.bytes.len().saturating_sub(1);
        self.bytes.get(PAYLOAD_OFFSET..end).unwrap_or(&[])
    }

    /// Parse the header fields; fails for frames too short to hold them.
    pub fn header(&self) -> Result<HeaderFrame, DecodeError> {
        if self.bytes.len() < MIN_HEADER_LEN {
            return Err(DecodeError::ShortHeader {
                len: self.bytes.len(),
                min: MIN_HEADER_LEN,
            });
        }
        let b = &self.bytes;
        Ok(HeaderFrame {
            pair: ElectrodePair {
                outgoing: b[3] as u16,
                incoming: b[4] as u16,
            },
            counter: u32::from_be_bytes([b[5], b[6], b[7], b[8]]),
        })
    }
}

/// Decoded header frame fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFrame {
    pub pair: ElectrodePair,
    pub counter: u32,
}

impl HeaderFrame {
    /// Descriptor used in cycle files: `"<in> <out>, <counter>"`.
    pub fn descriptor(&self) -> String {
        format!("{}, {}", self.pair, self.counter)
    }
}

/// Decode the measurement split across `previous` and `current`.
///
/// A trailing group of fewer than four bytes is dropped.
pub fn decode_split_floats(previous: &Frame, current: &Frame) -> Vec<f32> {
    let head = previous.split_payload();
    let tail = current.split_payload();
    let mut joined = Vec::with_capacity(head.len() + tail.len());
    joined.extend_from_slice(head);
    joined.extend_from_slice(tail);
    joined
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Space-joined measurement line as stored in cycle files.
pub fn format_floats(values: &[f32]) -> String {
    values
        .iter()
        .map(|&v| format_value(v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shortest round-trip text of `v` widened to f64.
///
/// Exponents carry a sign and at least two digits (`1e+16`, `2.5e-05`).
pub fn format_value(v: f32) -> String {
    let v = f64::from(v);
    if v.is_nan() {
        return "nan".to_string();
    }
    let text = format!("{v:?}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a frame around `payload` (bytes from offset 3 up to the trailer).
    pub(crate) fn build_frame(type_byte: u8, payload: &[u8]) -> Vec<u8> {
        let l = (payload.len() + 1) as u8;
        let mut out = vec![FRAME_MARKER, l, type_byte];
        out.extend_from_slice(payload);
        out.push(FRAME_MARKER);
        out
    }

    pub(crate) fn header_bytes(pair: ElectrodePair, counter: u32, extra: &[u8]) -> Vec<u8> {
        let mut payload = vec![pair.outgoing as u8, pair.incoming as u8];
        payload.extend_from_slice(&counter.to_be_bytes());
        payload.extend_from_slice(extra);
        build_frame(HEADER_TYPE, &payload)
    }

    /// Data frame whose split payload is `floats`, with six filler bytes before offset 9.
    pub(crate) fn data_bytes(floats: &[f32]) -> Vec<u8> {
        let mut payload = vec![0u8; 6];
        for f in floats {
            payload.extend_from_slice(&f.to_be_bytes());
        }
        build_frame(2, &payload)
    }

    pub(crate) fn float_bytes(floats: &[f32]) -> Vec<u8> {
        floats.iter().flat_map(|f| f.to_be_bytes()).collect()
    }

    #[test]
    fn built_frame_length_matches_length_field() {
        let bytes = build_frame(2, &[0; 20]);
        assert_eq!(bytes.len(), bytes[1] as usize + 3);
    }

    #[test]
    fn parses_header_fields() {
        let frame = Frame::from_bytes(header_bytes(ElectrodePair::new(2, 1), 0x0102_0304, &[]));
        assert!(frame.is_header());
        let header = frame.header().unwrap();
        assert_eq!(header.pair, ElectrodePair::new(2, 1));
        assert_eq!(header.counter, 0x0102_0304);
        assert_eq!(header.descriptor(), "2 1, 16909060");
    }

    #[test]
    fn short_header_is_rejected() {
        let frame = Frame::from_bytes(vec![FRAME_MARKER, 3, 1, 4, 5, 0xB4]);
        assert_eq!(
            frame.header(),
            Err(DecodeError::ShortHeader { len: 6, min: 10 })
        );
    }

    #[test]
    fn split_floats_join_previous_and_current() {
        let prev = Frame::from_bytes(data_bytes(&[1.0, 2.0]));
        let cur = Frame::from_bytes(data_bytes(&[3.0]));
        assert_eq!(decode_split_floats(&prev, &cur), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn incomplete_trailing_group_is_dropped() {
        let mut payload = vec![0u8; 6];
        payload.extend_from_slice(&float_bytes(&[5.5]));
        payload.extend_from_slice(&[0x40, 0x00]);
        let prev = Frame::from_bytes(build_frame(2, &payload));
        let cur = Frame::from_bytes(build_frame(2, &[0u8; 6]));
        assert_eq!(decode_split_floats(&prev, &cur), vec![5.5]);
    }

    #[test]
    fn float_lines_keep_decimal_point() {
        assert_eq!(format_floats(&[1.0, 2.5, -3.0]), "1.0 2.5 -3.0");
        assert_eq!(format_floats(&[]), "");
    }

    #[test]
    fn values_print_at_double_precision() {
        assert_eq!(format_value(0.1), "0.10000000149011612");
        assert_eq!(format_value(2f32.powi(60)), "1.152921504606847e+18");
        assert_eq!(format_value(-(2f32.powi(-16))), "-1.52587890625e-05");
        assert_eq!(format_value(f32::INFINITY), "inf");
        assert_eq!(format_value(f32::NAN), "nan");
    }
}
