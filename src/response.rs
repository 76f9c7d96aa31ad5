//! Decoding of the instrument's pipelined query responses.
//!
//! The configuration response is the concatenation of the replies to
//! [`CONFIG_QUERIES`](crate::command::CONFIG_QUERIES), read in one go. Its
//! fields live at fixed offsets; the excitation sequence reply is the
//! variable-length tail.

use std::fmt;

use log::debug;

use crate::errors::DecodeError;
use crate::frame::ElectrodePair;

// Fixed offsets into the configuration response
const FMIN: usize = 3;
const FMAX: usize = 7;
const FCOUNT: usize = 11;
const FSCALE: usize = 13;
const AMPLITUDE: usize = 22;
const FRAME_RATE: usize = 34;
const ADC_RANGE: usize = 46;
const MODE: usize = 55;
const BOUNDARY: usize = 56;
const SWITCH_TYPE: usize = 65;
const SEQUENCE_SECTION: usize = 71;

/// Reply header in front of the sequence data: echo opcode, length, subopcode
const SEQUENCE_HEAD: usize = 3;
/// Reply end byte plus the 4-byte acknowledgement after the sequence data
const SEQUENCE_TAIL: usize = 5;

/// Query opcode echo that marks a duplicated reply inside the sequence data
pub const QUERY_ECHO: u8 = 0xB1;

/// Shortest configuration response that covers the whole offset table
pub const MIN_CONFIG_RESPONSE: usize = SEQUENCE_SECTION + SEQUENCE_HEAD + SEQUENCE_TAIL;

// Offsets into the output-config response
const OUT_EXCITATION_SETTING: usize = 3;
const OUT_FREQUENCY_ROW: usize = 11;
const OUT_TIMESTAMP: usize = 21;
const MIN_OUTPUT_RESPONSE: usize = OUT_TIMESTAMP + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyScale {
    Linear,
    Logarithmic,
}

impl FrequencyScale {
    fn from_byte(b: u8) -> Self {
        if b == 0 {
            FrequencyScale::Linear
        } else {
            FrequencyScale::Logarithmic
        }
    }
}

impl fmt::Display for FrequencyScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyScale::Linear => f.write_str("0"),
            FrequencyScale::Logarithmic => f.write_str("1"),
        }
    }
}

/// Device settings as reported back by the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    pub frequency_min: f32,
    pub frequency_max: f32,
    pub frequency_scale: FrequencyScale,
    pub frequency_count: u16,
    pub amplitude: f32,
    pub frame_rate: f32,
    pub adc_range: u8,
    pub mode: u8,
    /// Present only for modes 2-4 with an internal (1) or external (2) boundary.
    pub boundary: Option<u8>,
    pub switch_type: u8,
    pub excitation_sequence: Vec<ElectrodePair>,
}

impl ConfigRecord {
    /// Static fields written into every cycle header, in table order.
    /// The switch type and the sequence are not part of the header.
    pub fn header_fields(&self) -> Vec<String> {
        let mut fields = vec![
            format!("{:?}", self.frequency_min),
            format!("{:?}", self.frequency_max),
            self.frequency_scale.to_string(),
            self.frequency_count.to_string(),
            format!("{:?}", self.amplitude),
            format!("{:?}", self.frame_rate),
            self.adc_range.to_string(),
            self.mode.to_string(),
        ];
        if let Some(b) = self.boundary {
            fields.push(b.to_string());
        }
        fields
    }
}

fn f32_at(buf: &[u8], at: usize) -> f32 {
    f32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Decode the combined configuration response.
pub fn decode_config(response: &[u8]) -> Result<ConfigRecord, DecodeError> {
    if response.len() < MIN_CONFIG_RESPONSE {
        return Err(DecodeError::ResponseTooShort {
            len: response.len(),
            min: MIN_CONFIG_RESPONSE,
        });
    }
    let r = response;
    let mode = r[MODE];
    let boundary = match (mode, r[BOUNDARY]) {
        (2..=4, b @ (1 | 2)) => Some(b),
        _ => None,
    };
    let section = &r[SEQUENCE_SECTION..];
    let sequence_data = &section[SEQUENCE_HEAD..section.len() - SEQUENCE_TAIL];
    let record = ConfigRecord {
        frequency_min: f32_at(r, FMIN),
        frequency_max: f32_at(r, FMAX),
        frequency_scale: FrequencyScale::from_byte(r[FSCALE]),
        frequency_count: u16::from_be_bytes([r[FCOUNT], r[FCOUNT + 1]]),
        amplitude: f32_at(r, AMPLITUDE),
        frame_rate: f32_at(r, FRAME_RATE),
        adc_range: r[ADC_RANGE],
        mode,
        boundary,
        switch_type: r[SWITCH_TYPE],
        excitation_sequence: decode_excitation_sequence(sequence_data),
    };
    debug!("decoded device config: {record:?}");
    Ok(record)
}

/// Remove the echo artifact from the sequence data.
///
/// `data` is the sequence data only: the 3-byte reply header in front of it
/// and the 5-byte terminator after it are already stripped, so neither counts
/// as an occurrence. When [`QUERY_ECHO`] occurs at least twice, the four bytes
/// following its second occurrence are removed. Otherwise the data is returned
/// unchanged.
pub fn splice_echo(data: &[u8]) -> Vec<u8> {
    let second = data
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == QUERY_ECHO)
        .map(|(i, _)| i)
        .nth(1);
    match second {
        Some(at) => {
            let cut_end = (at + 5).min(data.len());
            let mut out = Vec::with_capacity(data.len());
            out.extend_from_slice(&data[..=at]);
            out.extend_from_slice(&data[cut_end..]);
            out
        }
        None => data.to_vec(),
    }
}

/// Decode sequence data into pairs, each four bytes `[outgoing, incoming]`.
pub fn decode_excitation_sequence(data: &[u8]) -> Vec<ElectrodePair> {
    splice_echo(data)
        .chunks_exact(4)
        .map(|c| ElectrodePair {
            outgoing: u16::from_be_bytes([c[0], c[1]]),
            incoming: u16::from_be_bytes([c[2], c[3]]),
        })
        .collect()
}

/// Output-config flags as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    pub excitation_setting: bool,
    pub frequency_row: bool,
    pub timestamp: bool,
}

pub fn decode_output_config(response: &[u8]) -> Result<OutputFlags, DecodeError> {
    if response.len() < MIN_OUTPUT_RESPONSE {
        return Err(DecodeError::ResponseTooShort {
            len: response.len(),
            min: MIN_OUTPUT_RESPONSE,
        });
    }
    Ok(OutputFlags {
        excitation_setting: response[OUT_EXCITATION_SETTING] == 1,
        frequency_row: response[OUT_FREQUENCY_ROW] == 1,
        timestamp: response[OUT_TIMESTAMP] == 1,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::{
        encode_excitation_frequencies, encode_excitation_sequence, encode_param, Command,
        ParamValue,
    };
    use crate::config::ExcitationFrequencies;

    pub(crate) struct Fields {
        pub fmin: f32,
        pub fmax: f32,
        pub fcount: u16,
        pub fscale: u8,
        pub amplitude: f32,
        pub frame_rate: f32,
        pub adc_range: u8,
        pub mode: u8,
        pub boundary: u8,
        pub switch_type: u8,
        pub sequence: Vec<ElectrodePair>,
    }

    /// Synthetic well-formed configuration response.
    pub(crate) fn build_response(f: &Fields) -> Vec<u8> {
        let mut r = vec![0u8; SEQUENCE_SECTION];
        r[FMIN..FMIN + 4].copy_from_slice(&f.fmin.to_be_bytes());
        r[FMAX..FMAX + 4].copy_from_slice(&f.fmax.to_be_bytes());
        r[FCOUNT..FCOUNT + 2].copy_from_slice(&f.fcount.to_be_bytes());
        r[FSCALE] = f.fscale;
        r[AMPLITUDE..AMPLITUDE + 4].copy_from_slice(&f.amplitude.to_be_bytes());
        r[FRAME_RATE..FRAME_RATE + 4].copy_from_slice(&f.frame_rate.to_be_bytes());
        r[ADC_RANGE] = f.adc_range;
        r[MODE] = f.mode;
        r[BOUNDARY] = f.boundary;
        r[SWITCH_TYPE] = f.switch_type;
        r.extend_from_slice(&[QUERY_ECHO, (f.sequence.len() * 4 + 1) as u8, 0x06]);
        for cmd in encode_excitation_sequence(&f.sequence) {
            r.extend_from_slice(&cmd.as_bytes()[3..7]);
        }
        r.extend_from_slice(&[QUERY_ECHO, 0x18, 0x01, 0x83, 0x18]);
        r
    }

    pub(crate) fn sample_fields() -> Fields {
        Fields {
            fmin: 50_000.0,
            fmax: 60_000.0,
            fcount: 3,
            fscale: 0,
            amplitude: 0.001,
            frame_rate: 50.0,
            adc_range: 2,
            mode: 3,
            boundary: 2,
            switch_type: 2,
            sequence: vec![
                ElectrodePair::new(2, 4),
                ElectrodePair::new(5, 6),
                ElectrodePair::new(1, 3),
            ],
        }
    }

    #[test]
    fn decodes_every_field() {
        let f = sample_fields();
        let rec = decode_config(&build_response(&f)).unwrap();
        assert_eq!(rec.frequency_min, f.fmin);
        assert_eq!(rec.frequency_max, f.fmax);
        assert_eq!(rec.frequency_count, 3);
        assert_eq!(rec.frequency_scale, FrequencyScale::Linear);
        assert_eq!(rec.amplitude, 0.001);
        assert_eq!(rec.frame_rate, 50.0);
        assert_eq!(rec.adc_range, 2);
        assert_eq!(rec.mode, 3);
        assert_eq!(rec.boundary, Some(2));
        assert_eq!(rec.switch_type, 2);
        assert_eq!(rec.excitation_sequence, f.sequence);
    }

    #[test]
    fn encoded_values_decode_back() {
        let f = sample_fields();
        let mut response = build_response(&f);
        let param_bytes = |cmd: Command| cmd.as_bytes()[3..cmd.as_bytes().len() - 1].to_vec();

        let freqs = ExcitationFrequencies {
            fmin: Some(10_000.0),
            fmax: Some(80_000.0),
            fcount: Some(5),
            ftype: Some(1),
        };
        response[FMIN..=FSCALE].copy_from_slice(&param_bytes(encode_excitation_frequencies(&freqs)));
        response[FRAME_RATE..FRAME_RATE + 4]
            .copy_from_slice(&param_bytes(encode_param(ParamValue::FrameRate(12.5))));
        response[ADC_RANGE] = param_bytes(encode_param(ParamValue::AdcRange(3)))[0];
        response[MODE..=BOUNDARY].copy_from_slice(&param_bytes(encode_param(
            ParamValue::MeasureMode { mode: 2, boundary: 1 },
        )));
        response[SWITCH_TYPE] = param_bytes(encode_param(ParamValue::SwitchType(1)))[0];

        let rec = decode_config(&response).unwrap();
        assert_eq!(rec.frequency_min, 10_000.0);
        assert_eq!(rec.frequency_max, 80_000.0);
        assert_eq!(rec.frequency_count, 5);
        assert_eq!(rec.frequency_scale, FrequencyScale::Logarithmic);
        assert_eq!(rec.frame_rate, 12.5);
        assert_eq!(rec.adc_range, 3);
        assert_eq!(rec.mode, 2);
        assert_eq!(rec.boundary, Some(1));
        assert_eq!(rec.switch_type, 1);
        assert_eq!(rec.excitation_sequence, f.sequence);
    }

    #[test]
    fn boundary_only_for_differential_modes() {
        let mut f = sample_fields();
        f.mode = 1;
        f.boundary = 1;
        assert_eq!(decode_config(&build_response(&f)).unwrap().boundary, None);
        f.mode = 4;
        f.boundary = 7;
        assert_eq!(decode_config(&build_response(&f)).unwrap().boundary, None);
    }

    #[test]
    fn header_fields_follow_table_order() {
        let rec = decode_config(&build_response(&sample_fields())).unwrap();
        assert_eq!(
            rec.header_fields(),
            vec!["50000.0", "60000.0", "0", "3", "0.001", "50.0", "2", "3", "2"]
        );
    }

    #[test]
    fn splice_removes_four_bytes_after_second_echo() {
        let data = [0, 1, QUERY_ECHO, 2, 3, QUERY_ECHO, 9, 9, 9, 9, 4, 5];
        assert_eq!(splice_echo(&data), vec![0, 1, QUERY_ECHO, 2, 3, QUERY_ECHO, 4, 5]);
    }

    #[test]
    fn single_echo_is_left_alone() {
        let data = [0, QUERY_ECHO, 2, 3, 4, 5, 6, 7];
        assert_eq!(splice_echo(&data), data.to_vec());
        assert_eq!(splice_echo(&[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn single_in_band_echo_between_pairs_is_not_cut() {
        let mut data = vec![0, 4, 0, 2];
        data.extend_from_slice(&[QUERY_ECHO, 0x18, 0x01, 0x83]);
        data.extend_from_slice(&[0, 6, 0, 5]);
        let pairs = decode_excitation_sequence(&data);
        assert_eq!(
            pairs,
            vec![
                ElectrodePair::new(2, 4),
                ElectrodePair { incoming: 0x0183, outgoing: 0xB118 },
                ElectrodePair::new(5, 6),
            ]
        );
    }

    #[test]
    fn splice_near_end_is_clamped() {
        assert_eq!(splice_echo(&[QUERY_ECHO, QUERY_ECHO, 1]), vec![QUERY_ECHO, QUERY_ECHO]);
    }

    #[test]
    fn sequence_pairs_are_outgoing_then_incoming() {
        let pairs = decode_excitation_sequence(&[0, 4, 0, 2, 0, 6, 0, 5, 0xFF]);
        assert_eq!(pairs, vec![ElectrodePair::new(2, 4), ElectrodePair::new(5, 6)]);
    }

    #[test]
    fn short_response_is_rejected() {
        assert_eq!(
            decode_config(&[0u8; 40]),
            Err(DecodeError::ResponseTooShort {
                len: 40,
                min: MIN_CONFIG_RESPONSE
            })
        );
    }

    #[test]
    fn output_flags_decode() {
        let mut r = vec![0u8; 26];
        r[3] = 1;
        r[21] = 1;
        assert_eq!(
            decode_output_config(&r).unwrap(),
            OutputFlags {
                excitation_setting: true,
                frequency_row: false,
                timestamp: true
            }
        );
        assert!(decode_output_config(&r[..10]).is_err());
    }
}
