//! Command envelopes for the instrument's binary configuration protocol.
//!
//! Every command is wrapped start and end with the same opcode byte:
//!
//! ```text
//! [opcode] [len] [subopcode] [param bytes...] [opcode]      len = 1 + params
//! ```
//!
//! All multi-byte parameters are big-endian.

use log::debug;

use crate::config::{
    ExcitationFrequencies, MeasureMode, MeasurementSetup, OutputConfig, DEFAULT_FREQUENCY_COUNT,
    DEFAULT_FREQUENCY_HZ, DEFAULT_FREQUENCY_TYPE,
};
use crate::frame::ElectrodePair;

// Opcodes
pub const OP_SET_PARAM: u8 = 0xB0;
pub const OP_GET_PARAM: u8 = 0xB1;
pub const OP_SET_OUTPUT: u8 = 0xB2;
pub const OP_GET_OUTPUT: u8 = 0xB3;
pub const OP_START_STOP: u8 = 0xB4;

/// Measurement setup parameters (subopcodes of `OP_SET_PARAM` / `OP_GET_PARAM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Param {
    Reset = 0x01,
    BurstCount = 0x02,
    FrameRate = 0x03,
    Frequencies = 0x04,
    Amplitude = 0x05,
    ExcitationSequence = 0x06,
    MeasureMode = 0x08,
    SwitchType = 0x0C,
    AdcRange = 0x0D,
}

/// Output-config flags (subopcodes of `OP_SET_OUTPUT` / `OP_GET_OUTPUT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputFlag {
    ExcitationSetting = 0x01,
    FrequencyRow = 0x02,
    Timestamp = 0x03,
}

/// Typed value for a single-parameter set command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    BurstCount(u16),
    FrameRate(f32),
    /// Sent as a full frequency command; fmax, fcount and ftype go out at
    /// their defaults, so a previously set fmax is overwritten with 100 kHz.
    /// Use [`encode_excitation_frequencies`] to keep both bounds.
    FrequencyMin(f32),
    /// Sent as a full frequency command; fmin, fcount and ftype go out at
    /// their defaults, so a previously set fmin is overwritten with 100 kHz.
    FrequencyMax(f32),
    // Sent as f64; the query response carries it as f32 (see DESIGN.md).
    Amplitude(f64),
    AdcRange(u8),
    SwitchType(u8),
    MeasureMode { mode: u8, boundary: u8 },
}

/// One encoded command ready to be written to the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Vec<u8>,
}

impl Command {
    /// Build `[opcode, 1 + len(params), sub, params..., opcode]`.
    pub fn envelope(opcode: u8, sub: u8, params: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(params.len() + 4);
        bytes.push(opcode);
        bytes.push((params.len() + 1) as u8);
        bytes.push(sub);
        bytes.extend_from_slice(params);
        bytes.push(opcode);
        Self { bytes }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Command {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

pub fn encode_start() -> Command {
    Command::envelope(OP_START_STOP, 0x01, &[])
}

pub fn encode_stop() -> Command {
    Command::envelope(OP_START_STOP, 0x00, &[])
}

/// Reset every measurement parameter to its default.
pub fn encode_reset() -> Command {
    Command::envelope(OP_SET_PARAM, Param::Reset as u8, &[])
}

pub fn encode_param(value: ParamValue) -> Command {
    match value {
        ParamValue::BurstCount(n) => {
            Command::envelope(OP_SET_PARAM, Param::BurstCount as u8, &n.to_be_bytes())
        }
        ParamValue::FrameRate(hz) => {
            Command::envelope(OP_SET_PARAM, Param::FrameRate as u8, &hz.to_be_bytes())
        }
        ParamValue::FrequencyMin(hz) | ParamValue::FrequencyMax(hz) => {
            // the device only takes min and max together
            let (fmin, fmax) = match value {
                ParamValue::FrequencyMin(_) => (Some(hz), None),
                _ => (None, Some(hz)),
            };
            encode_excitation_frequencies(&ExcitationFrequencies {
                fmin,
                fmax,
                ..Default::default()
            })
        }
        ParamValue::Amplitude(amps) => {
            Command::envelope(OP_SET_PARAM, Param::Amplitude as u8, &amps.to_be_bytes())
        }
        ParamValue::AdcRange(r) => Command::envelope(OP_SET_PARAM, Param::AdcRange as u8, &[r]),
        ParamValue::SwitchType(t) => {
            Command::envelope(OP_SET_PARAM, Param::SwitchType as u8, &[t])
        }
        ParamValue::MeasureMode { mode, boundary } => {
            Command::envelope(OP_SET_PARAM, Param::MeasureMode as u8, &[mode, boundary])
        }
    }
}

/// Pack fmin (f32), fmax (f32), fcount (u16) and ftype (u8) into one command.
pub fn encode_excitation_frequencies(freqs: &ExcitationFrequencies) -> Command {
    let mut params = Vec::with_capacity(11);
    params.extend_from_slice(&freqs.fmin.unwrap_or(DEFAULT_FREQUENCY_HZ).to_be_bytes());
    params.extend_from_slice(&freqs.fmax.unwrap_or(DEFAULT_FREQUENCY_HZ).to_be_bytes());
    params.extend_from_slice(&freqs.fcount.unwrap_or(DEFAULT_FREQUENCY_COUNT).to_be_bytes());
    params.push(freqs.ftype.unwrap_or(DEFAULT_FREQUENCY_TYPE));
    Command::envelope(OP_SET_PARAM, Param::Frequencies as u8, &params)
}

/// One command per pair; the outgoing electrode is packed before the incoming one.
pub fn encode_excitation_sequence(pairs: &[ElectrodePair]) -> Vec<Command> {
    pairs
        .iter()
        .map(|p| {
            let mut params = [0u8; 4];
            params[..2].copy_from_slice(&p.outgoing.to_be_bytes());
            params[2..].copy_from_slice(&p.incoming.to_be_bytes());
            Command::envelope(OP_SET_PARAM, Param::ExcitationSequence as u8, &params)
        })
        .collect()
}

/// Full setup command sequence.
///
/// Order: reset, burst count, frame rate, frequencies, amplitude, mode, each
/// sequence pair, switch type, ADC range. The device applies parameters
/// incrementally, so the order is fixed.
pub fn setup_commands(setup: &MeasurementSetup) -> Vec<Command> {
    let mut cmds = vec![encode_reset()];
    if let Some(n) = setup.burst_count {
        cmds.push(encode_param(ParamValue::BurstCount(n)));
    }
    if let Some(hz) = setup.frame_rate {
        cmds.push(encode_param(ParamValue::FrameRate(hz)));
    }
    if let Some(freqs) = &setup.frequencies {
        cmds.push(encode_excitation_frequencies(freqs));
    }
    if let Some(amps) = setup.amplitude {
        cmds.push(encode_param(ParamValue::Amplitude(amps)));
    }
    if let Some(MeasureMode { mode, boundary }) = setup.measure_mode {
        cmds.push(encode_param(ParamValue::MeasureMode { mode, boundary }));
    }
    cmds.extend(encode_excitation_sequence(&setup.excitation_sequence));
    if let Some(t) = setup.switch_type {
        cmds.push(encode_param(ParamValue::SwitchType(t)));
    }
    if let Some(r) = setup.adc_range {
        cmds.push(encode_param(ParamValue::AdcRange(r)));
    }
    debug!("setup encoded as {} commands", cmds.len());
    cmds
}

pub fn encode_query(param: Param) -> Command {
    Command::envelope(OP_GET_PARAM, param as u8, &[])
}

/// Queries whose pipelined responses make up the configuration response, in order.
pub const CONFIG_QUERIES: [Param; 7] = [
    Param::Frequencies,
    Param::Amplitude,
    Param::FrameRate,
    Param::AdcRange,
    Param::MeasureMode,
    Param::SwitchType,
    Param::ExcitationSequence,
];

pub fn config_queries() -> Vec<Command> {
    CONFIG_QUERIES.iter().map(|&p| encode_query(p)).collect()
}

pub fn encode_output_flag(flag: OutputFlag, value: u8) -> Command {
    Command::envelope(OP_SET_OUTPUT, flag as u8, &[value])
}

/// Set commands for every flag present in `config`.
pub fn output_config_commands(config: &OutputConfig) -> Vec<Command> {
    [
        (OutputFlag::ExcitationSetting, config.excitation_setting),
        (OutputFlag::FrequencyRow, config.frequency_row),
        (OutputFlag::Timestamp, config.timestamp),
    ]
    .into_iter()
    .filter_map(|(flag, value)| value.map(|v| encode_output_flag(flag, v)))
    .collect()
}

pub fn output_config_queries() -> Vec<Command> {
    [
        OutputFlag::ExcitationSetting,
        OutputFlag::FrequencyRow,
        OutputFlag::Timestamp,
    ]
    .into_iter()
    .map(|flag| Command::envelope(OP_GET_OUTPUT, flag as u8, &[]))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_and_reset_envelopes() {
        assert_eq!(encode_start().as_bytes(), &[0xB4, 0x01, 0x01, 0xB4]);
        assert_eq!(encode_stop().as_bytes(), &[0xB4, 0x01, 0x00, 0xB4]);
        assert_eq!(encode_reset().as_bytes(), &[0xB0, 0x01, 0x01, 0xB0]);
    }

    #[test]
    fn params_are_big_endian() {
        assert_eq!(
            encode_param(ParamValue::BurstCount(100)).as_bytes(),
            &[0xB0, 0x03, 0x02, 0x00, 0x64, 0xB0]
        );
        assert_eq!(
            encode_param(ParamValue::FrameRate(50.0)).as_bytes(),
            &[0xB0, 0x05, 0x03, 0x42, 0x48, 0x00, 0x00, 0xB0]
        );
        let amp = encode_param(ParamValue::Amplitude(0.001));
        assert_eq!(amp.as_bytes()[..3], [0xB0, 0x09, 0x05]);
        assert_eq!(amp.as_bytes()[3..11], 0.001f64.to_be_bytes());
        assert_eq!(
            encode_param(ParamValue::AdcRange(2)).as_bytes(),
            &[0xB0, 0x02, 0x0D, 0x02, 0xB0]
        );
        assert_eq!(
            encode_param(ParamValue::MeasureMode { mode: 1, boundary: 1 }).as_bytes(),
            &[0xB0, 0x03, 0x08, 0x01, 0x01, 0xB0]
        );
    }

    #[test]
    fn frequencies_fall_back_to_defaults() {
        let cmd = encode_excitation_frequencies(&ExcitationFrequencies {
            fmin: Some(50_000.0),
            ..Default::default()
        });
        let b = cmd.as_bytes();
        assert_eq!(b.len(), 15);
        assert_eq!(b[..3], [0xB0, 0x0C, 0x04]);
        assert_eq!(b[3..7], 50_000f32.to_be_bytes());
        assert_eq!(b[7..11], 100_000f32.to_be_bytes());
        assert_eq!(b[11..13], [0x00, 0x01]);
        assert_eq!(b[13], 1);
        assert_eq!(b[14], 0xB0);
    }

    #[test]
    fn single_frequency_param_uses_default_partner() {
        let cmd = encode_param(ParamValue::FrequencyMax(20_000.0));
        assert_eq!(cmd.as_bytes()[3..7], 100_000f32.to_be_bytes());
        assert_eq!(cmd.as_bytes()[7..11], 20_000f32.to_be_bytes());
    }

    #[test]
    fn sequence_packs_outgoing_first() {
        let cmds = encode_excitation_sequence(&[ElectrodePair::new(2, 4), ElectrodePair::new(5, 6)]);
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            cmds[0].as_bytes(),
            &[0xB0, 0x05, 0x06, 0x00, 0x04, 0x00, 0x02, 0xB0]
        );
        assert_eq!(
            cmds[1].as_bytes(),
            &[0xB0, 0x05, 0x06, 0x00, 0x06, 0x00, 0x05, 0xB0]
        );
    }

    #[test]
    fn setup_order_is_fixed() {
        let setup = MeasurementSetup {
            burst_count: Some(100),
            frame_rate: Some(50.0),
            frequencies: Some(ExcitationFrequencies::default()),
            amplitude: Some(0.001),
            measure_mode: Some(MeasureMode { mode: 1, boundary: 1 }),
            excitation_sequence: vec![ElectrodePair::new(2, 4), ElectrodePair::new(5, 6)],
            switch_type: Some(2),
            adc_range: Some(2),
        };
        let subs: Vec<u8> = setup_commands(&setup)
            .iter()
            .map(|c| c.as_bytes()[2])
            .collect();
        assert_eq!(subs, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x08, 0x06, 0x06, 0x0C, 0x0D]);
    }

    #[test]
    fn empty_setup_only_resets() {
        assert_eq!(setup_commands(&MeasurementSetup::default()), vec![encode_reset()]);
    }

    #[test]
    fn queries_and_output_flags() {
        let q = config_queries();
        assert_eq!(q[0].as_bytes(), &[0xB1, 0x01, 0x04, 0xB1]);
        assert_eq!(q[6].as_bytes(), &[0xB1, 0x01, 0x06, 0xB1]);

        let cmds = output_config_commands(&OutputConfig {
            excitation_setting: Some(1),
            frequency_row: None,
            timestamp: Some(1),
        });
        assert_eq!(
            cmds.iter().map(|c| c.as_bytes().to_vec()).collect::<Vec<_>>(),
            vec![vec![0xB2, 0x02, 0x01, 0x01, 0xB2], vec![0xB2, 0x02, 0x03, 0x01, 0xB2]]
        );
        assert_eq!(output_config_queries()[1].as_bytes(), &[0xB3, 0x01, 0x02, 0xB3]);
    }
}
