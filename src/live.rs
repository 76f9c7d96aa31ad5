//! Live data fan-out to display consumers.
//!
//! Each decoded measurement belongs to the next step of the excitation
//! sequence. Steps selected for display are routed to their display channel:
//! one queue per measurement node plus one timestamp queue. Consumers drain
//! the queues without blocking on their own polling interval.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;

use crate::errors::DecodeError;

/// Producer side of one display channel.
#[derive(Debug)]
struct DisplayChannel {
    nodes: Vec<Sender<f32>>,
    timestamps: Sender<f64>,
}

/// Consumer side of one display channel.
#[derive(Debug, Clone)]
pub struct DisplayChannelReceiver {
    /// Index into the excitation sequence this channel displays.
    pub sequence_index: usize,
    nodes: Vec<Receiver<f32>>,
    timestamps: Receiver<f64>,
}

/// Values drained from one display channel in one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSamples {
    /// Seconds since the Unix epoch, one per routed measurement.
    pub timestamps: Vec<f64>,
    /// Per node, in node order.
    pub nodes: Vec<Vec<f32>>,
}

impl LiveSamples {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() && self.nodes.iter().all(Vec::is_empty)
    }
}

impl DisplayChannelReceiver {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Take everything queued so far. An empty result is normal.
    pub fn drain(&self) -> LiveSamples {
        LiveSamples {
            timestamps: self.timestamps.try_iter().collect(),
            nodes: self.nodes.iter().map(|rx| rx.try_iter().collect()).collect(),
        }
    }
}

/// Routes decoded measurements to display channels.
#[derive(Debug)]
pub struct LiveDataRouter {
    sequence_len: usize,
    display: Vec<usize>,
    channels: Vec<DisplayChannel>,
    sequence_pos: Option<usize>,
    display_pos: Option<usize>,
}

impl LiveDataRouter {
    /// Build the router and one receiver per entry of `display`, in `display` order.
    pub fn new(
        sequence_len: usize,
        display: &[usize],
        node_count: usize,
    ) -> (Self, Vec<DisplayChannelReceiver>) {
        let mut channels = Vec::with_capacity(display.len());
        let mut receivers = Vec::with_capacity(display.len());
        for &sequence_index in display {
            let (node_tx, node_rx): (Vec<_>, Vec<_>) =
                (0..node_count).map(|_| unbounded::<f32>()).unzip();
            let (ts_tx, ts_rx) = unbounded();
            channels.push(DisplayChannel {
                nodes: node_tx,
                timestamps: ts_tx,
            });
            receivers.push(DisplayChannelReceiver {
                sequence_index,
                nodes: node_rx,
                timestamps: ts_rx,
            });
        }
        let router = Self {
            sequence_len,
            display: display.to_vec(),
            channels,
            sequence_pos: None,
            display_pos: None,
        };
        (router, receivers)
    }

    /// Route one measurement of `2 * node_count` floats; even entries are forwarded.
    ///
    /// Returns the display channel it went to, or `None` when the current
    /// sequence step is not displayed and the values are dropped.
    pub fn route(&mut self, values: &[f32]) -> Result<Option<usize>, DecodeError> {
        if self.sequence_len == 0 {
            return Ok(None);
        }
        let i = self.sequence_pos.map_or(0, |i| (i + 1) % self.sequence_len);
        self.sequence_pos = Some(i);

        if self.display.is_empty() || !self.display.contains(&i) {
            return Ok(None);
        }
        let j = self.display_pos.map_or(0, |j| (j + 1) % self.display.len());
        self.display_pos = Some(j);

        let channel = &self.channels[j];
        let nodes = channel.nodes.len();
        if values.len() < 2 * nodes {
            return Err(DecodeError::ShortMeasurement {
                got: values.len(),
                expected: 2 * nodes,
                nodes,
            });
        }
        for (tx, v) in channel.nodes.iter().zip(values.iter().step_by(2)) {
            // a consumer that went away is not an acquisition error
            let _ = tx.send(*v);
        }
        let _ = channel.timestamps.send(unix_seconds());
        trace!("sequence step {i} routed to display channel {j}");
        Ok(Some(j))
    }
}

fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}
