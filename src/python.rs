//! Python bindings: start a measurement and poll its live display channels.
//!
//! Example:
//!     >>> m = Measurement.start("session.toml")
//!     >>> while not m.stopped:
//!     ...     for ch in range(m.n_channels):
//!     ...         timestamps, nodes = m.poll(ch)
//!     ...     time.sleep(m.poll_interval)
//!     >>> files = m.join()

use pyo3::exceptions::{PyIOError, PyIndexError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::SessionConfig;
use crate::live::DisplayChannelReceiver;
use crate::logging::{init_python_logging, set_python_log_level_str};
use crate::pipeline::{AcquisitionPipeline, StopSignal};
use crate::response::ConfigRecord;
use crate::session;

/// A running EIT measurement.
///
/// Data is written to cycle files by a background pipeline; selected
/// excitation steps can be polled live without blocking.
#[pyclass(name = "Measurement", unsendable)]
struct PyMeasurement {
    pipeline: Option<AcquisitionPipeline>,
    channels: Vec<DisplayChannelReceiver>,
    stop: StopSignal,
    record: ConfigRecord,
    poll_interval: f64,
}

#[pymethods]
impl PyMeasurement {
    /// Configure the device from a session TOML file and start measuring.
    ///
    /// Raises:
    ///     ValueError: If the session file is invalid
    ///     IOError: If the serial port cannot be opened or the device does not answer
    #[staticmethod]
    fn start(py: Python<'_>, config_path: &str) -> PyResult<Self> {
        let config = SessionConfig::load(config_path)
            .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;
        let session = py
            .detach(|| session::start(&config))
            .map_err(|e| PyErr::new::<PyIOError, _>(format!("{e:#}")))?;
        Ok(PyMeasurement {
            stop: session.pipeline.stop_signal(),
            pipeline: Some(session.pipeline),
            channels: session.channels,
            record: session.record,
            poll_interval: config.acquisition.poll_interval().as_secs_f64(),
        })
    }

    /// Drain display channel `channel` without blocking.
    ///
    /// Returns:
    ///     (timestamps, nodes): timestamps in seconds since the epoch, and one
    ///     list of values per node. Both may be empty.
    fn poll(&self, channel: usize) -> PyResult<(Vec<f64>, Vec<Vec<f32>>)> {
        let rx = self
            .channels
            .get(channel)
            .ok_or_else(|| PyErr::new::<PyIndexError, _>(format!("no display channel {channel}")))?;
        let samples = rx.drain();
        Ok((samples.timestamps, samples.nodes))
    }

    /// Index into the excitation sequence shown by each display channel.
    #[getter]
    fn display_sequence(&self) -> Vec<usize> {
        self.channels.iter().map(|c| c.sequence_index).collect()
    }

    #[getter]
    fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// True once all acquired data has been processed and written.
    #[getter]
    fn stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Suggested polling interval in seconds.
    #[getter]
    fn poll_interval(&self) -> f64 {
        self.poll_interval
    }

    /// Device settings read back at start.
    fn config<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let r = &self.record;
        let dict = PyDict::new(py);
        dict.set_item("frequency_min", r.frequency_min)?;
        dict.set_item("frequency_max", r.frequency_max)?;
        dict.set_item("frequency_scale", r.frequency_scale.to_string())?;
        dict.set_item("frequency_count", r.frequency_count)?;
        dict.set_item("amplitude", r.amplitude)?;
        dict.set_item("frame_rate", r.frame_rate)?;
        dict.set_item("adc_range", r.adc_range)?;
        dict.set_item("mode", r.mode)?;
        dict.set_item("boundary", r.boundary)?;
        dict.set_item("switch_type", r.switch_type)?;
        let sequence: Vec<(u16, u16)> = r
            .excitation_sequence
            .iter()
            .map(|p| (p.incoming, p.outgoing))
            .collect();
        dict.set_item("excitation_sequence", sequence)?;
        Ok(dict)
    }

    /// Wait for the measurement to end and return the written file paths.
    fn join(&mut self, py: Python<'_>) -> PyResult<Vec<String>> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| PyErr::new::<PyRuntimeError, _>("measurement already joined"))?;
        let summary = py
            .detach(|| pipeline.join())
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))?;
        Ok(summary
            .processor
            .files
            .iter()
            .map(|p| p.display().to_string())
            .collect())
    }

    fn __repr__(&self) -> String {
        format!(
            "Measurement(channels={}, stopped={})",
            self.channels.len(),
            self.stop.is_stopped()
        )
    }
}

/// Route Rust log records into Python's `logging` at `level` (or `EIT_LOG`).
#[pyfunction]
#[pyo3(signature = (level=None))]
fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    set_python_log_level_str(py, level)
}

/// The Python module definition
#[pymodule]
fn eit_acq(m: &Bound<'_, PyModule>) -> PyResult<()> {
    init_python_logging(m.py())?;
    m.add_class::<PyMeasurement>()?;
    m.add_function(wrap_pyfunction!(set_log_level, m)?)?;
    m.add("DEFAULT_NODE_COUNT", crate::config::DEFAULT_NODE_COUNT)?;
    Ok(())
}
