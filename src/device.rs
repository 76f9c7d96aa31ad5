//! EIT instrument driver for setup and configuration queries.
//!
//! The driver owns the port while the instrument is configured. For a
//! measurement the port is handed over to the acquisition pipeline with
//! [`EitDevice::into_transport`], which then owns it exclusively.
//!
//! # Example (Rust)
//! ```ignore
//! let config = SessionConfig::load("session.toml")?;
//! let mut device = EitDevice::connect_serial(&config.serial)?;
//! device.apply_setup(&config.setup)?;
//! device.set_output_config(&config.output)?;
//! let record = device.query_config()?;
//! ```

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info};
use serialport::{DataBits, Parity, StopBits};

use crate::command::{
    config_queries, output_config_commands, output_config_queries, setup_commands, Command,
};
use crate::config::{MeasurementSetup, OutputConfig, SerialSettings};
use crate::errors::DriverError;
use crate::response::{decode_config, decode_output_config, ConfigRecord, OutputFlags};

/// Pause after each command so the device can apply it
const COMMAND_DELAY: Duration = Duration::from_millis(20);

/// Upper bound on waiting for a complete query response
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on discarding stale input before a query
const MAX_FLUSH: Duration = Duration::from_millis(200);

/// Trait for Read + Write + Send, allowing different transport backends.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Open the serial port: 8 data bits, no parity, one stop bit.
pub fn open_port(settings: &SerialSettings) -> crate::errors::Result<Box<dyn Transport>> {
    let port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(settings.timeout())
        .open()
        .map_err(DriverError::Serial)?;
    Ok(Box::new(port))
}

pub struct EitDevice {
    transport: Box<dyn Transport>,
    command_delay: Duration,
}

impl EitDevice {
    /// Connect via serial port. Failure here is fatal; there is no retry.
    pub fn connect_serial(settings: &SerialSettings) -> Result<Self> {
        let transport = open_port(settings)
            .with_context(|| format!("Failed to open serial port at {}", settings.port))?;
        info!(
            "connected to {} at {} baud",
            settings.port, settings.baud_rate
        );
        Ok(Self::from_transport(transport))
    }

    /// Create a driver from an already-open transport.
    pub fn from_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            command_delay: COMMAND_DELAY,
        }
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Give up the port, e.g. to an acquisition pipeline.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    /// Reset the device and apply `setup` in the device's required order.
    pub fn apply_setup(&mut self, setup: &MeasurementSetup) -> Result<()> {
        let cmds = setup_commands(setup);
        for cmd in &cmds {
            self.send(cmd).context("Failed to send setup command")?;
        }
        info!("measurement setup applied ({} commands)", cmds.len());
        Ok(())
    }

    pub fn set_output_config(&mut self, config: &OutputConfig) -> Result<()> {
        for cmd in output_config_commands(config) {
            self.send(&cmd).context("Failed to send output config")?;
        }
        Ok(())
    }

    /// Query every setup parameter in one pipelined round trip.
    pub fn query_config(&mut self) -> Result<ConfigRecord> {
        let response = self.query(&config_queries())?;
        let record = decode_config(&response).context("Malformed configuration response")?;
        info!(
            "device reports {} excitation steps, frame rate {} Hz",
            record.excitation_sequence.len(),
            record.frame_rate
        );
        Ok(record)
    }

    pub fn query_output_config(&mut self) -> Result<OutputFlags> {
        let response = self.query(&output_config_queries())?;
        let flags = decode_output_config(&response).context("Malformed output config response")?;
        debug!("output config: {flags:?}");
        Ok(flags)
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn query(&mut self, queries: &[Command]) -> Result<Vec<u8>> {
        self.flush_input()?;
        // queries are pipelined; the replies come back as one response
        for q in queries {
            self.transport.write_all(q.as_bytes())?;
        }
        self.transport.flush()?;
        let response = self.read_response()?;
        debug!("query response: {} bytes", response.len());
        Ok(response)
    }

    fn send(&mut self, cmd: &Command) -> Result<()> {
        debug!("-> {:02X?}", cmd.as_bytes());
        self.transport.write_all(cmd.as_bytes())?;
        self.transport.flush()?;
        if !self.command_delay.is_zero() {
            thread::sleep(self.command_delay);
        }
        Ok(())
    }

    /// Read until the port goes quiet after at least one byte arrived, or hits EOF.
    fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::with_capacity(256);
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            match self.transport.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if !response.is_empty() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() > deadline {
                break;
            }
        }
        if response.is_empty() {
            return Err(DriverError::Protocol("no response to query".into()).into());
        }
        Ok(response)
    }

    /// Discard pending input.
    fn flush_input(&mut self) -> Result<()> {
        let mut buf = [0u8; 256];
        let start = Instant::now();
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            match self.transport.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
            if iterations > 64 || start.elapsed() > MAX_FLUSH {
                break;
            }
        }
        Ok(())
    }
}
