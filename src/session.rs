//! Session bring-up: configure the instrument, read its settings back and
//! start the acquisition pipeline on the same port.

use anyhow::{Context, Result};
use log::info;

use crate::config::SessionConfig;
use crate::device::{EitDevice, Transport};
use crate::live::DisplayChannelReceiver;
use crate::pipeline::{AcquisitionPipeline, Processor};
use crate::response::ConfigRecord;

/// A running measurement.
#[derive(Debug)]
pub struct Session {
    /// Settings reported by the device at start; fixed for the session.
    pub record: ConfigRecord,
    pub pipeline: AcquisitionPipeline,
    /// One receiver per configured display channel, in configuration order.
    pub channels: Vec<DisplayChannelReceiver>,
}

/// Apply the setup and output config, then read the device settings back.
pub fn configure(device: &mut EitDevice, config: &SessionConfig) -> Result<ConfigRecord> {
    device.apply_setup(&config.setup)?;
    device.set_output_config(&config.output)?;
    device.query_config()
}

/// Open the configured port and start measuring.
pub fn start(config: &SessionConfig) -> Result<Session> {
    let device = EitDevice::connect_serial(&config.serial)?;
    start_with_device(device, config)
}

/// Start measuring on an already-open transport.
pub fn start_with_transport(
    transport: Box<dyn Transport>,
    config: &SessionConfig,
) -> Result<Session> {
    start_with_device(EitDevice::from_transport(transport), config)
}

pub fn start_with_device(mut device: EitDevice, config: &SessionConfig) -> Result<Session> {
    let record = configure(&mut device, config)?;
    let (processor, channels) = Processor::for_session(&config.acquisition, &record);
    let pipeline = AcquisitionPipeline::spawn(
        device.into_transport(),
        processor,
        config.acquisition.queue_wait(),
    )
    .context("Failed to start acquisition threads")?;
    info!(
        "measuring dataset '{}' into {}",
        config.acquisition.dataset_name,
        config.acquisition.output_dir.display()
    );
    Ok(Session {
        record,
        pipeline,
        channels,
    })
}
