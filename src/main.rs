use std::path::PathBuf;
use std::process::exit;
use std::thread;

use anyhow::Result;
use clap::{Parser, Subcommand};

use eit_acq::logging::init_rust_logging;
use eit_acq::{session, EitDevice, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "eit-acq", about = "Configure an EIT instrument and record measurements")]
struct Args {
    /// Session file (TOML)
    config: PathBuf,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply the measurement setup and output config, then print the device settings
    Configure,
    /// Print the device settings and output-config flags without changing them
    Query,
    /// Configure, then record until the device stops streaming
    Measure,
}

fn main() {
    init_rust_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = SessionConfig::load(&args.config)?;

    match args.command {
        Cmd::Configure => {
            let mut device = EitDevice::connect_serial(&config.serial)?;
            let record = session::configure(&mut device, &config)?;
            println!("{record:#?}");
        }
        Cmd::Query => {
            let mut device = EitDevice::connect_serial(&config.serial)?;
            println!("{:#?}", device.query_config()?);
            println!("{:#?}", device.query_output_config()?);
        }
        Cmd::Measure => {
            let session = session::start(&config)?;
            println!(
                "Measuring {} excitation steps, live channels {:?}",
                session.record.excitation_sequence.len(),
                config.acquisition.display_channels
            );
            let stop = session.pipeline.stop_signal();
            let interval = config.acquisition.poll_interval();
            while !stop.is_stopped() {
                thread::sleep(interval);
                for rx in &session.channels {
                    let samples = rx.drain();
                    if let Some(last) = samples.nodes.first().and_then(|n| n.last()) {
                        println!(
                            "[step {:>2}] {} new | node 1: {last}",
                            rx.sequence_index,
                            samples.timestamps.len()
                        );
                    }
                }
            }
            let summary = session.pipeline.join()?;
            for file in &summary.processor.files {
                println!("Wrote {}", file.display());
            }
        }
    }
    Ok(())
}
