//! Acquisition pipeline: a reader thread and a processor thread.
//!
//! The reader owns the port. It sends the start command, forwards every
//! non-empty read as a chunk over an unbounded queue and, on the first empty
//! read, raises the stop flag and sends the stop command.
//!
//! The processor drains the queue until the stop flag is up *and* the queue
//! is empty, so every byte that was read gets processed. Frames are decoded,
//! written to cycle files and routed to live display channels; a failure on
//! one frame is logged and the next frame is processed as usual. On exit the
//! outstanding cycle is flushed to its file.

use std::io::{self, ErrorKind, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::command::{encode_start, encode_stop};
use crate::config::AcquisitionSettings;
use crate::cycle_writer::CycleFileWriter;
use crate::device::Transport;
use crate::errors::Result;
use crate::frame::Frame;
use crate::live::{DisplayChannelReceiver, LiveDataRouter};
use crate::reassembler::{FrameDecoder, FrameEvent, FrameReassembler};
use crate::response::ConfigRecord;

/// Size of a single read from the port
pub const READ_CHUNK: usize = 4096;

/// Counters reported by the reader thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    pub chunks: u64,
    pub bytes: u64,
}

/// Counters reported by the processor thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorSummary {
    pub frames: u64,
    pub failed_frames: u64,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub reader: ReaderSummary,
    pub processor: ProcessorSummary,
}

/// Frame handling on the processor side: reassembly, decoding, persistence
/// and live routing. Owned by exactly one thread.
#[derive(Debug)]
pub struct Processor {
    reassembler: FrameReassembler,
    decoder: FrameDecoder,
    writer: CycleFileWriter,
    router: LiveDataRouter,
    summary: ProcessorSummary,
}

impl Processor {
    pub fn new(writer: CycleFileWriter, router: LiveDataRouter) -> Self {
        Self {
            reassembler: FrameReassembler::new(),
            decoder: FrameDecoder::new(),
            writer,
            router,
            summary: ProcessorSummary::default(),
        }
    }

    /// Processor and display receivers for a session whose device reported `record`.
    pub fn for_session(
        settings: &AcquisitionSettings,
        record: &ConfigRecord,
    ) -> (Self, Vec<DisplayChannelReceiver>) {
        let writer = CycleFileWriter::new(
            &settings.output_dir,
            &settings.dataset_name,
            record.header_fields(),
        );
        let (router, receivers) = LiveDataRouter::new(
            record.excitation_sequence.len(),
            &settings.display_channels,
            settings.node_count,
        );
        (Self::new(writer, router), receivers)
    }

    /// Feed one chunk from the queue.
    pub fn process_chunk(&mut self, chunk: &[u8]) {
        for frame in self.reassembler.feed(chunk) {
            self.summary.frames += 1;
            let len = frame.len();
            let type_byte = frame.type_byte();
            if let Err(e) = self.process_frame(frame) {
                self.summary.failed_frames += 1;
                warn!(
                    "frame #{} ({} bytes, type {:?}) skipped: {}",
                    self.summary.frames, len, type_byte, e
                );
            }
        }
    }

    fn process_frame(&mut self, frame: Frame) -> Result<()> {
        let event = self.decoder.decode(frame)?;
        if let Some(path) = self.writer.handle(&event)? {
            self.summary.files.push(path);
        }
        if let FrameEvent::Data(values) = &event {
            self.router.route(values)?;
        }
        Ok(())
    }

    /// Lines of the cycle being collected.
    pub fn current_cycle(&self) -> &[String] {
        self.writer.lines()
    }

    /// Flush the outstanding cycle and report.
    pub fn finish(mut self) -> ProcessorSummary {
        match self.writer.finish() {
            Ok(Some(path)) => self.summary.files.push(path),
            Ok(None) => debug!("no outstanding cycle to flush"),
            Err(e) => error!("final cycle flush failed: {e}"),
        }
        if self.reassembler.in_frame() {
            debug!("incomplete frame abandoned at end of stream");
        }
        self.summary
    }
}

/// Observable end of an acquisition, for consumers polling live queues.
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// True once the processor has drained the queue and flushed its last file.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Running reader and processor threads.
#[derive(Debug)]
pub struct AcquisitionPipeline {
    reader: JoinHandle<ReaderSummary>,
    processor: JoinHandle<ProcessorSummary>,
    done: Arc<AtomicBool>,
}

impl AcquisitionPipeline {
    /// Hand the port to a reader thread and start processing.
    ///
    /// `queue_wait` bounds how long the processor blocks on an empty queue
    /// before re-checking the stop flag.
    pub fn spawn(
        port: Box<dyn Transport>,
        processor: Processor,
        queue_wait: Duration,
    ) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Vec<u8>>();
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("eit-reader".into())
                .spawn(move || run_reader(port, tx, stop))?
        };
        let processor = {
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name("eit-processor".into())
                .spawn(move || {
                    let summary = run_processor(processor, rx, stop, queue_wait);
                    done.store(true, Ordering::Release);
                    summary
                })?
        };
        info!("acquisition pipeline started");
        Ok(Self {
            reader,
            processor,
            done,
        })
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal(Arc::clone(&self.done))
    }

    /// Wait for both threads.
    pub fn join(self) -> anyhow::Result<PipelineSummary> {
        let reader = self
            .reader
            .join()
            .map_err(|_| anyhow!("reader thread panicked"))?;
        let processor = self
            .processor
            .join()
            .map_err(|_| anyhow!("processor thread panicked"))?;
        info!(
            "acquisition finished: {} bytes, {} frames ({} skipped), {} files",
            reader.bytes,
            processor.frames,
            processor.failed_frames,
            processor.files.len()
        );
        Ok(PipelineSummary { reader, processor })
    }
}

fn run_reader(
    mut port: Box<dyn Transport>,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) -> ReaderSummary {
    let mut summary = ReaderSummary::default();
    if let Err(e) = send(&mut *port, encode_start().as_bytes()) {
        error!("failed to send start command: {e}");
    } else {
        info!("measurement started");
    }

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                summary.chunks += 1;
                summary.bytes += n as u64;
                if tx.send(buf[..n].to_vec()).is_err() {
                    warn!("processor gone, stopping reader");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // a read timeout is the empty read that ends the stream
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(e) => {
                warn!("read failed, treating as end of stream: {e}");
                break;
            }
        }
    }
    stop.store(true, Ordering::Release);
    drop(tx);
    debug!("reader saw end of stream after {} bytes", summary.bytes);

    if let Err(e) = send(&mut *port, encode_stop().as_bytes()) {
        error!("failed to send stop command: {e}");
    } else {
        info!("measurement stopped");
    }
    summary
}

fn send(port: &mut dyn Transport, bytes: &[u8]) -> io::Result<()> {
    port.write_all(bytes)?;
    port.flush()
}

fn run_processor(
    mut processor: Processor,
    rx: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    queue_wait: Duration,
) -> ProcessorSummary {
    while !stop.load(Ordering::Acquire) || !rx.is_empty() {
        match rx.recv_timeout(queue_wait) {
            Ok(chunk) => processor.process_chunk(&chunk),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    processor.finish()
}
