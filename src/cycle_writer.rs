//! Per-cycle text files.
//!
//! Lines accumulate in memory for the current sweep. When the anchor header
//! comes round again the buffer is written to `{dataset}_{n}.txt` and a new
//! buffer is started; whatever is left at shutdown goes to one last file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info};

use crate::frame::{format_floats, HeaderFrame};
use crate::reassembler::FrameEvent;

/// Tag opening every cycle header line
pub const RECORD_TAG: &str = "18";

/// Separator between fields of a cycle header line
pub const FIELD_SEPARATOR: &str = "\t";

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d. %H:%M:%S%.3f";

#[derive(Debug)]
pub struct CycleFileWriter {
    output_dir: PathBuf,
    dataset_name: String,
    static_fields: Vec<String>,
    lines: Vec<String>,
    cycles: u64,
    file_index: u32,
}

impl CycleFileWriter {
    /// `static_fields` are the session's device settings repeated in every cycle header.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        dataset_name: impl Into<String>,
        static_fields: Vec<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            dataset_name: dataset_name.into(),
            static_fields,
            lines: Vec::new(),
            cycles: 0,
            file_index: 0,
        }
    }

    /// Lines of the cycle currently being collected.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of files written so far.
    pub fn files_written(&self) -> u32 {
        self.file_index
    }

    pub fn path_for(&self, index: u32) -> PathBuf {
        self.output_dir.join(format!("{}_{}.txt", self.dataset_name, index))
    }

    /// Record one decoded frame. Returns the path of a file written by a rotation.
    pub fn handle(&mut self, event: &FrameEvent) -> io::Result<Option<PathBuf>> {
        match event {
            FrameEvent::Header { header, anchor } => self.on_header(header, *anchor),
            FrameEvent::Data(values) => {
                self.lines.push(format_floats(values));
                Ok(None)
            }
        }
    }

    fn on_header(&mut self, header: &HeaderFrame, anchor: bool) -> io::Result<Option<PathBuf>> {
        if !anchor {
            self.lines.push(header.descriptor());
            return Ok(None);
        }

        self.cycles += 1;
        let seed = self.cycle_header(header);
        if self.cycles == 1 {
            if !self.lines.is_empty() {
                debug!("dropping {} lines received before the first cycle", self.lines.len());
            }
            self.lines = vec![seed];
            return Ok(None);
        }

        match self.write_next() {
            Ok(path) => {
                self.lines = vec![seed];
                Ok(Some(path))
            }
            Err(e) => {
                // keep the unwritten cycle; it goes out with the next rotation
                self.lines.push(seed);
                Err(e)
            }
        }
    }

    /// Write the outstanding buffer, complete or not, to a final file.
    pub fn finish(&mut self) -> io::Result<Option<PathBuf>> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        let path = self.write_next()?;
        self.lines.clear();
        Ok(Some(path))
    }

    fn cycle_header(&self, header: &HeaderFrame) -> String {
        let mut fields = vec![
            RECORD_TAG.to_string(),
            self.cycles.to_string(),
            self.dataset_name.clone(),
            Local::now().format(TIMESTAMP_FORMAT).to_string(),
        ];
        fields.extend(self.static_fields.iter().cloned());
        fields.push(header.descriptor());
        fields.join(FIELD_SEPARATOR)
    }

    fn write_next(&mut self) -> io::Result<PathBuf> {
        let path = self.path_for(self.file_index + 1);
        write_lines(&self.output_dir, &path, &self.lines)?;
        self.file_index += 1;
        info!("wrote cycle file {} ({} lines)", path.display(), self.lines.len());
        Ok(path)
    }
}

fn write_lines(dir: &Path, path: &Path, lines: &[String]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    for line in lines {
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    out.get_ref().sync_all()
}
