//! Session log files
//!
//! A log starts with a short header block and then holds one plain line per
//! finalized group, in the same format the console shows. Replay reads the
//! format back.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::debug;

use crate::mapping::MappingTable;
use crate::render::RenderedLine;

pub const LOG_TITLE: &str = "Rekordbox MIDI Sniffer Log";

/// Prefix of the header line naming the controller
pub const CONTROLLER_PREFIX: &str = "Controller:";

const RULE_WIDTH: usize = 80;

/// `rekordbox_midi_<port>_<YYYYmmdd_HHMMSS>.log`
pub fn default_file_name(port_name: &str, started: DateTime<Local>) -> String {
    let port = port_name.replace([' ', '/'], "_");
    format!(
        "rekordbox_midi_{}_{}.log",
        port,
        started.format("%Y%m%d_%H%M%S")
    )
}

/// Line-buffered log writer
pub struct SessionLog {
    path: PathBuf,
    writer: LineWriter<File>,
    lines: usize,
}

impl SessionLog {
    /// Create (truncate) the log file and write its header
    pub fn create(path: impl AsRef<Path>, table: Option<&MappingTable>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file: {}", path.display()))?;

        let mut log = Self {
            path,
            writer: LineWriter::new(file),
            lines: 0,
        };
        log.write_header(table, Local::now())?;
        debug!("Logging to {}", log.path.display());
        Ok(log)
    }

    fn write_header(&mut self, table: Option<&MappingTable>, started: DateTime<Local>) -> Result<()> {
        let w = &mut self.writer;
        writeln!(w, "{}", LOG_TITLE)?;
        writeln!(w, "Started: {}", started.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(table) = table {
            writeln!(w, "{} {}", CONTROLLER_PREFIX, table.device_name())?;
            if let Some(source) = table.source() {
                writeln!(w, "CSV: {}", source.display())?;
            }
        }
        writeln!(w, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(w)?;
        Ok(())
    }

    /// Append the plain form of a rendered line
    pub fn write_line(&mut self, line: &RenderedLine) -> Result<()> {
        writeln!(self.writer, "{}", line.plain)
            .with_context(|| format!("Failed to write log file: {}", self.path.display()))?;
        self.lines += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written after the header
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
