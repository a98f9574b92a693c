//! Sample sources
//!
//! The EEG amplifier streams one reading per text line over a USB serial
//! link. Recordings of that stream replay through the same line parser, as
//! does standard input.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

use thiserror::Error;

use braincar_core::config::{SourceConfig, SourceKind};
use braincar_core::protocol::LineFormat;

use crate::pipeline::RunFlag;

/// Sample source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// No data arrived within the read timeout; retry
    #[error("Source stalled")]
    Stalled,

    /// Read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording could not be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration names no usable source
    #[error("Source misconfigured: {0}")]
    Config(String),

    /// Serial port error
    #[cfg(feature = "usb")]
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Stream of scalar EEG samples.
pub trait SampleSource: Send {
    /// Next sample, `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// [`SourceError::Stalled`] when a timed read produced nothing (the caller
    /// may retry), any other variant when the source is unusable.
    fn next_sample(&mut self) -> Result<Option<f64>, SourceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn next_sample(&mut self) -> Result<Option<f64>, SourceError> {
        (**self).next_sample()
    }
}

/// Longest line kept, in bytes. Longer lines are dropped whole.
pub const MAX_LINE_LEN: usize = 256;

/// Line-oriented source over any buffered reader.
///
/// Lines are decoded lossily, so stray bytes from a noisy serial link never
/// abort the stream. Lines that do not parse, or run past [`MAX_LINE_LEN`]
/// without a newline, are skipped.
pub struct LineSource<R> {
    reader: R,
    format: LineFormat,
    pending: Vec<u8>,
    discarding: bool,
    pace: Option<Duration>,
    lines: u64,
    skipped: u64,
}

impl<R: BufRead> LineSource<R> {
    /// Wrap `reader`, parsing lines with `format`.
    #[must_use]
    pub fn new(reader: R, format: LineFormat) -> Self {
        Self {
            reader,
            format,
            pending: Vec::with_capacity(64),
            discarding: false,
            pace: None,
            lines: 0,
            skipped: 0,
        }
    }

    /// Sleep this long after every sample (file replay at device speed).
    #[must_use]
    pub fn with_pace(mut self, pace: Option<Duration>) -> Self {
        self.pace = pace.filter(|d| !d.is_zero());
        self
    }

    /// Next raw line without its terminator, `Ok(None)` at end of stream.
    ///
    /// A partial line interrupted by a read timeout is kept and completed by
    /// the next call. At most [`MAX_LINE_LEN`] bytes are buffered; an overlong
    /// line is counted as skipped and discarded up to its newline.
    ///
    /// # Errors
    ///
    /// [`SourceError::Stalled`] on a read timeout, [`SourceError::Io`]
    /// otherwise.
    pub fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            let room = (MAX_LINE_LEN + 1).saturating_sub(self.pending.len()) as u64;
            match (&mut self.reader).take(room).read_until(b'\n', &mut self.pending) {
                Ok(0) if self.pending.is_empty() => return Ok(None),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {
                    return Err(SourceError::Stalled);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Err(SourceError::Stalled),
                Err(e) => return Err(e.into()),
            }

            let complete = self.pending.last() == Some(&b'\n');
            if !complete && self.pending.len() > MAX_LINE_LEN {
                if !self.discarding {
                    self.skipped += 1;
                    tracing::warn!("Dropping line longer than {} bytes", MAX_LINE_LEN);
                }
                self.discarding = true;
                self.pending.clear();
                continue;
            }
            if self.discarding {
                // Tail of an overlong line.
                self.discarding = !complete;
                self.pending.clear();
                continue;
            }

            let line = String::from_utf8_lossy(&self.pending).trim_end_matches(['\r', '\n']).to_string();
            self.pending.clear();
            self.lines += 1;
            return Ok(Some(line));
        }
    }

    /// Lines read so far
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Lines dropped as unparseable or overlong
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: BufRead + Send> SampleSource for LineSource<R> {
    fn next_sample(&mut self) -> Result<Option<f64>, SourceError> {
        loop {
            let Some(line) = self.next_line()? else {
                return Ok(None);
            };
            match self.format.parse(&line) {
                Ok(sample) => {
                    if let Some(pace) = self.pace {
                        std::thread::sleep(pace);
                    }
                    return Ok(Some(sample));
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::debug!(line = self.lines, "Skipping line {:?}: {}", line, e);
                }
            }
        }
    }
}

/// Copy raw lines from `source` to `out` until the stream ends, `flag` is
/// cleared or `limit` lines have been written. Blank lines are dropped.
///
/// # Errors
///
/// Read errors other than [`SourceError::Stalled`], and write errors.
pub fn record<R: BufRead>(
    source: &mut LineSource<R>,
    out: &mut impl Write,
    flag: &RunFlag,
    limit: Option<u64>,
) -> Result<u64, SourceError> {
    let mut written = 0u64;
    while flag.is_running() && limit.map_or(true, |max| written < max) {
        let line = match source.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(SourceError::Stalled) => continue,
            Err(e) => return Err(e),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        writeln!(out, "{line}")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Open a recorded file.
///
/// # Errors
///
/// [`SourceError::Open`] if the file cannot be opened.
pub fn open_file(path: &std::path::Path, format: LineFormat) -> Result<LineSource<BufReader<File>>, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Open { path: path.display().to_string(), source })?;
    Ok(LineSource::new(BufReader::new(file), format))
}

/// Read standard input.
#[must_use]
pub fn open_stdin(format: LineFormat) -> LineSource<BufReader<std::io::Stdin>> {
    LineSource::new(BufReader::new(std::io::stdin()), format)
}

/// Serial-port sources
#[cfg(feature = "usb")]
pub mod serial {
    use std::io::BufReader;
    use std::time::Duration;

    use braincar_core::protocol::LineFormat;

    use super::{LineSource, SourceError};

    /// Read timeout; a silent amplifier surfaces as [`SourceError::Stalled`].
    pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Serial line source
    pub type SerialSource = LineSource<BufReader<Box<dyn serialport::SerialPort>>>;

    /// Open a serial connection to the amplifier
    ///
    /// # Arguments
    ///
    /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0" or "COM3")
    /// * `baud_rate` - Baud rate (typically 115200)
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    pub fn open(port_name: &str, baud_rate: u32, format: LineFormat) -> Result<SerialSource, SourceError> {
        let port = serialport::new(port_name, baud_rate).timeout(READ_TIMEOUT).open()?;
        tracing::info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(LineSource::new(BufReader::new(port), format))
    }

    /// List available serial ports
    #[must_use]
    pub fn list_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
}

/// Open the source described by `config`.
///
/// # Errors
///
/// [`SourceError::Config`] for a file source without a path or a serial
/// source in a build without the `usb` feature, otherwise open errors.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn SampleSource>, SourceError> {
    match config.kind {
        SourceKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| SourceError::Config("file source needs a path".to_string()))?;
            let pace = config.pace_ms.map(Duration::from_millis);
            tracing::info!("Replaying {}", path.display());
            Ok(Box::new(open_file(path, config.line_format)?.with_pace(pace)))
        }
        SourceKind::Stdin => Ok(Box::new(open_stdin(config.line_format))),
        #[cfg(feature = "usb")]
        SourceKind::Serial => Ok(Box::new(serial::open(&config.port, config.baud_rate, config.line_format)?)),
        #[cfg(not(feature = "usb"))]
        SourceKind::Serial => Err(SourceError::Config(format!(
            "serial port {} requested but built without the `usb` feature",
            config.port
        ))),
    }
}
