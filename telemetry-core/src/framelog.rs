//! Frame log replay transport
//!
//! A plain-text stand-in for the message broker. Each non-blank line holds one frame:
//!
//! ```text
//! // comment
//! 100#03E8320BB8006400
//! 200#2A00000000000000
//! 201#1E251F2620272128
//! ```
//!
//! The id is decimal, the payload is an even-length hex string. Malformed lines and
//! unknown ids are reported per line so the caller can skip them and keep reading. An
//! I/O error is reported once and ends the log.

use crate::types::{FrameLogError, RawFrame, SourceId};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::Path;

/// Iterator over frames in a frame log
pub struct FrameLogReader<R> {
    lines: Lines<R>,
    line_no: usize,
    failed: bool,
}

impl FrameLogReader<BufReader<File>> {
    /// Open a frame log file
    pub fn open(path: &Path) -> Result<Self, FrameLogError> {
        log::info!("Opening frame log: {:?}", path);
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> FrameLogReader<R> {
    /// Read frames from any buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for FrameLogReader<R> {
    type Item = Result<RawFrame, FrameLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    // The log ends at the first read error
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            return Some(parse_line(trimmed, self.line_no));
        }
    }
}

/// Parse one `ID#HEX` line
pub fn parse_line(line: &str, line_no: usize) -> Result<RawFrame, FrameLogError> {
    let syntax = |reason: String| FrameLogError::Syntax {
        line: line_no,
        reason,
    };

    let (id, hex) = line
        .split_once('#')
        .ok_or_else(|| syntax(format!("missing '#' separator in {:?}", line)))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|_| syntax(format!("invalid frame id {:?}", id)))?;
    let source = SourceId::try_from(id).map_err(|_| FrameLogError::UnknownSource {
        line: line_no,
        id,
    })?;
    let payload = decode_hex(hex.trim()).map_err(syntax)?;

    Ok(RawFrame::new(source, payload))
}

/// Render a frame as an `ID#HEX` line (without newline)
pub fn format_frame(frame: &RawFrame) -> String {
    let mut out = format!("{}#", frame.source.id());
    for byte in &frame.payload {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Writes frames in frame log format
pub struct FrameLogWriter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> FrameLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Append one frame
    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<(), FrameLogError> {
        writeln!(self.out, "{}", format_frame(frame))?;
        self.written += 1;
        Ok(())
    }

    /// Append a comment line
    pub fn write_comment(&mut self, text: &str) -> Result<(), FrameLogError> {
        writeln!(self.out, "// {}", text)?;
        Ok(())
    }

    /// Number of frames written so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W, FrameLogError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length payload {:?}", hex));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte at offset {} in {:?}", i, hex))
        })
        .collect()
}
