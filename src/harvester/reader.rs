// SPDX-License-Identifier: Apache-2.0

//! Incremental line reader for tailed files.
//!
//! Reads complete lines from a growing file, keeping any trailing partial
//! line buffered until its terminator arrives. Byte accounting includes the
//! terminator so offsets always land on line boundaries.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};

/// A complete line together with the bytes it consumed in the file.
#[derive(Debug, PartialEq, Eq)]
pub struct Line {
    /// Content with the trailing LF or CRLF stripped.
    pub text: String,
    /// Bytes consumed including the terminator.
    pub consumed: u64,
}

/// Outcome of a single read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(Line),
    /// No complete line available yet. Any partial line stays buffered.
    Eof,
}

pub struct LineReader {
    reader: BufReader<File>,
    partial: Vec<u8>,
}

impl LineReader {
    /// Wrap a file positioned at the resume offset.
    pub fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            partial: Vec::new(),
        }
    }

    /// Try to read the next complete line without waiting.
    pub fn read_line(&mut self) -> io::Result<ReadOutcome> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(ReadOutcome::Eof);
            }

            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.partial.extend_from_slice(&buf[..=pos]);
                    self.reader.consume(pos + 1);

                    let raw = std::mem::take(&mut self.partial);
                    let consumed = raw.len() as u64;

                    // Strip LF, and CR when the line ends in CRLF.
                    let mut end = raw.len() - 1;
                    if end > 0 && raw[end - 1] == b'\r' {
                        end -= 1;
                    }
                    let text = String::from_utf8_lossy(&raw[..end]).into_owned();

                    return Ok(ReadOutcome::Line(Line { text, consumed }));
                }
                None => {
                    self.partial.extend_from_slice(buf);
                    let n = buf.len();
                    self.reader.consume(n);
                }
            }
        }
    }

    /// Length of the underlying file, read from the open descriptor. After
    /// a rotation the original path names an unrelated file; the descriptor
    /// still follows the content this reader is consuming.
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.reader.get_ref().metadata()?.len())
    }

    /// Whether a partial line is waiting for its terminator.
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Rewind to the start of the file, discarding buffered and partial
    /// data. Used after truncation is detected.
    pub fn reset_to_start(&mut self) -> io::Result<()> {
        self.partial.clear();
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn open_at(file: &NamedTempFile, offset: u64) -> LineReader {
        let mut f = File::open(file.path()).unwrap();
        f.seek(SeekFrom::Start(offset)).unwrap();
        LineReader::new(f)
    }

    #[test]
    fn reads_lines_with_consumed_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"alpha\nbeta\r\n").unwrap();
        file.flush().unwrap();

        let mut reader = open_at(&file, 0);

        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("alpha", line.text);
        assert_eq!(6, line.consumed);

        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("beta", line.text);
        assert_eq!(6, line.consumed); // CRLF counts as two bytes

        assert_eq!(ReadOutcome::Eof, reader.read_line().unwrap());
    }

    #[test]
    fn partial_line_completes_after_append() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"incompl").unwrap();
        file.flush().unwrap();

        let mut reader = open_at(&file, 0);
        assert_eq!(ReadOutcome::Eof, reader.read_line().unwrap());
        assert!(reader.has_partial());

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(file.path())
            .unwrap();
        f.write_all(b"ete\n").unwrap();
        f.flush().unwrap();

        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("incomplete", line.text);
        assert_eq!(11, line.consumed);
        assert!(!reader.has_partial());
    }

    #[test]
    fn resumes_from_offset() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"first\nsecond\n").unwrap();
        file.flush().unwrap();

        let mut reader = open_at(&file, 6);
        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("second", line.text);
    }

    #[test]
    fn reset_discards_partial_state() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"dangling").unwrap();
        file.flush().unwrap();

        let mut reader = open_at(&file, 0);
        assert_eq!(ReadOutcome::Eof, reader.read_line().unwrap());
        assert!(reader.has_partial());

        // Truncate and rewrite.
        std::fs::write(file.path(), b"fresh\n").unwrap();
        reader.reset_to_start().unwrap();
        assert!(!reader.has_partial());

        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("fresh", line.text);
    }

    #[test]
    fn empty_line_consumes_one_byte() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"\nnext\n").unwrap();
        file.flush().unwrap();

        let mut reader = open_at(&file, 0);
        let line = match reader.read_line().unwrap() {
            ReadOutcome::Line(l) => l,
            other => panic!("expected line, got {:?}", other),
        };
        assert_eq!("", line.text);
        assert_eq!(1, line.consumed);
    }
}
