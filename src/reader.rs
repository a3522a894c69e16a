// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Line-delimited frame reader
//!
//! Splits a byte stream into records on `\n` and trims surrounding ASCII
//! whitespace. Records of any length up to [`MAX_RECORD_LEN`] are forwarded;
//! rejecting malformed ones is the decoder's job.

use std::io::{self, BufRead, ErrorKind, Read};

/// Record delimiter
pub const DELIMITER: u8 = b'\n';

/// Longest line accepted before the stream is considered garbage
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Lazy sequence of raw records read from a stream.
///
/// Yields `None` at end of input. An I/O failure, or a line longer than
/// [`MAX_RECORD_LEN`] (`ErrorKind::InvalidData`), is yielded once as `Err`,
/// after which the reader is exhausted.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    done: bool,
}

impl<R: BufRead> FrameReader<R> {
    /// Wrap a buffered stream
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(128),
            done: false,
        }
    }

    /// Whether the stream has ended
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.buffer.clear();
        loop {
            // One byte past the cap tells an oversized line from a full one
            let limit = (MAX_RECORD_LEN + 1).saturating_sub(self.buffer.len()) as u64;
            match (&mut self.inner)
                .take(limit)
                .read_until(DELIMITER, &mut self.buffer)
            {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(_) if self.buffer.len() > MAX_RECORD_LEN
                    && self.buffer.last() != Some(&DELIMITER) =>
                {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!("record exceeds {} bytes", MAX_RECORD_LEN),
                    ));
                }
                Ok(_) => return Ok(Some(self.buffer.trim_ascii().to_vec())),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> std::iter::FusedIterator for FrameReader<R> {}
