//! Splits a concatenated MJPEG byte stream into JPEG frames.

use std::io::{BufRead, BufReader, Read};

use super::CaptureError;

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;

/// Default upper bound for one frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reads frames delimited by the JPEG start (`FF D8`) and end (`FF D9`)
/// markers. Bytes between frames are discarded.
pub struct JpegFrameReader<R> {
    inner: BufReader<R>,
    max_frame_size: usize,
}

impl<R: Read> JpegFrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(256 * 1024, inner),
            max_frame_size,
        }
    }

    /// Blocking read of the next complete frame.
    pub fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut frame = Vec::new();
        let mut in_frame = false;
        let mut prev = 0u8;

        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Err(CaptureError::StreamEnded);
            }

            let mut consumed = 0;
            let mut complete = false;
            for &byte in buf {
                consumed += 1;
                if in_frame {
                    frame.push(byte);
                    if prev == MARKER && byte == EOI {
                        complete = true;
                        break;
                    }
                } else if prev == MARKER && byte == SOI {
                    in_frame = true;
                    frame.extend_from_slice(&[MARKER, SOI]);
                }
                prev = byte;
            }
            self.inner.consume(consumed);

            if complete {
                return Ok(frame);
            }
            if frame.len() > self.max_frame_size {
                return Err(CaptureError::FrameTooLarge {
                    max: self.max_frame_size,
                });
            }
        }
    }
}
