//! Incremental splitting of an SSE byte stream into frames

use flagsync_domain::constants::{
    FRAME_DELIMITER, KEEPALIVE_FRAME, MAX_PENDING_FRAME_BYTES, STREAM_READ_BUFFER_SIZE,
};
use thiserror::Error;

/// One complete block between delimiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Server heartbeat; proves the stream is live but carries no data.
    Keepalive,
    Data(String),
}

/// The server kept sending without ever completing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{pending} bytes buffered without a frame delimiter (limit {limit})")]
pub struct FrameOverflow {
    pub pending: usize,
    pub limit: usize,
}

/// Buffers partial reads until a `\n\n` delimiter completes a frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_FRAME_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { buffer: Vec::with_capacity(STREAM_READ_BUFFER_SIZE.min(limit)), limit }
    }

    /// Feed one chunk; returns every frame it completed, in order.
    ///
    /// Blank frames are dropped. Invalid UTF-8 is replaced rather than
    /// rejected so the parser can decide.
    ///
    /// # Errors
    /// [`FrameOverflow`] once the unterminated remainder exceeds the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameOverflow> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find(&self.buffer, FRAME_DELIMITER) {
            let raw: Vec<u8> = self.buffer.drain(..end + FRAME_DELIMITER.len()).take(end).collect();
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_matches('\n');
            if text.is_empty() {
                continue;
            }
            frames.push(if text == KEEPALIVE_FRAME {
                Frame::Keepalive
            } else {
                Frame::Data(text.to_string())
            });
        }

        if self.buffer.len() > self.limit {
            return Err(FrameOverflow { pending: self.buffer.len(), limit: self.limit });
        }
        Ok(frames)
    }

    /// Bytes received after the last complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
