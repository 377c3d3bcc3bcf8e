//! MJPEG (multipart/x-mixed-replace) frame source.
//!
//! This module provides:
//! - `FrameDemuxer`: byte-oriented state machine that cuts JPEG payloads out of a
//!   multipart stream using a fixed-capacity rolling buffer
//! - `MjpegStream`: content-type validation plus the read pump over any `Read`
//! - `MjpegSource`: HTTP connection to a network camera (ureq)
//!
//! The demuxer is responsible for:
//! - Locating boundary markers and the per-part header terminator, even when a
//!   marker straddles two reads
//! - Sticking to the LF or CRLF convention detected on the first part
//! - Compacting (never growing) its buffer
//! - Dropping a single undecodable payload without disturbing the next one

use std::fmt;
use std::io::{ErrorKind, Read};

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use super::byte_search::find;
use super::{CancellationToken, FrameSink, FrameSource};
use crate::config::{DeviceConfig, StreamSettings};
use crate::frame::DecodedFrame;

/// Rolling buffer capacity per connection.
pub const BUFFER_SIZE: usize = 512 * 1024;
/// Bytes requested per socket read.
pub const READ_SIZE: usize = 1024;

const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace";
const BOUNDARY_PARAM: &str = "boundary=";

// ----------------------------------------------------------------------------
// Protocol errors
// ----------------------------------------------------------------------------

/// The stream is not a usable multipart stream. Fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    message: String,
}

impl ProtocolError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mjpeg protocol error: {}", self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Extract the boundary token from a `multipart/x-mixed-replace` content type.
///
/// The token is used verbatim (no `--` prefix is added) so cameras that declare
/// `boundary=--myboundary` still match.
pub fn parse_boundary(content_type: &str) -> Result<Vec<u8>> {
    let lower = content_type.to_ascii_lowercase();
    if !lower.contains(MULTIPART_CONTENT_TYPE) {
        return Err(ProtocolError::new(format!("invalid content type: {}", content_type)).into());
    }
    let Some(index) = lower.find(BOUNDARY_PARAM) else {
        return Err(ProtocolError::new(format!(
            "content type has no boundary parameter: {}",
            content_type
        ))
        .into());
    };
    let token = content_type[index + BOUNDARY_PARAM.len()..]
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('"');
    if token.is_empty() {
        return Err(ProtocolError::new("empty boundary token").into());
    }
    Ok(token.as_bytes().to_vec())
}

// ----------------------------------------------------------------------------
// FrameDemuxer
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxState {
    SeekingBoundary,
    SeekingHeadersEnd,
    SeekingFrameEnd,
}

/// Line convention of a connection, fixed by the first header terminator seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn headers_end(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n\n",
            LineEnding::CrLf => b"\r\n\r\n",
        }
    }
}

const LONGEST_HEADERS_END: usize = 4;

/// Counters for one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MjpegStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_dropped: u64,
}

/// Multipart demultiplexer over a fixed-capacity buffer.
///
/// Invariant: `total <= buffer.len()`; the buffer is never grown.
pub struct FrameDemuxer {
    boundary: Vec<u8>,
    buffer: Vec<u8>,
    total: usize,
    pos: usize,
    frame_start: usize,
    state: DemuxState,
    line_ending: Option<LineEnding>,
    stats: MjpegStats,
}

impl FrameDemuxer {
    pub fn new(boundary: Vec<u8>) -> Self {
        Self::with_capacity(boundary, BUFFER_SIZE)
    }

    /// Demuxer with an explicit buffer capacity. A single part (headers plus
    /// payload) must fit in `capacity` bytes or it is dropped.
    pub fn with_capacity(boundary: Vec<u8>, capacity: usize) -> Self {
        debug_assert!(!boundary.is_empty(), "empty boundary");
        let capacity = capacity.max(boundary.len() + LONGEST_HEADERS_END);
        Self {
            boundary,
            buffer: vec![0u8; capacity],
            total: 0,
            pos: 0,
            frame_start: 0,
            state: DemuxState::SeekingBoundary,
            line_ending: None,
            stats: MjpegStats::default(),
        }
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn line_ending(&self) -> Option<LineEnding> {
        self.line_ending
    }

    pub fn stats(&self) -> MjpegStats {
        self.stats
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes currently held in the buffer.
    pub fn buffered(&self) -> usize {
        self.total
    }

    /// Feed one read's worth of bytes, decoding each completed payload.
    ///
    /// Undecodable payloads are logged, counted in `frames_dropped` and skipped.
    /// An error returned by `on_frame` aborts the feed and is propagated.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<()>
    where
        F: FnMut(DecodedFrame) -> Result<()>,
    {
        let mut dropped = 0u64;
        let result = self.feed_payloads(chunk, |payload| match DecodedFrame::decode(payload) {
            Ok(frame) => on_frame(frame),
            Err(err) => {
                log::warn!(
                    "FrameDemuxer: dropping undecodable frame ({} bytes): {:#}",
                    payload.len(),
                    err
                );
                dropped += 1;
                Ok(())
            }
        });
        self.stats.frames_dropped += dropped;
        result
    }

    /// Feed bytes and hand each completed raw payload to `on_payload`.
    pub fn feed_payloads<F>(&mut self, mut chunk: &[u8], mut on_payload: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.stats.bytes_received += chunk.len() as u64;
        while !chunk.is_empty() {
            if self.capacity() - self.total < chunk.len() {
                self.compact();
            }
            if self.total == self.capacity() {
                self.overflow();
            }
            let n = chunk.len().min(self.capacity() - self.total);
            self.buffer[self.total..self.total + n].copy_from_slice(&chunk[..n]);
            self.total += n;
            chunk = &chunk[n..];
            self.scan(&mut on_payload)?;
        }
        Ok(())
    }

    fn scan<F>(&mut self, on_payload: &mut F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        loop {
            match self.state {
                DemuxState::SeekingBoundary => {
                    match find(
                        &self.buffer[..self.total],
                        &self.boundary,
                        self.pos,
                        self.total - self.pos,
                    ) {
                        Some(index) => {
                            self.pos = index + self.boundary.len();
                            self.state = DemuxState::SeekingHeadersEnd;
                        }
                        None => {
                            self.pos = self.backoff(self.pos, self.boundary.len());
                            return Ok(());
                        }
                    }
                }
                DemuxState::SeekingHeadersEnd => match self.find_headers_end() {
                    Some((index, len)) => {
                        self.frame_start = index + len;
                        self.pos = self.frame_start;
                        self.state = DemuxState::SeekingFrameEnd;
                    }
                    None => {
                        let marker = self
                            .line_ending
                            .map_or(LONGEST_HEADERS_END, |le| le.headers_end().len());
                        self.pos = self.backoff(self.pos, marker);
                        return Ok(());
                    }
                },
                DemuxState::SeekingFrameEnd => {
                    match find(
                        &self.buffer[..self.total],
                        &self.boundary,
                        self.pos,
                        self.total - self.pos,
                    ) {
                        Some(stop) => {
                            let start = self.frame_start;
                            self.stats.frames_received += 1;
                            self.pos = stop + self.boundary.len();
                            self.state = DemuxState::SeekingHeadersEnd;
                            on_payload(trim_part_trailer(&self.buffer[start..stop]))?;
                        }
                        None => {
                            self.pos = self.backoff(self.frame_start, self.boundary.len());
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Locate the header terminator, fixing the line convention on first match.
    fn find_headers_end(&mut self) -> Option<(usize, usize)> {
        let haystack = &self.buffer[..self.total];
        let count = self.total - self.pos;
        if let Some(line_ending) = self.line_ending {
            let marker = line_ending.headers_end();
            return find(haystack, marker, self.pos, count).map(|index| (index, marker.len()));
        }

        let crlf = find(haystack, LineEnding::CrLf.headers_end(), self.pos, count);
        let lf = find(haystack, LineEnding::Lf.headers_end(), self.pos, count);
        let line_ending = match (crlf, lf) {
            (Some(c), Some(l)) if l < c => LineEnding::Lf,
            (Some(_), _) => LineEnding::CrLf,
            (None, Some(_)) => LineEnding::Lf,
            (None, None) => return None,
        };
        self.line_ending = Some(line_ending);
        let index = match line_ending {
            LineEnding::CrLf => crlf,
            LineEnding::Lf => lf,
        }?;
        Some((index, line_ending.headers_end().len()))
    }

    /// Where to resume searching after a miss: far enough back that a marker
    /// split across reads is still found, never before `floor`.
    fn backoff(&self, floor: usize, marker_len: usize) -> usize {
        floor.max(self.total.saturating_sub(marker_len - 1))
    }

    /// Shift the unconsumed tail to offset 0.
    fn compact(&mut self) {
        let keep_from = match self.state {
            DemuxState::SeekingFrameEnd => self.frame_start,
            _ => self.pos,
        };
        if keep_from == 0 {
            return;
        }
        self.buffer.copy_within(keep_from..self.total, 0);
        self.total -= keep_from;
        self.pos -= keep_from;
        self.frame_start = self.frame_start.saturating_sub(keep_from);
    }

    /// A single part outgrew the buffer: discard it and resynchronize on the
    /// next boundary.
    fn overflow(&mut self) {
        log::warn!(
            "FrameDemuxer: part exceeds {} byte buffer; discarding and resynchronizing",
            self.capacity()
        );
        if self.state == DemuxState::SeekingFrameEnd {
            self.stats.frames_dropped += 1;
        }
        let keep = self.boundary.len() - 1;
        self.buffer.copy_within(self.total - keep..self.total, 0);
        self.total = keep;
        self.pos = 0;
        self.frame_start = 0;
        self.state = DemuxState::SeekingBoundary;
    }
}

/// Strip the line break (and a `--` delimiter prefix when the declared
/// boundary omitted it) that precedes the next boundary.
fn trim_part_trailer(payload: &[u8]) -> &[u8] {
    let mut end = payload.len();
    if payload[..end].ends_with(b"--") {
        end -= 2;
    }
    if payload[..end].ends_with(b"\r\n") {
        end -= 2;
    } else if payload[..end].ends_with(b"\n") {
        end -= 1;
    }
    &payload[..end]
}

// ----------------------------------------------------------------------------
// MjpegStream: read pump over any byte stream
// ----------------------------------------------------------------------------

/// A validated multipart byte stream.
pub struct MjpegStream<R> {
    reader: R,
    demuxer: FrameDemuxer,
}

impl<R: Read> MjpegStream<R> {
    /// Validate `content_type` and prepare to demultiplex `reader`.
    ///
    /// Fails with `ProtocolError` before any byte is read when the content type
    /// is not multipart or lacks a boundary.
    pub fn new(content_type: &str, reader: R) -> Result<Self> {
        let boundary = parse_boundary(content_type)?;
        Ok(Self {
            reader,
            demuxer: FrameDemuxer::new(boundary),
        })
    }

    /// Read until end of stream or cancellation, emitting decoded frames.
    ///
    /// A trailing partial part at end of stream is discarded.
    pub fn pump(&mut self, cancel: &CancellationToken, sink: &mut FrameSink<'_>) -> Result<()> {
        let mut chunk = [0u8; READ_SIZE];
        while !cancel.is_cancelled() {
            let read = match self.reader.read(&mut chunk) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("read mjpeg chunk"),
            };
            if read == 0 {
                if self.demuxer.buffered() > 0 {
                    log::debug!(
                        "MjpegStream: discarding {} trailing bytes at end of stream",
                        self.demuxer.buffered()
                    );
                }
                return Ok(());
            }
            self.demuxer.feed(&chunk[..read], &mut *sink)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> MjpegStats {
        self.demuxer.stats()
    }
}

// ----------------------------------------------------------------------------
// MjpegSource: HTTP network camera
// ----------------------------------------------------------------------------

/// HTTP MJPEG source for one device connection.
pub struct MjpegSource {
    device_name: String,
    url: Url,
    display_url: String,
    agent: ureq::Agent,
}

impl MjpegSource {
    pub fn new(device: &DeviceConfig, settings: &StreamSettings) -> Result<Self> {
        let mut url = Url::parse(&device.source)
            .with_context(|| format!("parse mjpeg url for device {}", device.name))?;
        match url.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported mjpeg scheme '{}'; expected http(s)", other),
        }
        let display_url = url.to_string();
        if !device.login.is_empty() {
            url.set_username(&device.login)
                .map_err(|_| anyhow!("cannot set login on url {}", display_url))?;
            url.set_password(Some(&device.password))
                .map_err(|_| anyhow!("cannot set password on url {}", display_url))?;
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.connect_timeout)
            .timeout_read(settings.read_timeout)
            .build();
        Ok(Self {
            device_name: device.name.clone(),
            url,
            display_url,
            agent,
        })
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn run(&mut self, cancel: &CancellationToken, sink: &mut FrameSink<'_>) -> Result<()> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.display_url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        let mut stream = MjpegStream::new(&content_type, response.into_reader())?;
        log::info!(
            "MjpegSource[{}]: connected to {}",
            self.device_name,
            self.display_url
        );

        let result = stream.pump(cancel, sink);
        let stats = stream.stats();
        log::info!(
            "MjpegSource[{}]: connection closed after {} frames ({} dropped), {} bytes",
            self.device_name,
            stats.frames_received,
            stats.frames_dropped,
            stats.bytes_received
        );
        result
    }
}
