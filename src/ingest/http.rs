//! HTTP camera source.
//!
//! Pulls JPEG frames from a network camera such as an ESP32-CAM:
//! - Snapshot endpoints (`/capture`) answer each GET with one image.
//! - MJPEG endpoints (`multipart/x-mixed-replace`) keep the response open and
//!   push frames back to back; the stream is kept between fetches and
//!   reopened after any failure.
//!
//! A snapshot request (connect, headers, and body together) must finish within
//! the configured timeout, so a silent or trickling camera surfaces as
//! `AcquisitionError::Timeout` rather than a hang. MJPEG streams stay open
//! indefinitely, so there each connect and read is bounded separately.

use std::io::{self, Read};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{decode_image, Frame, FrameSource};
use crate::AcquisitionError;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpCameraConfig {
    /// Full URL, e.g. `http://192.168.0.100/capture`.
    pub url: String,
    pub timeout: Duration,
}

impl Default for HttpCameraConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.0.100/capture".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpCameraSource {
    config: HttpCameraConfig,
    /// Whole-request deadline.
    snapshot_agent: ureq::Agent,
    /// Per-connect/per-read bounds only.
    stream_agent: ureq::Agent,
    /// Set once the camera has answered with a multipart body.
    serves_mjpeg: bool,
    stream: Option<MjpegStream>,
    frame_count: u64,
}

impl HttpCameraSource {
    pub fn new(config: HttpCameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported camera scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        if config.timeout.is_zero() {
            return Err(anyhow!("camera timeout must be greater than zero"));
        }
        let snapshot_agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .build();
        let stream_agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .timeout_write(config.timeout)
            .build();
        Ok(Self {
            config,
            snapshot_agent,
            stream_agent,
            serves_mjpeg: false,
            stream: None,
            frame_count: 0,
        })
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, AcquisitionError> {
        if let Some(stream) = self.stream.as_mut() {
            return match stream.read_next_jpeg() {
                Ok(bytes) => Ok(bytes),
                Err(err) => {
                    // Reopen on the next fetch.
                    self.stream = None;
                    Err(err)
                }
            };
        }

        let agent = if self.serves_mjpeg {
            &self.stream_agent
        } else {
            &self.snapshot_agent
        };
        let response = agent
            .get(&self.config.url)
            .call()
            .map_err(|e| request_error(&self.config.url, e))?;
        let multipart = response
            .header("Content-Type")
            .map(|value| value.to_lowercase().contains("multipart"))
            .unwrap_or(false);

        if !multipart {
            self.serves_mjpeg = false;
            return read_snapshot(response.into_reader());
        }

        let mut stream = MjpegStream::new(response.into_reader());
        let bytes = stream.read_next_jpeg()?;
        if self.serves_mjpeg {
            self.stream = Some(stream);
        } else {
            // This response carries the whole-request deadline; the next
            // fetch reopens the stream without it.
            log::info!("camera {} serves mjpeg; keeping stream open", self.config.url);
            self.serves_mjpeg = true;
        }
        Ok(bytes)
    }
}

impl FrameSource for HttpCameraSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn fetch_frame(&mut self) -> Result<Frame, AcquisitionError> {
        let bytes = self.next_jpeg()?;
        let image = decode_image(&bytes)?;
        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }
}

fn read_snapshot(reader: impl Read) -> Result<Vec<u8>, AcquisitionError> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| io_error("read snapshot", e))?;
    if bytes.is_empty() {
        return Err(AcquisitionError::Malformed("empty snapshot body".to_string()));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(AcquisitionError::Malformed(format!(
            "snapshot exceeds {} bytes",
            MAX_JPEG_BYTES
        )));
    }
    Ok(bytes)
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>, AcquisitionError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| io_error("read mjpeg chunk", e))?;
            if read == 0 {
                return Err(AcquisitionError::Malformed("mjpeg stream ended".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                self.buffer.clear();
                return Err(AcquisitionError::Malformed(
                    "mjpeg stream produced no complete frame".to_string(),
                ));
            }
        }
    }
}

/// Locate the first complete JPEG (SOI `FFD8` .. EOI `FFD9`) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn request_error(url: &str, err: ureq::Error) -> AcquisitionError {
    match err {
        ureq::Error::Status(code, _) => {
            AcquisitionError::Transport(format!("{} answered HTTP {}", url, code))
        }
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(is_timeout)
                .unwrap_or(false);
            if timed_out {
                AcquisitionError::Timeout(format!("{}: {}", url, transport))
            } else {
                AcquisitionError::Transport(format!("{}: {}", url, transport))
            }
        }
    }
}

fn io_error(what: &str, err: io::Error) -> AcquisitionError {
    if is_timeout(&err) {
        AcquisitionError::Timeout(format!("{}: {}", what, err))
    } else if err.kind() == io::ErrorKind::UnexpectedEof {
        AcquisitionError::Malformed(format!("{}: {}", what, err))
    } else {
        AcquisitionError::Transport(format!("{}: {}", what, err))
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
