//! Labeled dataset capture.
//!
//! Pulls frames from the same camera the classifier uses and stores them the
//! way the model sees them (grayscale, resized to the model input). A batch
//! of `batch_size` images for one set name is written as
//! `<output_dir>/<name>001.png`, `<name>002.png`, ...
//!
//! Failed fetches do not count toward the batch; they are logged and retried
//! after the backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::ingest::FrameSource;
use crate::pipeline::CancelToken;
use crate::preprocess::Preprocessor;

pub struct DatasetCapture {
    preprocessor: Preprocessor,
    output_dir: PathBuf,
    batch_size: u32,
    interval: Duration,
    backoff: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureReport {
    pub name: String,
    pub saved: Vec<PathBuf>,
    pub failed_fetches: u64,
    /// True when cancellation stopped the batch early.
    pub interrupted: bool,
}

impl DatasetCapture {
    pub fn new(
        preprocessor: Preprocessor,
        output_dir: impl Into<PathBuf>,
        batch_size: u32,
        interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            preprocessor,
            output_dir: output_dir.into(),
            batch_size,
            interval,
            backoff,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// File path for image `index` (1-based) of set `name`.
    pub fn image_path(&self, name: &str, index: u32) -> PathBuf {
        self.output_dir.join(format!("{}{:03}.png", name, index))
    }

    /// Capture one batch. `on_saved` is called with the count saved so far.
    pub fn capture_batch<S, F>(
        &self,
        source: &mut S,
        name: &str,
        cancel: &CancelToken,
        mut on_saved: F,
    ) -> Result<CaptureReport>
    where
        S: FrameSource + ?Sized,
        F: FnMut(u32),
    {
        validate_set_name(name)?;
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output dir {}", self.output_dir.display())
        })?;

        let mut report = CaptureReport {
            name: name.to_string(),
            saved: Vec::with_capacity(self.batch_size as usize),
            failed_fetches: 0,
            interrupted: false,
        };

        let mut index = 1;
        while index <= self.batch_size {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let gray = match source
                .fetch_frame()
                .and_then(|frame| self.preprocessor.gray_resized(&frame.image))
            {
                Ok(gray) => gray,
                Err(e) => {
                    report.failed_fetches += 1;
                    log::warn!("capture fetch failed ({}); retrying", e);
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                    continue;
                }
            };

            let path = self.image_path(name, index);
            gray.save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::debug!("saved {}", path.display());
            report.saved.push(path);
            on_saved(index);
            index += 1;

            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        }

        Ok(report)
    }
}

/// Set names become file-name prefixes; keep them inside `output_dir`.
pub fn validate_set_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("set name must not be empty"));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(anyhow!("set name '{}' must not contain path separators", name));
    }
    Ok(())
}
