//! Vision Relay
//!
//! Classifies frames pulled from a network camera, stabilizes the per-frame
//! model output into a debounced decision, and announces that decision over a
//! line-oriented actuator link only when it changes.
//!
//! # Pipeline
//!
//! Each iteration of the acquisition loop runs, strictly in order:
//!
//! 1. `ingest`: fetch and decode one frame (recoverable on failure).
//! 2. `preprocess`: grayscale, resize, scale to `[0, 1]`.
//! 3. `classify`: probability vector over the fixed label set.
//! 4. `window`: running mean of the last K vectors (nothing until warm).
//! 5. `decision`: arg-max + confidence threshold.
//! 6. `notify`: one line per distinct confident label transition.
//!
//! The only cross-iteration state is the smoothing window and the notifier's
//! last transmitted label. Both are owned by the `AcquisitionLoop` value.
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration
//! - `labels`: validated index to label binding
//! - `link`: actuator link transports (serial, TCP, MQTT, stdout)
//! - `capture`: labeled dataset capture in timed batches

use std::fmt;

pub mod capture;
pub mod classify;
pub mod config;
pub mod decision;
pub mod ingest;
pub mod labels;
pub mod link;
pub mod notify;
pub mod pipeline;
pub mod preprocess;
pub mod window;

pub use capture::{CaptureReport, DatasetCapture};
pub use classify::{Classifier, InputLayout, InputShape, ProbabilityVector, StubClassifier};
#[cfg(feature = "backend-tract")]
pub use classify::TractClassifier;
pub use config::RelayConfig;
pub use decision::{Decision, DecisionResolver};
pub use ingest::{Frame, FrameSource, HttpCameraSource, SyntheticSource};
pub use labels::{Label, LabelMap};
pub use link::{open_link, LinkTarget};
pub use notify::{DebounceNotifier, NotifyResult, SkipReason};
pub use pipeline::{AcquisitionLoop, CancelToken, IterationOutcome, LoopState, LoopStats};
pub use preprocess::{InputTensor, Preprocessor};
pub use window::{MeanVector, SmoothingWindow};

// -------------------- Error taxonomy --------------------

/// Recoverable per-iteration failure. The loop logs it, backs off, and retries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The camera did not answer within the per-request timeout.
    Timeout(String),
    /// Connection refused, reset, DNS failure, non-2xx status.
    Transport(String),
    /// Empty or oversized payload, or a stream that ended mid-frame.
    Malformed(String),
    /// The payload was not a decodable image.
    Decode(String),
    /// The frame could not be turned into a model input tensor.
    Preprocess(String),
    /// The classifier failed on this frame.
    Inference(String),
}

impl AcquisitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Timeout(_) => "timeout",
            AcquisitionError::Transport(_) => "transport",
            AcquisitionError::Malformed(_) => "malformed",
            AcquisitionError::Decode(_) => "decode",
            AcquisitionError::Preprocess(_) => "preprocess",
            AcquisitionError::Inference(_) => "inference",
        }
    }

    fn detail(&self) -> &str {
        match self {
            AcquisitionError::Timeout(m)
            | AcquisitionError::Transport(m)
            | AcquisitionError::Malformed(m)
            | AcquisitionError::Decode(m)
            | AcquisitionError::Preprocess(m)
            | AcquisitionError::Inference(m) => m,
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind(), self.detail())
    }
}
impl std::error::Error for AcquisitionError {}

/// Fatal setup error. Detected before the loop starts (or the first time a
/// classifier disagrees with the label map) and never retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}
impl std::error::Error for ConfigurationError {}

/// Write or flush to the actuator link failed. The notifier keeps its
/// debounce memory unchanged so the same label is retried.
#[derive(Debug)]
pub struct NotifyTransportError {
    pub label: String,
    pub source: std::io::Error,
}

impl fmt::Display for NotifyTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send '{}' to actuator link: {}", self.label, self.source)
    }
}

impl std::error::Error for NotifyTransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_error_display_names_kind() {
        let err = AcquisitionError::Timeout("no answer after 5000ms".to_string());
        assert_eq!(err.to_string(), "timeout error: no answer after 5000ms");
        assert_eq!(AcquisitionError::Decode(String::new()).kind(), "decode");
    }

    #[test]
    fn configuration_error_converts_into_anyhow() {
        let err: anyhow::Error = ConfigurationError::new("labels must not be empty").into();
        assert!(err.to_string().contains("labels must not be empty"));
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }

    #[test]
    fn notify_transport_error_exposes_io_source() {
        let err = NotifyTransportError {
            label: "Circulo".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "port closed"),
        };
        assert!(err.to_string().contains("Circulo"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
