//! Acquisition loop.
//!
//! One iteration walks the states in order:
//!
//! ```text
//! Acquiring -> Preprocessing -> Inferring -> Smoothing -> Deciding -> Notifying
//!     ^                                                                  |
//!     +------------------------------------------------------------------+
//! ```
//!
//! Any failure in the first three states moves the iteration to `Faulted`:
//! the error is logged, the loop sleeps for the backoff interval, and the next
//! iteration starts again at `Acquiring`. A notify transport failure is logged
//! and the loop continues without backoff. Only a `ConfigurationError`
//! (classifier output length disagreeing with the label map) ends the loop.
//!
//! Iterations are strictly sequential. Cancellation is checked once per
//! iteration boundary and never interrupts a fetch or a write.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::Classifier;
use crate::decision::{Decision, DecisionResolver};
use crate::ingest::FrameSource;
use crate::notify::{DebounceNotifier, NotifyResult};
use crate::preprocess::Preprocessor;
use crate::window::SmoothingWindow;
use crate::{AcquisitionError, ConfigurationError};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Acquiring,
    Preprocessing,
    Inferring,
    Smoothing,
    Deciding,
    Notifying,
    Faulted,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Acquiring => "acquiring",
            LoopState::Preprocessing => "preprocessing",
            LoopState::Inferring => "inferring",
            LoopState::Smoothing => "smoothing",
            LoopState::Deciding => "deciding",
            LoopState::Notifying => "notifying",
            LoopState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// What one iteration did.
#[derive(Debug)]
pub enum IterationOutcome {
    /// A recoverable error in `failed_in`; the caller should back off.
    Faulted {
        failed_in: LoopState,
        error: AcquisitionError,
    },
    /// Inference succeeded but the window is not full yet.
    WarmingUp { samples: usize, needed: usize },
    Decided {
        decision: Decision,
        notify: NotifyResult,
    },
    /// Decision was confident and new, but the link write failed. The label
    /// stays pending and is retried on the next qualifying decision.
    NotifyFailed { decision: Decision, error: String },
}

/// Cooperative cancellation flag, shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub faults: u64,
    pub warmup_iterations: u64,
    pub decisions: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub unconfident: u64,
    pub transport_failures: u64,
}

pub struct AcquisitionLoop<S, C, W>
where
    S: FrameSource,
    C: Classifier,
    W: Write,
{
    source: S,
    classifier: C,
    preprocessor: Preprocessor,
    window: SmoothingWindow,
    resolver: DecisionResolver,
    notifier: DebounceNotifier<W>,
    backoff: Duration,
    stats: LoopStats,
}

impl<S, C, W> AcquisitionLoop<S, C, W>
where
    S: FrameSource,
    C: Classifier,
    W: Write,
{
    /// Assemble the loop. The window dimension must match the label count.
    pub fn new(
        source: S,
        classifier: C,
        preprocessor: Preprocessor,
        window: SmoothingWindow,
        resolver: DecisionResolver,
        notifier: DebounceNotifier<W>,
        backoff: Duration,
    ) -> Result<Self, ConfigurationError> {
        if preprocessor.shape() != classifier.input_shape() {
            return Err(ConfigurationError::new(format!(
                "preprocessor produces {} but classifier '{}' expects {}",
                preprocessor.shape(),
                classifier.name(),
                classifier.input_shape()
            )));
        }
        if window.dims() != resolver.labels().len() {
            return Err(ConfigurationError::new(format!(
                "smoothing window holds {}-entry vectors but {} labels are configured",
                window.dims(),
                resolver.labels().len()
            )));
        }
        Ok(Self {
            source,
            classifier,
            preprocessor,
            window,
            resolver,
            notifier,
            backoff,
            stats: LoopStats::default(),
        })
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn notifier(&self) -> &DebounceNotifier<W> {
        &self.notifier
    }

    /// Tear the loop apart, returning the notifier (and with it the link).
    pub fn into_notifier(self) -> DebounceNotifier<W> {
        self.notifier
    }

    /// Run one iteration without sleeping.
    pub fn step(&mut self) -> Result<IterationOutcome, ConfigurationError> {
        self.stats.iterations += 1;
        let outcome = self.iterate()?;
        match &outcome {
            IterationOutcome::Faulted { .. } => self.stats.faults += 1,
            IterationOutcome::WarmingUp { .. } => self.stats.warmup_iterations += 1,
            IterationOutcome::Decided { notify, .. } => {
                self.stats.decisions += 1;
                match notify {
                    NotifyResult::Sent(_) => self.stats.sent += 1,
                    NotifyResult::Suppressed => self.stats.suppressed += 1,
                    NotifyResult::Skipped(_) => self.stats.unconfident += 1,
                }
            }
            IterationOutcome::NotifyFailed { .. } => {
                self.stats.decisions += 1;
                self.stats.transport_failures += 1;
            }
        }
        Ok(outcome)
    }

    fn iterate(&mut self) -> Result<IterationOutcome, ConfigurationError> {
        let mut state = LoopState::Acquiring;
        let frame = match self.source.fetch_frame() {
            Ok(frame) => frame,
            Err(error) => return Ok(faulted(state, error)),
        };

        state = LoopState::Preprocessing;
        let tensor = match self.preprocessor.tensor(&frame) {
            Ok(tensor) => tensor,
            Err(error) => return Ok(faulted(state, error)),
        };

        state = LoopState::Inferring;
        let scores = match self.classifier.infer(&tensor) {
            Ok(scores) => scores,
            Err(e) => return Ok(faulted(state, AcquisitionError::Inference(format!("{:#}", e)))),
        };

        state = LoopState::Smoothing;
        log::trace!("{}: frame #{} scores {:?}", state, frame.sequence, scores);
        let Some(mean) = self.window.push(&scores)? else {
            return Ok(IterationOutcome::WarmingUp {
                samples: self.window.len(),
                needed: self.window.capacity(),
            });
        };

        state = LoopState::Deciding;
        let decision = self.resolver.resolve(&mean)?;
        log::trace!("{}: {} ({:.3})", state, decision.label, decision.confidence);

        state = LoopState::Notifying;
        log::trace!("{}", state);
        match self.notifier.maybe_notify(&decision) {
            Ok(notify) => Ok(IterationOutcome::Decided { decision, notify }),
            Err(error) => Ok(IterationOutcome::NotifyFailed {
                decision,
                error: error.to_string(),
            }),
        }
    }

    /// Iterate until `cancel` is set. Returns the final statistics; the link
    /// is released when the loop value is dropped.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<LoopStats, ConfigurationError> {
        let mut last_health_log = Instant::now();
        log::info!(
            "acquisition loop running: source={} classifier={} window={} threshold={:.2}",
            self.source.describe(),
            self.classifier.name(),
            self.window.capacity(),
            self.resolver.threshold()
        );

        while !cancel.is_cancelled() {
            match self.step()? {
                IterationOutcome::Faulted { failed_in, error } => {
                    log::warn!(
                        "{} failed ({}); retrying in {}ms",
                        failed_in,
                        error,
                        self.backoff.as_millis()
                    );
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                }
                IterationOutcome::WarmingUp { samples, needed } => {
                    log::debug!("warming up: {}/{} samples", samples, needed);
                }
                IterationOutcome::Decided { decision, notify } => match notify {
                    NotifyResult::Sent(label) => log::info!(
                        "[>>>] sent {} ({:.1}%)",
                        label,
                        decision.confidence * 100.0
                    ),
                    NotifyResult::Suppressed => log::debug!(
                        "holding {} ({:.1}%)",
                        decision.label,
                        decision.confidence * 100.0
                    ),
                    NotifyResult::Skipped(reason) => log::debug!(
                        "processing... best guess {} ({:.1}%, {})",
                        decision.label,
                        decision.confidence * 100.0,
                        reason.as_str()
                    ),
                },
                IterationOutcome::NotifyFailed { decision, error } => {
                    log::warn!("{}; {} stays pending", error, decision.label);
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "health: iterations={} faults={} sent={} transport_failures={}",
                    self.stats.iterations,
                    self.stats.faults,
                    self.stats.sent,
                    self.stats.transport_failures
                );
                last_health_log = Instant::now();
            }
        }

        log::info!("cancellation requested; acquisition loop stopped");
        Ok(self.stats.clone())
    }
}

fn faulted(failed_in: LoopState, error: AcquisitionError) -> IterationOutcome {
    IterationOutcome::Faulted { failed_in, error }
}
