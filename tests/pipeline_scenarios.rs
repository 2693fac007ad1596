use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Duration;

use image::DynamicImage;

use vision_relay::{
    AcquisitionError, AcquisitionLoop, CancelToken, Classifier, DebounceNotifier,
    DecisionResolver, Frame, FrameSource, InputLayout, InputShape, InputTensor, IterationOutcome,
    LabelMap, LoopState, NotifyResult, Preprocessor, ProbabilityVector, SmoothingWindow,
    StubClassifier, SyntheticSource,
};

const SHAPE: InputShape = InputShape {
    width: 8,
    height: 8,
    channels: 1,
};

/// Fails the first `failures` fetches with a timeout, then yields blank frames.
struct UnreliableCamera {
    failures: u32,
    sequence: u64,
}

impl FrameSource for UnreliableCamera {
    fn describe(&self) -> String {
        "unreliable".to_string()
    }

    fn fetch_frame(&mut self) -> Result<Frame, AcquisitionError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(AcquisitionError::Timeout("camera did not answer".to_string()));
        }
        self.sequence += 1;
        Ok(Frame::new(DynamicImage::new_luma8(16, 16), self.sequence))
    }
}

/// Returns queued score vectors in order, repeating the last one.
struct QueuedClassifier {
    queue: VecDeque<ProbabilityVector>,
}

impl QueuedClassifier {
    fn new(vectors: Vec<ProbabilityVector>) -> Self {
        Self {
            queue: vectors.into(),
        }
    }
}

impl Classifier for QueuedClassifier {
    fn name(&self) -> &'static str {
        "queued"
    }

    fn input_shape(&self) -> InputShape {
        SHAPE
    }

    fn infer(&mut self, _input: &InputTensor) -> anyhow::Result<ProbabilityVector> {
        if self.queue.len() > 1 {
            if let Some(scores) = self.queue.pop_front() {
                return Ok(scores);
            }
        }
        self.queue
            .front()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scores queued"))
    }
}

/// Records lines and cancels the loop once `stop_after` lines were written.
struct RecordingLink {
    written: Vec<u8>,
    reject_writes: u32,
    stop_after: usize,
    cancel: CancelToken,
}

impl RecordingLink {
    fn new(cancel: CancelToken, stop_after: usize) -> Self {
        Self {
            written: Vec::new(),
            reject_writes: 0,
            stop_after,
            cancel,
        }
    }

    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .lines()
            .map(|line| line.to_string())
            .collect()
    }
}

impl Write for RecordingLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.reject_writes > 0 {
            self.reject_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped"));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.lines().len() >= self.stop_after {
            self.cancel.cancel();
        }
        Ok(())
    }
}

fn labels() -> LabelMap {
    LabelMap::new(["Circulo", "Triangulo", "Vazio"]).unwrap()
}

fn assemble<S: FrameSource, C: Classifier>(
    source: S,
    classifier: C,
    window: usize,
    link: RecordingLink,
) -> AcquisitionLoop<S, C, RecordingLink> {
    let labels = labels();
    AcquisitionLoop::new(
        source,
        classifier,
        Preprocessor::new(SHAPE, InputLayout::Nhwc),
        SmoothingWindow::new(window, labels.len()).unwrap(),
        DecisionResolver::new(labels, 0.7),
        DebounceNotifier::new(link),
        Duration::from_millis(1),
    )
    .unwrap()
}

#[test]
fn camera_outage_recovers_and_decision_is_sent() {
    let cancel = CancelToken::new();
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 3,
            sequence: 0,
        },
        QueuedClassifier::new(vec![vec![0.1, 0.85, 0.05]]),
        2,
        RecordingLink::new(cancel.clone(), 1),
    );

    let stats = pipeline.run(&cancel).expect("loop ends on cancellation");
    assert_eq!(stats.faults, 3);
    assert_eq!(stats.warmup_iterations, 1);
    assert_eq!(stats.sent, 1);
    assert_eq!(pipeline.into_notifier().into_link().lines(), vec!["Triangulo"]);
}

#[test]
fn faults_do_not_touch_the_window() {
    let cancel = CancelToken::new();
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 2,
            sequence: 0,
        },
        QueuedClassifier::new(vec![vec![1.0, 0.0, 0.0]]),
        2,
        RecordingLink::new(cancel, usize::MAX),
    );

    for _ in 0..2 {
        match pipeline.step().unwrap() {
            IterationOutcome::Faulted { failed_in, error } => {
                assert_eq!(failed_in, LoopState::Acquiring);
                assert_eq!(error.kind(), "timeout");
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }
    assert!(matches!(
        pipeline.step().unwrap(),
        IterationOutcome::WarmingUp {
            samples: 1,
            needed: 2
        }
    ));
}

#[test]
fn failed_write_is_retried_on_next_identical_decision() {
    let cancel = CancelToken::new();
    let mut link = RecordingLink::new(cancel, usize::MAX);
    link.reject_writes = 1;
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 0,
            sequence: 0,
        },
        QueuedClassifier::new(vec![vec![0.0, 0.0, 1.0]]),
        1,
        link,
    );

    match pipeline.step().unwrap() {
        IterationOutcome::NotifyFailed { decision, error } => {
            assert_eq!(decision.label.name(), "Vazio");
            assert!(error.contains("Vazio"));
        }
        other => panic!("expected notify failure, got {:?}", other),
    }
    assert!(pipeline.notifier().last_transmitted().is_none());

    assert!(matches!(
        pipeline.step().unwrap(),
        IterationOutcome::Decided {
            notify: NotifyResult::Sent(_),
            ..
        }
    ));
    assert!(matches!(
        pipeline.step().unwrap(),
        IterationOutcome::Decided {
            notify: NotifyResult::Suppressed,
            ..
        }
    ));
    assert_eq!(pipeline.stats().transport_failures, 1);
    assert_eq!(pipeline.notifier().link().lines(), vec!["Vazio"]);
}

#[test]
fn smoothed_sequence_announces_each_transition_once() {
    let cancel = CancelToken::new();
    // K = 2: means go A, A, mixed, B, B, mixed, A.
    let a = vec![0.9, 0.05, 0.05];
    let b = vec![0.05, 0.9, 0.05];
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 0,
            sequence: 0,
        },
        QueuedClassifier::new(vec![
            a.clone(),
            a.clone(),
            a.clone(),
            b.clone(),
            b.clone(),
            b.clone(),
            a.clone(),
            a.clone(),
        ]),
        2,
        RecordingLink::new(cancel, usize::MAX),
    );

    for _ in 0..8 {
        pipeline.step().unwrap();
    }
    let stats = pipeline.stats().clone();
    assert_eq!(stats.warmup_iterations, 1);
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.unconfident, 2);
    assert_eq!(
        pipeline.notifier().link().lines(),
        vec!["Circulo", "Triangulo", "Circulo"]
    );
}

#[test]
fn label_count_mismatch_is_fatal() {
    let cancel = CancelToken::new();
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 0,
            sequence: 0,
        },
        QueuedClassifier::new(vec![vec![0.5, 0.5]]),
        3,
        RecordingLink::new(cancel.clone(), usize::MAX),
    );

    let err = pipeline.run(&cancel).unwrap_err();
    assert!(err.message.contains("2 entries, expected 3"));
    assert!(pipeline.notifier().link().lines().is_empty());
}

#[test]
fn synthetic_camera_and_stub_classifier_reach_a_decision() {
    let cancel = CancelToken::new();
    let labels = labels();
    let mut pipeline = AcquisitionLoop::new(
        SyntheticSource::from_url("stub://bench?size=16&scene_frames=1000").unwrap(),
        StubClassifier::new(SHAPE, labels.len()),
        Preprocessor::new(SHAPE, InputLayout::Nhwc),
        SmoothingWindow::new(3, labels.len()).unwrap(),
        DecisionResolver::new(labels, 0.7),
        DebounceNotifier::new(RecordingLink::new(cancel.clone(), 1)),
        Duration::ZERO,
    )
    .unwrap();

    let stats = pipeline.run(&cancel).unwrap();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.warmup_iterations, 2);
    assert_eq!(pipeline.notifier().link().lines().len(), 1);
}

#[test]
fn cancellation_before_start_releases_link_untouched() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut pipeline = assemble(
        UnreliableCamera {
            failures: 0,
            sequence: 0,
        },
        QueuedClassifier::new(vec![vec![1.0, 0.0, 0.0]]),
        1,
        RecordingLink::new(cancel.clone(), usize::MAX),
    );

    let stats = pipeline.run(&cancel).unwrap();
    assert_eq!(stats.iterations, 0);
    assert!(pipeline.into_notifier().into_link().written.is_empty());
}
