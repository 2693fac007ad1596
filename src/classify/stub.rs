use anyhow::{anyhow, Result};

use super::{Classifier, InputShape, ProbabilityVector};
use crate::preprocess::InputTensor;

/// Stub classifier for dry runs. Scores frames by mean brightness: the
/// `[0, 1]` brightness range is split into one band per label and the band
/// containing the frame's mean gets 0.9, the rest share 0.1.
pub struct StubClassifier {
    shape: InputShape,
    outputs: usize,
}

impl StubClassifier {
    pub fn new(shape: InputShape, outputs: usize) -> Self {
        Self { shape, outputs }
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn infer(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        if input.data.len() != self.shape.element_count() {
            return Err(anyhow!(
                "expected {} input values, received {}",
                self.shape.element_count(),
                input.data.len()
            ));
        }
        if self.outputs == 0 {
            return Ok(Vec::new());
        }
        let mean = input.data.iter().sum::<f32>() / input.data.len().max(1) as f32;
        let band = ((mean * self.outputs as f32) as usize).min(self.outputs - 1);

        let mut scores = vec![0.0; self.outputs];
        if self.outputs == 1 {
            scores[0] = 1.0;
        } else {
            let rest = 0.1 / (self.outputs - 1) as f32;
            for (index, score) in scores.iter_mut().enumerate() {
                *score = if index == band { 0.9 } else { rest };
            }
        }
        Ok(scores)
    }
}
