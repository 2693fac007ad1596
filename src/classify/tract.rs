#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::{Classifier, InputLayout, InputShape, ProbabilityVector};
use crate::preprocess::InputTensor;

/// Tract-based ONNX image classifier.
///
/// Loads a local model, pins its input to `[1, h, w, c]` (or `[1, c, h, w]`)
/// f32, and returns the first output tensor flattened as the score vector.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    shape: InputShape,
    layout: InputLayout,
}

impl TractClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, shape: InputShape, layout: InputLayout) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (h, w, c) = (
            shape.height as usize,
            shape.width as usize,
            shape.channels as usize,
        );
        let dims = match layout {
            InputLayout::Nhwc => tvec!(1, h, w, c),
            InputLayout::Nchw => tvec!(1, c, h, w),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), dims))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            shape,
            layout,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.shape != self.shape || input.layout != self.layout {
            return Err(anyhow!(
                "input tensor {} {:?} does not match model input {} {:?}",
                input.shape,
                input.layout,
                self.shape,
                self.layout
            ));
        }
        let dims = input.dims();
        let array = tract_ndarray::Array4::from_shape_vec(
            (dims[0], dims[1], dims[2], dims[3]),
            input.data.clone(),
        )
        .context("input tensor length does not match its shape")?;
        Ok(array.into_tensor())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn infer(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }
}
