mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::config::ModelSettings;
use crate::labels::LabelMap;
use crate::preprocess::InputTensor;
use crate::ConfigurationError;

pub use stub::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;

/// One inference result: a score per label, in label order. Scores are not
/// required to sum to 1.
pub type ProbabilityVector = Vec<f32>;

/// Model input geometry, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    pub fn element_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Tensor memory order expected by the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputLayout {
    /// Keras / TFLite exports.
    #[default]
    Nhwc,
    /// PyTorch exports.
    Nchw,
}

impl FromStr for InputLayout {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(InputLayout::Nhwc),
            "nchw" => Ok(InputLayout::Nchw),
            other => Err(ConfigurationError::new(format!(
                "unknown input layout '{}'; expected nhwc or nchw",
                other
            ))),
        }
    }
}

/// Classifier backend.
///
/// The backend owns its internal tensors and is invoked strictly
/// sequentially; implementations need not be re-entrant.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn input_shape(&self) -> InputShape;

    /// Score one preprocessed frame.
    fn infer(&mut self, input: &InputTensor) -> Result<ProbabilityVector>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_shape(&self) -> InputShape {
        (**self).input_shape()
    }

    fn infer(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        (**self).infer(input)
    }
}

/// Run the classifier once on a blank input and check that it scores exactly
/// one value per configured label.
pub fn probe_output_len<C: Classifier + ?Sized>(
    classifier: &mut C,
    layout: InputLayout,
    labels: &LabelMap,
) -> Result<(), ConfigurationError> {
    let blank = InputTensor::zeros(classifier.input_shape(), layout);
    let scores = classifier.infer(&blank).map_err(|e| {
        ConfigurationError::new(format!(
            "classifier '{}' failed on probe input: {:#}",
            classifier.name(),
            e
        ))
    })?;
    labels.check_output_len(scores.len())
}

/// Build the configured backend: tract for a model file, stub otherwise.
pub fn build_classifier(settings: &ModelSettings, labels: &LabelMap) -> Result<Box<dyn Classifier>> {
    match &settings.path {
        Some(path) => {
            #[cfg(feature = "backend-tract")]
            {
                log::info!("loading model {} ({})", path.display(), settings.shape);
                Ok(Box::new(TractClassifier::new(
                    path,
                    settings.shape,
                    settings.layout,
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                anyhow::bail!(
                    "model {} requires the backend-tract feature",
                    path.display()
                )
            }
        }
        None => {
            log::warn!("no model configured; using brightness stub classifier");
            Ok(Box::new(StubClassifier::new(settings.shape, labels.len())))
        }
    }
}
