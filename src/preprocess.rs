//! Frame to model-input conversion.
//!
//! Frames are converted to grayscale, resized to the model's input size, then
//! replicated to the model's channel count (1 or 3) and scaled to `[0, 1]`.
//! Grayscale is applied even for 3-channel models; the models are trained on
//! gray captures (see `capture`).

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::classify::{InputLayout, InputShape};
use crate::ingest::Frame;
use crate::AcquisitionError;

/// Flat `f32` tensor with batch size 1, laid out per `InputLayout`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub shape: InputShape,
    pub layout: InputLayout,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn zeros(shape: InputShape, layout: InputLayout) -> Self {
        Self {
            shape,
            layout,
            data: vec![0.0; shape.element_count()],
        }
    }

    /// `[1, h, w, c]` or `[1, c, h, w]`.
    pub fn dims(&self) -> [usize; 4] {
        let (h, w, c) = (
            self.shape.height as usize,
            self.shape.width as usize,
            self.shape.channels as usize,
        );
        match self.layout {
            InputLayout::Nhwc => [1, h, w, c],
            InputLayout::Nchw => [1, c, h, w],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    shape: InputShape,
    layout: InputLayout,
}

impl Preprocessor {
    pub fn new(shape: InputShape, layout: InputLayout) -> Self {
        Self { shape, layout }
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    /// Grayscale + resize only. Shared with dataset capture.
    pub fn gray_resized(&self, image: &DynamicImage) -> Result<GrayImage, AcquisitionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AcquisitionError::Preprocess(
                "frame has zero width or height".to_string(),
            ));
        }
        let gray = image.to_luma8();
        Ok(image::imageops::resize(
            &gray,
            self.shape.width,
            self.shape.height,
            FilterType::Triangle,
        ))
    }

    pub fn tensor(&self, frame: &Frame) -> Result<InputTensor, AcquisitionError> {
        let gray = self.gray_resized(&frame.image)?;
        let (w, h, c) = (
            self.shape.width as usize,
            self.shape.height as usize,
            self.shape.channels as usize,
        );
        let mut data = vec![0.0f32; self.shape.element_count()];
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = f32::from(pixel[0]) / 255.0;
            let (x, y) = (x as usize, y as usize);
            for channel in 0..c {
                let idx = match self.layout {
                    InputLayout::Nhwc => (y * w + x) * c + channel,
                    InputLayout::Nchw => (channel * h + y) * w + x,
                };
                data[idx] = value;
            }
        }
        Ok(InputTensor {
            shape: self.shape,
            layout: self.layout,
            data,
        })
    }
}
