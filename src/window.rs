//! Smoothing window.
//!
//! Bounded FIFO of the most recent K probability vectors. A mean is produced
//! only once the window holds exactly K entries; before that the pipeline is
//! warming up and makes no decision.

use std::collections::VecDeque;

use crate::ConfigurationError;

/// Elementwise mean of a full window. Only `SmoothingWindow` constructs it,
/// so its length always equals the window's dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanVector(Vec<f32>);

impl MeanVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct SmoothingWindow {
    buffer: VecDeque<Vec<f32>>,
    capacity: usize,
    dims: usize,
}

impl SmoothingWindow {
    /// `capacity` is K, `dims` is the label count N.
    pub fn new(capacity: usize, dims: usize) -> Result<Self, ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::new("window size must be at least 1"));
        }
        if dims == 0 {
            return Err(ConfigurationError::new("window needs at least one label"));
        }
        Ok(Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            dims,
        })
    }

    /// Push one vector and return the mean when the window is full.
    ///
    /// A vector whose length differs from N is a configuration fault and
    /// leaves the window untouched.
    pub fn push(&mut self, vector: &[f32]) -> Result<Option<MeanVector>, ConfigurationError> {
        if vector.len() != self.dims {
            return Err(ConfigurationError::new(format!(
                "probability vector has {} entries, expected {}",
                vector.len(),
                self.dims
            )));
        }

        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(vector.to_vec());

        Ok(self.mean())
    }

    /// Mean of the current contents, or `None` while warming up.
    pub fn mean(&self) -> Option<MeanVector> {
        if self.buffer.len() < self.capacity {
            return None;
        }
        let mut sums = vec![0.0f64; self.dims];
        for vector in &self.buffer {
            for (sum, value) in sums.iter_mut().zip(vector) {
                *sum += f64::from(*value);
            }
        }
        let count = self.buffer.len() as f64;
        Some(MeanVector(
            sums.into_iter().map(|sum| (sum / count) as f32).collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// N: the length every pushed vector must have.
    pub fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
impl MeanVector {
    pub(crate) fn from_values(values: Vec<f32>) -> Self {
        MeanVector(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn warms_up_after_k_pushes() {
        let mut window = SmoothingWindow::new(10, 2).unwrap();
        for _ in 0..9 {
            assert!(window.push(&[0.2, 0.8]).unwrap().is_none());
        }
        assert!(window.push(&[0.2, 0.8]).unwrap().is_some());
        for _ in 0..5 {
            assert!(window.push(&[0.2, 0.8]).unwrap().is_some());
        }
        assert_eq!(window.len(), 10);
    }

    #[test]
    fn mean_of_one_hot_vectors() {
        let mut window = SmoothingWindow::new(3, 3).unwrap();
        window.push(&[1.0, 0.0, 0.0]).unwrap();
        window.push(&[0.0, 1.0, 0.0]).unwrap();
        let mean = window.push(&[0.0, 0.0, 1.0]).unwrap().unwrap();
        for value in mean.as_slice() {
            assert!(approx(*value, 1.0 / 3.0));
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut window = SmoothingWindow::new(2, 2).unwrap();
        window.push(&[1.0, 0.0]).unwrap();
        window.push(&[1.0, 0.0]).unwrap();
        let mean = window.push(&[0.0, 1.0]).unwrap().unwrap();
        assert!(approx(mean.as_slice()[0], 0.5));
        let mean = window.push(&[0.0, 1.0]).unwrap().unwrap();
        assert!(approx(mean.as_slice()[1], 1.0));
    }

    #[test]
    fn rejects_wrong_length_without_mutating() {
        let mut window = SmoothingWindow::new(2, 3).unwrap();
        window.push(&[0.1, 0.2, 0.7]).unwrap();
        assert!(window.push(&[0.5, 0.5]).is_err());
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(SmoothingWindow::new(0, 3).is_err());
    }
}
