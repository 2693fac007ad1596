//! Index to label binding.
//!
//! The model's output positions and the configured label list are coupled only
//! by order. `LabelMap` is built once at startup, validated, and never mutated,
//! so index `i` always names the same label for the lifetime of the process.

use std::fmt;
use std::sync::Arc;

use crate::ConfigurationError;

/// One label, identified by its position in the `LabelMap`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label {
    index: usize,
    name: Arc<str>,
}

impl Label {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Debug)]
pub struct LabelMap {
    labels: Vec<Label>,
}

impl LabelMap {
    /// Build the map from an ordered list of names.
    ///
    /// Names must be non-empty, unique, and single-line (they are sent
    /// verbatim as newline-delimited messages).
    pub fn new<I, S>(names: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<Label> = Vec::new();
        for (index, raw) in names.into_iter().enumerate() {
            let name = raw.as_ref().trim();
            if name.is_empty() {
                return Err(ConfigurationError::new(format!(
                    "label at index {} is empty",
                    index
                )));
            }
            if name.contains('\n') || name.contains('\r') {
                return Err(ConfigurationError::new(format!(
                    "label '{}' must not contain line breaks",
                    name.escape_default()
                )));
            }
            if labels.iter().any(|existing| existing.name() == name) {
                return Err(ConfigurationError::new(format!(
                    "label '{}' listed more than once",
                    name
                )));
            }
            labels.push(Label {
                index,
                name: Arc::from(name),
            });
        }
        if labels.is_empty() {
            return Err(ConfigurationError::new("at least one label is required"));
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    /// Reject a classifier whose output length disagrees with the label count.
    pub fn check_output_len(&self, output_len: usize) -> Result<(), ConfigurationError> {
        if output_len != self.labels.len() {
            return Err(ConfigurationError::new(format!(
                "classifier produces {} scores but {} labels are configured",
                output_len,
                self.labels.len()
            )));
        }
        Ok(())
    }
}
