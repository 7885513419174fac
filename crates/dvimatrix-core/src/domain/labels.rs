//! Display names for the inputs and outputs of the matrix.
//!
//! Labels are index-aligned with the routing table: `outputs[3]` names
//! output 3.  A label set is only ever replaced as a whole so that a partial
//! edit cannot shift names onto the wrong ports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::routing::{MatrixSize, SizeError};

/// Errors raised when labels do not fit the matrix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("expected {expected} {side} labels, got {actual}")]
    CountMismatch {
        side: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// An ordered sequence of port names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    /// Generates `count` labels named `<prefix>0`, `<prefix>1`, …
    pub fn numbered(prefix: &str, count: usize) -> Self {
        Self((0..count).map(|n| format!("{prefix}{n}")).collect())
    }

    /// The default input labels: `IN#0` … `IN#<count-1>`.
    pub fn default_inputs(count: usize) -> Self {
        Self::numbered("IN#", count)
    }

    /// The default output labels: `OUT#0` … `OUT#<count-1>`.
    pub fn default_outputs(count: usize) -> Self {
        Self::numbered("OUT#", count)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for LabelSet {
    fn from(labels: Vec<String>) -> Self {
        Self(labels)
    }
}

impl<'a> FromIterator<&'a str> for LabelSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// Input and output labels of one matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixLabels {
    pub inputs: LabelSet,
    pub outputs: LabelSet,
}

impl MatrixLabels {
    /// Default labels for a matrix of `size`.
    pub fn defaults(size: MatrixSize) -> Self {
        Self {
            inputs: LabelSet::default_inputs(size.inputs()),
            outputs: LabelSet::default_outputs(size.outputs()),
        }
    }

    /// The matrix size implied by the label counts.
    ///
    /// # Errors
    ///
    /// Returns [`SizeError`] when either set is empty or there are more
    /// output labels than outputs can be addressed.
    pub fn size(&self) -> Result<MatrixSize, SizeError> {
        MatrixSize::new(self.outputs.len(), self.inputs.len())
    }

    /// Checks that both sets have exactly the dimensions of `size`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::CountMismatch`] naming the first mismatching side.
    pub fn check_fits(&self, size: MatrixSize) -> Result<(), LabelError> {
        if self.inputs.len() != size.inputs() {
            return Err(LabelError::CountMismatch {
                side: "input",
                expected: size.inputs(),
                actual: self.inputs.len(),
            });
        }
        if self.outputs.len() != size.outputs() {
            return Err(LabelError::CountMismatch {
                side: "output",
                expected: size.outputs(),
                actual: self.outputs.len(),
            });
        }
        Ok(())
    }
}
