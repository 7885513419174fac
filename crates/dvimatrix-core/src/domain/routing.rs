//! Matrix dimensions and the output → input routing table.
//!
//! A crosspoint switcher has a fixed number of outputs and inputs.  Every
//! output shows exactly one input at a time, so the routing state is a map
//! keyed by output index.  Indices are zero-based everywhere in this crate;
//! the one-based numbering used on the wire is handled by the codec.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of outputs the wire protocol can address.
///
/// Outputs are addressed by a single uppercase letter (`A`..=`Z`).
pub const MAX_OUTPUTS: usize = 26;

/// Errors raised when constructing a [`MatrixSize`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    /// A matrix needs at least one output.
    #[error("matrix must have at least one output")]
    NoOutputs,

    /// A matrix needs at least one input.
    #[error("matrix must have at least one input")]
    NoInputs,

    /// More outputs than the single-letter addressing scheme supports.
    #[error("matrix with {outputs} outputs is unsupported (at most {max} outputs can be addressed)")]
    TooManyOutputs { outputs: usize, max: usize },
}

/// The fixed dimensions of a switcher: number of outputs × number of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixSize {
    outputs: usize,
    inputs: usize,
}

impl MatrixSize {
    /// The 8 × 8 layout of the DVImatrix848 hardware.
    pub const CANONICAL: MatrixSize = MatrixSize {
        outputs: 8,
        inputs: 8,
    };

    /// Creates a size after checking it can be addressed on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`SizeError`] for zero outputs or inputs, or for more than
    /// [`MAX_OUTPUTS`] outputs.
    pub fn new(outputs: usize, inputs: usize) -> Result<Self, SizeError> {
        if outputs == 0 {
            return Err(SizeError::NoOutputs);
        }
        if inputs == 0 {
            return Err(SizeError::NoInputs);
        }
        if outputs > MAX_OUTPUTS {
            return Err(SizeError::TooManyOutputs {
                outputs,
                max: MAX_OUTPUTS,
            });
        }
        Ok(Self { outputs, inputs })
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn contains_output(&self, output: usize) -> bool {
        output < self.outputs
    }

    pub fn contains_input(&self, input: usize) -> bool {
        input < self.inputs
    }

    /// Returns `true` if both ends of `route` lie inside the matrix.
    pub fn contains(&self, route: Route) -> bool {
        self.contains_output(route.output) && self.contains_input(route.input)
    }
}

impl Default for MatrixSize {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl fmt::Display for MatrixSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.outputs, self.inputs)
    }
}

/// One crosspoint: `output` shows `input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub output: usize,
    pub input: usize,
}

impl Route {
    pub fn new(output: usize, input: usize) -> Self {
        Self { output, input }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out {} <- in {}", self.output, self.input)
    }
}

/// Mapping from output index to input index.
///
/// Keys are unique, so each output maps to at most one input.  Iteration is
/// in ascending output order, which keeps logs and persisted files stable.
/// Serialises as a JSON object with the output index as a string key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable {
    routes: BTreeMap<usize, usize>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the input currently recorded for `output`.
    pub fn get(&self, output: usize) -> Option<usize> {
        self.routes.get(&output).copied()
    }

    /// Records `input` for `output`, returning the previous input if any.
    pub fn set(&mut self, output: usize, input: usize) -> Option<usize> {
        self.routes.insert(output, input)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterates the routes in ascending output order.
    pub fn iter(&self) -> impl Iterator<Item = Route> + '_ {
        self.routes
            .iter()
            .map(|(&output, &input)| Route { output, input })
    }

    /// Returns the entries of `self` that `reported` contradicts.
    ///
    /// An output absent from `reported` is not drift: the device may drop
    /// status lines, and a missing line says nothing about the route.
    pub fn drift_from(&self, reported: &RoutingTable) -> RoutingTable {
        self.iter()
            .filter(|r| matches!(reported.get(r.output), Some(i) if i != r.input))
            .collect()
    }

    /// Overwrites entries of `self` with every entry of `other`.
    pub fn merge_from(&mut self, other: &RoutingTable) {
        for route in other.iter() {
            self.set(route.output, route.input);
        }
    }

    /// Splits the table into the routes that fit `size` and those that do not.
    pub fn partition_by_size(&self, size: MatrixSize) -> (RoutingTable, Vec<Route>) {
        let mut inside = RoutingTable::new();
        let mut outside = Vec::new();
        for route in self.iter() {
            if size.contains(route) {
                inside.set(route.output, route.input);
            } else {
                outside.push(route);
            }
        }
        (inside, outside)
    }
}

impl FromIterator<Route> for RoutingTable {
    fn from_iter<T: IntoIterator<Item = Route>>(iter: T) -> Self {
        let mut table = RoutingTable::new();
        for route in iter {
            table.set(route.output, route.input);
        }
        table
    }
}

impl From<BTreeMap<usize, usize>> for RoutingTable {
    fn from(routes: BTreeMap<usize, usize>) -> Self {
        Self { routes }
    }
}

impl<const N: usize> From<[(usize, usize); N]> for RoutingTable {
    fn from(pairs: [(usize, usize); N]) -> Self {
        pairs
            .into_iter()
            .map(|(output, input)| Route { output, input })
            .collect()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (n, route) in self.iter().enumerate() {
            if n > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", route.output, route.input)?;
        }
        f.write_str("}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_size_rejects_zero_outputs() {
        assert_eq!(MatrixSize::new(0, 8), Err(SizeError::NoOutputs));
    }

    #[test]
    fn test_matrix_size_rejects_zero_inputs() {
        assert_eq!(MatrixSize::new(8, 0), Err(SizeError::NoInputs));
    }

    #[test]
    fn test_matrix_size_rejects_more_than_26_outputs() {
        let result = MatrixSize::new(27, 4);
        assert_eq!(
            result,
            Err(SizeError::TooManyOutputs {
                outputs: 27,
                max: MAX_OUTPUTS
            })
        );
    }

    #[test]
    fn test_matrix_size_accepts_26_outputs_and_many_inputs() {
        let size = MatrixSize::new(26, 64).expect("26 outputs are addressable");
        assert!(size.contains_output(25));
        assert!(!size.contains_output(26));
        assert!(size.contains_input(63));
    }

    #[test]
    fn test_matrix_size_default_is_canonical_8x8() {
        let size = MatrixSize::default();
        assert_eq!(size.outputs(), 8);
        assert_eq!(size.inputs(), 8);
        assert_eq!(size.to_string(), "8x8");
    }

    #[test]
    fn test_routing_table_set_replaces_previous_input() {
        // Arrange
        let mut table = RoutingTable::new();
        table.set(3, 1);

        // Act
        let previous = table.set(3, 5);

        // Assert – still one entry for output 3
        assert_eq!(previous, Some(1));
        assert_eq!(table.get(3), Some(5));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_routing_table_iterates_in_output_order() {
        let table = RoutingTable::from([(4, 0), (0, 2), (2, 7)]);
        let outputs: Vec<usize> = table.iter().map(|r| r.output).collect();
        assert_eq!(outputs, vec![0, 2, 4]);
    }

    #[test]
    fn test_drift_reports_only_contradicted_entries() {
        // Arrange
        let cache = RoutingTable::from([(0, 1), (1, 2), (2, 3)]);
        // Output 1 differs, output 2 is missing from the report.
        let reported = RoutingTable::from([(0, 1), (1, 6)]);

        // Act
        let drift = cache.drift_from(&reported);

        // Assert
        assert_eq!(drift, RoutingTable::from([(1, 2)]));
    }

    #[test]
    fn test_drift_is_empty_when_tables_agree() {
        let table = RoutingTable::from([(0, 0), (1, 1)]);
        assert!(table.drift_from(&table.clone()).is_empty());
    }

    #[test]
    fn test_merge_from_overwrites_and_extends() {
        let mut table = RoutingTable::from([(0, 0), (1, 1)]);
        table.merge_from(&RoutingTable::from([(1, 4), (5, 2)]));
        assert_eq!(table, RoutingTable::from([(0, 0), (1, 4), (5, 2)]));
    }

    #[test]
    fn test_partition_by_size_separates_out_of_range_routes() {
        // Arrange
        let size = MatrixSize::new(4, 4).unwrap();
        let table = RoutingTable::from([(0, 3), (4, 0), (1, 9)]);

        // Act
        let (inside, outside) = table.partition_by_size(size);

        // Assert
        assert_eq!(inside, RoutingTable::from([(0, 3)]));
        assert_eq!(outside, vec![Route::new(1, 9), Route::new(4, 0)]);
    }

    #[test]
    fn test_routing_table_display_is_compact() {
        let table = RoutingTable::from([(1, 2), (0, 5)]);
        assert_eq!(table.to_string(), "{0: 5, 1: 2}");
    }
}
