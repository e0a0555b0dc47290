use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::types::id::JobId;

pub type Row = Vec<i64>;

/// Rectangular integer matrix stored row-major. Serialized as a plain list
/// of rows; deserialization rejects ragged input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Row>", into = "Vec<Row>")]
pub struct Matrix {
    rows: Vec<Row>,
    cols: usize,
}

impl Matrix {
    pub fn new(rows: Vec<Row>) -> Result<Self, CoordError> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(CoordError::InvalidJob(format!(
                "row {idx} has {} columns, expected {cols}",
                row.len()
            )));
        }
        Ok(Self { rows, cols })
    }

    #[must_use]
    pub fn identity(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| (0..n).map(|j| i64::from(i == j)).collect())
            .collect();
        Self { rows, cols: n }
    }

    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn num_cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl TryFrom<Vec<Row>> for Matrix {
    type Error = CoordError;

    fn try_from(rows: Vec<Row>) -> Result<Self, Self::Error> {
        Self::new(rows)
    }
}

impl From<Matrix> for Vec<Row> {
    fn from(matrix: Matrix) -> Self {
        matrix.rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// `input × rhs`
    Multiply { rhs: Matrix },
    /// `input × input`; the input must be square.
    Square,
}

/// A unit of work submitted to the coordinator. Each input row is one
/// partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub operation: Operation,
    pub input: Matrix,
}

impl JobDescriptor {
    #[must_use]
    pub const fn new(operation: Operation, input: Matrix) -> Self {
        Self { operation, input }
    }

    #[must_use]
    pub const fn multiply(input: Matrix, rhs: Matrix) -> Self {
        Self::new(Operation::Multiply { rhs }, input)
    }

    #[must_use]
    pub const fn square(input: Matrix) -> Self {
        Self::new(Operation::Square, input)
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if self.input.num_rows() == 0 || self.input.num_cols() == 0 {
            return Err(CoordError::InvalidJob("input matrix is empty".to_string()));
        }
        match &self.operation {
            Operation::Multiply { rhs } if rhs.num_rows() != self.input.num_cols() => {
                Err(CoordError::InvalidJob(format!(
                    "cannot multiply {}x{} by {}x{}",
                    self.input.num_rows(),
                    self.input.num_cols(),
                    rhs.num_rows(),
                    rhs.num_cols()
                )))
            }
            Operation::Square if self.input.num_rows() != self.input.num_cols() => {
                Err(CoordError::InvalidJob(format!(
                    "cannot square a {}x{} matrix",
                    self.input.num_rows(),
                    self.input.num_cols()
                )))
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub const fn num_partitions(&self) -> usize {
        self.input.num_rows()
    }

    #[must_use]
    pub const fn rhs(&self) -> &Matrix {
        match &self.operation {
            Operation::Multiply { rhs } => rhs,
            Operation::Square => &self.input,
        }
    }

    #[must_use]
    pub const fn output_width(&self) -> usize {
        self.rhs().num_cols()
    }
}

/// Assembled output of a job. `None` marks a partition no worker returned
/// before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub rows: Vec<Option<Row>>,
}

impl JobResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(Option::is_some)
    }

    #[must_use]
    pub fn missing_partitions(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row.is_none().then_some(idx))
            .collect()
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    /// Returns the full product, or `None` if any partition is absent.
    #[must_use]
    pub fn into_matrix(self) -> Option<Matrix> {
        let rows: Option<Vec<Row>> = self.rows.into_iter().collect();
        rows.and_then(|rows| Matrix::new(rows).ok())
    }
}
