use rowmesh_core::{Matrix, Row};

use crate::error::WorkerError;

/// `row × rhs` with checked arithmetic.
pub fn multiply_row(row: &[i64], rhs: &Matrix) -> Result<Row, WorkerError> {
    if row.len() != rhs.num_rows() {
        return Err(WorkerError::DimensionMismatch {
            row_len: row.len(),
            rhs_rows: rhs.num_rows(),
        });
    }

    (0..rhs.num_cols())
        .map(|column| {
            row.iter()
                .zip(rhs.rows())
                .try_fold(0i64, |acc, (&a, rhs_row)| {
                    a.checked_mul(rhs_row[column])
                        .and_then(|product| acc.checked_add(product))
                })
                .ok_or(WorkerError::Overflow { column })
        })
        .collect()
}
