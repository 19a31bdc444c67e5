use crate::error::EstimatorError;
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array2, ArrayD};

pub const SIZE_FACTOR_SCALE: f32 = 1e4;
pub const SIZE_FACTOR_EPS: f32 = 1e-10;

/// sf = ln(total_count / 1e4 + 1e-10)
#[inline]
pub fn log_size(total_count: f32) -> f32 {
    (total_count / SIZE_FACTOR_SCALE + SIZE_FACTOR_EPS).ln()
}

/// One size factor per row of a sparse observations x features matrix
pub fn size_factors_csr(x: &CsrMatrix<f32>) -> Vec<f32> {
    x.row_iter()
        .map(|row| log_size(row.values().iter().sum()))
        .collect()
}

/// One size factor per row of a dense block
pub fn size_factors_rows(x: &Array2<f32>) -> Vec<f32> {
    x.rows().into_iter().map(|row| log_size(row.sum())).collect()
}

///
/// Size factors for a dense input of dynamic rank: a rank-2 input
/// yields one factor per row, a rank-1 input a single factor.
///
pub fn size_factors_dense(x: &ArrayD<f32>) -> anyhow::Result<Vec<f32>> {
    match x.ndim() {
        1 => Ok(vec![log_size(x.sum())]),
        2 => {
            let ncols = x.shape()[1];
            let nrows = x.shape()[0];
            let mut ret = Vec::with_capacity(nrows);
            for i in 0..nrows {
                let mut total = 0_f32;
                for j in 0..ncols {
                    total += x[[i, j]];
                }
                ret.push(log_size(total));
            }
            Ok(ret)
        }
        rank => Err(EstimatorError::InvalidRank(rank).into()),
    }
}
