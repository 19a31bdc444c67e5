use crate::ann_matrix::DataMatrix;
use crate::error::DataError;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

///
/// Normalize an in-memory matrix into a row-sliced CSR form: keep the
/// rows listed in `idx` (in that order), coerce NaN values to zero,
/// and drop explicit zeros. Backed matrices are refused here; they go
/// through the indexed row-source path instead of being loaded whole.
///
/// * `x` - dense or sparse expression matrix
/// * `idx` - observation rows to keep, in output order
///
pub fn to_csr_rows(x: &DataMatrix, idx: &[usize]) -> anyhow::Result<CsrMatrix<f32>> {
    let ncols = x.num_features();
    let mut coo = CooMatrix::new(idx.len(), ncols);

    match x {
        DataMatrix::Dense(dense) => {
            for (i, &row) in idx.iter().enumerate() {
                for (j, &x_ij) in dense.row(row).iter().enumerate() {
                    if x_ij.is_nan() || x_ij == 0_f32 {
                        continue;
                    }
                    coo.push(i, j, x_ij);
                }
            }
        }
        DataMatrix::Csr(csr) => {
            push_csr_rows(&mut coo, csr, idx);
        }
        DataMatrix::Csc(csc) => {
            let csr = CsrMatrix::from(csc);
            push_csr_rows(&mut coo, &csr, idx);
        }
        DataMatrix::Backed(_) => {
            return Err(DataError::BackedNotSupported.into());
        }
    }

    Ok(CsrMatrix::from(&coo))
}

fn push_csr_rows(coo: &mut CooMatrix<f32>, csr: &CsrMatrix<f32>, idx: &[usize]) {
    for (i, &row) in idx.iter().enumerate() {
        let lane = csr.row(row);
        for (&j, &x_ij) in lane.col_indices().iter().zip(lane.values().iter()) {
            if x_ij.is_nan() || x_ij == 0_f32 {
                continue;
            }
            coo.push(i, j, x_ij);
        }
    }
}
