use cell_beans::adapter::to_csr_rows;
use cell_beans::ann_matrix::DataMatrix;
use cell_beans::error::DataError;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::array;

fn dense_from_csr(x: &CsrMatrix<f32>) -> Vec<Vec<f32>> {
    let mut out = vec![vec![0_f32; x.ncols()]; x.nrows()];
    for (i, j, &v) in x.triplet_iter() {
        out[i][j] = v;
    }
    out
}

#[test]
fn nan_values_coerced_to_zero() -> anyhow::Result<()> {
    let dense = array![[1., f32::NAN, 3.], [f32::NAN, 0., 6.]];
    let x = DataMatrix::Dense(dense);

    let csr = to_csr_rows(&x, &[0, 1])?;

    assert_eq!(csr.nrows(), 2);
    assert_eq!(csr.ncols(), 3);

    let out = dense_from_csr(&csr);
    assert_eq!(out[0], vec![1., 0., 3.]);
    assert_eq!(out[1], vec![0., 0., 6.]);
    assert!(csr.values().iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn rows_sliced_in_caller_order() -> anyhow::Result<()> {
    let dense = array![[1., 0.], [0., 2.], [3., 0.]];
    let x = DataMatrix::Dense(dense);

    let csr = to_csr_rows(&x, &[2, 0])?;

    let out = dense_from_csr(&csr);
    assert_eq!(out[0], vec![3., 0.]);
    assert_eq!(out[1], vec![1., 0.]);
    Ok(())
}

#[test]
fn sparse_variants_agree_with_dense() -> anyhow::Result<()> {
    let mut coo = CooMatrix::new(3, 4);
    coo.push(0, 1, 5.);
    coo.push(1, 0, 2.);
    coo.push(2, 3, 7.);
    let csr = CsrMatrix::from(&coo);
    let csc = nalgebra_sparse::CscMatrix::from(&coo);

    let idx = vec![1, 2];
    let from_csr = to_csr_rows(&DataMatrix::Csr(csr), &idx)?;
    let from_csc = to_csr_rows(&DataMatrix::Csc(csc), &idx)?;

    assert_eq!(dense_from_csr(&from_csr), dense_from_csr(&from_csc));
    Ok(())
}

#[test]
fn backed_matrix_refused_on_the_in_memory_path() -> anyhow::Result<()> {
    use cell_beans::sparse_backed::BackedSparseMatrix;
    use std::sync::Arc;

    let mut coo = CooMatrix::new(2, 2);
    coo.push(0, 0, 1.);
    let csr = CsrMatrix::from(&coo);

    let dir = tempfile::tempdir()?;
    let backend_file = dir.path().join("backed.h5");
    let backed = BackedSparseMatrix::from_csr(&csr, backend_file.to_str().unwrap())?;

    let err = to_csr_rows(&DataMatrix::Backed(Arc::new(backed)), &[0]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::BackedNotSupported)
    ));
    Ok(())
}
