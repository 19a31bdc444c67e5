use approx::assert_relative_eq;
use lupin::error::EstimatorError;
use lupin::size_factor::{size_factors_csr, size_factors_dense, size_factors_rows};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{array, ArrayD, IxDyn};

#[test]
fn log_scaled_library_sizes() -> anyhow::Result<()> {
    // row totals 100, 0, 10000
    let x = array![[60., 40., 0.], [0., 0., 0.], [10000., 0., 0.]];

    let sf = size_factors_rows(&x);

    assert_relative_eq!(sf[0], (100_f32 / 1e4 + 1e-10).ln());
    assert_relative_eq!(sf[1], (1e-10_f32).ln());
    assert_relative_eq!(sf[2], (1_f32 + 1e-10).ln());
    Ok(())
}

#[test]
fn sparse_and_dense_agree() -> anyhow::Result<()> {
    let mut coo = CooMatrix::new(3, 3);
    coo.push(0, 0, 60.);
    coo.push(0, 1, 40.);
    coo.push(2, 0, 10000.);
    let csr = CsrMatrix::from(&coo);

    let dense = array![[60., 40., 0.], [0., 0., 0.], [10000., 0., 0.]];

    assert_eq!(size_factors_csr(&csr), size_factors_rows(&dense));
    Ok(())
}

#[test]
fn rank_one_input_gives_a_single_factor() -> anyhow::Result<()> {
    let x = ArrayD::from_shape_vec(IxDyn(&[3]), vec![30., 30., 40.])?;
    let sf = size_factors_dense(&x)?;

    assert_eq!(sf.len(), 1);
    assert_relative_eq!(sf[0], (100_f32 / 1e4 + 1e-10).ln());
    Ok(())
}

#[test]
fn higher_rank_input_is_an_error() {
    let x = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 2]));
    let err = size_factors_dense(&x).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::InvalidRank(3))
    ));
}
