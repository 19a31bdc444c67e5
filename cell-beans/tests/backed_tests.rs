use cell_beans::error::DataError;
use cell_beans::row_source::{IndexedRowSource, MaterializedRows};
use cell_beans::sparse_backed::BackedSparseMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

fn example_csr() -> CsrMatrix<f32> {
    let mut coo = CooMatrix::new(5, 4);
    coo.push(0, 0, 1.);
    coo.push(0, 3, 2.);
    coo.push(1, 1, 3.);
    coo.push(3, 2, 4.);
    coo.push(4, 0, 5.);
    coo.push(4, 3, 6.);
    CsrMatrix::from(&coo)
}

#[test]
fn backed_round_trip_matches_materialized() -> anyhow::Result<()> {
    let csr = example_csr();
    let materialized = MaterializedRows::new(csr.clone());

    let dir = tempfile::tempdir()?;
    let backend_file = dir.path().join("roundtrip.h5");
    let backed = BackedSparseMatrix::from_csr(&csr, backend_file.to_str().unwrap())?;

    assert_eq!(backed.num_rows(), 5);
    assert_eq!(backed.num_features(), 4);

    // unsorted request with a duplicate: the backed source reads in
    // sorted order but must restore the caller's order
    let rows = vec![4, 0, 2, 0];
    assert_eq!(backed.read_rows(&rows)?, materialized.read_rows(&rows)?);

    // reopening from disk sees the same content
    drop(backed);
    let reopened = BackedSparseMatrix::open(backend_file.to_str().unwrap())?;
    assert_eq!(
        reopened.read_rows(&[0, 1, 2, 3, 4])?,
        materialized.read_rows(&[0, 1, 2, 3, 4])?
    );
    Ok(())
}

#[test]
fn out_of_range_row_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend_file = dir.path().join("range.h5");
    let backed = BackedSparseMatrix::from_csr(&example_csr(), backend_file.to_str().unwrap())?;

    assert!(backed.read_rows(&[5]).is_err());
    Ok(())
}

#[test]
fn unknown_backend_format_rejected() -> anyhow::Result<()> {
    use hdf5::types::VarLenUnicode;

    let dir = tempfile::tempdir()?;
    let backend_file = dir.path().join("bad_format.h5");

    {
        let file = hdf5::File::create(&backend_file)?;
        for (name, value) in [("nrow", 1_usize), ("ncol", 1), ("nnz", 0)] {
            file.new_attr::<usize>().create(name)?.write_scalar(&value)?;
        }
        let format: VarLenUnicode = "csc".parse().unwrap();
        file.new_attr::<VarLenUnicode>()
            .create("format")?
            .write_scalar(&format)?;
    }

    let err = BackedSparseMatrix::open(backend_file.to_str().unwrap()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::UnsupportedMatrixType(tag)) if tag == "csc"
    ));
    Ok(())
}
