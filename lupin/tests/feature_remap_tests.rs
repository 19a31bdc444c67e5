use cell_beans::genome::GenomeContainer;
use lupin::error::EstimatorError;
use lupin::feature_remap::{map_features, remap_to_genome, remap_to_genome_chunked};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

fn boxed(words: &[&str]) -> Vec<Box<str>> {
    words.iter().map(|x| (*x).into()).collect()
}

fn csr_from_dense(rows: &[&[f32]]) -> CsrMatrix<f32> {
    let nrows = rows.len();
    let ncols = rows[0].len();
    let mut coo = CooMatrix::new(nrows, ncols);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if v != 0. {
                coo.push(i, j, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}

fn dense_from_csr(x: &CsrMatrix<f32>) -> Vec<Vec<f32>> {
    let mut out = vec![vec![0_f32; x.ncols()]; x.nrows()];
    for (i, j, &v) in x.triplet_iter() {
        out[i][j] = v;
    }
    out
}

fn reference() -> GenomeContainer {
    GenomeContainer::new(
        "test-ref",
        boxed(&["g1", "g2", "g3", "g4"]),
        boxed(&["G1", "G2", "G3", "G4"]),
    )
    .unwrap()
}

#[test]
fn kept_indices_align_with_target_positions() {
    let genome = reference();
    let input = boxed(&["g3", "g1", "gX", "g2"]);

    let mapping = map_features(&input, &genome);

    assert_eq!(mapping.kept, vec![0, 1, 3]);
    assert_eq!(mapping.target, vec![2, 0, 1]);
    assert_eq!(mapping.len(), 3);
}

#[test]
fn remapped_columns_carry_the_input_columns_exactly() -> anyhow::Result<()> {
    let genome = reference();
    // columns: g3, g1, gX (unmapped), g2
    let input_ids = boxed(&["g3", "g1", "gX", "g2"]);
    let x = csr_from_dense(&[
        &[3., 1., 9., 2.],
        &[0., 4., 9., 0.],
        &[6., 0., 9., 5.],
    ]);

    let out = remap_to_genome(&x, &input_ids, &genome)?;

    assert_eq!(out.nrows(), 3);
    assert_eq!(out.ncols(), genome.num_genes());

    let dense = dense_from_csr(&out);
    // reference order g1, g2, g3, g4; g4 unmeasured, gX dropped
    assert_eq!(dense[0], vec![1., 2., 3., 0.]);
    assert_eq!(dense[1], vec![4., 0., 0., 0.]);
    assert_eq!(dense[2], vec![0., 5., 6., 0.]);
    Ok(())
}

#[test]
fn chunk_width_never_changes_the_output() -> anyhow::Result<()> {
    let genome = reference();
    let input_ids = boxed(&["g4", "g2", "g1", "zz", "g3"]);
    let x = csr_from_dense(&[
        &[1., 0., 2., 8., 0.],
        &[0., 3., 0., 8., 4.],
        &[5., 6., 0., 8., 7.],
        &[0., 0., 0., 8., 0.],
    ]);

    let full = remap_to_genome_chunked(&x, &input_ids, &genome, 2000)?;
    for chunk in [1, 2, 3, 5] {
        let narrow = remap_to_genome_chunked(&x, &input_ids, &genome, chunk)?;
        assert_eq!(dense_from_csr(&full), dense_from_csr(&narrow));
    }
    Ok(())
}

#[test]
fn zero_recoverable_features_is_an_error() {
    let genome = reference();
    let input_ids = boxed(&["a", "b"]);
    let x = csr_from_dense(&[&[1., 2.]]);

    let err = remap_to_genome(&x, &input_ids, &genome).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::FeatureSpaceMismatch(_))
    ));
}
