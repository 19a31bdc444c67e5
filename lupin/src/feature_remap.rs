use crate::error::EstimatorError;
use cell_beans::genome::GenomeContainer;
use log::info;
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use rayon::prelude::*;

/// Upper bound on the number of source columns copied per slab
pub const REMAP_COLUMN_CHUNK: usize = 2000;

///
/// Which input features survive the remapping and where they land:
/// `kept[k]` is a column of the input matrix, `target[k]` its
/// position in the reference ordering. Built fresh per call.
///
#[derive(Debug, Clone)]
pub struct FeatureMapping {
    pub kept: Vec<usize>,
    pub target: Vec<usize>,
}

impl FeatureMapping {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.kept.len(), self.target.len());
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

/// Match input feature identifiers against the reference, preserving
/// the input order among the kept features.
pub fn map_features(ensembl_ids: &[Box<str>], genome: &GenomeContainer) -> FeatureMapping {
    let mut kept = vec![];
    let mut target = vec![];

    for (pos, gene) in ensembl_ids.iter().enumerate() {
        if let Some(ref_pos) = genome.position(gene) {
            kept.push(pos);
            target.push(ref_pos);
        }
    }

    FeatureMapping { kept, target }
}

///
/// Reorder and zero-pad an (observations x input features) matrix
/// onto the reference feature space: output column `j` carries the
/// input column whose identifier sits at reference position `j`, and
/// zeros where the reference gene was not measured. Unmapped input
/// features are dropped.
///
/// * `x` - observations x input features, CSR
/// * `ensembl_ids` - identifier per input feature column
/// * `genome` - the reference feature space
///
pub fn remap_to_genome(
    x: &CsrMatrix<f32>,
    ensembl_ids: &[Box<str>],
    genome: &GenomeContainer,
) -> anyhow::Result<CsrMatrix<f32>> {
    remap_to_genome_chunked(x, ensembl_ids, genome, REMAP_COLUMN_CHUNK)
}

///
/// Same as `remap_to_genome` with an explicit slab width. The output
/// is identical for every `chunk >= 1`; the slab only bounds how many
/// source columns are gathered at a time, remainder included.
///
pub fn remap_to_genome_chunked(
    x: &CsrMatrix<f32>,
    ensembl_ids: &[Box<str>],
    genome: &GenomeContainer,
    chunk: usize,
) -> anyhow::Result<CsrMatrix<f32>> {
    if ensembl_ids.len() != x.ncols() {
        return Err(anyhow::anyhow!(
            "{} columns vs. {} feature identifiers",
            x.ncols(),
            ensembl_ids.len()
        ));
    }

    let mapping = map_features(ensembl_ids, genome);

    if mapping.is_empty() {
        return Err(EstimatorError::FeatureSpaceMismatch(genome.id().to_string()).into());
    }

    info!(
        "found {} out of {} features from input data set in reference",
        mapping.len(),
        x.ncols()
    );
    info!(
        "found {} out of {} features from reference data set in input",
        mapping.len(),
        genome.num_genes()
    );

    // column-sliceable form for gathering kept columns
    let x_csc = CscMatrix::from(x);

    let chunk = chunk.max(1);
    let mut coo = CooMatrix::new(x.nrows(), genome.num_genes());

    for slab_start in (0..mapping.len()).step_by(chunk) {
        let slab_end = (slab_start + chunk).min(mapping.len());

        let slab: Vec<Vec<(usize, usize, f32)>> = (slab_start..slab_end)
            .into_par_iter()
            .map(|k| {
                let col = x_csc.col(mapping.kept[k]);
                let target_col = mapping.target[k];
                col.row_indices()
                    .iter()
                    .zip(col.values().iter())
                    .map(|(&i, &x_ij)| (i, target_col, x_ij))
                    .collect()
            })
            .collect();

        for (i, j, x_ij) in slab.into_iter().flatten() {
            coo.push(i, j, x_ij);
        }
    }

    Ok(CsrMatrix::from(&coo))
}
