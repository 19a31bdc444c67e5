use crate::error::DataError;
use crate::sparse_backed::BackedSparseMatrix;
use anyhow::anyhow;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use ndarray::Array2;
use std::sync::Arc;

/// Observation column carrying the cell ontology label
pub const CELL_ONTOLOGY_COLUMN: &str = "cell_ontology_class";

///
/// The expression matrix in whatever form a loader produced it.
/// In-memory variants are adapted to CSR before use; backed matrices
/// are only ever touched through indexed row reads.
///
#[derive(Debug, Clone)]
pub enum DataMatrix {
    Dense(Array2<f32>),
    Csr(CsrMatrix<f32>),
    Csc(CscMatrix<f32>),
    Backed(Arc<BackedSparseMatrix>),
}

impl DataMatrix {
    /// (observations, features)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            DataMatrix::Dense(x) => x.dim(),
            DataMatrix::Csr(x) => (x.nrows(), x.ncols()),
            DataMatrix::Csc(x) => (x.nrows(), x.ncols()),
            DataMatrix::Backed(x) => (x.num_rows(), x.num_features()),
        }
    }

    pub fn num_obs(&self) -> usize {
        self.shape().0
    }

    pub fn num_features(&self) -> usize {
        self.shape().1
    }

    pub fn is_backed(&self) -> bool {
        matches!(self, DataMatrix::Backed(_))
    }
}

///
/// Ordered observation-level metadata: each column is a named vector
/// of strings (ontology labels, donor, protocol, and the like), one
/// entry per observation.
///
#[derive(Debug, Clone, Default)]
pub struct ObsTable {
    columns: Vec<(Box<str>, Vec<Box<str>>)>,
}

impl ObsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a metadata column
    pub fn insert(&mut self, name: &str, values: Vec<Box<str>>) {
        if let Some((_, column)) = self.columns.iter_mut().find(|(key, _)| key.as_ref() == name) {
            *column = values;
        } else {
            self.columns.push((name.into(), values));
        }
    }

    pub fn column(&self, name: &str) -> anyhow::Result<&[Box<str>]> {
        self.columns
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, values)| values.as_slice())
            .ok_or(DataError::UnknownObsColumn(name.to_string()).into())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(key, _)| key.as_ref() == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(key, _)| key.as_ref()).collect()
    }

    /// Copy the rows at `idx` into a new table, preserving column order
    pub fn take_subset(&self, idx: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(key, values)| {
                let taken = idx.iter().map(|&i| values[i].clone()).collect();
                (key.clone(), taken)
            })
            .collect();
        Self { columns }
    }

    pub fn num_obs(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or(0)
    }
}

///
/// An annotated matrix: observations x features expression data plus
/// per-observation metadata and the feature identifier space it was
/// measured in. `mapped_features` names the reference genome when the
/// features are already aligned to it, short-circuiting the remapper.
///
#[derive(Debug, Clone)]
pub struct AnnMatrix {
    pub x: DataMatrix,
    pub obs: ObsTable,
    pub ensembl_ids: Vec<Box<str>>,
    pub mapped_features: Option<Box<str>>,
}

impl AnnMatrix {
    pub fn new(
        x: DataMatrix,
        obs: ObsTable,
        ensembl_ids: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        let (num_obs, num_features) = x.shape();

        if num_features != ensembl_ids.len() {
            return Err(anyhow!(
                "{} features in the matrix vs. {} feature identifiers",
                num_features,
                ensembl_ids.len()
            ));
        }

        if obs.num_obs() > 0 && obs.num_obs() != num_obs {
            return Err(anyhow!(
                "{} observations in the matrix vs. {} metadata rows",
                num_obs,
                obs.num_obs()
            ));
        }

        Ok(Self {
            x,
            obs,
            ensembl_ids,
            mapped_features: None,
        })
    }

    /// Declare the features already mapped onto the reference `genome_id`
    pub fn with_mapped_features(mut self, genome_id: &str) -> Self {
        self.mapped_features = Some(genome_id.into());
        self
    }

    pub fn num_obs(&self) -> usize {
        self.x.num_obs()
    }

    pub fn num_features(&self) -> usize {
        self.x.num_features()
    }

    /// The cell ontology label column
    pub fn labels(&self) -> anyhow::Result<&[Box<str>]> {
        self.obs.column(CELL_ONTOLOGY_COLUMN)
    }
}
