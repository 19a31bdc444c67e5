use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;

///
/// Indexed row access over an observations x features matrix. The
/// streaming layer is written once against this capability; whether
/// the rows come from memory or from a file on disk is the
/// implementation's concern.
///
pub trait IndexedRowSource {
    fn num_rows(&self) -> usize;

    fn num_features(&self) -> usize;

    /// Read the requested rows into a dense block, in the caller's
    /// order. `rows` need not be sorted or unique.
    fn read_rows(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>>;
}

///
/// A fully materialized row source: a CSR matrix held in memory,
/// typically the output of the adapter + feature remapper.
///
pub struct MaterializedRows {
    x: CsrMatrix<f32>,
}

impl MaterializedRows {
    pub fn new(x: CsrMatrix<f32>) -> Self {
        Self { x }
    }

    pub fn matrix(&self) -> &CsrMatrix<f32> {
        &self.x
    }
}

impl IndexedRowSource for MaterializedRows {
    fn num_rows(&self) -> usize {
        self.x.nrows()
    }

    fn num_features(&self) -> usize {
        self.x.ncols()
    }

    fn read_rows(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        let mut block = Array2::<f32>::zeros((rows.len(), self.x.ncols()));
        for (i, &row) in rows.iter().enumerate() {
            let lane = self.x.row(row);
            for (&j, &x_ij) in lane.col_indices().iter().zip(lane.values().iter()) {
                block[(i, j)] = x_ij;
            }
        }
        Ok(block)
    }
}
