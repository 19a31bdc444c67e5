use crate::error::DataError;
use crate::row_source::IndexedRowSource;
use anyhow::anyhow;
use hdf5::types::VarLenUnicode;
use log::info;
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use std::sync::Arc;

const NUM_CHUNKS: usize = 1000;
const MIN_CHUNK_SIZE: usize = 8192;
const COMPRESSION_LEVEL: u8 = 5;

const FORMAT_TAG: &str = "csr";

/// Backed (out-of-core) cell-feature matrix with hdf5 (cell x feature)
///
/// ```text
/// (root)
///     ├── nrow
///     ├── ncol
///     ├── nnz
///     ├── format ("csr")
///     └── by_row
///         ├── data
///         ├── indices (feature indices)
///         └── indptr (row pointers)
/// ```
///
/// Row pointers stay cached in memory; data and indices are read from
/// the backend on demand, one contiguous row slab at a time.
///
#[derive(Debug)]
pub struct BackedSparseMatrix {
    backend: Arc<hdf5::File>,
    file_name: String,
    nrow: usize,
    ncol: usize,
    row_indptr: Vec<u64>,
}

impl BackedSparseMatrix {
    /// Write a CSR matrix into `backend_file` and keep it open as a
    /// backed source.
    pub fn from_csr(x: &CsrMatrix<f32>, backend_file: &str) -> anyhow::Result<Self> {
        let backend = hdf5::File::create(backend_file)?;

        write_scalar_attr(&backend, "nrow", x.nrows())?;
        write_scalar_attr(&backend, "ncol", x.ncols())?;
        write_scalar_attr(&backend, "nnz", x.nnz())?;

        let format: VarLenUnicode = FORMAT_TAG.parse().map_err(|_| anyhow!("format tag"))?;
        backend
            .new_attr::<VarLenUnicode>()
            .create("format")?
            .write_scalar(&format)?;

        let by_row = backend.create_group("/by_row")?;

        let indptr: Vec<u64> = x.row_offsets().iter().map(|&p| p as u64).collect();
        let indices: Vec<u64> = x.col_indices().iter().map(|&j| j as u64).collect();

        record_chunked_dataset(&by_row, "data", x.values())?;
        record_chunked_dataset(&by_row, "indices", &indices)?;
        record_chunked_dataset(&by_row, "indptr", &indptr)?;

        backend.flush()?;

        Ok(Self {
            backend: backend.into(),
            file_name: backend_file.to_string(),
            nrow: x.nrows(),
            ncol: x.ncols(),
            row_indptr: indptr,
        })
    }

    /// Open an existing backend file
    pub fn open(backend_file: &str) -> anyhow::Result<Self> {
        let backend = hdf5::File::open(backend_file)?;

        let format = backend
            .attr("format")?
            .read_scalar::<VarLenUnicode>()?
            .to_string();

        if format != FORMAT_TAG {
            return Err(DataError::UnsupportedMatrixType(format).into());
        }

        let nrow: usize = backend.attr("nrow")?.read_scalar()?;
        let ncol: usize = backend.attr("ncol")?.read_scalar()?;
        let nnz: usize = backend.attr("nnz")?.read_scalar()?;

        info!("#rows: {}, #columns: {}, #non-zeros: {}", nrow, ncol, nnz);

        let row_indptr = backend
            .group("/by_row")?
            .dataset("indptr")?
            .read_1d::<u64>()?
            .to_vec();

        if row_indptr.len() != nrow + 1 {
            return Err(anyhow!(
                "row pointer length {} vs. {} rows",
                row_indptr.len(),
                nrow
            ));
        }

        Ok(Self {
            backend: backend.into(),
            file_name: backend_file.to_string(),
            nrow,
            ncol,
            row_indptr,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn remove_backend_file(&self) -> anyhow::Result<()> {
        if std::path::Path::new(&self.file_name).exists() {
            std::fs::remove_file(&self.file_name)?;
        }
        Ok(())
    }

    /// Read one row's non-zero slab into the output block at `out_row`
    fn read_row_into(
        &self,
        data: &hdf5::Dataset,
        indices: &hdf5::Dataset,
        row: usize,
        block: &mut Array2<f32>,
        out_row: usize,
    ) -> anyhow::Result<()> {
        let start = self.row_indptr[row] as usize;
        let end = self.row_indptr[row + 1] as usize;

        if start == end {
            return Ok(());
        }

        let values = data.read_slice_1d::<f32, _>(start..end)?;
        let columns = indices.read_slice_1d::<u64, _>(start..end)?;

        for (&j, &x_ij) in columns.iter().zip(values.iter()) {
            block[(out_row, j as usize)] = x_ij;
        }
        Ok(())
    }
}

impl IndexedRowSource for BackedSparseMatrix {
    fn num_rows(&self) -> usize {
        self.nrow
    }

    fn num_features(&self) -> usize {
        self.ncol
    }

    fn read_rows(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        for &row in rows {
            if row >= self.nrow {
                return Err(anyhow!("row {} out of {} rows", row, self.nrow));
            }
        }

        // the backend wants monotonic access: visit rows in sorted
        // order but write each into its original output position
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|&k| rows[k]);

        let by_row = self.backend.group("/by_row")?;
        let data = by_row.dataset("data")?;
        let indices = by_row.dataset("indices")?;

        let mut block = Array2::<f32>::zeros((rows.len(), self.ncol));
        for &k in order.iter() {
            self.read_row_into(&data, &indices, rows[k], &mut block, k)?;
        }
        Ok(block)
    }
}

fn write_scalar_attr(file: &hdf5::File, attr_name: &str, value: usize) -> anyhow::Result<()> {
    file.new_attr::<usize>()
        .create(attr_name)?
        .write_scalar(&value)?;
    Ok(())
}

fn record_chunked_dataset<T: hdf5::H5Type>(
    group: &hdf5::Group,
    name: &str,
    values: &[T],
) -> anyhow::Result<()> {
    let nelem = values.len();
    let chunk_size = (nelem / NUM_CHUNKS).max(MIN_CHUNK_SIZE).min(nelem.max(1));

    group
        .new_dataset::<T>()
        .shape(nelem)
        .chunk([chunk_size])
        .blosc_blosclz(COMPRESSION_LEVEL, true)
        .create(name)?
        .write(values)?;

    Ok(())
}
