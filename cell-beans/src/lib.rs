pub mod adapter; // in-memory matrix -> row-sliced CSR
pub mod ann_matrix; // annotated expression matrix
pub mod common_io; // gzipped/plain line readers
pub mod error;
pub mod genome; // reference feature space
pub mod ontology; // cell type universe and groupings
pub mod registry; // data set loader contract and registry
pub mod row_source; // indexed row access capability
pub mod sparse_backed; // sparse matrix with hdf5 backend
