#![allow(dead_code)]

pub use log::{info, warn};

pub type Mat = nalgebra::DMatrix<f32>;
pub type CsrMat = nalgebra_sparse::CsrMatrix<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;

pub use cell_beans::ann_matrix::*;
pub use cell_beans::genome::GenomeContainer;
pub use cell_beans::ontology::*;
pub use cell_beans::row_source::*;

pub use candle_atlas::{candle_core, candle_nn};
