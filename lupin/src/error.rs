use thiserror::Error;

/// Failures raised by the estimator core. Carried inside
/// `anyhow::Error`; downcast to branch on a particular variant.
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("no features from the input data found in reference \"{0}\"")]
    FeatureSpaceMismatch(String),

    #[error("expected an input of rank 1 or 2, found rank {0}")]
    InvalidRank(usize),

    #[error("the {0} partition is empty")]
    EmptyPartition(&'static str),

    #[error("\"{0}\" not found in cell type universe and ontology sets")]
    UnknownLabel(String),

    #[error("mode \"{0}\" not recognised; should be \"train\", \"train_val\", \"eval\" or \"predict\"")]
    UnknownMode(String),

    #[error("no weights file found under \"{0}\"")]
    WeightsNotFound(String),

    #[error("md5 of \"{0}\" did not match expectation")]
    ChecksumMismatch(String),
}
