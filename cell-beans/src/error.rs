use thiserror::Error;

/// Failures in the data layer. Wrapped in `anyhow::Error` at call
/// sites; downcast to branch on a particular variant.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("data matrix type \"{0}\" not recognized")]
    UnsupportedMatrixType(String),

    #[error("tried running a backed matrix through the in-memory pipeline")]
    BackedNotSupported,

    #[error("unknown observation column \"{0}\"")]
    UnknownObsColumn(String),
}
