use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("unknown optimizer \"{0}\" (expected adam|sgd|rmsprop|adagrad)")]
    UnknownOptimizer(String),

    #[error("unknown model type \"{0}\"")]
    UnknownModelType(String),
}
