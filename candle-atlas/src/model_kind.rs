use crate::error::ModelError;
use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;

///
/// The closed set of model families the estimator layer dispatches
/// over. Adding a family is a compile-time decision; there is no
/// string-keyed fallthrough.
///
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum ModelKind {
    /// plain autoencoder
    Ae,
    /// variational autoencoder
    Vae,
    /// variational autoencoder with inverse autoregressive flow
    VaeIaf,
    /// variational autoencoder with a VampPrior
    VaeVamp,
    /// linear (PCA-like) embedding
    Linear,
}

impl ModelKind {
    /// The vae family trains against a (reconstruction, size factor)
    /// target pair; the others reconstruct the input directly.
    pub fn is_variational(&self) -> bool {
        matches!(self, ModelKind::Vae | ModelKind::VaeIaf | ModelKind::VaeVamp)
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "ae" => Ok(ModelKind::Ae),
            "vae" => Ok(ModelKind::Vae),
            "vaeiaf" => Ok(ModelKind::VaeIaf),
            "vaevamp" => Ok(ModelKind::VaeVamp),
            "linear" => Ok(ModelKind::Linear),
            _ => Err(ModelError::UnknownModelType(s.to_string()).into()),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ModelKind::Ae => "ae",
            ModelKind::Vae => "vae",
            ModelKind::VaeIaf => "vaeiaf",
            ModelKind::VaeVamp => "vaevamp",
            ModelKind::Linear => "linear",
        };
        write!(f, "{}", tag)
    }
}

/// Which prediction task a model serves
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum ModelClass {
    Embedding,
    Celltype,
}

impl FromStr for ModelClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "embedding" => Ok(ModelClass::Embedding),
            "celltype" => Ok(ModelClass::Celltype),
            _ => Err(ModelError::UnknownModelType(s.to_string()).into()),
        }
    }
}
