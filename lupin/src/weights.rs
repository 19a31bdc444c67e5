use crate::error::EstimatorError;
use candle_nn::VarMap;
use log::info;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

///
/// Where a model's weights live on disk and how they are verified:
/// `<model_dir>/<model_id>_weights.safetensors` for the published
/// weights, `<cache_path>/weights/<model_id>_weights_cache.safetensors`
/// for the working copy. The expected md5 digest arrives out-of-band.
///
/// Concurrent stores sharing one cache path are not coordinated;
/// callers use distinct paths.
///
#[derive(Debug, Clone)]
pub struct WeightsStore {
    pub model_dir: PathBuf,
    pub cache_path: PathBuf,
    pub model_id: String,
    pub weights_md5: Option<String>,
}

impl WeightsStore {
    pub fn new(
        model_dir: &Path,
        cache_path: &Path,
        model_id: &str,
        weights_md5: Option<&str>,
    ) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
            cache_path: cache_path.to_path_buf(),
            model_id: model_id.to_string(),
            weights_md5: weights_md5.map(|x| x.to_string()),
        }
    }

    pub fn weights_file(&self) -> PathBuf {
        self.model_dir
            .join(format!("{}_weights.safetensors", self.model_id))
    }

    fn cache_dir(&self) -> PathBuf {
        self.cache_path.join("weights")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir()
            .join(format!("{}_weights_cache.safetensors", self.model_id))
    }

    /// Remove every file in the weights cache directory
    pub fn clear_weight_cache(&self) -> anyhow::Result<()> {
        let cache_dir = self.cache_dir();
        if cache_dir.exists() {
            for entry in std::fs::read_dir(&cache_dir)? {
                let path = entry?.path();
                if path.is_file() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }

    ///
    /// Load the published weights into `varmap`, verifying the md5
    /// digest first when one was supplied. A digest mismatch is fatal
    /// and blocks model use.
    ///
    pub fn load_pretrained_weights(&self, varmap: &mut VarMap) -> anyhow::Result<()> {
        let path = self.weights_file();
        if !path.exists() {
            return Err(EstimatorError::WeightsNotFound(
                self.model_dir.join(&self.model_id).display().to_string(),
            )
            .into());
        }

        if let Some(expected) = &self.weights_md5 {
            assert_md5_sum(&path, expected)?;
        }

        info!("loading weights from {}", path.display());
        varmap.load(&path)?;
        Ok(())
    }

    pub fn save_weights(&self, varmap: &VarMap) -> anyhow::Result<()> {
        if !self.model_dir.exists() {
            std::fs::create_dir_all(&self.model_dir)?;
        }
        let path = self.weights_file();
        info!("saving weights to {}", path.display());
        varmap.save(&path)?;
        Ok(())
    }

    pub fn save_weights_to_cache(&self, varmap: &VarMap) -> anyhow::Result<()> {
        let cache_dir = self.cache_dir();
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir)?;
        }
        varmap.save(self.cache_file())?;
        Ok(())
    }

    pub fn load_weights_from_cache(&self, varmap: &mut VarMap) -> anyhow::Result<()> {
        varmap.load(self.cache_file())?;
        Ok(())
    }
}

fn assert_md5_sum(path: &Path, expected: &str) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let digest = format!("{:x}", hasher.finalize());

    if digest != expected.to_lowercase() {
        return Err(EstimatorError::ChecksumMismatch(path.display().to_string()).into());
    }
    Ok(())
}
