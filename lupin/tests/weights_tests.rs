use lupin::error::EstimatorError;
use lupin::weights::WeightsStore;
use md5::{Digest, Md5};

fn var_map_with_one_tensor() -> anyhow::Result<candle_nn::VarMap> {
    let varmap = candle_nn::VarMap::new();
    let vb =
        candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &candle_core::Device::Cpu);
    let _ = candle_nn::linear(3, 2, vb.pp("nn.test"))?;
    Ok(varmap)
}

fn md5_of(path: &std::path::Path) -> anyhow::Result<String> {
    let mut hasher = Md5::new();
    hasher.update(std::fs::read(path)?);
    Ok(format!("{:x}", hasher.finalize()))
}

#[test]
fn save_verify_and_reload() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let varmap = var_map_with_one_tensor()?;

    let store = WeightsStore::new(&dir.path().join("models"), &dir.path().join("cache"), "m1", None);
    store.save_weights(&varmap)?;
    assert!(store.weights_file().exists());

    // with the right digest the load goes through
    let digest = md5_of(&store.weights_file())?;
    let verified = WeightsStore::new(
        &dir.path().join("models"),
        &dir.path().join("cache"),
        "m1",
        Some(&digest),
    );
    let mut fresh = var_map_with_one_tensor()?;
    verified.load_pretrained_weights(&mut fresh)?;
    Ok(())
}

#[test]
fn checksum_mismatch_blocks_model_use() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let varmap = var_map_with_one_tensor()?;

    let store = WeightsStore::new(
        &dir.path().join("models"),
        &dir.path().join("cache"),
        "m2",
        Some("00000000000000000000000000000000"),
    );
    store.save_weights(&varmap)?;

    let mut fresh = var_map_with_one_tensor()?;
    let err = store.load_pretrained_weights(&mut fresh).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::ChecksumMismatch(_))
    ));
    Ok(())
}

#[test]
fn missing_weights_file_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = WeightsStore::new(&dir.path().join("models"), &dir.path().join("cache"), "m3", None);

    let mut varmap = var_map_with_one_tensor()?;
    let err = store.load_pretrained_weights(&mut varmap).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::WeightsNotFound(_))
    ));
    Ok(())
}

#[test]
fn cache_round_trip_and_clearing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let varmap = var_map_with_one_tensor()?;

    let store = WeightsStore::new(&dir.path().join("models"), &dir.path().join("cache"), "m4", None);
    store.save_weights_to_cache(&varmap)?;
    assert!(store.cache_file().exists());

    let mut fresh = var_map_with_one_tensor()?;
    store.load_weights_from_cache(&mut fresh)?;

    // clearing removes every cached file
    store.clear_weight_cache()?;
    assert!(!store.cache_file().exists());
    Ok(())
}
