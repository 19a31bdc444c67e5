use candle_atlas::data_batch::{BatchStream, Minibatch};
use candle_atlas::error::ModelError;
use candle_atlas::inference::{
    train_embedding, EarlyStopping, LrSchedule, ReduceLrOnPlateau, TrainConfig,
};
use candle_atlas::linear_model::{LinearClassifier, LinearDecoder, LinearEncoder};
use candle_atlas::losses::gaussian_likelihood;
use candle_atlas::model_kind::ModelKind;
use candle_atlas::model_traits::{ClassifierModuleT, EncoderModuleT};
use candle_atlas::optimizer::{AtlasOptimizer, OptimizerKind};
use candle_core::{Device, Tensor};
use std::str::FromStr;

/// A fixed list of minibatches served in order, over and over when
/// `repeat` is set
struct VecStream {
    batches: Vec<(Tensor, Tensor)>,
    cursor: usize,
    repeat: bool,
}

impl VecStream {
    fn new(batches: Vec<(Tensor, Tensor)>, repeat: bool) -> Self {
        Self {
            batches,
            cursor: 0,
            repeat,
        }
    }
}

impl BatchStream for VecStream {
    fn next_batch(&mut self) -> anyhow::Result<Option<Minibatch>> {
        if self.cursor >= self.batches.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let (input, sf) = &self.batches[self.cursor];
        self.cursor += 1;
        Ok(Some(Minibatch {
            input: input.clone(),
            size_factor: Some(sf.clone()),
            output: Some(input.clone()),
            output_size_factor: None,
            labels: None,
            weights: None,
        }))
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn batches_per_epoch(&self) -> usize {
        self.batches.len()
    }
}

fn toy_batches(device: &Device) -> anyhow::Result<Vec<(Tensor, Tensor)>> {
    let mut batches = vec![];
    for b in 0..2 {
        let data: Vec<f32> = (0..20).map(|i| ((i + b) % 7) as f32).collect();
        let input = Tensor::from_vec(data, (4, 5), device)?;
        let sf = Tensor::from_vec(vec![0.1_f32; 4], 4, device)?;
        batches.push((input, sf));
    }
    Ok(batches)
}

#[test]
fn unknown_optimizer_and_model_type_are_rejected() {
    let err = OptimizerKind::from_str("newton").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ModelError>(),
        Some(ModelError::UnknownOptimizer(name)) if name == "newton"
    ));

    let err = ModelKind::from_str("transformer").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ModelError>(),
        Some(ModelError::UnknownModelType(_))
    ));

    for (tag, expected) in [
        ("ae", ModelKind::Ae),
        ("vae", ModelKind::Vae),
        ("vaeiaf", ModelKind::VaeIaf),
        ("vaevamp", ModelKind::VaeVamp),
        ("linear", ModelKind::Linear),
    ] {
        assert_eq!(ModelKind::from_str(tag).unwrap(), expected);
    }

    assert!(ModelKind::Vae.is_variational());
    assert!(ModelKind::VaeVamp.is_variational());
    assert!(!ModelKind::Linear.is_variational());
}

#[test]
fn early_stopping_waits_out_its_patience() {
    let mut stop = EarlyStopping::new(2);
    assert!(!stop.should_stop(1.0));
    assert!(!stop.should_stop(1.1));
    assert!(stop.should_stop(1.2));

    // an improvement resets the counter
    let mut stop = EarlyStopping::new(2);
    assert!(!stop.should_stop(1.0));
    assert!(!stop.should_stop(1.1));
    assert!(!stop.should_stop(0.9));
    assert!(!stop.should_stop(1.0));
    assert!(stop.should_stop(1.0));
}

#[test]
fn lr_reduction_on_plateau_respects_the_floor() {
    let schedule = LrSchedule {
        factor: 0.5,
        patience: 1,
        min_lr: 1e-3,
    };
    let mut plateau = ReduceLrOnPlateau::new(schedule);

    assert_eq!(plateau.update(1.0, 1e-2), None);
    assert_eq!(plateau.update(1.0, 1e-2), Some(5e-3));
    assert_eq!(plateau.update(1.0, 5e-3), Some(2.5e-3));
    assert_eq!(plateau.update(1.0, 1.5e-3), Some(1e-3));
    // at the floor no further reduction is proposed
    assert_eq!(plateau.update(1.0, 1e-3), None);
}

#[test]
fn every_optimizer_kind_steps_the_loss() -> anyhow::Result<()> {
    let device = Device::Cpu;

    for kind in [
        OptimizerKind::Adam,
        OptimizerKind::Sgd,
        OptimizerKind::RmsProp,
        OptimizerKind::Adagrad,
    ] {
        let varmap = candle_nn::VarMap::new();
        let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);
        let model = candle_nn::linear(3, 1, vb.pp("nn.fit"))?;

        let x = Tensor::from_vec(vec![1_f32, 0., 0., 0., 1., 0.], (2, 3), &device)?;
        let y = Tensor::from_vec(vec![2_f32, -1.], (2, 1), &device)?;

        let mut optimizer = AtlasOptimizer::build(kind, varmap.all_vars(), 0.05)?;

        use candle_nn::Module;
        let initial = model
            .forward(&x)?
            .sub(&y)?
            .sqr()?
            .mean_all()?
            .to_scalar::<f32>()?;

        for _ in 0..50 {
            let loss = model.forward(&x)?.sub(&y)?.sqr()?.mean_all()?;
            optimizer.backward_step(&loss)?;
        }

        let trained = model
            .forward(&x)?
            .sub(&y)?
            .sqr()?
            .mean_all()?
            .to_scalar::<f32>()?;
        assert!(trained.is_finite());
        assert!(trained < initial, "{:?} failed to reduce the loss", kind);
    }
    Ok(())
}

#[test]
fn embedding_training_smoke() -> anyhow::Result<()> {
    let device = Device::Cpu;

    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);
    let encoder = LinearEncoder::new(5, 2, false, vb.clone())?;
    let decoder = LinearDecoder::new(5, 2, vb)?;

    let mut train_data = VecStream::new(toy_batches(&device)?, true);
    let mut val_data = VecStream::new(toy_batches(&device)?, false);

    let mut config = TrainConfig::default();
    config.max_epochs = 4;
    config.patience = 10;
    config.show_progress = false;

    let mut optimizer = AtlasOptimizer::build(
        OptimizerKind::Adam,
        varmap.all_vars(),
        config.learning_rate,
    )?;

    let history = train_embedding(
        &encoder,
        &decoder,
        &mut optimizer,
        &mut train_data,
        &mut val_data,
        &gaussian_likelihood,
        &config,
    )?;

    assert_eq!(history.train_loss.len(), 4);
    assert_eq!(history.val_loss.len(), 4);
    assert!(history.train_loss.iter().all(|x| x.is_finite()));
    Ok(())
}

#[test]
fn linear_modules_expose_their_dimensions() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);

    let encoder = LinearEncoder::new(6, 3, true, vb.pp("enc"))?;
    assert_eq!(encoder.dim_obs(), 6);
    assert_eq!(encoder.dim_latent(), 3);

    let x = Tensor::zeros((2, 6), candle_core::DType::F32, &device)?;
    let (z, kl) = encoder.forward_t(&x, None, true)?;
    assert_eq!(z.dims(), &[2, 3]);
    assert_eq!(kl.dims(), &[2]);

    let classifier = LinearClassifier::new(6, 4, vb.pp("cls"))?;
    let prob = classifier.forward_t(&x, false)?;
    assert_eq!(prob.dims(), &[2, 4]);
    let total: f32 = prob.sum_all()?.to_scalar::<f32>()?;
    assert!((total - 2.).abs() < 1e-4);
    Ok(())
}
