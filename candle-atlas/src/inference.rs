use crate::data_batch::{BatchStream, Minibatch};
use crate::losses::cross_entropy_agg;
use crate::model_traits::{ClassifierModuleT, DecoderModuleT, EncoderModuleT};
use crate::optimizer::AtlasOptimizer;
use candle_core::{Result, Tensor};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

/// Learning rate reduction on a validation-loss plateau
#[derive(Debug, Clone)]
pub struct LrSchedule {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 5,
            min_lr: 1e-5,
        }
    }
}

pub struct TrainConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub validation_batch_size: usize,
    pub max_epochs: usize,
    pub max_steps_per_epoch: usize,
    pub max_validation_steps: usize,
    pub patience: usize,
    pub lr_schedule: LrSchedule,
    pub shuffle_buffer_size: usize,
    pub prefetch: usize,
    pub weighted: bool,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 128,
            validation_batch_size: 256,
            max_epochs: 1000,
            max_steps_per_epoch: 20,
            max_validation_steps: 10,
            patience: 20,
            lr_schedule: LrSchedule::default(),
            shuffle_buffer_size: 10_000,
            prefetch: 10,
            weighted: true,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Per-epoch scalar metrics accumulated by the driver
#[derive(Debug, Clone, Default)]
pub struct TrainHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub learning_rates: Vec<f64>,
}

/// Stop when the monitored loss has not improved for `patience` epochs
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    pub fn should_stop(&mut self, monitored: f32) -> bool {
        if monitored < self.best {
            self.best = monitored;
            self.wait = 0;
            false
        } else {
            self.wait += 1;
            self.wait >= self.patience
        }
    }
}

pub struct ReduceLrOnPlateau {
    schedule: LrSchedule,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(schedule: LrSchedule) -> Self {
        Self {
            schedule,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Returns the reduced learning rate when the plateau persisted
    pub fn update(&mut self, monitored: f32, current_lr: f64) -> Option<f64> {
        if monitored < self.best {
            self.best = monitored;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait >= self.schedule.patience && current_lr > self.schedule.min_lr {
            self.wait = 0;
            Some((current_lr * self.schedule.factor).max(self.schedule.min_lr))
        } else {
            None
        }
    }
}

fn epoch_steps(batches_per_epoch: usize, max_steps: usize) -> usize {
    batches_per_epoch.max(1).min(max_steps.max(1))
}

fn epoch_progress(config: &TrainConfig) -> ProgressBar {
    let pb = ProgressBar::new(config.max_epochs as u64);
    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

///
/// Train an encoder-decoder pair against two minibatch streams
///
/// * `train_data` - infinite reshuffled stream
/// * `val_data` - one finite pass per epoch
/// * `llik` - log likelihood function
///
pub fn train_embedding<Enc, Dec, Str, LlikFn>(
    encoder: &Enc,
    decoder: &Dec,
    optimizer: &mut AtlasOptimizer,
    train_data: &mut Str,
    val_data: &mut Str,
    llik: &LlikFn,
    config: &TrainConfig,
) -> anyhow::Result<TrainHistory>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
    Str: BatchStream,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let mut history = TrainHistory::default();
    let mut early_stopping = EarlyStopping::new(config.patience);
    let mut lr_plateau = ReduceLrOnPlateau::new(config.lr_schedule.clone());

    let pb = epoch_progress(config);

    let embedding_loss = |mb: &Minibatch, train: bool| -> anyhow::Result<Tensor> {
        let (z_nk, kl_n) = encoder.forward_t(&mb.input, mb.size_factor.as_ref(), train)?;
        let target = mb.output.as_ref().unwrap_or(&mb.input);
        let (_, llik_n) = decoder.forward_with_llik(&z_nk, target, llik)?;
        Ok((kl_n - &llik_n)?.mean_all()?)
    };

    for epoch in 0..config.max_epochs {
        let mut loss_tot = 0_f32;
        let steps = epoch_steps(train_data.batches_per_epoch(), config.max_steps_per_epoch);

        for _step in 0..steps {
            let mb = match train_data.next_batch()? {
                Some(mb) => mb,
                None => {
                    train_data.reset()?;
                    continue;
                }
            };
            let loss = embedding_loss(&mb, true)?;
            optimizer.backward_step(&loss)?;
            loss_tot += loss.to_scalar::<f32>()?;
        }
        let train_loss = loss_tot / steps.max(1) as f32;

        let mut val_tot = 0_f32;
        let mut nbatch = 0_usize;
        val_data.reset()?;
        while let Some(mb) = val_data.next_batch()? {
            val_tot += embedding_loss(&mb, false)?.to_scalar::<f32>()?;
            nbatch += 1;
            if nbatch >= config.max_validation_steps {
                break;
            }
        }
        let val_loss = val_tot / nbatch.max(1) as f32;

        history.train_loss.push(train_loss);
        history.val_loss.push(val_loss);
        history.learning_rates.push(optimizer.learning_rate());
        pb.inc(1);

        if config.verbose {
            info!(
                "[{}] loss: {} validation loss: {}",
                epoch + 1,
                train_loss,
                val_loss
            );
        }

        if let Some(new_lr) = lr_plateau.update(val_loss, optimizer.learning_rate()) {
            if config.verbose {
                info!("[{}] reducing learning rate to {}", epoch + 1, new_lr);
            }
            optimizer.set_learning_rate(new_lr);
        }

        if early_stopping.should_stop(val_loss) {
            if config.verbose {
                info!("[{}] validation loss plateaued; stopping", epoch + 1);
            }
            break;
        }
    } // each epoch

    pb.finish_and_clear();
    Ok(history)
}

///
/// Train a cell type classifier with (features, one-hot labels,
/// observation weights) minibatches
///
pub fn train_celltype<Cls, Str>(
    classifier: &Cls,
    optimizer: &mut AtlasOptimizer,
    train_data: &mut Str,
    val_data: &mut Str,
    config: &TrainConfig,
) -> anyhow::Result<TrainHistory>
where
    Cls: ClassifierModuleT,
    Str: BatchStream,
{
    let mut history = TrainHistory::default();
    let mut early_stopping = EarlyStopping::new(config.patience);
    let mut lr_plateau = ReduceLrOnPlateau::new(config.lr_schedule.clone());

    let pb = epoch_progress(config);

    let classifier_loss = |mb: &Minibatch, train: bool| -> anyhow::Result<Tensor> {
        let prob_nk = classifier.forward_t(&mb.input, train)?;
        let labels = mb
            .labels
            .as_ref()
            .ok_or(anyhow::anyhow!("classifier stream without labels"))?;
        let ce_n = cross_entropy_agg(labels, &prob_nk)?;
        let loss = match (config.weighted, mb.weights.as_ref()) {
            (true, Some(w_n)) => ce_n.mul(w_n)?.mean_all()?,
            _ => ce_n.mean_all()?,
        };
        Ok(loss)
    };

    for epoch in 0..config.max_epochs {
        let mut loss_tot = 0_f32;
        let steps = epoch_steps(train_data.batches_per_epoch(), config.max_steps_per_epoch);

        for _step in 0..steps {
            let mb = match train_data.next_batch()? {
                Some(mb) => mb,
                None => {
                    train_data.reset()?;
                    continue;
                }
            };
            let loss = classifier_loss(&mb, true)?;
            optimizer.backward_step(&loss)?;
            loss_tot += loss.to_scalar::<f32>()?;
        }
        let train_loss = loss_tot / steps.max(1) as f32;

        let mut val_tot = 0_f32;
        let mut nbatch = 0_usize;
        val_data.reset()?;
        while let Some(mb) = val_data.next_batch()? {
            val_tot += classifier_loss(&mb, false)?.to_scalar::<f32>()?;
            nbatch += 1;
            if nbatch >= config.max_validation_steps {
                break;
            }
        }
        let val_loss = val_tot / nbatch.max(1) as f32;

        history.train_loss.push(train_loss);
        history.val_loss.push(val_loss);
        history.learning_rates.push(optimizer.learning_rate());
        pb.inc(1);

        if config.verbose {
            info!(
                "[{}] loss: {} validation loss: {}",
                epoch + 1,
                train_loss,
                val_loss
            );
        }

        if let Some(new_lr) = lr_plateau.update(val_loss, optimizer.learning_rate()) {
            if config.verbose {
                info!("[{}] reducing learning rate to {}", epoch + 1, new_lr);
            }
            optimizer.set_learning_rate(new_lr);
        }

        if early_stopping.should_stop(val_loss) {
            if config.verbose {
                info!("[{}] validation loss plateaued; stopping", epoch + 1);
            }
            break;
        }
    } // each epoch

    pb.finish_and_clear();
    Ok(history)
}
