use crate::common::CsrMat;
use crate::data_stream::{
    build_celltype_dataset, build_embedding_dataset, CelltypeDataset, EmbeddingDataset, Mode,
    StreamSettings,
};
use crate::feature_remap::remap_to_genome;
use crate::labels::{encode_labels, LabelEncoding, MAX_CLASS_WEIGHT};
use crate::partition::{split_observations, Partition, TestSplit};
use crate::weights::WeightsStore;
use candle_atlas::inference::{train_celltype, train_embedding, TrainConfig, TrainHistory};
use candle_atlas::model_kind::ModelKind;
use candle_atlas::model_traits::{ClassifierModuleT, DecoderModuleT, EncoderModuleT};
use candle_atlas::optimizer::{AtlasOptimizer, OptimizerKind};
use candle_core::{Result as CandleResult, Tensor};
use cell_beans::adapter::to_csr_rows;
use cell_beans::ann_matrix::{AnnMatrix, DataMatrix, ObsTable};
use cell_beans::genome::GenomeContainer;
use cell_beans::ontology::CellTypeUniverse;
use cell_beans::row_source::{IndexedRowSource, MaterializedRows};
use cell_beans::sparse_backed::BackedSparseMatrix;
use log::info;
use ndarray::Array2;
use serde::Serialize;
use std::sync::Arc;

///
/// The row source a training or evaluation call actually reads from:
/// either the adapted + remapped in-memory matrix, or the backed
/// matrix untouched on disk.
///
pub enum PreparedSource {
    Materialized(MaterializedRows),
    Backed(Arc<BackedSparseMatrix>),
}

impl IndexedRowSource for PreparedSource {
    fn num_rows(&self) -> usize {
        match self {
            PreparedSource::Materialized(x) => x.num_rows(),
            PreparedSource::Backed(x) => x.num_rows(),
        }
    }

    fn num_features(&self) -> usize {
        match self {
            PreparedSource::Materialized(x) => x.num_features(),
            PreparedSource::Backed(x) => x.num_features(),
        }
    }

    fn read_rows(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        match self {
            PreparedSource::Materialized(x) => x.read_rows(rows),
            PreparedSource::Backed(x) => x.read_rows(rows),
        }
    }
}

/// Hyperparameters of one training call, recorded for restoring
#[derive(Debug, Clone, Serialize)]
pub struct TrainHyperparams {
    pub optimizer: String,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub validation_batch_size: usize,
    pub max_epochs: usize,
    pub max_steps_per_epoch: usize,
    pub patience: usize,
    pub validation_fraction: f64,
    pub seed: u64,
    pub weighted: bool,
}

pub struct TrainSettings {
    pub optimizer: String,
    pub test_split: TestSplit,
    pub validation_fraction: f64,
    pub seed: u64,
    pub config: TrainConfig,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            optimizer: "adam".to_string(),
            test_split: TestSplit::Fraction(0.),
            validation_fraction: 0.1,
            seed: 1,
            config: TrainConfig::default(),
        }
    }
}

impl TrainSettings {
    fn hyperparams(&self) -> TrainHyperparams {
        TrainHyperparams {
            optimizer: self.optimizer.clone(),
            learning_rate: self.config.learning_rate,
            batch_size: self.config.batch_size,
            validation_batch_size: self.config.validation_batch_size,
            max_epochs: self.config.max_epochs,
            max_steps_per_epoch: self.config.max_steps_per_epoch,
            patience: self.config.patience,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
            weighted: self.config.weighted,
        }
    }
}

///
/// State shared by the embedding and cell type estimators: the
/// annotated data, the reference feature space, the weight store, and
/// the partition of one training call.
///
pub struct EstimatorBase {
    pub data: AnnMatrix,
    pub genome: GenomeContainer,
    pub weights: WeightsStore,
    pub partition: Option<Partition>,
    pub obs_train: Option<ObsTable>,
    pub obs_eval: Option<ObsTable>,
    pub obs_test: Option<ObsTable>,
    pub history: Option<TrainHistory>,
    pub train_hyperparam: Option<TrainHyperparams>,
}

impl EstimatorBase {
    /// The weight cache is cleared at initialization unless
    /// explicitly suppressed.
    pub fn new(
        data: AnnMatrix,
        genome: GenomeContainer,
        weights: WeightsStore,
        clear_weight_cache: bool,
    ) -> anyhow::Result<Self> {
        if clear_weight_cache {
            weights.clear_weight_cache()?;
        }
        Ok(Self {
            data,
            genome,
            weights,
            partition: None,
            obs_train: None,
            obs_eval: None,
            obs_test: None,
            history: None,
            train_hyperparam: None,
        })
    }

    ///
    /// The in-memory pipeline: slice the requested rows, zero NaN
    /// values, and remap the feature space onto the reference genome.
    /// Skips the remapping when the source declares its features
    /// already mapped to this reference.
    ///
    pub fn prepare_data_matrix(&self, idx: &[usize]) -> anyhow::Result<CsrMat> {
        let x = to_csr_rows(&self.data.x, idx)?;

        if let Some(mapped) = &self.data.mapped_features {
            if mapped.as_ref() == self.genome.id() {
                info!("found {} observations", x.nrows());
                return Ok(x);
            }
        }

        remap_to_genome(&x, &self.data.ensembl_ids, &self.genome)
    }

    ///
    /// A row source over the visible observations plus the row
    /// numbers to stream. In-memory data is adapted and remapped up
    /// front; backed data stays on disk and is read by global index.
    ///
    pub fn prepared_source(&self, idx: &[usize]) -> anyhow::Result<(PreparedSource, Vec<usize>)> {
        match &self.data.x {
            DataMatrix::Backed(backed) => {
                Ok((PreparedSource::Backed(backed.clone()), idx.to_vec()))
            }
            _ => {
                let x = self.prepare_data_matrix(idx)?;
                let rows = (0..x.nrows()).collect();
                Ok((PreparedSource::Materialized(MaterializedRows::new(x)), rows))
            }
        }
    }

    fn split(&mut self, settings: &TrainSettings) -> anyhow::Result<Partition> {
        let partition = split_observations(
            &self.data.obs,
            self.data.num_obs(),
            &settings.test_split,
            settings.validation_fraction,
            settings.seed,
        )?;

        self.obs_train = Some(self.data.obs.take_subset(&partition.train));
        self.obs_eval = Some(self.data.obs.take_subset(&partition.eval));
        self.obs_test = Some(self.data.obs.take_subset(&partition.test));

        Ok(partition)
    }

    /// Test indices of the last training call, or every observation
    /// when none was made
    fn test_idx(&self) -> Vec<usize> {
        match &self.partition {
            Some(partition) => partition.test.clone(),
            None => (0..self.data.num_obs()).collect(),
        }
    }

    fn stream_settings(&self, batch_size: Option<usize>, config: &TrainConfig) -> StreamSettings {
        StreamSettings {
            batch_size,
            shuffle_buffer_size: config.shuffle_buffer_size,
            prefetch: config.prefetch,
            weighted: config.weighted,
            device: config.device.clone(),
        }
    }
}

fn tensor_from_array2(x: &Array2<f32>, device: &candle_core::Device) -> anyhow::Result<Tensor> {
    let (n, d) = x.dim();
    let data = x
        .as_slice()
        .ok_or_else(|| anyhow::anyhow!("array is not contiguous"))?;
    Ok(Tensor::from_slice(data, (n, d), device)?)
}

fn tensor_to_array2(t: &Tensor) -> anyhow::Result<Array2<f32>> {
    let (n, d) = t.dims2()?;
    let rows = t.to_vec2::<f32>()?;
    Ok(Array2::from_shape_vec(
        (n, d),
        rows.into_iter().flatten().collect(),
    )?)
}

//////////////////////
// embedding models //
//////////////////////

pub struct EstimatorEmbedding {
    pub base: EstimatorBase,
    pub model_kind: ModelKind,
}

impl EstimatorEmbedding {
    pub fn new(
        data: AnnMatrix,
        genome: GenomeContainer,
        model_kind: ModelKind,
        weights: WeightsStore,
        clear_weight_cache: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base: EstimatorBase::new(data, genome, weights, clear_weight_cache)?,
            model_kind,
        })
    }

    ///
    /// Split the observations, build the train and validation
    /// streams, and drive the epoch loop.
    ///
    pub fn train<Enc, Dec, LlikFn>(
        &mut self,
        encoder: &Enc,
        decoder: &Dec,
        varmap: &candle_nn::VarMap,
        llik: &LlikFn,
        settings: &TrainSettings,
    ) -> anyhow::Result<TrainHistory>
    where
        Enc: EncoderModuleT,
        Dec: DecoderModuleT,
        LlikFn: Fn(&Tensor, &Tensor) -> CandleResult<Tensor>,
    {
        let optimizer_kind: OptimizerKind = settings.optimizer.parse()?;
        let config = &settings.config;
        let variational = self.model_kind.is_variational();

        let partition = self.base.split(settings)?;

        let (src, rows) = self.base.prepared_source(&partition.train)?;
        let train_ds = build_embedding_dataset(
            src,
            rows,
            variational,
            Mode::Train,
            &self.base.stream_settings(Some(config.batch_size), config),
        )?;

        let (val_src, val_rows) = self.base.prepared_source(&partition.eval)?;
        let val_ds = build_embedding_dataset(
            val_src,
            val_rows,
            variational,
            Mode::TrainVal,
            &self
                .base
                .stream_settings(Some(config.validation_batch_size), config),
        )?;

        let (mut train_stream, mut val_stream) = match (train_ds, val_ds) {
            (EmbeddingDataset::Stream(a), EmbeddingDataset::Stream(b)) => (a, b),
            _ => return Err(anyhow::anyhow!("training modes always stream")),
        };

        let mut optimizer =
            AtlasOptimizer::build(optimizer_kind, varmap.all_vars(), config.learning_rate)?;

        let history = train_embedding(
            encoder,
            decoder,
            &mut optimizer,
            &mut train_stream,
            &mut val_stream,
            llik,
            config,
        )?;

        self.base.partition = Some(partition);
        self.base.train_hyperparam = Some(settings.hyperparams());
        self.base.history = Some(history.clone());
        Ok(history)
    }

    /// Mean (KL - log likelihood) over the materialized observations
    pub fn evaluate_any<Enc, Dec, LlikFn>(
        &self,
        encoder: &Enc,
        decoder: &Dec,
        llik: &LlikFn,
        idx: &[usize],
    ) -> anyhow::Result<f32>
    where
        Enc: EncoderModuleT,
        Dec: DecoderModuleT,
        LlikFn: Fn(&Tensor, &Tensor) -> CandleResult<Tensor>,
    {
        let config = TrainConfig::default();
        let (src, rows) = self.base.prepared_source(idx)?;
        let dataset = build_embedding_dataset(
            src,
            rows,
            self.model_kind.is_variational(),
            Mode::Eval,
            &self.base.stream_settings(None, &config),
        )?;

        let arrays = match dataset {
            EmbeddingDataset::Arrays(arrays) => arrays,
            EmbeddingDataset::Stream(_) => {
                return Err(anyhow::anyhow!("eval mode never streams"))
            }
        };

        let x_nd = tensor_from_array2(&arrays.x, &config.device)?;
        let sf_n = Tensor::from_vec(arrays.size_factors, arrays.x.nrows(), &config.device)?;

        let (z_nk, kl_n) = encoder.forward_t(&x_nd, Some(&sf_n), false)?;
        let (_, llik_n) = decoder.forward_with_llik(&z_nk, &x_nd, llik)?;
        Ok((kl_n - &llik_n)?.mean_all()?.to_scalar::<f32>()?)
    }

    pub fn evaluate<Enc, Dec, LlikFn>(
        &self,
        encoder: &Enc,
        decoder: &Dec,
        llik: &LlikFn,
    ) -> anyhow::Result<f32>
    where
        Enc: EncoderModuleT,
        Dec: DecoderModuleT,
        LlikFn: Fn(&Tensor, &Tensor) -> CandleResult<Tensor>,
    {
        self.evaluate_any(encoder, decoder, llik, &self.base.test_idx())
    }

    /// Reconstructed expression for the test observations
    pub fn predict<Enc, Dec>(&self, encoder: &Enc, decoder: &Dec) -> anyhow::Result<Array2<f32>>
    where
        Enc: EncoderModuleT,
        Dec: DecoderModuleT,
    {
        let (x_nd, sf_n) = self.predict_input()?;
        let (z_nk, _) = encoder.forward_t(&x_nd, Some(&sf_n), false)?;
        let recon_nd = decoder.forward(&z_nk)?;
        tensor_to_array2(&recon_nd)
    }

    /// Latent embedding for the test observations (or all, before
    /// any training call)
    pub fn predict_embedding<Enc>(&self, encoder: &Enc) -> anyhow::Result<Array2<f32>>
    where
        Enc: EncoderModuleT,
    {
        let (x_nd, sf_n) = self.predict_input()?;
        let (z_nk, _) = encoder.forward_t(&x_nd, Some(&sf_n), false)?;
        tensor_to_array2(&z_nk)
    }

    fn predict_input(&self) -> anyhow::Result<(Tensor, Tensor)> {
        let config = TrainConfig::default();
        let idx = self.base.test_idx();
        let (src, rows) = self.base.prepared_source(&idx)?;
        let dataset = build_embedding_dataset(
            src,
            rows,
            self.model_kind.is_variational(),
            Mode::Predict,
            &self.base.stream_settings(None, &config),
        )?;

        match dataset {
            EmbeddingDataset::Arrays(arrays) => {
                let x_nd = tensor_from_array2(&arrays.x, &config.device)?;
                let sf_n =
                    Tensor::from_vec(arrays.size_factors, arrays.x.nrows(), &config.device)?;
                Ok((x_nd, sf_n))
            }
            EmbeddingDataset::Stream(_) => Err(anyhow::anyhow!("predict mode never streams")),
        }
    }
}

//////////////////////
// cell type models //
//////////////////////

/// Scalar metrics of one classifier evaluation
#[derive(Debug, Clone, Serialize)]
pub struct CelltypeMetrics {
    pub loss: f32,
    pub accuracy: f32,
}

pub struct EstimatorCelltype {
    pub base: EstimatorBase,
    pub universe: CellTypeUniverse,
    pub max_class_weight: f32,
}

impl EstimatorCelltype {
    pub fn new(
        data: AnnMatrix,
        genome: GenomeContainer,
        universe: CellTypeUniverse,
        weights: WeightsStore,
        clear_weight_cache: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base: EstimatorBase::new(data, genome, weights, clear_weight_cache)?,
            universe,
            max_class_weight: MAX_CLASS_WEIGHT,
        })
    }

    /// One-hot targets and class weights for the given observations
    pub fn celltype_out(&self, idx: &[usize]) -> anyhow::Result<LabelEncoding> {
        let labels = self.base.data.labels()?;
        let visible: Vec<Box<str>> = idx.iter().map(|&i| labels[i].clone()).collect();
        encode_labels(&visible, &self.universe, self.max_class_weight)
    }

    pub fn train<Cls>(
        &mut self,
        classifier: &Cls,
        varmap: &candle_nn::VarMap,
        settings: &TrainSettings,
    ) -> anyhow::Result<TrainHistory>
    where
        Cls: ClassifierModuleT,
    {
        let optimizer_kind: OptimizerKind = settings.optimizer.parse()?;
        let config = &settings.config;

        let partition = self.base.split(settings)?;

        let train_encoding = self.celltype_out(&partition.train)?;
        let (src, rows) = self.base.prepared_source(&partition.train)?;
        let train_ds = build_celltype_dataset(
            src,
            rows,
            Some(&train_encoding),
            Mode::Train,
            &self.base.stream_settings(Some(config.batch_size), config),
        )?;

        let eval_encoding = self.celltype_out(&partition.eval)?;
        let (val_src, val_rows) = self.base.prepared_source(&partition.eval)?;
        let val_ds = build_celltype_dataset(
            val_src,
            val_rows,
            Some(&eval_encoding),
            Mode::TrainVal,
            &self
                .base
                .stream_settings(Some(config.validation_batch_size), config),
        )?;

        let (mut train_stream, mut val_stream) = match (train_ds, val_ds) {
            (CelltypeDataset::Stream(a), CelltypeDataset::Stream(b)) => (a, b),
            _ => return Err(anyhow::anyhow!("training modes always stream")),
        };

        let mut optimizer =
            AtlasOptimizer::build(optimizer_kind, varmap.all_vars(), config.learning_rate)?;

        let history = train_celltype(
            classifier,
            &mut optimizer,
            &mut train_stream,
            &mut val_stream,
            config,
        )?;

        self.base.partition = Some(partition);
        self.base.train_hyperparam = Some(settings.hyperparams());
        self.base.history = Some(history.clone());
        Ok(history)
    }

    /// Weighted cross-entropy and accuracy over the materialized
    /// observations
    pub fn evaluate_any<Cls>(
        &self,
        classifier: &Cls,
        idx: &[usize],
        weighted: bool,
    ) -> anyhow::Result<CelltypeMetrics>
    where
        Cls: ClassifierModuleT,
    {
        let mut config = TrainConfig::default();
        config.weighted = weighted;

        let encoding = self.celltype_out(idx)?;
        let (src, rows) = self.base.prepared_source(idx)?;
        let dataset = build_celltype_dataset(
            src,
            rows,
            Some(&encoding),
            Mode::Eval,
            &self.base.stream_settings(None, &config),
        )?;

        let arrays = match dataset {
            CelltypeDataset::Arrays(arrays) => arrays,
            CelltypeDataset::Stream(_) => {
                return Err(anyhow::anyhow!("eval mode never streams"))
            }
        };

        let y = arrays
            .labels
            .ok_or_else(|| anyhow::anyhow!("eval arrays without labels"))?;
        let w = arrays
            .weights
            .ok_or_else(|| anyhow::anyhow!("eval arrays without weights"))?;

        let x_nd = tensor_from_array2(&arrays.x, &config.device)?;
        let prob = tensor_to_array2(&classifier.forward_t(&x_nd, false)?)?;

        let num_obs = y.nrows();
        let mut loss = 0_f32;
        let mut hits = 0_usize;
        for i in 0..num_obs {
            let mut ce = 0_f32;
            for j in 0..y.ncols() {
                ce -= y[(i, j)] * (prob[(i, j)] + 1e-10).ln();
            }
            loss += ce * w[i];
            if argmax_row(&y, i) == argmax_row(&prob, i) {
                hits += 1;
            }
        }

        Ok(CelltypeMetrics {
            loss: loss / num_obs.max(1) as f32,
            accuracy: hits as f32 / num_obs.max(1) as f32,
        })
    }

    pub fn evaluate<Cls>(&self, classifier: &Cls, weighted: bool) -> anyhow::Result<CelltypeMetrics>
    where
        Cls: ClassifierModuleT,
    {
        self.evaluate_any(classifier, &self.base.test_idx(), weighted)
    }

    /// Class probabilities for the test observations
    pub fn predict<Cls>(&self, classifier: &Cls) -> anyhow::Result<Array2<f32>>
    where
        Cls: ClassifierModuleT,
    {
        let config = TrainConfig::default();
        let idx = self.base.test_idx();
        let (src, rows) = self.base.prepared_source(&idx)?;
        let dataset = build_celltype_dataset(
            src,
            rows,
            None,
            Mode::Predict,
            &self.base.stream_settings(None, &config),
        )?;

        let arrays = match dataset {
            CelltypeDataset::Arrays(arrays) => arrays,
            CelltypeDataset::Stream(_) => {
                return Err(anyhow::anyhow!("predict mode never streams"))
            }
        };

        let x_nd = tensor_from_array2(&arrays.x, &config.device)?;
        tensor_to_array2(&classifier.forward_t(&x_nd, false)?)
    }

    /// Encoded ground-truth labels of the test observations
    pub fn ytrue(&self) -> anyhow::Result<Array2<f32>> {
        let encoding = self.celltype_out(&self.base.test_idx())?;
        Ok(encoding.onehot)
    }
}

fn argmax_row(x: &Array2<f32>, row: usize) -> usize {
    let mut best = 0_usize;
    let mut best_val = f32::NEG_INFINITY;
    for (j, &v) in x.row(row).iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = j;
        }
    }
    best
}
