use crate::error::EstimatorError;
use crate::labels::LabelEncoding;
use crate::size_factor::size_factors_rows;
use candle_atlas::data_batch::{BatchStream, Minibatch};
use candle_core::{Device, Tensor};
use cell_beans::row_source::IndexedRowSource;
use ndarray::Array2;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

///
/// What the data set will be consumed for. `Train` repeats and
/// reshuffles forever; `TrainVal` is one shuffled pass per call;
/// `Eval` and `Predict` hand back fully materialized arrays.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    TrainVal,
    Eval,
    Predict,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "train_val" => Ok(Mode::TrainVal),
            "eval" => Ok(Mode::Eval),
            "predict" => Ok(Mode::Predict),
            _ => Err(EstimatorError::UnknownMode(s.to_string()).into()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Mode::Train => "train",
            Mode::TrainVal => "train_val",
            Mode::Eval => "eval",
            Mode::Predict => "predict",
        };
        write!(f, "{}", tag)
    }
}

pub struct StreamSettings {
    /// `None` collapses the whole partition into a single batch
    pub batch_size: Option<usize>,
    pub shuffle_buffer_size: usize,
    pub prefetch: usize,
    pub weighted: bool,
    pub device: Device,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_size: Some(128),
            shuffle_buffer_size: 10_000,
            prefetch: 10,
            weighted: true,
            device: Device::Cpu,
        }
    }
}

///
/// A shuffle buffer over visible-set positions: upstream positions
/// flow in sequentially (repeating when `repeat`), pulls take a
/// uniform random element of the buffer. Buffer capacity is
/// min(shuffle_buffer_size, set size).
///
struct ShuffledPositions {
    num_positions: usize,
    capacity: usize,
    cursor: usize,
    buffer: Vec<usize>,
    repeat: bool,
    rng: rand::rngs::ThreadRng,
}

impl ShuffledPositions {
    fn new(num_positions: usize, shuffle_buffer_size: usize, repeat: bool) -> Self {
        Self {
            num_positions,
            capacity: shuffle_buffer_size.min(num_positions).max(1),
            cursor: 0,
            buffer: vec![],
            repeat,
            rng: rand::rng(),
        }
    }

    fn next_position(&mut self) -> Option<usize> {
        while self.buffer.len() < self.capacity {
            if self.cursor >= self.num_positions {
                if self.repeat && self.num_positions > 0 {
                    self.cursor = 0;
                } else {
                    break;
                }
            }
            self.buffer.push(self.cursor);
            self.cursor += 1;
        }

        if self.buffer.is_empty() {
            return None;
        }
        let pick = self.rng.random_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(pick))
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.buffer.clear();
    }
}

fn tensor_from_rows(block: &Array2<f32>, device: &Device) -> anyhow::Result<Tensor> {
    let (n, d) = block.dim();
    let data = block
        .as_slice()
        .ok_or_else(|| anyhow::anyhow!("row block is not contiguous"))?;
    Ok(Tensor::from_slice(data, (n, d), device)?)
}

///////////////////////////
// embedding model family //
///////////////////////////

/// Materialized (features, size factor) arrays for eval/predict
pub struct EmbeddingArrays {
    pub x: Array2<f32>,
    pub size_factors: Vec<f32>,
}

pub enum EmbeddingDataset<S: IndexedRowSource> {
    Stream(EmbeddingStream<S>),
    Arrays(EmbeddingArrays),
}

///
/// Lazily batched (features, size factor) stream. Variational models
/// receive the `(input, size factor)` pair mirrored as the output
/// target; plain models receive the features alone.
///
pub struct EmbeddingStream<S: IndexedRowSource> {
    source: S,
    rows: Vec<usize>,
    positions: ShuffledPositions,
    batch_size: usize,
    variational: bool,
    prefetch_depth: usize,
    ring: VecDeque<Minibatch>,
    device: Device,
}

impl<S: IndexedRowSource> EmbeddingStream<S> {
    fn new(
        source: S,
        rows: Vec<usize>,
        variational: bool,
        repeat: bool,
        settings: &StreamSettings,
    ) -> Self {
        let batch_size = settings.batch_size.unwrap_or(rows.len()).max(1);
        let positions = ShuffledPositions::new(rows.len(), settings.shuffle_buffer_size, repeat);
        Self {
            source,
            rows,
            positions,
            batch_size,
            variational,
            prefetch_depth: settings.prefetch.max(1),
            ring: VecDeque::new(),
            device: settings.device.clone(),
        }
    }

    /// Pull one batch worth of positions and read their rows; this is
    /// where backed sources block on I/O.
    fn assemble_batch(&mut self) -> anyhow::Result<Option<Minibatch>> {
        let mut batch_rows = vec![];
        while batch_rows.len() < self.batch_size {
            match self.positions.next_position() {
                Some(k) => batch_rows.push(self.rows[k]),
                None => break,
            }
        }
        if batch_rows.is_empty() {
            return Ok(None);
        }

        let block = self.source.read_rows(&batch_rows)?;
        let sf = size_factors_rows(&block);

        let input = tensor_from_rows(&block, &self.device)?;
        let sf_n = Tensor::from_vec(sf, batch_rows.len(), &self.device)?;

        let output_size_factor = if self.variational {
            Some(sf_n.clone())
        } else {
            None
        };

        Ok(Some(Minibatch {
            output: Some(input.clone()),
            input,
            size_factor: Some(sf_n),
            output_size_factor,
            labels: None,
            weights: None,
        }))
    }
}

impl<S: IndexedRowSource> BatchStream for EmbeddingStream<S> {
    fn next_batch(&mut self) -> anyhow::Result<Option<Minibatch>> {
        while self.ring.len() < self.prefetch_depth {
            match self.assemble_batch()? {
                Some(mb) => self.ring.push_back(mb),
                None => break,
            }
        }
        Ok(self.ring.pop_front())
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.positions.reset();
        self.ring.clear();
        Ok(())
    }

    fn batches_per_epoch(&self) -> usize {
        self.rows.len().div_ceil(self.batch_size)
    }
}

///
/// Build the embedding-family data set for `mode`.
///
/// * `source` - indexed row access (materialized or backed)
/// * `rows` - visible observation rows, in caller order
/// * `variational` - whether the model family is variational
///
pub fn build_embedding_dataset<S: IndexedRowSource>(
    source: S,
    rows: Vec<usize>,
    variational: bool,
    mode: Mode,
    settings: &StreamSettings,
) -> anyhow::Result<EmbeddingDataset<S>> {
    match mode {
        Mode::Train => Ok(EmbeddingDataset::Stream(EmbeddingStream::new(
            source,
            rows,
            variational,
            true,
            settings,
        ))),
        Mode::TrainVal => Ok(EmbeddingDataset::Stream(EmbeddingStream::new(
            source,
            rows,
            variational,
            false,
            settings,
        ))),
        Mode::Eval | Mode::Predict => {
            let x = source.read_rows(&rows)?;
            let size_factors = size_factors_rows(&x);
            Ok(EmbeddingDataset::Arrays(EmbeddingArrays {
                x,
                size_factors,
            }))
        }
    }
}

///////////////////////////
// cell type model family //
///////////////////////////

/// Materialized (features, targets, weights) arrays; `predict` drops
/// the targets and weights.
pub struct CelltypeArrays {
    pub x: Array2<f32>,
    pub labels: Option<Array2<f32>>,
    pub weights: Option<Vec<f32>>,
}

pub enum CelltypeDataset<S: IndexedRowSource> {
    Stream(CelltypeStream<S>),
    Arrays(CelltypeArrays),
}

///
/// Lazily batched (features, one-hot labels, weight) stream. Label
/// and weight rows are aligned with the visible-set positions.
///
pub struct CelltypeStream<S: IndexedRowSource> {
    source: S,
    rows: Vec<usize>,
    onehot: Array2<f32>,
    weights: Vec<f32>,
    positions: ShuffledPositions,
    batch_size: usize,
    prefetch_depth: usize,
    ring: VecDeque<Minibatch>,
    device: Device,
}

impl<S: IndexedRowSource> CelltypeStream<S> {
    fn new(
        source: S,
        rows: Vec<usize>,
        encoding: &LabelEncoding,
        repeat: bool,
        settings: &StreamSettings,
    ) -> anyhow::Result<Self> {
        if encoding.num_obs() != rows.len() {
            return Err(anyhow::anyhow!(
                "{} encoded labels vs. {} visible rows",
                encoding.num_obs(),
                rows.len()
            ));
        }

        let weights = if settings.weighted {
            encoding.weights.clone()
        } else {
            vec![1_f32; rows.len()]
        };

        let batch_size = settings.batch_size.unwrap_or(rows.len()).max(1);
        let positions = ShuffledPositions::new(rows.len(), settings.shuffle_buffer_size, repeat);

        Ok(Self {
            source,
            rows,
            onehot: encoding.onehot.clone(),
            weights,
            positions,
            batch_size,
            prefetch_depth: settings.prefetch.max(1),
            ring: VecDeque::new(),
            device: settings.device.clone(),
        })
    }

    fn assemble_batch(&mut self) -> anyhow::Result<Option<Minibatch>> {
        let mut batch_pos = vec![];
        while batch_pos.len() < self.batch_size {
            match self.positions.next_position() {
                Some(k) => batch_pos.push(k),
                None => break,
            }
        }
        if batch_pos.is_empty() {
            return Ok(None);
        }

        let batch_rows: Vec<usize> = batch_pos.iter().map(|&k| self.rows[k]).collect();
        let block = self.source.read_rows(&batch_rows)?;

        let num_classes = self.onehot.ncols();
        let mut y = Vec::with_capacity(batch_pos.len() * num_classes);
        let mut w = Vec::with_capacity(batch_pos.len());
        for &k in batch_pos.iter() {
            y.extend(self.onehot.row(k).iter().copied());
            w.push(self.weights[k]);
        }

        let input = tensor_from_rows(&block, &self.device)?;
        let labels = Tensor::from_vec(y, (batch_pos.len(), num_classes), &self.device)?;
        let weights = Tensor::from_vec(w, batch_pos.len(), &self.device)?;

        Ok(Some(Minibatch {
            input,
            size_factor: None,
            output: None,
            output_size_factor: None,
            labels: Some(labels),
            weights: Some(weights),
        }))
    }
}

impl<S: IndexedRowSource> BatchStream for CelltypeStream<S> {
    fn next_batch(&mut self) -> anyhow::Result<Option<Minibatch>> {
        while self.ring.len() < self.prefetch_depth {
            match self.assemble_batch()? {
                Some(mb) => self.ring.push_back(mb),
                None => break,
            }
        }
        Ok(self.ring.pop_front())
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.positions.reset();
        self.ring.clear();
        Ok(())
    }

    fn batches_per_epoch(&self) -> usize {
        self.rows.len().div_ceil(self.batch_size)
    }
}

///
/// Build the cell-type-family data set for `mode`. `encoding` is
/// required for every mode except `predict`.
///
pub fn build_celltype_dataset<S: IndexedRowSource>(
    source: S,
    rows: Vec<usize>,
    encoding: Option<&LabelEncoding>,
    mode: Mode,
    settings: &StreamSettings,
) -> anyhow::Result<CelltypeDataset<S>> {
    let require_encoding = |mode: Mode| -> anyhow::Result<&LabelEncoding> {
        encoding.ok_or_else(|| anyhow::anyhow!("mode \"{}\" needs encoded labels", mode))
    };

    match mode {
        Mode::Train => {
            let encoding = require_encoding(mode)?;
            Ok(CelltypeDataset::Stream(CelltypeStream::new(
                source, rows, encoding, true, settings,
            )?))
        }
        Mode::TrainVal => {
            let encoding = require_encoding(mode)?;
            Ok(CelltypeDataset::Stream(CelltypeStream::new(
                source, rows, encoding, false, settings,
            )?))
        }
        Mode::Eval => {
            let encoding = require_encoding(mode)?;
            let x = source.read_rows(&rows)?;
            let weights = if settings.weighted {
                encoding.weights.clone()
            } else {
                vec![1_f32; rows.len()]
            };
            Ok(CelltypeDataset::Arrays(CelltypeArrays {
                x,
                labels: Some(encoding.onehot.clone()),
                weights: Some(weights),
            }))
        }
        Mode::Predict => {
            let x = source.read_rows(&rows)?;
            Ok(CelltypeDataset::Arrays(CelltypeArrays {
                x,
                labels: None,
                weights: None,
            }))
        }
    }
}
