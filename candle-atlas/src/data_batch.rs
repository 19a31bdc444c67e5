use candle_core::Tensor;

///
/// One minibatch at the model boundary. Which fields are populated
/// depends on the model family:
///
/// * variational embedding: `input`, `size_factor`, `output`,
///   `output_size_factor` (the output pair mirrors the input pair)
/// * plain embedding: `input`, `size_factor`, `output`
/// * cell type classifier: `input`, `labels`, `weights`
///
pub struct Minibatch {
    pub input: Tensor,
    pub size_factor: Option<Tensor>,
    pub output: Option<Tensor>,
    pub output_size_factor: Option<Tensor>,
    pub labels: Option<Tensor>,
    pub weights: Option<Tensor>,
}

///
/// A lazy pull-based sequence of minibatches. Each pull may block on
/// upstream I/O when the rows come from a backed source; the driver
/// never sees the difference.
///
pub trait BatchStream {
    /// Pull the next minibatch. `None` marks the end of one pass for
    /// finite streams; infinite (training) streams never return it.
    fn next_batch(&mut self) -> anyhow::Result<Option<Minibatch>>;

    /// Rewind for another pass, reshuffling where the mode shuffles
    fn reset(&mut self) -> anyhow::Result<()>;

    /// Number of pulls that constitute one pass over the data
    fn batches_per_epoch(&self) -> usize;
}
