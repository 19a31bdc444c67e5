use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use candle_atlas::inference::TrainConfig;
use candle_atlas::linear_model::{LinearClassifier, LinearDecoder, LinearEncoder};
use candle_atlas::losses::gaussian_likelihood;
use candle_atlas::model_kind::ModelKind;
use cell_beans::ann_matrix::{AnnMatrix, DataMatrix, ObsTable, CELL_ONTOLOGY_COLUMN};
use cell_beans::common_io::read_lines;
use cell_beans::genome::GenomeContainer;
use cell_beans::ontology::CellTypeUniverse;
use cell_beans::sparse_backed::BackedSparseMatrix;
use lupin::estimator::{EstimatorCelltype, EstimatorEmbedding, TrainSettings};
use lupin::partition::TestSplit;
use lupin::weights::WeightsStore;
use ndarray::Array2;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Learning Unified Phenotype representations from sINgle-cell data.\n\
		  Expression data arrives as an `.h5` backed matrix (cells x genes)\n\
		  whose columns are already aligned to the reference gene list."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train an embedding model",
        long_about = "Train an embedding model in three stages:\n\
		      (1) Split the observations into train/eval/test\n\
		      (2) Stream shuffled minibatches with size factors\n\
		      (3) Fit the encoder-decoder pair via SGD.\n"
    )]
    FitEmbedding(FitEmbeddingArgs),

    #[command(
        about = "Train a cell type classifier",
        long_about = "Train a cell type classifier against one-hot\n\
		      (or ontology-resolved multi-hot) targets with\n\
		      inverse-frequency observation weights.\n"
    )]
    FitCelltype(FitCelltypeArgs),

    /// Evaluate a trained cell type classifier on the held-out set
    Evaluate(EvaluateArgs),

    /// Write the latent embedding of a trained embedding model
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    #[arg(long, help = "Backed expression matrix (.h5, cells x genes)")]
    data: String,

    #[arg(
        long,
        help = "Reference gene list",
        long_help = "Reference gene list (tsv: ensembl id, symbol).\n\
		     The backed matrix columns must follow this ordering."
    )]
    genome: String,

    #[arg(long, default_value = "GRCh38", help = "Reference genome tag")]
    genome_id: String,

    #[arg(long, help = "Cell ontology labels, one per line")]
    labels: Option<String>,

    #[arg(long, help = "Model directory (weights and records)")]
    model_dir: String,

    #[arg(long, help = "Model identifier")]
    model_id: String,

    #[arg(long, default_value = "cache", help = "Weights cache directory")]
    cache: String,

    #[arg(long, help = "Expected md5 digest of the published weights")]
    weights_md5: Option<String>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, default_value = "adam", help = "Optimizer (adam|sgd|rmsprop|adagrad)")]
    optimizer: String,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    learning_rate: f64,

    #[arg(long, default_value_t = 1000, help = "Maximum training epochs")]
    max_epochs: usize,

    #[arg(long, default_value_t = 128, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, default_value_t = 0.1, help = "Validation fraction")]
    validation_fraction: f64,

    #[arg(long, default_value_t = 0., help = "Held-out test fraction")]
    test_fraction: f64,

    #[arg(long, default_value_t = 20, help = "Early stopping patience")]
    patience: usize,

    #[arg(long, default_value_t = 1, help = "Partition seed")]
    seed: u64,

    #[arg(long, default_value_t = false, help = "Per-epoch logging")]
    verbose: bool,
}

#[derive(Args, Debug)]
struct FitEmbeddingArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, value_enum, default_value_t = ModelKind::Linear, help = "Model family")]
    model_type: ModelKind,

    #[arg(short = 'k', long, default_value_t = 64, help = "Latent dimension")]
    n_latent: usize,

    #[command(flatten)]
    train: TrainArgs,
}

#[derive(Args, Debug)]
struct FitCelltypeArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, help = "Leaf cell type classes, one per line")]
    celltypes: String,

    #[command(flatten)]
    train: TrainArgs,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, help = "Leaf cell type classes, one per line")]
    celltypes: String,

    #[arg(long, default_value_t = false, help = "Ignore class weights")]
    unweighted: bool,
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, value_enum, default_value_t = ModelKind::Linear, help = "Model family")]
    model_type: ModelKind,

    #[arg(short = 'k', long, default_value_t = 64, help = "Latent dimension")]
    n_latent: usize,

    #[arg(short, long, help = "Output file (tsv)")]
    out: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::FitEmbedding(args) => {
            fit_embedding(args)?;
        }
        Commands::FitCelltype(args) => {
            fit_celltype(args)?;
        }
        Commands::Evaluate(args) => {
            evaluate(args)?;
        }
        Commands::Predict(args) => {
            predict(args)?;
        }
    }
    Ok(())
}

/// Open the backed matrix and wire up the annotated view the
/// estimators expect; the backed columns follow the reference genome.
fn load_inputs(args: &DataArgs) -> anyhow::Result<(AnnMatrix, GenomeContainer, WeightsStore)> {
    let genome = GenomeContainer::from_tsv_file(&args.genome_id, &args.genome)?;
    let backed = BackedSparseMatrix::open(&args.data)?;

    if backed.num_features() != genome.num_genes() {
        return Err(anyhow!(
            "{} backed columns vs. {} reference genes",
            backed.num_features(),
            genome.num_genes()
        ));
    }

    let mut obs = ObsTable::new();
    if let Some(label_file) = &args.labels {
        obs.insert(CELL_ONTOLOGY_COLUMN, read_lines(label_file)?);
    }

    let data = AnnMatrix::new(
        DataMatrix::Backed(Arc::new(backed)),
        obs,
        genome.ensembl_ids().to_vec(),
    )?
    .with_mapped_features(genome.id());

    let weights = WeightsStore::new(
        Path::new(&args.model_dir),
        Path::new(&args.cache),
        &args.model_id,
        args.weights_md5.as_deref(),
    );

    Ok((data, genome, weights))
}

fn train_settings(args: &TrainArgs) -> TrainSettings {
    let mut config = TrainConfig::default();
    config.learning_rate = args.learning_rate;
    config.max_epochs = args.max_epochs;
    config.batch_size = args.batch_size;
    config.patience = args.patience;
    config.verbose = args.verbose;

    TrainSettings {
        optimizer: args.optimizer.clone(),
        test_split: TestSplit::Fraction(args.test_fraction),
        validation_fraction: args.validation_fraction,
        seed: args.seed,
        config,
    }
}

fn fit_embedding(args: &FitEmbeddingArgs) -> anyhow::Result<()> {
    let (data, genome, weights) = load_inputs(&args.data)?;
    let model_kind = args.model_type;
    let settings = train_settings(&args.train);

    let mut est = EstimatorEmbedding::new(data, genome, model_kind, weights, true)?;

    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(
        &varmap,
        candle_core::DType::F32,
        &settings.config.device,
    );

    let n_genes = est.base.genome.num_genes();
    let encoder = LinearEncoder::new(n_genes, args.n_latent, model_kind.is_variational(), vb.clone())?;
    let decoder = LinearDecoder::new(n_genes, args.n_latent, vb)?;

    info!("input: {} -> encoder -> decoder", n_genes);

    let history = est.train(&encoder, &decoder, &varmap, &gaussian_likelihood, &settings)?;

    est.base.weights.save_weights(&varmap)?;
    write_train_records(&est.base, &history, &args.data)?;
    Ok(())
}

fn fit_celltype(args: &FitCelltypeArgs) -> anyhow::Result<()> {
    let (data, genome, weights) = load_inputs(&args.data)?;
    let universe = CellTypeUniverse::new(read_lines(&args.celltypes)?, vec![]);
    let settings = train_settings(&args.train);

    let mut est = EstimatorCelltype::new(data, genome, universe, weights, true)?;

    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(
        &varmap,
        candle_core::DType::F32,
        &settings.config.device,
    );

    let n_genes = est.base.genome.num_genes();
    let n_types = est.universe.num_output_classes();
    let classifier = LinearClassifier::new(n_genes, n_types, vb)?;

    info!("input: {} -> classifier -> {} types", n_genes, n_types);

    let history = est.train(&classifier, &varmap, &settings)?;

    est.base.weights.save_weights(&varmap)?;
    write_train_records(&est.base, &history, &args.data)?;
    Ok(())
}

fn evaluate(args: &EvaluateArgs) -> anyhow::Result<()> {
    let (data, genome, weights) = load_inputs(&args.data)?;
    let universe = CellTypeUniverse::new(read_lines(&args.celltypes)?, vec![]);

    let est = EstimatorCelltype::new(data, genome, universe, weights, false)?;

    let mut varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &candle_core::Device::Cpu);

    let n_genes = est.base.genome.num_genes();
    let n_types = est.universe.num_output_classes();
    let classifier = LinearClassifier::new(n_genes, n_types, vb)?;

    est.base.weights.load_pretrained_weights(&mut varmap)?;

    let metrics = est.evaluate(&classifier, !args.unweighted)?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn predict(args: &PredictArgs) -> anyhow::Result<()> {
    let (data, genome, weights) = load_inputs(&args.data)?;
    let model_kind = args.model_type;

    let est = EstimatorEmbedding::new(data, genome, model_kind, weights, false)?;

    let mut varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &candle_core::Device::Cpu);

    let n_genes = est.base.genome.num_genes();
    let encoder = LinearEncoder::new(n_genes, args.n_latent, model_kind.is_variational(), vb)?;

    est.base.weights.load_pretrained_weights(&mut varmap)?;

    let z_nk = est.predict_embedding(&encoder)?;
    write_tsv(&z_nk, &args.out)?;
    info!("wrote {} x {} embedding to {}", z_nk.nrows(), z_nk.ncols(), args.out);
    Ok(())
}

fn write_train_records(
    base: &lupin::estimator::EstimatorBase,
    history: &candle_atlas::inference::TrainHistory,
    data_args: &DataArgs,
) -> anyhow::Result<()> {
    let record = serde_json::json!({
        "train_loss": history.train_loss,
        "val_loss": history.val_loss,
        "learning_rates": history.learning_rates,
    });
    let history_file =
        Path::new(&data_args.model_dir).join(format!("{}_history.json", data_args.model_id));
    std::fs::write(&history_file, serde_json::to_string_pretty(&record)?)?;

    if let Some(hyperparam) = &base.train_hyperparam {
        let hyper_file = Path::new(&data_args.model_dir)
            .join(format!("{}_hyperparams.json", data_args.model_id));
        std::fs::write(&hyper_file, serde_json::to_string_pretty(hyperparam)?)?;
    }
    Ok(())
}

fn write_tsv(x: &Array2<f32>, out_file: &str) -> anyhow::Result<()> {
    let mut buf = std::io::BufWriter::new(std::fs::File::create(out_file)?);
    for i in 0..x.nrows() {
        let line = x
            .row(i)
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(buf, "{}", line)?;
    }
    Ok(())
}
