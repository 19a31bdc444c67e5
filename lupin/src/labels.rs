use crate::error::EstimatorError;
use cell_beans::ontology::CellTypeUniverse;
use ndarray::Array2;

/// Ceiling on per-observation class weights
pub const MAX_CLASS_WEIGHT: f32 = 1e3;

///
/// Encoded cell type targets for one visible observation set: a
/// one-hot (or fractional multi-hot) matrix and per-observation
/// weights, rows aligned with the label slice they were built from.
///
#[derive(Debug, Clone)]
pub struct LabelEncoding {
    pub onehot: Array2<f32>,
    pub weights: Vec<f32>,
}

impl LabelEncoding {
    pub fn num_obs(&self) -> usize {
        self.onehot.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.onehot.ncols()
    }
}

///
/// Build one-hot targets and class weights.
///
/// A label that is a leaf class gets a single 1 at its column. A
/// label known only to an ontology grouping gets a 1 at every
/// matching leaf column; such multi-hot rows are deliberately NOT
/// renormalized (total mass k for k matching leaves), and the weight
/// computation divides by the row mass consistently. A label known to
/// neither fails.
///
/// The weight of observation i is `1 / (y_i . freq)` where `freq` is
/// the column-wise mean of the row-normalized target matrix, capped
/// at `max_class_weight`.
///
/// * `labels` - one label per visible observation
/// * `universe` - leaf classes + ontology groupings
/// * `max_class_weight` - weight ceiling, e.g. `MAX_CLASS_WEIGHT`
///
pub fn encode_labels(
    labels: &[Box<str>],
    universe: &CellTypeUniverse,
    max_class_weight: f32,
) -> anyhow::Result<LabelEncoding> {
    let num_obs = labels.len();
    let type_classes = universe.num_output_classes();

    let mut y = Array2::<f32>::zeros((num_obs, type_classes));

    for (i, label) in labels.iter().enumerate() {
        if let Some(pos) = universe.leaf_position(label) {
            y[(i, pos)] = 1.;
        } else if let Some(positions) = universe.ontology_positions(label) {
            // distribute mass uniformly across matching leaf classes
            for pos in positions {
                y[(i, pos)] = 1.;
            }
        } else {
            return Err(EstimatorError::UnknownLabel(label.to_string()).into());
        }
    }

    // column-wise mean of row-normalized targets
    let mut freq = vec![0_f32; type_classes];
    for i in 0..num_obs {
        let row_mass: f32 = y.row(i).sum();
        if row_mass > 0. {
            for j in 0..type_classes {
                freq[j] += y[(i, j)] / row_mass;
            }
        }
    }
    for f in freq.iter_mut() {
        *f /= num_obs.max(1) as f32;
    }

    let weights = (0..num_obs)
        .map(|i| {
            let implied: f32 = (0..type_classes).map(|j| y[(i, j)] * freq[j]).sum();
            if implied > 0. {
                (1. / implied).min(max_class_weight)
            } else {
                max_class_weight
            }
        })
        .collect();

    Ok(LabelEncoding { onehot: y, weights })
}

///
/// Map each distinct observed label to a dense integer id, in sorted
/// label order.
///
pub fn class_dictionary(labels: &[Box<str>]) -> Vec<(Box<str>, usize)> {
    let mut distinct: Vec<Box<str>> = labels.to_vec();
    distinct.sort();
    distinct.dedup();
    distinct
        .into_iter()
        .enumerate()
        .map(|(id, label)| (label, id))
        .collect()
}
