use crate::error::EstimatorError;
use cell_beans::ann_matrix::ObsTable;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

///
/// How the held-out test set is chosen: a seeded uniform fraction of
/// all observations, or every observation whose metadata matches all
/// of the given predicates (AND across fields, OR within a field's
/// accepted values).
///
#[derive(Debug, Clone)]
pub enum TestSplit {
    Fraction(f64),
    HeldOut(Vec<(Box<str>, Vec<Box<str>>)>),
}

///
/// Three disjoint index sets over the observation dimension, fixed
/// for the lifetime of one training call.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
    pub test: Vec<usize>,
}

///
/// Split `num_obs` observations into train/eval/test index sets.
///
/// The RNG is reseeded from `seed` before the test draw and again
/// before the eval draw, so the train/eval split of a fixed test set
/// is reproducible across restarts, and so is the fractional test
/// draw itself.
///
/// * `obs` - observation metadata (predicate-based test selection)
/// * `num_obs` - total number of observations
/// * `test_split` - fraction in [0, 1] or metadata predicates
/// * `validation_fraction` - fraction of the remainder held for eval
/// * `seed` - split seed
///
pub fn split_observations(
    obs: &ObsTable,
    num_obs: usize,
    test_split: &TestSplit,
    validation_fraction: f64,
    seed: u64,
) -> anyhow::Result<Partition> {
    let test = match test_split {
        TestSplit::Fraction(fraction) => {
            let size = (num_obs as f64 * fraction).round() as usize;
            let mut rng = StdRng::seed_from_u64(seed);
            sample_without_replacement(&mut rng, num_obs, size)
        }
        TestSplit::HeldOut(predicates) => {
            let mut in_test = vec![true; num_obs];
            for (field, accepted) in predicates.iter() {
                let values = obs.column(field)?;
                for (i, value) in values.iter().enumerate() {
                    in_test[i] = in_test[i] && accepted.contains(value);
                }
            }
            let test: Vec<usize> = (0..num_obs).filter(|&i| in_test[i]).collect();
            info!(
                "found {} out of {} cells that correspond to held out data set",
                test.len(),
                num_obs
            );
            test
        }
    };

    let mut in_test = vec![false; num_obs];
    for &i in test.iter() {
        in_test[i] = true;
    }
    let remaining: Vec<usize> = (0..num_obs).filter(|&i| !in_test[i]).collect();

    let eval_size = (remaining.len() as f64 * validation_fraction).round() as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let eval_pos = sample_without_replacement(&mut rng, remaining.len(), eval_size);

    let mut in_eval = vec![false; remaining.len()];
    for &k in eval_pos.iter() {
        in_eval[k] = true;
    }

    let eval: Vec<usize> = eval_pos.iter().map(|&k| remaining[k]).collect();
    let train: Vec<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(k, _)| !in_eval[*k])
        .map(|(_, &i)| i)
        .collect();

    if test.is_empty() {
        warn!("test partition is empty");
    }
    if eval.is_empty() {
        return Err(EstimatorError::EmptyPartition("eval").into());
    }
    if train.is_empty() {
        return Err(EstimatorError::EmptyPartition("train").into());
    }

    Ok(Partition { train, eval, test })
}

/// Seeded uniform sample of `amount` indices from `[0, length)`,
/// returned in ascending order
fn sample_without_replacement(rng: &mut StdRng, length: usize, amount: usize) -> Vec<usize> {
    let amount = amount.min(length);
    let mut picked = rand::seq::index::sample(rng, length, amount).into_vec();
    picked.sort_unstable();
    picked
}
