use cell_beans::ann_matrix::ObsTable;
use lupin::error::EstimatorError;
use lupin::partition::{split_observations, TestSplit};
use std::collections::HashSet;

fn boxed(words: &[&str]) -> Vec<Box<str>> {
    words.iter().map(|x| (*x).into()).collect()
}

#[test]
fn partitions_are_disjoint_and_covering() -> anyhow::Result<()> {
    let obs = ObsTable::new();
    let num_obs = 100;

    let partition = split_observations(&obs, num_obs, &TestSplit::Fraction(0.2), 0.1, 42)?;

    let train: HashSet<usize> = partition.train.iter().copied().collect();
    let eval: HashSet<usize> = partition.eval.iter().copied().collect();
    let test: HashSet<usize> = partition.test.iter().copied().collect();

    assert!(train.is_disjoint(&eval));
    assert!(train.is_disjoint(&test));
    assert!(eval.is_disjoint(&test));

    let mut all: Vec<usize> = train.union(&eval).copied().collect();
    all.extend(test.iter().copied());
    all.sort_unstable();
    assert_eq!(all, (0..num_obs).collect::<Vec<_>>());

    assert_eq!(test.len(), 20);
    assert_eq!(eval.len(), 8); // round(80 * 0.1)
    Ok(())
}

#[test]
fn same_seed_same_partition() -> anyhow::Result<()> {
    let obs = ObsTable::new();

    let a = split_observations(&obs, 57, &TestSplit::Fraction(0.3), 0.2, 7)?;
    let b = split_observations(&obs, 57, &TestSplit::Fraction(0.3), 0.2, 7)?;
    assert_eq!(a, b);

    let c = split_observations(&obs, 57, &TestSplit::Fraction(0.3), 0.2, 8)?;
    assert!(a != c);
    Ok(())
}

#[test]
fn predicate_split_selects_matching_observations() -> anyhow::Result<()> {
    let mut obs = ObsTable::new();
    obs.insert(
        "protocol",
        boxed(&["10x", "smartseq2", "10x", "10x", "smartseq2", "10x"]),
    );
    obs.insert(
        "organ",
        boxed(&["lung", "lung", "colon", "lung", "colon", "colon"]),
    );

    // AND across fields, OR within a field's accepted values
    let held_out = TestSplit::HeldOut(vec![
        ("protocol".into(), boxed(&["10x"])),
        ("organ".into(), boxed(&["lung"])),
    ]);

    let partition = split_observations(&obs, 6, &held_out, 0.5, 1)?;
    assert_eq!(partition.test, vec![0, 3]);
    Ok(())
}

#[test]
fn empty_eval_partition_is_fatal() {
    let obs = ObsTable::new();

    // one observation left after the (empty) test draw; a zero
    // validation fraction leaves nothing for eval
    let err = split_observations(&obs, 1, &TestSplit::Fraction(0.), 0., 1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::EmptyPartition("eval"))
    ));
}

#[test]
fn empty_test_partition_only_warns() -> anyhow::Result<()> {
    let obs = ObsTable::new();

    let partition = split_observations(&obs, 10, &TestSplit::Fraction(0.), 0.2, 1)?;
    assert!(partition.test.is_empty());
    assert_eq!(partition.train.len() + partition.eval.len(), 10);
    Ok(())
}

#[test]
fn empty_train_partition_is_fatal() {
    let obs = ObsTable::new();

    let err = split_observations(&obs, 2, &TestSplit::Fraction(0.), 1., 1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EstimatorError>(),
        Some(EstimatorError::EmptyPartition("train"))
    ));
}
