pub mod common; // shared aliases and re-exports
pub mod data_stream; // streaming data set builder
pub mod error;
pub mod estimator; // embedding and cell type estimators
pub mod feature_remap; // input feature space -> reference genome
pub mod labels; // one-hot targets and class weights
pub mod partition; // train/eval/test splits
pub mod size_factor; // log library size normalization
pub mod weights; // weights persistence and cache
