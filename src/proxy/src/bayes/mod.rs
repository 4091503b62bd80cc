pub mod cache;
pub mod evaluator;
pub mod hugin;
pub mod join_tree;
pub mod network;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BayesError {
    #[error("unable to read network file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("syntax error in Hugin file: {0}")]
    Hugin(String),
    #[error("network {file} has {found} nodes, expected {expected}")]
    WrongNodeCount {
        file: String,
        found: usize,
        expected: usize,
    },
    #[error("malformed network: {0}")]
    BadNetwork(String),
    #[error("inference failed: {0}")]
    Inference(String),
}
