pub mod login;
pub mod sensitive;
pub mod whitelist;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid sensitive-name pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("exactly one of the regex and substring forms may be set")]
    ConflictingMatchers,
    #[error("unable to read whitelist file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
