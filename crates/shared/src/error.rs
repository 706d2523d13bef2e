use thiserror::Error;

use crate::sources::SourceMode;

/// A run that ended without publishing anything.
///
/// Nothing is written and the seen cache is left untouched when a run
/// returns one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("No candidate stories available in {0} mode")]
    NoCandidates(SourceMode),

    #[error("No stories left to publish after filtering")]
    NothingToPublish,
}

/// Failures of the candidate producers.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Curated dataset not found: {0}")]
    Missing(std::path::PathBuf),

    #[error("Failed to parse curated dataset {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed error: {0}")]
    Feed(#[from] rss::Error),
}
