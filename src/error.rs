//! Error types for the recommendation stage.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::SongId;

#[derive(Error, Debug)]
pub enum RecommendError {
    #[error("Failed to read final table {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Final table contains no songs")]
    EmptyTable,

    #[error("Final table is malformed at line {line}: {reason}")]
    MalformedTable { line: u64, reason: String },

    #[error("Invalid track id '{0}': expected a positive integer")]
    InvalidTrackId(String),

    #[error("Track id {0} not found in final table")]
    TrackNotFound(SongId),
}

impl RecommendError {
    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        RecommendError::MalformedTable {
            line,
            reason: reason.into(),
        }
    }
}
