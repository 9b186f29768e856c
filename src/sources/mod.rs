mod base;
pub mod feed;
pub mod reddit;

pub use base::{ChannelPost, ChannelPostMedia, Submission, SubmissionSource};

use thiserror::Error;

/// Errors talking to a post source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("source API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("submission {id} has no `{field}`")]
    MissingField { id: String, field: &'static str },

    #[error("failed to connect after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: Box<SourceError>,
    },
}
