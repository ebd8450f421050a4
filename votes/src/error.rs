use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("vote value serialization failed: {0}")]
    Serialization(String),

    #[error("confirm threshold must be positive")]
    ZeroThreshold,
}

impl From<bincode::Error> for VoteError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
