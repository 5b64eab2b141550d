use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    Closed,
    #[error("truncated frame: {0}")]
    Truncated(String),
    #[error("frame exceeds receive limit of {limit} bytes")]
    TooLarge { limit: usize },
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream can still be read after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::Malformed(_) | FrameError::Truncated(_) | FrameError::TooLarge { .. }
        )
    }
}
