use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Truncated batch payload at offset {0}")]
    TruncatedBatch(usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
