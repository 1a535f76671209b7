/// Result type for generation pipeline operations
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Error types raised anywhere between request intake and output persistence
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    /// Input video or image cannot be opened, probed or decoded
    #[error("Read error: {0}")]
    Read(String),

    /// The generation backend failed (including a panic inside it)
    #[error("Generation failed: {0}")]
    Capability(String),

    /// Output directory or file cannot be created or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GenerationError {
    pub fn read(context: impl std::fmt::Display) -> Self {
        Self::Read(context.to_string())
    }

    pub fn invalid(context: impl std::fmt::Display) -> Self {
        Self::InvalidRequest(context.to_string())
    }

    /// Convert a backend error, keeping its whole context chain
    pub fn capability(err: &anyhow::Error) -> Self {
        Self::Capability(format!("{:#}", err))
    }
}
