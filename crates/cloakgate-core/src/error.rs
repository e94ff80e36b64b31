use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<String> for CoreError {
    fn from(message: String) -> Self {
        CoreError::Config(message)
    }
}
