use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskmateError>;

#[derive(Debug, Error)]
pub enum TaskmateError {
    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
