use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Weather operation failed: {0}")]
    WeatherFailed(String),
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    #[error("Document operation failed: {0}")]
    DocumentFailed(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}
