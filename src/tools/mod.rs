mod context;
mod create_document;
mod error;
mod request_suggestions;
mod update_document;
mod weather;

pub use context::ToolContext;
pub use create_document::CreateDocument;
pub use error::ToolError;
pub use request_suggestions::RequestSuggestions;
pub use update_document::UpdateDocument;
pub use weather::Weather;
