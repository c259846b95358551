pub mod conversations;
pub mod documents;
pub mod messages;
pub mod suggestions;
