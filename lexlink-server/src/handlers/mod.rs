pub mod conversation;
pub mod streaming;
