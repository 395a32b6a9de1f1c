pub mod chat;
pub mod extraction;
