pub mod chat;
pub mod init;
pub mod render;
