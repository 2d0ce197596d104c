pub mod archive;
pub mod chat_stream;
pub mod config;
pub mod keyring;
pub mod message;
pub mod profile;
pub mod session;
pub mod tokenizer;
pub mod window;
