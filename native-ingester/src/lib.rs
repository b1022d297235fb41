pub mod checks;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod producer;
pub mod writer;
