pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod gasbank;
pub mod oracle;
pub mod resolver;
pub mod store;
