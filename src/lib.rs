// Library exports for the mailstats crate
// This allows tests and the binary to use the modules

pub mod config;
pub mod database;
pub mod error;
pub mod gmail_client;
pub mod pipeline;
pub mod report;
pub mod server;

// Sampling, fetching and aggregation core
pub mod stats;
