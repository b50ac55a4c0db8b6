pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod notion;
pub mod pipeline;
pub mod queue;
pub mod summarize;
pub mod transcribe;
pub mod worker;
