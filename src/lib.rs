pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod gemini;
pub mod ingest;
pub mod models;
pub mod ollama;
pub mod retrieval;
pub mod server;
pub mod uploads;
pub mod vector_store;

pub use config::AppConfig;
pub use server::run_server;
