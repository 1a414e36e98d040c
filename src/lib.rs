pub mod artifacts;
pub mod commands;
pub mod config;
pub mod db;
pub mod encoder;
pub mod error;
pub mod gbdt;
pub mod ingest;
pub mod interface;
pub mod models;
pub mod preprocessing;
pub mod queries;
pub mod schema;
pub mod state;
pub mod store;
pub mod training;
