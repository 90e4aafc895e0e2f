//! Bulk conversation simulation engine
//!
//! Groups CSV rows into conversations, replays each conversation's turns in
//! order against a conversational agent under a concurrency ceiling, and
//! tracks every run as a job in a live mirror backed by SQLite.

pub mod api;
pub mod app_state;
pub mod config;
pub mod csv_input;
pub mod db;
pub mod error;
pub mod executor;
pub mod grouper;
pub mod job_store;
pub mod limiter;
pub mod orchestrator;

pub use error::SimulationError;
