//! Sink implementations

pub mod memory;
pub mod postgres;

pub use memory::MemorySink;
pub use postgres::{is_unique_violation, PgRunRecorder, PgTemperatureSink, RunRecord};
