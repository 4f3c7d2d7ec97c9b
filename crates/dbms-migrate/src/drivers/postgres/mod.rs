//! PostgreSQL destination driver.

mod writer;

pub use writer::PostgresTarget;
