//! Database drivers implementing the core traits.
//!
//! - [`mssql`]: SQL Server source ([`Catalog`](crate::core::Catalog) + [`SourceReader`](crate::core::SourceReader))
//! - [`postgres`]: PostgreSQL destination ([`Catalog`](crate::core::Catalog) + [`TargetWriter`](crate::core::TargetWriter))
//! - [`common`]: TLS settings

pub mod common;
pub mod mssql;
pub mod postgres;

pub use common::SslMode;
pub use mssql::MssqlSource;
pub use postgres::PostgresTarget;
