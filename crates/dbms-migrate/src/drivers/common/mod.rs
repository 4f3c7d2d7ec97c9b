//! Pieces shared by the database drivers.

pub mod tls;

pub use tls::SslMode;
