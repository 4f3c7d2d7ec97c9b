//! Microsoft SQL Server source driver.

mod reader;

pub use reader::MssqlSource;
