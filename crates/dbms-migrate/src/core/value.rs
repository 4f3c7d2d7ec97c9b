//! Row values and batches moved from source to destination.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint carried by NULLs so writers can still pick a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// A single SQL value.
///
/// Text and binary payloads use `Cow` so a reader can hand out borrowed data;
/// batches crossing a channel hold `SqlValue<'static>`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Detach from any borrowed buffer.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Approximate in-memory footprint of the value in bytes.
    ///
    /// Every value occupies a full enum slot; text and binary add their
    /// heap payload. Used by the size governor.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        let heap = match self {
            SqlValue::Text(s) => s.len(),
            SqlValue::Bytes(b) => b.len(),
            _ => 0,
        };
        (std::mem::size_of::<SqlValue<'static>>() + heap) as u64
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl From<&str> for SqlValue<'static> {
    fn from(v: &str) -> Self {
        SqlValue::Text(Cow::Owned(v.to_string()))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

/// One owned row.
pub type Row = Vec<SqlValue<'static>>;

/// How a batch lands at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Empty (or create) the destination table, then insert.
    Replace,
    /// Insert only.
    Append,
}

/// An ordered run of rows from one table.
///
/// `sequence_index` is the chunk number assigned by the reader; `sub_index`
/// is the position inside a size-governor split (0 when the batch was not
/// split). Only the batch at `(0, 0)` is written with [`WriteMode::Replace`].
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub sequence_index: usize,
    pub sub_index: usize,
}

impl Batch {
    pub fn new(sequence_index: usize, rows: Vec<Row>) -> Self {
        Self {
            rows,
            sequence_index,
            sub_index: 0,
        }
    }

    /// Write mode implied by the batch's position in the table's stream.
    pub fn write_mode(&self) -> WriteMode {
        if self.sequence_index == 0 && self.sub_index == 0 {
            WriteMode::Replace
        } else {
            WriteMode::Append
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_owned() {
        let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
        let owned: SqlValue<'static> = borrowed.into_owned();
        assert_eq!(owned, SqlValue::Text(Cow::Owned("hello".to_string())));
    }

    #[test]
    fn test_only_first_batch_replaces() {
        assert_eq!(Batch::new(0, vec![]).write_mode(), WriteMode::Replace);
        assert_eq!(Batch::new(1, vec![]).write_mode(), WriteMode::Append);

        let mut split = Batch::new(0, vec![]);
        split.sub_index = 1;
        assert_eq!(split.write_mode(), WriteMode::Append);
    }

    #[test]
    fn test_estimated_size() {
        let slot = std::mem::size_of::<SqlValue<'static>>() as u64;
        assert_eq!(SqlValue::from("abcd").estimated_size(), slot + 4);
        assert_eq!(SqlValue::from(vec![0u8; 10]).estimated_size(), slot + 10);
        assert_eq!(SqlValue::I64(1).estimated_size(), slot);
        assert_eq!(SqlValue::Null(SqlNullType::String).estimated_size(), slot);
        // A value never costs less than the widest variant's payload
        assert!(slot >= 24);
    }
}
