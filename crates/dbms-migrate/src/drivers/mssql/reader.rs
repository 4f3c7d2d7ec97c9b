//! MSSQL source: catalog queries and streaming table reads.
//!
//! Uses Tiberius with a bb8 connection pool. A table is read with a single
//! streaming query and sliced into batches on the fly, so rows keep the
//! order the server returns them in.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::xml::XmlData;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::{
    Batch, BatchStream, Catalog, Chunker, Column, DatabaseHandle, Dialect, ReadOptions,
    SourceReader, SqlNullType, SqlValue, TableDescriptor,
};
use crate::error::{MigrateError, Result};

const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Batches buffered between the reading task and the consumer.
const READ_CHANNEL_CAPACITY: usize = 4;

type MssqlClient = Client<Compat<TcpStream>>;

/// bb8 connection manager for Tiberius clients.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source database.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
    handle: DatabaseHandle,
}

impl MssqlSource {
    /// Open a pool of up to `max_size` connections and check one out once.
    pub async fn connect(config: &SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager {
            config: config.clone(),
        };
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MSSQL connection pool"))?;

        let source = Self {
            pool,
            handle: DatabaseHandle::new(
                Dialect::Mssql,
                &config.host,
                config.port,
                &config.database,
                &config.schema,
            ),
        };
        source.test_connection().await?;

        info!("Connected to MSSQL: {} (pool_size={})", source.handle, max_size);
        Ok(source)
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL connection from pool"))
    }

    /// Round-trip a trivial query.
    pub async fn test_connection(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    /// Read a spatial column as Well-Known Text.
    ///
    /// Bulk copies move spatial columns as opaque bytes; this is the
    /// one-column read an operator uses to convert them afterwards.
    pub async fn read_column_wkt(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<Option<String>>> {
        let qualified = format!("{}.{}", schema, table);
        let sql = build_wkt_select(schema, table, column)?;

        let mut client = self.get_client().await?;
        let rows = client
            .simple_query(sql)
            .await
            .map_err(|e| MigrateError::read(&qualified, e))?
            .into_first_result()
            .await
            .map_err(|e| MigrateError::read(&qualified, e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<&str, _>(0)
                    .map(|v| v.map(str::to_string))
                    .map_err(|e| MigrateError::read(&qualified, e))
            })
            .collect()
    }
}

#[async_trait]
impl Catalog for MssqlSource {
    fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let query = r#"
            SELECT s.name, t.name, CAST(t.is_filetable AS INT)
            FROM sys.tables t
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE s.name = @P1 AND t.is_ms_shipped = 0
            ORDER BY t.name
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        let rows = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("listing MSSQL tables", e))?
            .into_first_result()
            .await
            .map_err(|e| MigrateError::catalog("listing MSSQL tables", e))?;

        let tables: Vec<TableDescriptor> = rows
            .iter()
            .map(|row| {
                let mut table = TableDescriptor::named(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                );
                table.is_file_table = row.get::<i32, _>(2).unwrap_or(0) == 1;
                table
            })
            .collect();

        info!("Found {} tables in MSSQL schema '{}'", tables.len(), schema);
        Ok(tables)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let query = r#"
            SELECT CAST(COUNT(*) AS INT)
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 AND TABLE_TYPE = 'BASE TABLE'
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        q.bind(table);
        let row = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("checking MSSQL table", e))?
            .into_row()
            .await
            .map_err(|e| MigrateError::catalog("checking MSSQL table", e))?;

        Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0) > 0)
    }

    /// Approximate count from `sys.partitions`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let query = r#"
            SELECT CAST(ISNULL(SUM(p.rows), 0) AS BIGINT)
            FROM sys.partitions p
            JOIN sys.tables t ON p.object_id = t.object_id
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE s.name = @P1 AND t.name = @P2 AND p.index_id IN (0, 1)
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        q.bind(table);
        let row = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("counting MSSQL rows", e))?
            .into_row()
            .await
            .map_err(|e| MigrateError::catalog("counting MSSQL rows", e))?;

        let count = row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0);
        debug!("Row count for {}.{}: {}", schema, table, count);
        Ok(count)
    }

    async fn primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        q.bind(table);
        let rows = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("loading MSSQL primary key", e))?
            .into_first_result()
            .await
            .map_err(|e| MigrateError::catalog("loading MSSQL primary key", e))?;

        Ok(rows
            .iter()
            .map(|row| row.get::<&str, _>(0).unwrap_or_default().to_string())
            .collect())
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let query = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
                CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT),
                CAST(ISNULL(NUMERIC_SCALE, 0) AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        q.bind(table);
        let rows = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("loading MSSQL columns", e))?
            .into_first_result()
            .await
            .map_err(|e| MigrateError::catalog("loading MSSQL columns", e))?;

        let columns: Vec<Column> = rows
            .iter()
            .map(|row| {
                Column::new(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                    row.get::<i32, _>(5).unwrap_or(0) == 1,
                )
                .with_max_length(row.get::<i32, _>(2).unwrap_or(0))
                .with_precision(
                    row.get::<i32, _>(3).unwrap_or(0),
                    row.get::<i32, _>(4).unwrap_or(0),
                )
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let mut descriptor = TableDescriptor::named(schema, table);
        descriptor.columns = self.columns(schema, table).await?;
        descriptor.primary_key = self.primary_keys(schema, table).await?;
        descriptor.row_count = self.row_count(schema, table).await?;
        descriptor.is_file_table = self.is_file_table(schema, table).await?;
        Ok(descriptor)
    }
}

impl MssqlSource {
    async fn is_file_table(&self, schema: &str, table: &str) -> Result<bool> {
        let query = r#"
            SELECT CAST(t.is_filetable AS INT)
            FROM sys.tables t
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE s.name = @P1 AND t.name = @P2
        "#;

        let mut client = self.get_client().await?;
        let mut q = Query::new(query);
        q.bind(schema);
        q.bind(table);
        let row = q
            .query(&mut client)
            .await
            .map_err(|e| MigrateError::catalog("checking MSSQL file table", e))?
            .into_row()
            .await
            .map_err(|e| MigrateError::catalog("checking MSSQL file table", e))?;

        Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0) == 1)
    }
}

impl SourceReader for MssqlSource {
    fn read_table(&self, opts: ReadOptions) -> BatchStream {
        let pool = self.pool.clone();

        BatchStream::spawn(opts.full_name(), READ_CHANNEL_CAPACITY, |tx| async move {
            if let Err(e) = read_table_internal(pool, opts, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        })
    }
}

/// Build the streaming SELECT for a table.
fn build_select(opts: &ReadOptions) -> Result<String> {
    let mut sql = format!(
        "SELECT {} FROM {}",
        opts.select_exprs.join(", "),
        qualify_mssql(&opts.schema, &opts.table)?
    );

    if !opts.order_by.is_empty() {
        let cols = opts
            .order_by
            .iter()
            .map(|c| quote_mssql(c))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&cols.join(", "));
    }

    Ok(sql)
}

/// Build the single-column WKT read for a spatial column.
fn build_wkt_select(schema: &str, table: &str, column: &str) -> Result<String> {
    Ok(format!(
        "SELECT {}.STAsText() FROM {}",
        quote_mssql(column)?,
        qualify_mssql(schema, table)?
    ))
}

/// Stream one table into the channel, one batch per chunk.
async fn read_table_internal(
    pool: Pool<TiberiusConnectionManager>,
    opts: ReadOptions,
    tx: mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let table = opts.full_name();
    let sql = build_select(&opts)?;

    let mut client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, format!("getting connection to read {}", table)))?;

    debug!("Reading {}: {}", table, sql);

    let mut stream = client
        .simple_query(sql)
        .await
        .map_err(|e| MigrateError::read(&table, e))?
        .into_row_stream();

    let mut chunker = Chunker::new(opts.chunk_plan);

    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|e| MigrateError::read(&table, e))?
    {
        if row.len() != opts.col_types.len() {
            return Err(MigrateError::read(
                &table,
                format!("expected {} columns, got {}", opts.col_types.len(), row.len()),
            ));
        }

        let values = row
            .cells()
            .zip(&opts.col_types)
            .map(|((_, data), data_type)| convert_value(data, data_type))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::read(&table, e))?;

        if let Some(batch) = chunker.push(values) {
            if tx.send(Ok(batch)).await.is_err() {
                // Consumer went away
                return Ok(());
            }
        }
    }

    if let Some(batch) = chunker.finish() {
        let _ = tx.send(Ok(batch)).await;
    }

    Ok(())
}

/// Decode one cell according to the type its select expression produces.
fn convert_value(
    data: &ColumnData<'static>,
    data_type: &str,
) -> std::result::Result<SqlValue<'static>, tiberius::error::Error> {
    let value = match data_type.to_lowercase().as_str() {
        "bit" => bool::from_sql(data)?
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "tinyint" => u8::from_sql(data)?
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "smallint" => i16::from_sql(data)?
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "int" => i32::from_sql(data)?
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "bigint" => i64::from_sql(data)?
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "real" => f32::from_sql(data)?
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        "float" => f64::from_sql(data)?
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "uniqueidentifier" => Uuid::from_sql(data)?
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        "datetime" | "datetime2" | "smalldatetime" => NaiveDateTime::from_sql(data)?
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        "datetimeoffset" => DateTime::<FixedOffset>::from_sql(data)?
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
        "date" => NaiveDate::from_sql(data)?
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "time" => NaiveTime::from_sql(data)?
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => <&[u8]>::from_sql(data)?
            .map(|v| SqlValue::Bytes(Cow::Owned(v.to_vec())))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        // Read as Numeric: tiberius' own Decimal conversion panics past 96 bits
        "decimal" | "numeric" => Numeric::from_sql(data)?
            .map(numeric_value)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        // The TDS decoder hands money out as f64
        "money" | "smallmoney" => f64::from_sql(data)?
            .map(money_value)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        "xml" => <&XmlData>::from_sql(data)?
            .map(|x| SqlValue::Text(Cow::Owned(x.to_string())))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        _ => <&str>::from_sql(data)?
            .map(|s| SqlValue::Text(Cow::Owned(s.to_string())))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    };
    Ok(value)
}

/// A `decimal(38, s)` can exceed what `Decimal` holds; those stay textual.
fn numeric_value(n: Numeric) -> SqlValue<'static> {
    match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
        Ok(d) => SqlValue::Decimal(d),
        Err(_) => SqlValue::Text(Cow::Owned(numeric_text(n.value(), n.scale()))),
    }
}

/// Plain decimal notation for a scaled integer.
fn numeric_text(value: i128, scale: u8) -> String {
    let scale = usize::from(scale);
    let digits = value.unsigned_abs().to_string();
    let mut text = if digits.len() > scale {
        digits
    } else {
        format!("{:0>width$}", digits, width = scale + 1)
    };
    if scale > 0 {
        text.insert(text.len() - scale, '.');
    }
    if value < 0 {
        text.insert(0, '-');
    }
    text
}

fn money_value(f: f64) -> SqlValue<'static> {
    match Decimal::try_from(f) {
        Ok(d) => SqlValue::Decimal(d.round_dp(4)),
        Err(_) => SqlValue::F64(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::AdaptationPlan;
    use crate::core::ChunkPlan;

    fn options(order_by: Vec<String>) -> ReadOptions {
        let mut table = TableDescriptor::named("dbo", "org");
        table.columns = vec![
            Column::new("id", "int", false),
            Column::new("node", "hierarchyid", true),
        ];
        let plan = AdaptationPlan::for_table(&table).unwrap();
        let mut opts = ReadOptions::new(&table, &plan, ChunkPlan::Single);
        opts.order_by = order_by;
        opts
    }

    #[test]
    fn test_build_select_uses_adapted_expressions() {
        let sql = build_select(&options(vec![])).unwrap();
        assert_eq!(
            sql,
            "SELECT [id], [node].ToString() AS [node] FROM [dbo].[org]"
        );
    }

    #[test]
    fn test_build_select_with_order_by() {
        let sql = build_select(&options(vec!["id".into()])).unwrap();
        assert!(sql.ends_with(" ORDER BY [id]"));
    }

    #[test]
    fn test_build_wkt_select() {
        let sql = build_wkt_select("geo", "parcels", "shape").unwrap();
        assert_eq!(sql, "SELECT [shape].STAsText() FROM [geo].[parcels]");

        let sql = build_wkt_select("dbo", "odd]name", "Shape").unwrap();
        assert_eq!(sql, "SELECT [Shape].STAsText() FROM [dbo].[odd]]name]");
    }

    #[test]
    fn test_money_arrives_as_float() {
        let value = convert_value(&ColumnData::F64(Some(12.5)), "money").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::new(125, 1)));

        let value = convert_value(&ColumnData::F64(Some(-0.0001)), "smallmoney").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::new(-1, 4)));

        let value = convert_value(&ColumnData::F64(None), "money").unwrap();
        assert_eq!(value, SqlValue::Null(SqlNullType::Decimal));
    }

    #[test]
    fn test_xml_is_read_as_text() {
        let data = ColumnData::Xml(Some(Cow::Owned(XmlData::new("<order id=\"7\"/>"))));
        let value = convert_value(&data, "xml").unwrap();
        assert_eq!(value, SqlValue::from("<order id=\"7\"/>"));

        let value = convert_value(&ColumnData::Xml(None), "xml").unwrap();
        assert_eq!(value, SqlValue::Null(SqlNullType::String));
    }

    #[test]
    fn test_numeric_within_decimal_range() {
        let data = ColumnData::Numeric(Some(Numeric::new_with_scale(-12345, 2)));
        let value = convert_value(&data, "decimal").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::new(-12345, 2)));
    }

    #[test]
    fn test_wide_numeric_falls_back_to_text() {
        // decimal(38, 2) holding its largest value: more than 96 bits
        let widest = 10i128.pow(38) - 1;
        let data = ColumnData::Numeric(Some(Numeric::new_with_scale(widest, 2)));
        let value = convert_value(&data, "numeric").unwrap();
        assert_eq!(value, SqlValue::from(format!("{}.99", "9".repeat(36))));

        // Scale above what Decimal supports
        let data = ColumnData::Numeric(Some(Numeric::new_with_scale(-12345, 30)));
        let value = convert_value(&data, "numeric").unwrap();
        assert_eq!(value, SqlValue::from("-0.000000000000000000000000012345"));
    }

    #[test]
    fn test_numeric_text() {
        assert_eq!(numeric_text(12345, 0), "12345");
        assert_eq!(numeric_text(12345, 2), "123.45");
        assert_eq!(numeric_text(5, 3), "0.005");
        assert_eq!(numeric_text(-5, 1), "-0.5");
    }

    #[test]
    fn test_mismatched_cell_type_is_an_error() {
        assert!(convert_value(&ColumnData::I32(Some(1)), "uniqueidentifier").is_err());
    }
}
