//! PostgreSQL destination: catalog queries, batch writes via text COPY, and
//! primary key DDL.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::adapt::AdaptationPlan;
use crate::config::TargetConfig;
use crate::core::identifier::{pk_constraint_name, qualify_pg, quote_pg};
use crate::core::{
    Batch, Catalog, Column, DatabaseHandle, Dialect, SqlValue, TableDescriptor, TargetWriter,
    WriteMode,
};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Flush the COPY buffer to the server once it grows past this many bytes.
const COPY_FLUSH_BYTES: usize = 4 * 1024 * 1024;

/// PostgreSQL destination database.
pub struct PostgresTarget {
    pool: Pool,
    handle: DatabaseHandle,
}

impl PostgresTarget {
    /// Open a pool of up to `max_size` connections and check one out once.
    pub async fn connect(config: &TargetConfig, max_size: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match config.ssl_mode.parse::<SslMode>()?.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(max_size.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        let target = Self {
            pool,
            handle: DatabaseHandle::new(
                Dialect::Postgresql,
                &config.host,
                config.port,
                &config.database,
                &config.schema,
            ),
        };
        target.test_connection().await?;

        info!("Connected to PostgreSQL: {} (pool_size={})", target.handle, max_size);
        Ok(target)
    }

    async fn get_client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))
    }

    /// Round-trip a trivial query.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_client().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PostgresTarget {
    fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let sql = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema::text = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        let client = self.get_client().await?;
        let rows = client
            .query(sql, &[&schema])
            .await
            .map_err(|e| MigrateError::catalog("listing PostgreSQL tables", e))?;

        Ok(rows
            .iter()
            .map(|row| TableDescriptor::named(schema, row.get::<_, String>(0)))
            .collect())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let client = self.get_client().await?;
        table_exists_on(&client, schema, table)
            .await
            .map_err(|e| MigrateError::catalog("checking PostgreSQL table", e))
    }

    /// Exact `COUNT(*)`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", qualify_pg(schema, table)?);

        let client = self.get_client().await?;
        let row = client
            .query_one(&sql, &[])
            .await
            .map_err(|e| MigrateError::catalog("counting PostgreSQL rows", e))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let sql = r#"
            SELECT a.attname::text
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND t.relname = $2 AND ix.indisprimary
            ORDER BY k.ord
        "#;

        let client = self.get_client().await?;
        let rows = client
            .query(sql, &[&schema, &table])
            .await
            .map_err(|e| MigrateError::catalog("loading PostgreSQL primary key", e))?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let sql = r#"
            SELECT
                column_name::text,
                data_type::text,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                is_nullable::text = 'YES'
            FROM information_schema.columns
            WHERE table_schema::text = $1 AND table_name::text = $2
            ORDER BY ordinal_position
        "#;

        let client = self.get_client().await?;
        let rows = client
            .query(sql, &[&schema, &table])
            .await
            .map_err(|e| MigrateError::catalog("loading PostgreSQL columns", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                Column::new(
                    row.get::<_, String>(0),
                    row.get::<_, String>(1),
                    row.get::<_, bool>(5),
                )
                .with_max_length(row.get::<_, i32>(2))
                .with_precision(row.get::<_, i32>(3), row.get::<_, i32>(4))
            })
            .collect())
    }
}

#[async_trait]
impl TargetWriter for PostgresTarget {
    async fn write_batch(
        &self,
        table: &TableDescriptor,
        plan: &AdaptationPlan,
        batch: &Batch,
        mode: WriteMode,
    ) -> Result<u64> {
        let schema = &self.handle.schema;
        let qualified_name = format!("{}.{}", schema, table.name);
        let qualified = qualify_pg(schema, &table.name)?;
        let wrap = |e: tokio_postgres::Error| MigrateError::write(&qualified_name, e);

        let client = self.get_client().await?;

        client
            .execute(
                &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(schema)?),
                &[],
            )
            .await
            .map_err(wrap)?;

        if mode == WriteMode::Replace {
            if table_exists_on(&client, schema, &table.name).await.map_err(wrap)? {
                client
                    .execute(&format!("TRUNCATE TABLE {}", qualified), &[])
                    .await
                    .map_err(wrap)?;
                debug!("Truncated {}", qualified_name);
            } else {
                let ddl = create_table_ddl(schema, table, plan)?;
                client.execute(&ddl, &[]).await.map_err(wrap)?;
                debug!("Created {}", qualified_name);
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let cols = table
            .columns
            .iter()
            .map(|c| quote_pg(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let copy_sql = format!("COPY {} ({}) FROM STDIN", qualified, cols.join(", "));

        let sink = client
            .copy_in::<_, Bytes>(copy_sql.as_str())
            .await
            .map_err(wrap)?;
        tokio::pin!(sink);

        let mut buf = BytesMut::with_capacity(COPY_FLUSH_BYTES.min(batch.len() * 128));
        for row in &batch.rows {
            write_copy_row(&mut buf, row);
            if buf.len() >= COPY_FLUSH_BYTES {
                sink.send(buf.split().freeze()).await.map_err(wrap)?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.freeze()).await.map_err(wrap)?;
        }

        let written = sink.finish().await.map_err(wrap)?;
        debug!("Wrote {} rows to {}", written, qualified_name);
        Ok(written)
    }

    async fn coalesce_nulls(&self, schema: &str, table: &str, column: &str) -> Result<u64> {
        let col = quote_pg(column)?;
        let sql = format!(
            "UPDATE {} SET {} = COALESCE({}, '') WHERE {} IS NULL",
            qualify_pg(schema, table)?,
            col,
            col,
            col
        );

        let client = self.get_client().await?;
        client
            .execute(&sql, &[])
            .await
            .map_err(|e| MigrateError::key_propagation(format!("{}.{}", schema, table), e))
    }

    async fn add_primary_key(&self, schema: &str, table: &str, columns: &[String]) -> Result<()> {
        let cols = columns
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
            qualify_pg(schema, table)?,
            quote_pg(&pk_constraint_name(table))?,
            cols.join(", ")
        );

        let client = self.get_client().await?;
        client
            .execute(&sql, &[])
            .await
            .map_err(|e| MigrateError::key_propagation(format!("{}.{}", schema, table), e))?;
        Ok(())
    }
}

/// Existence check on an already checked-out connection.
async fn table_exists_on(
    client: &tokio_postgres::Client,
    schema: &str,
    table: &str,
) -> std::result::Result<bool, tokio_postgres::Error> {
    let sql = r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema::text = $1 AND table_name::text = $2
        )
    "#;
    let row = client.query_one(sql, &[&schema, &table]).await?;
    Ok(row.get::<_, bool>(0))
}

/// `CREATE TABLE` for a source table, using the plan's destination types.
fn create_table_ddl(schema: &str, table: &TableDescriptor, plan: &AdaptationPlan) -> Result<String> {
    let col_defs = table
        .columns
        .iter()
        .map(|c| {
            let data_type = plan.write_type(&c.name).unwrap_or("text");
            let null_clause = if c.is_nullable { "" } else { " NOT NULL" };
            Ok(format!("{} {}{}", quote_pg(&c.name)?, data_type, null_clause))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        qualify_pg(schema, &table.name)?,
        col_defs.join(",\n    ")
    ))
}

/// Append one row in COPY text format.
fn write_copy_row(buf: &mut BytesMut, row: &[SqlValue<'_>]) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        buf.put_slice(value_to_text(value).as_bytes());
    }
    buf.put_u8(b'\n');
}

/// Render a value as a COPY text field.
fn value_to_text(value: &SqlValue<'_>) -> String {
    match value {
        SqlValue::Null(_) => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I16(i) => i.to_string(),
        SqlValue::I32(i) => i.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F32(f) if !f.is_finite() => non_finite_text(f.is_nan(), *f > 0.0),
        SqlValue::F32(f) => f.to_string(),
        SqlValue::F64(f) if !f.is_finite() => non_finite_text(f.is_nan(), *f > 0.0),
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b.as_ref())),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(dto) => dto.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
    }
}

fn non_finite_text(is_nan: bool, positive: bool) -> String {
    match (is_nan, positive) {
        (true, _) => "NaN".to_string(),
        (false, true) => "Infinity".to_string(),
        (false, false) => "-Infinity".to_string(),
    }
}

/// Escape text for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlNullType;

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("plain"), "plain");
        assert_eq!(escape_copy_text("a\tb\nc\rd"), "a\\tb\\nc\\rd");
        assert_eq!(escape_copy_text(r"C:\dir"), r"C:\\dir");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&SqlValue::Null(SqlNullType::I32)), "\\N");
        assert_eq!(value_to_text(&SqlValue::Bool(true)), "t");
        assert_eq!(value_to_text(&SqlValue::I64(-7)), "-7");
        assert_eq!(value_to_text(&SqlValue::from(vec![0xde, 0xad])), "\\\\xdead");
        assert_eq!(value_to_text(&SqlValue::F64(f64::NAN)), "NaN");
        assert_eq!(value_to_text(&SqlValue::F32(f32::NEG_INFINITY)), "-Infinity");
    }

    #[test]
    fn test_write_copy_row() {
        let mut buf = BytesMut::new();
        write_copy_row(
            &mut buf,
            &[
                SqlValue::I32(1),
                SqlValue::from("x\ty"),
                SqlValue::Null(SqlNullType::String),
            ],
        );
        assert_eq!(&buf[..], b"1\tx\\ty\t\\N\n");
    }

    #[test]
    fn test_create_table_ddl_uses_plan_types() {
        let mut table = TableDescriptor::named("dbo", "org");
        table.columns = vec![
            Column::new("id", "int", false),
            Column::new("node", "hierarchyid", true),
        ];
        let plan = AdaptationPlan::for_table(&table).unwrap();
        let ddl = create_table_ddl("public", &table, &plan).unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"public\".\"org\" (\n    \"id\" integer NOT NULL,\n    \"node\" bytea\n)"
        );
    }
}
