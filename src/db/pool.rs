//! sqlx-backed connection provider.
//!
//! The routing core only sees the [`ConnectionProvider`] trait; this module
//! is the bundled implementation over database-specific sqlx pools (MySqlPool
//! and SqlitePool, both speaking the `?` placeholder dialect the statement
//! templates emit). Pools are created lazily so a router can be assembled at
//! startup without touching the network.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlTypeInfo, MySqlValueRef,
};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Decode, MySql, MySqlPool, Row as _, Sqlite, SqlitePool, Type, TypeInfo};
use tracing::debug;

use crate::config::{DatabaseKind, ProviderSpec, RouterConfig};
use crate::db::provider::{Connection, ConnectionProvider};
use crate::db::router::DataSourceRouter;
use crate::error::{DalError, DalResult};
use crate::models::{Row, Value};

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// [`ConnectionProvider`] over a lazily-created sqlx pool.
#[derive(Debug, Clone)]
pub struct SqlxProvider {
    pool: DbPool,
}

impl SqlxProvider {
    /// Build the pool for a provider spec. Lazy: the first checkout opens
    /// the first physical connection.
    pub fn connect(spec: &ProviderSpec) -> DalResult<Self> {
        let pool_opts = &spec.pool;
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));

        let pool = match spec.kind {
            DatabaseKind::MySql => {
                let options = MySqlConnectOptions::from_str(&spec.url)
                    .map_err(|e| {
                        DalError::connection(format!("Invalid MySQL connection URL: {}", e))
                    })?
                    .charset("utf8mb4");
                DbPool::MySql(
                    MySqlPoolOptions::new()
                        .min_connections(pool_opts.min_connections_or_default())
                        .max_connections(pool_opts.max_connections_or_default(false))
                        .acquire_timeout(acquire_timeout)
                        .idle_timeout(idle_timeout)
                        .test_before_acquire(pool_opts.test_before_acquire_or_default())
                        .connect_lazy_with(options),
                )
            }
            DatabaseKind::Sqlite => {
                let options = SqliteConnectOptions::from_str(&spec.url)
                    .map_err(|e| {
                        DalError::connection(format!("Invalid SQLite connection URL: {}", e))
                    })?
                    .create_if_missing(true);
                DbPool::Sqlite(
                    SqlitePoolOptions::new()
                        .min_connections(pool_opts.min_connections_or_default())
                        .max_connections(pool_opts.max_connections_or_default(true))
                        .acquire_timeout(acquire_timeout)
                        .idle_timeout(idle_timeout)
                        .test_before_acquire(pool_opts.test_before_acquire_or_default())
                        .connect_lazy_with(options),
                )
            }
        };
        debug!(routing_key = %spec.key, url = %spec.masked_url(), "Created provider pool");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ConnectionProvider for SqlxProvider {
    async fn acquire(&self) -> DalResult<Box<dyn Connection>> {
        match &self.pool {
            DbPool::MySql(pool) => Ok(Box::new(PooledConn::MySql(pool.acquire().await?))),
            DbPool::Sqlite(pool) => Ok(Box::new(PooledConn::Sqlite(pool.acquire().await?))),
        }
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }
}

/// Build a router whose providers are all sqlx-backed, from one config.
pub fn build_router(config: RouterConfig) -> DalResult<DataSourceRouter> {
    let mut builder = DataSourceRouter::builder();
    for spec in &config.providers {
        builder = builder.provider(spec.key.clone(), SqlxProvider::connect(spec)?);
    }
    for (master, slaves) in &config.replicas {
        builder = builder.replicas(master.clone(), slaves.clone());
    }
    if let Some(key) = config.default_key {
        builder = builder.default_key(key);
    }
    builder.build()
}

/// One checked-out physical connection.
enum PooledConn {
    MySql(PoolConnection<MySql>),
    Sqlite(PoolConnection<Sqlite>),
}

#[async_trait]
impl Connection for PooledConn {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DalResult<u64> {
        match self {
            PooledConn::MySql(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                Ok(query.execute(&mut **conn).await?.rows_affected())
            }
            PooledConn::Sqlite(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                Ok(query.execute(&mut **conn).await?.rows_affected())
            }
        }
    }

    async fn execute_returning_key(&mut self, sql: &str, params: &[Value]) -> DalResult<i64> {
        match self {
            PooledConn::MySql(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let result = query.execute(&mut **conn).await?;
                Ok(result.last_insert_id() as i64)
            }
            PooledConn::Sqlite(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let result = query.execute(&mut **conn).await?;
                Ok(result.last_insert_rowid())
            }
        }
    }

    async fn execute_batch(&mut self, sql: &str, param_sets: &[Vec<Value>]) -> DalResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            counts.push(self.execute(sql, params).await?);
        }
        Ok(counts)
    }

    async fn execute_batch_returning_keys(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> DalResult<Vec<i64>> {
        let mut keys = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            keys.push(self.execute_returning_key(sql, params).await?);
        }
        Ok(keys)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> DalResult<Vec<Row>> {
        match self {
            PooledConn::MySql(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let rows = query.fetch_all(&mut **conn).await?;
                rows.iter().map(decode_mysql_row).collect()
            }
            PooledConn::Sqlite(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let rows = query.fetch_all(&mut **conn).await?;
                rows.iter().map(decode_sqlite_row).collect()
            }
        }
    }
}

/// Bind a parameter to a MySQL query.
fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings. Preserves the
/// exact database representation.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn decode_mysql_row(row: &MySqlRow) -> DalResult<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_mysql_value(row, i, column.type_info().name())?);
    }
    Ok(Row::new(columns, values))
}

fn decode_mysql_value(row: &MySqlRow, index: usize, type_name: &str) -> DalResult<Value> {
    let lower = type_name.to_lowercase();
    let value = if lower.contains("decimal") || lower.contains("numeric") {
        row.try_get::<Option<RawDecimal>, _>(index)?
            .map(|raw| Value::String(raw.0))
    } else if lower.contains("unsigned") {
        row.try_get::<Option<u64>, _>(index)?
            .map(|v| Value::Int(v as i64))
    } else if lower.contains("int") || lower == "year" {
        row.try_get::<Option<i64>, _>(index)?.map(Value::Int)
    } else if lower == "float" {
        row.try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v as f64))
    } else if lower == "double" {
        row.try_get::<Option<f64>, _>(index)?.map(Value::Float)
    } else if lower == "boolean" || lower == "bool" {
        row.try_get::<Option<bool>, _>(index)?.map(Value::Bool)
    } else if lower == "datetime" || lower == "timestamp" {
        row.try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|v| Value::String(v.to_string()))
    } else if lower == "date" {
        row.try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|v| Value::String(v.to_string()))
    } else if lower == "time" {
        row.try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(|v| Value::String(v.to_string()))
    } else if lower.contains("blob") || lower.contains("binary") {
        row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes)
    } else {
        row.try_get::<Option<String>, _>(index)?.map(Value::String)
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_sqlite_row(row: &SqliteRow) -> DalResult<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_sqlite_value(row, i, column.type_info().name())?);
    }
    Ok(Row::new(columns, values))
}

fn decode_sqlite_value(row: &SqliteRow, index: usize, type_name: &str) -> DalResult<Value> {
    let lower = type_name.to_lowercase();
    let value = if lower.contains("int") || lower == "numeric" {
        row.try_get::<Option<i64>, _>(index)?.map(Value::Int)
    } else if lower == "real" {
        row.try_get::<Option<f64>, _>(index)?.map(Value::Float)
    } else if lower == "boolean" || lower == "bool" {
        row.try_get::<Option<bool>, _>(index)?.map(Value::Bool)
    } else if lower == "blob" {
        row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes)
    } else {
        // TEXT, datetimes stored as text, NULL-typed expression columns.
        row.try_get::<Option<String>, _>(index)?.map(Value::String)
    };
    Ok(value.unwrap_or(Value::Null))
}
