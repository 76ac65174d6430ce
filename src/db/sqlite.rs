use crate::db::models::{CellValue, ParsedTable};
use crate::db::schema::{
    LIST_TABLES, TABLE_DDL, TABLE_EXISTS, create_table_sql, drop_table_sql, insert_row_sql,
    quote_ident, sample_rows_sql,
};
use crate::error::TabulaError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, TypeInfo, ValueRef};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub type SqlitePool = Pool<Sqlite>;

/// Read-write access to the destination store, used by ingestion.
#[derive(Clone)]
pub struct TableStore {
    pool: SqlitePool,
}

impl TableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the SQLite file at `path`.
    pub async fn open(path: &Path) -> Result<Self, TabulaError> {
        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Delete)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_tables(&self) -> Result<BTreeSet<String>, TabulaError> {
        list_tables(&self.pool).await
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool, TabulaError> {
        let rec: (i64,) = sqlx::query_as(TABLE_EXISTS)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0 > 0)
    }

    /// Drop any table of the same name and write `table` in a single transaction.
    pub async fn replace_table(&self, table: &ParsedTable) -> Result<(), TabulaError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&drop_table_sql(&table.name))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_table_sql(table))
            .execute(&mut *tx)
            .await?;

        let insert = insert_row_sql(table);
        for row in &table.rows {
            let mut query = sqlx::query(&insert);
            for cell in row {
                query = match cell {
                    CellValue::Null => query.bind(None::<String>),
                    CellValue::Bool(b) => query.bind(*b),
                    CellValue::Integer(i) => query.bind(*i),
                    CellValue::Real(f) => query.bind(*f),
                    CellValue::Text(s) => query.bind(s.as_str()),
                };
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All rows of `table`, in insertion order.
    pub async fn read_table(&self, table: &str) -> Result<Vec<Vec<CellValue>>, TabulaError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} ORDER BY rowid",
            quote_ident(table)
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Read-only handle the QA capability queries through.
#[derive(Clone, Debug)]
pub struct QueryHandle {
    pool: SqlitePool,
    path: PathBuf,
}

/// Result set of an ad-hoc query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryHandle {
    pub async fn open(path: &Path) -> Result<Self, TabulaError> {
        if !path.is_file() {
            return Err(TabulaError::Configuration(format!(
                "database file '{}' does not exist",
                path.display()
            )));
        }
        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Delete)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(connect_opts)
            .await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list_tables(&self) -> Result<BTreeSet<String>, TabulaError> {
        list_tables(&self.pool).await
    }

    /// `CREATE TABLE` statement as stored by SQLite, if the table exists.
    pub async fn table_ddl(&self, table: &str) -> Result<Option<String>, TabulaError> {
        let rec: Option<(String,)> = sqlx::query_as(TABLE_DDL)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.map(|r| r.0))
    }

    pub async fn sample_rows(&self, table: &str, limit: usize) -> Result<QueryRows, TabulaError> {
        self.fetch(&sample_rows_sql(table, limit)).await
    }

    pub async fn fetch(&self, sql: &str) -> Result<QueryRows, TabulaError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(decode_row).collect::<Result<_, _>>()?;
        Ok(QueryRows { columns, rows })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn list_tables(pool: &SqlitePool) -> Result<BTreeSet<String>, TabulaError> {
    let rows: Vec<(String,)> = sqlx::query_as(LIST_TABLES).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Decode by each value's runtime storage class rather than the declared type.
fn decode_row(row: &SqliteRow) -> Result<Vec<CellValue>, TabulaError> {
    (0..row.len())
        .map(|idx| {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(CellValue::Null);
            }
            let type_name = raw.type_info().name().to_string();
            let cell = match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => CellValue::Integer(row.try_get_unchecked(idx)?),
                "REAL" | "NUMERIC" => CellValue::Real(row.try_get_unchecked(idx)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get_unchecked(idx)?;
                    CellValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => CellValue::Text(row.try_get_unchecked(idx)?),
            };
            Ok(cell)
        })
        .collect()
}
