//! CSV ingestion: every `.csv` in a directory becomes a table named after the file.

pub mod loader;

use crate::db::sqlite::TableStore;
use crate::error::TabulaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What to do when a table with the file's base name already exists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Drop the existing table and recreate it from the file.
    #[default]
    Replace,
    /// Keep the existing table and report the file as failed.
    Fail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    /// Every table in the destination after the run.
    pub tables: BTreeSet<String>,
    pub ingested: Vec<IngestedTable>,
    pub skipped: Vec<String>,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedTable {
    pub file: String,
    pub table: String,
    pub rows: usize,
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

/// Load each CSV file of `dir` into `store`.
///
/// Only an unusable `dir` fails the call. Files that cannot be decoded, parsed or
/// written are recorded in [`IngestReport::failures`] and the run moves on.
pub async fn ingest(
    dir: &Path,
    store: &TableStore,
    policy: ConflictPolicy,
) -> Result<IngestReport, TabulaError> {
    if !dir.is_dir() {
        return Err(TabulaError::Configuration(format!(
            "The path '{}' is not a valid directory.",
            dir.display()
        )));
    }

    let entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read upload dir entry");
                None
            }
        })
        .collect();
    info!(path = %dir.display(), count = entries.len(), "ingesting upload directory");

    let mut report = IngestReport::default();
    for path in entries {
        let file = display_name(&path);
        if !path.is_file() || !loader::is_csv_file(&path) {
            info!(file = %file, "skipping non-CSV file");
            report.skipped.push(file);
            continue;
        }

        match ingest_file(&path, store, policy).await {
            Ok(table) => {
                info!(
                    file = %file,
                    table = %table.table,
                    rows = table.rows,
                    encoding = %table.encoding,
                    "table written"
                );
                report.ingested.push(table);
            }
            Err(e) => {
                warn!(file = %file, error = %e, "failed to ingest file");
                report.failures.push(FileFailure {
                    file,
                    reason: e.to_string(),
                });
            }
        }
    }

    report.tables = list_tables(store).await?;
    info!(tables = ?report.tables, "available tables in destination");
    Ok(report)
}

/// Table names currently present in the destination.
pub async fn list_tables(store: &TableStore) -> Result<BTreeSet<String>, TabulaError> {
    store.list_tables().await
}

async fn ingest_file(
    path: &Path,
    store: &TableStore,
    policy: ConflictPolicy,
) -> Result<IngestedTable, TabulaError> {
    let name = loader::table_name_for(path)
        .ok_or_else(|| TabulaError::file_read(path, "file name is not valid UTF-8"))?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TabulaError::file_read(path, e))?;
    let (text, encoding) = loader::decode(path, &bytes)?;
    let table = loader::parse_csv(&name, &text).map_err(|reason| TabulaError::file_read(path, reason))?;

    if policy == ConflictPolicy::Fail
        && store
            .table_exists(&name)
            .await
            .map_err(|e| TabulaError::file_read(path, e))?
    {
        return Err(TabulaError::file_read(
            path,
            format!("table '{name}' already exists"),
        ));
    }

    store
        .replace_table(&table)
        .await
        .map_err(|e| TabulaError::file_read(path, e))?;

    Ok(IngestedTable {
        file: display_name(path),
        table: name,
        rows: table.row_count(),
        encoding: encoding.name().to_string(),
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
