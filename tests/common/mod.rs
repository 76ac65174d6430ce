#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tabula::db::sqlite::QueryHandle;
use tabula::types::conversation::ChatTurn;
use tabula::{QaCapability, TabulaError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Per-test scratch area under the system temp dir, removed on drop.
pub struct Scratch {
    pub root: PathBuf,
}

impl Scratch {
    pub fn new(label: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let mut root = std::env::temp_dir();
        root.push(format!(
            "tabula-{label}-{}-{nanos}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).expect("failed to create scratch dir");
        Self { root }
    }

    pub fn upload_dir(&self) -> PathBuf {
        let dir = self.root.join("uploads");
        fs::create_dir_all(&dir).expect("failed to create upload dir");
        dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("student.sqlite")
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("failed to write fixture");
    path
}

/// Capability that always errors, like an unreachable model.
pub struct FailingCapability;

#[async_trait::async_trait]
impl QaCapability for FailingCapability {
    async fn ask(
        &self,
        _question: &str,
        _db: &QueryHandle,
        _history: &[ChatTurn],
    ) -> Result<String, TabulaError> {
        Err(TabulaError::QueryFailure("model timed out".to_string()))
    }
}

/// Capability that answers with the table list and how much history it saw.
pub struct TableListCapability;

#[async_trait::async_trait]
impl QaCapability for TableListCapability {
    async fn ask(
        &self,
        question: &str,
        db: &QueryHandle,
        history: &[ChatTurn],
    ) -> Result<String, TabulaError> {
        let tables = db.list_tables().await?;
        Ok(format!(
            "{question} -> tables={} history={}",
            tables.into_iter().collect::<Vec<_>>().join(","),
            history.len()
        ))
    }
}

/// Capability that returns a blank answer.
pub struct SilentCapability;

#[async_trait::async_trait]
impl QaCapability for SilentCapability {
    async fn ask(
        &self,
        _question: &str,
        _db: &QueryHandle,
        _history: &[ChatTurn],
    ) -> Result<String, TabulaError> {
        Ok("   ".to_string())
    }
}
