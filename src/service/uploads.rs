use crate::error::TabulaError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A file received from the upload form.
#[derive(Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Final path component of a client-supplied name; browsers may send `C:\dir\a.csv`.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next()?.trim();
    match last {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Write uploads into `dir`, creating it if needed. Same-named files are overwritten.
pub async fn save_uploads(dir: &Path, files: &[UploadedFile]) -> Result<Vec<PathBuf>, TabulaError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut saved = Vec::with_capacity(files.len());
    for file in files {
        let Some(name) = sanitize_file_name(&file.name) else {
            warn!(name = %file.name, "ignoring upload with unusable file name");
            continue;
        };
        let path = dir.join(name);
        tokio::fs::write(&path, &file.bytes).await?;
        saved.push(path);
    }
    info!(path = %dir.display(), count = saved.len(), "uploads saved");
    Ok(saved)
}

/// Remove every file (and empty subdirectory) in `dir`. Returns how many entries went away.
pub fn clear_dir(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let removed = if path.is_dir() {
                std::fs::remove_dir(path)
            } else {
                std::fs::remove_file(path)
            };
            removed
                .inspect_err(|e| warn!(path = %path.display(), error = %e, "failed to delete upload"))
                .is_ok()
        })
        .count()
}
