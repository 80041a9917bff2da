use crate::errors::{AppError, AppResult};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Replaces JSON documents through a `.tmp` sibling and a rename, so readers
/// only ever see a complete old or a complete new document.
#[derive(Debug, Clone, Copy)]
pub struct AtomicWriter {
    backups: bool,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self { backups: true }
    }
}

impl AtomicWriter {
    pub fn new(backups: bool) -> Self {
        Self { backups }
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        if self.backups {
            if let Err(error) = backup_previous(path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "backup of previous generation failed; continuing with write"
                );
            }
        }
        let tmp_path = stage_temp(path, &bytes).await?;
        commit_temp(&tmp_path, path).await
    }
}

/// `<file>.tmp` / `<file>.bak` next to `path`, keeping the full file name.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Copies the current target to `.bak`. Returns whether a copy was made.
pub(crate) async fn backup_previous(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    }
    tokio::fs::copy(path, sibling_path(path, "bak")).await?;
    Ok(true)
}

/// Writes and syncs the temp sibling. The target itself is not touched.
pub(crate) async fn stage_temp(path: &Path, bytes: &[u8]) -> AppResult<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| AppError::Io(format!("creating {}: {}", parent.display(), error)))?;
    }
    let tmp_path = sibling_path(path, "tmp");
    if let Err(error) = write_synced(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(AppError::Io(format!("writing {}: {}", tmp_path.display(), error)));
    }
    Ok(tmp_path)
}

pub(crate) async fn commit_temp(tmp_path: &Path, path: &Path) -> AppResult<()> {
    if let Err(error) = tokio::fs::rename(tmp_path, path).await {
        let _ = tokio::fs::remove_file(tmp_path).await;
        return Err(AppError::Io(format!(
            "replacing {} with {}: {}",
            path.display(),
            tmp_path.display(),
            error
        )));
    }
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn temp_root() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp data root")
    }

    async fn read_value(path: &Path) -> Value {
        let bytes = tokio::fs::read(path).await.expect("read document");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    #[test]
    fn sibling_path_appends_to_full_name() {
        let path = Path::new("/data/ws_abc_123456.json");
        assert_eq!(sibling_path(path, "tmp"), Path::new("/data/ws_abc_123456.json.tmp"));
        assert_eq!(sibling_path(path, "bak"), Path::new("/data/ws_abc_123456.json.bak"));
    }

    #[tokio::test]
    async fn write_replaces_target_and_leaves_no_temp() {
        let root = temp_root();
        let path = root.path().join("nested").join("doc.json");
        let writer = AtomicWriter::default();

        writer.write_json(&path, &json!({ "generation": 1 })).await.expect("first write");
        writer.write_json(&path, &json!({ "generation": 2 })).await.expect("second write");

        assert_eq!(read_value(&path).await, json!({ "generation": 2 }));
        assert_eq!(read_value(&sibling_path(&path, "bak")).await, json!({ "generation": 1 }));
        assert!(!sibling_path(&path, "tmp").exists());
        let text = std::fs::read_to_string(&path).expect("text");
        assert!(text.contains("\n  \"generation\""), "document is pretty printed");
    }

    #[tokio::test]
    async fn crash_before_rename_leaves_target_untouched() {
        let root = temp_root();
        let path = root.path().join("doc.json");
        AtomicWriter::default()
            .write_json(&path, &json!({ "generation": 1 }))
            .await
            .expect("initial write");

        let staged = stage_temp(&path, br#"{ "generation": 2, "trunc"#)
            .await
            .expect("stage temp");
        assert!(staged.exists());

        assert_eq!(read_value(&path).await, json!({ "generation": 1 }));
    }

    #[tokio::test]
    async fn backup_failure_does_not_abort_write() {
        let root = temp_root();
        let path = root.path().join("doc.json");
        let writer = AtomicWriter::default();
        writer.write_json(&path, &json!({ "generation": 1 })).await.expect("first write");

        let bak = sibling_path(&path, "bak");
        assert!(!bak.exists(), "first write has nothing to back up");
        std::fs::create_dir_all(bak.join("occupied")).expect("block bak path");

        writer.write_json(&path, &json!({ "generation": 2 })).await.expect("second write");
        assert_eq!(read_value(&path).await, json!({ "generation": 2 }));
        assert!(bak.join("occupied").is_dir());
        assert!(!sibling_path(&path, "tmp").exists());
    }

    #[tokio::test]
    async fn temp_write_failure_propagates_and_keeps_target() {
        let root = temp_root();
        let path = root.path().join("doc.json");
        let writer = AtomicWriter::default();
        writer.write_json(&path, &json!({ "generation": 1 })).await.expect("first write");
        std::fs::create_dir_all(sibling_path(&path, "tmp").join("occupied")).expect("block tmp path");

        let error = writer
            .write_json(&path, &json!({ "generation": 2 }))
            .await
            .expect_err("temp file cannot be created");
        assert!(matches!(error, AppError::Io(_)));
        assert_eq!(read_value(&path).await, json!({ "generation": 1 }));
    }

    #[tokio::test]
    async fn rename_failure_propagates_and_cleans_temp() {
        let root = temp_root();
        let path = root.path().join("doc.json");
        std::fs::create_dir_all(path.join("occupied")).expect("directory at target");

        let error = AtomicWriter::default()
            .write_json(&path, &json!({ "generation": 1 }))
            .await
            .expect_err("rename onto a directory fails");
        assert!(matches!(error, AppError::Io(_)));
        assert!(!sibling_path(&path, "tmp").exists());
        assert!(path.join("occupied").is_dir());
    }

    #[tokio::test]
    async fn disabled_backups_skip_bak() {
        let root = temp_root();
        let path = root.path().join("doc.json");
        let writer = AtomicWriter::new(false);
        writer.write_json(&path, &json!({ "generation": 1 })).await.expect("first write");
        writer.write_json(&path, &json!({ "generation": 2 })).await.expect("second write");
        assert!(!sibling_path(&path, "bak").exists());
    }
}
