// ABOUTME: Filesystem persistence sink writing one JSON file per block height.
// ABOUTME: Writes atomically (temp file, fsync, rename) and creates the deployment directory on demand.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blockdiag_core::sink::{PersistenceSink, SinkError};
use ulid::Ulid;

/// Permission bits for directories created by the sink (rwxr--r--).
pub const DIR_MODE: u32 = 0o744;

/// Create `dir` and any missing parents, using [`DIR_MODE`] on unix.
pub fn create_dir_all(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}

/// Temp sibling for one write attempt, e.g. `100.json.<ulid>.tmp`.
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.tmp", Ulid::new()));
    path.with_file_name(name)
}

/// Write `bytes` to `path` atomically: write a `.tmp` sibling, fsync, rename.
/// Readers see either the previous file or the complete new one. Each call
/// uses its own temp file, so concurrent writers never share one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Best-effort: the rename already succeeded, so a failed directory
    // fsync does not make the data inconsistent.
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Persists each entry as a standalone file at the path it is given.
#[derive(Debug, Clone, Default)]
pub struct FsSink;

impl FsSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PersistenceSink for FsSink {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<(), SinkError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| SinkError::Backend(format!("write task failed: {}", e)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdiag_core::model::BlockDiagnosticEntry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_creates_directories_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ltc").join("100.json");
        let entry = BlockDiagnosticEntry::new(100);

        FsSink::new()
            .write(&path, serde_json::to_vec_pretty(&entry).unwrap())
            .await
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let loaded: BlockDiagnosticEntry = serde_json::from_str(&contents).unwrap();
        assert_eq!(loaded, entry);
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("100.json")], "temp file must be renamed away");
    }

    #[test]
    fn temp_names_are_unique_per_attempt() {
        let path = Path::new("/logs/ltc/100.json");
        let a = tmp_path_for(path);
        let b = tmp_path_for(path);

        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("100.json.") && name.ends_with(".tmp"), "got: {}", name);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_path_leave_a_complete_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ltc").join("9.json");
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'0' + i; 64 * 1024]).collect();

        let mut tasks = Vec::new();
        for body in bodies.clone() {
            let path = path.clone();
            tasks.push(tokio::spawn(async move { FsSink::new().write(&path, body).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let contents = fs::read(&path).unwrap();
        assert!(bodies.contains(&contents), "file must hold exactly one whole body");
    }

    #[tokio::test]
    async fn write_replaces_existing_file_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("7.json");

        let sink = FsSink::new();
        sink.write(&path, b"{\"old\": \"a much longer body than the next one\"}".to_vec())
            .await
            .unwrap();
        sink.write(&path, b"{}".to_vec()).await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn write_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("ltc");
        fs::write(&blocker, b"not a directory").unwrap();

        let result = FsSink::new().write(&blocker.join("1.json"), b"{}".to_vec()).await;
        assert!(matches!(result, Err(SinkError::Io(_))), "got: {:?}", result);
    }

    #[cfg(unix)]
    #[test]
    fn created_directories_use_dir_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("deployment");
        create_dir_all(&nested).unwrap();

        let mode = fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        // The process umask can only remove bits.
        assert_eq!(mode & !DIR_MODE, 0, "mode {:o} exceeds {:o}", mode, DIR_MODE);
    }
}
