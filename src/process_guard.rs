use std::env;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

enum AcquireState {
    Acquired(WriterGuard),
    AlreadyRunning { pid: Option<u32> },
}

pub enum RunningState {
    NotRunning,
    Running { pid: Option<u32> },
}

/// Exclusive writer lock on one session history. Released on drop.
pub struct WriterGuard {
    file: File,
    meta_path: PathBuf,
    pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WriterMetadata {
    pid: u32,
    exe_path: Option<String>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        remove_writer_metadata_if_owned(self.pid, &self.meta_path);
    }
}

/// Takes the writer lock for `sessions_path`, failing when another tracker
/// already writes to the same history.
pub fn acquire_writer_lock(sessions_path: &Path) -> Result<WriterGuard> {
    match try_acquire_writer_lock(sessions_path)? {
        AcquireState::Acquired(guard) => Ok(guard),
        AcquireState::AlreadyRunning { pid: Some(pid) } => bail!(
            "another tracker (PID {pid}) is already writing {}",
            sessions_path.display()
        ),
        AcquireState::AlreadyRunning { pid: None } => bail!(
            "another tracker is already writing {}",
            sessions_path.display()
        ),
    }
}

fn try_acquire_writer_lock(sessions_path: &Path) -> Result<AcquireState> {
    let lock_path = lock_path_for(sessions_path);
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
    }

    let meta_path = meta_path_for(sessions_path);
    let file = open_lock_file(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let metadata = WriterMetadata {
                pid: std::process::id(),
                exe_path: env::current_exe()
                    .ok()
                    .map(|path| path.display().to_string()),
            };
            write_writer_metadata(&meta_path, &metadata)?;
            Ok(AcquireState::Acquired(WriterGuard {
                file,
                meta_path,
                pid: metadata.pid,
            }))
        }
        Err(_) => {
            let pid = read_writer_metadata(&meta_path)
                .ok()
                .flatten()
                .map(|m| m.pid);
            Ok(AcquireState::AlreadyRunning { pid })
        }
    }
}

pub fn inspect_writer(sessions_path: &Path) -> Result<RunningState> {
    let lock_path = lock_path_for(sessions_path);
    if !lock_path.exists() {
        return Ok(RunningState::NotRunning);
    }

    let meta_path = meta_path_for(sessions_path);
    let file = open_lock_file(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            let _ = fs::remove_file(&meta_path);
            Ok(RunningState::NotRunning)
        }
        Err(_) => {
            let pid = read_writer_metadata(&meta_path)
                .ok()
                .flatten()
                .map(|m| m.pid);
            Ok(RunningState::Running { pid })
        }
    }
}

fn lock_path_for(sessions_path: &Path) -> PathBuf {
    sibling_with_suffix(sessions_path, ".lock")
}

fn meta_path_for(sessions_path: &Path) -> PathBuf {
    sibling_with_suffix(sessions_path, ".writer.json")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("sessions.json"));
    name.push(suffix);
    path.with_file_name(name)
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))
}

fn write_writer_metadata(path: &Path, metadata: &WriterMetadata) -> Result<()> {
    let payload = serde_json::to_string_pretty(metadata)?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write writer metadata {}", path.display()))?;
    Ok(())
}

fn read_writer_metadata(path: &Path) -> Result<Option<WriterMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read writer metadata {}", path.display()))?;
    let parsed: WriterMetadata = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    Ok(Some(parsed))
}

fn remove_writer_metadata_if_owned(expected_pid: u32, path: &Path) {
    let Ok(Some(metadata)) = read_writer_metadata(path) else {
        return;
    };
    if metadata.pid == expected_pid {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_writer_metadata() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("writer.json");

        let metadata = WriterMetadata {
            pid: 1234,
            exe_path: Some("lockin".to_string()),
        };

        write_writer_metadata(&path, &metadata).expect("write metadata");
        let loaded = read_writer_metadata(&path)
            .expect("read metadata")
            .expect("metadata value");

        assert_eq!(loaded.pid, 1234);
        assert_eq!(loaded.exe_path.as_deref(), Some("lockin"));
    }

    #[test]
    fn lock_files_sit_beside_the_history() {
        let sessions = Path::new("/work/.lockin/sessions.json");
        assert_eq!(
            lock_path_for(sessions),
            PathBuf::from("/work/.lockin/sessions.json.lock")
        );
        assert_eq!(
            meta_path_for(sessions),
            PathBuf::from("/work/.lockin/sessions.json.writer.json")
        );
    }

    #[test]
    fn inspect_reports_running_while_lock_is_held() {
        let tmp = TempDir::new().expect("temp dir");
        let sessions = tmp.path().join("sessions.json");

        assert!(matches!(
            inspect_writer(&sessions).expect("inspect before"),
            RunningState::NotRunning
        ));

        let guard = acquire_writer_lock(&sessions).expect("acquire writer lock");

        match inspect_writer(&sessions).expect("inspect running") {
            RunningState::Running { pid } => assert_eq!(pid, Some(std::process::id())),
            RunningState::NotRunning => panic!("expected running state while lock is held"),
        }

        drop(guard);

        match inspect_writer(&sessions).expect("inspect stopped") {
            RunningState::NotRunning => {}
            RunningState::Running { .. } => panic!("expected not running after lock release"),
        }
    }

    #[test]
    fn writer_pid_lives_only_in_metadata() {
        let tmp = TempDir::new().expect("temp dir");
        let sessions = tmp.path().join("sessions.json");

        let guard = acquire_writer_lock(&sessions).expect("acquire writer lock");
        let lock_contents = fs::read_to_string(lock_path_for(&sessions)).expect("read lock file");
        assert!(lock_contents.is_empty());
        let metadata = read_writer_metadata(&meta_path_for(&sessions))
            .expect("read metadata")
            .expect("metadata value");
        assert_eq!(metadata.pid, std::process::id());

        drop(guard);
        assert!(!meta_path_for(&sessions).exists());
    }

    #[test]
    fn second_writer_is_rejected() {
        let tmp = TempDir::new().expect("temp dir");
        let sessions = tmp.path().join("sessions.json");

        let _guard = acquire_writer_lock(&sessions).expect("first writer");
        let err = match acquire_writer_lock(&sessions) {
            Ok(_) => panic!("second writer must not acquire the lock"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("already writing"));
    }
}
