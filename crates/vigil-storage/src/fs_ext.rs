//! Filesystem helpers that never fail loudly
//!
//! Every helper catches the underlying I/O error, reports it to the internal
//! logger and returns a neutral value, so a broken disk degrades to dropped
//! data instead of a crash in the host application.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use vigil_logging::{Level, SharedLogger, Target};

use crate::error::StorageError;

const TARGETS: &[Target] = &[Target::Maintainer, Target::Telemetry];

fn report(logger: &SharedLogger, action: &str, path: &Path, err: io::Error) {
    let err = StorageError::from(err);
    logger.log(
        Level::Error,
        TARGETS,
        &format!("Unable to {action}: {}", path.display()),
        Some(&err),
    );
}

pub fn exists_safe(path: &Path, logger: &SharedLogger) -> bool {
    match path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            report(logger, "check if file exists", path, e);
            false
        }
    }
}

pub fn can_write_safe(path: &Path, logger: &SharedLogger) -> bool {
    match fs::metadata(path) {
        Ok(meta) => !meta.permissions().readonly(),
        Err(e) => {
            report(logger, "check write permission", path, e);
            false
        }
    }
}

pub fn mkdirs_safe(path: &Path, logger: &SharedLogger) -> bool {
    match fs::create_dir_all(path) {
        Ok(()) => true,
        Err(e) => {
            report(logger, "create directory", path, e);
            false
        }
    }
}

pub fn len_safe(path: &Path, logger: &SharedLogger) -> u64 {
    match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            report(logger, "read file length", path, e);
            0
        }
    }
}

/// List the entries of a directory; `None` when it can't be read
pub fn list_files_safe(dir: &Path, logger: &SharedLogger) -> Option<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            report(logger, "list directory", dir, e);
            return None;
        }
    };
    Some(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
}

pub fn read_bytes_safe(path: &Path, logger: &SharedLogger) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            report(logger, "read file", path, e);
            None
        }
    }
}

/// Write `data`, appending or truncating; the parent directory must exist
pub fn write_bytes(path: &Path, data: &[u8], append: bool) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    file.write_all(data)?;
    file.flush()?;
    Ok(())
}

/// Replace the content of `path` atomically through a sibling temp file
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StorageError::io(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Delete a file or a whole directory tree
pub fn delete_safe(path: &Path, logger: &SharedLogger) -> bool {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            report(logger, "delete file", path, e);
            false
        }
    }
}

/// Move a single file, falling back to copy + delete across filesystems
///
/// When the destination is an existing batch file the source content is
/// appended to it, batches being plain block concatenations. Any other
/// existing destination (snapshot, batch metadata) is replaced.
/// A source that can't be removed after its content was appended is emptied.
pub fn move_file(src: &Path, dest: &Path) -> Result<(), StorageError> {
    let is_batch = dest
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(crate::batch::is_batch_file_name);
    if is_batch && dest.exists() {
        let data = fs::read(src)?;
        if !data.is_empty() {
            write_bytes(dest, &data, true)?;
        }
        if let Err(e) = fs::remove_file(src) {
            // Empty the source so a retried move can't append it twice
            fs::File::create(src)?;
            return Err(e.into());
        }
        return Ok(());
    }

    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest)?;
    fs::remove_file(src)?;
    Ok(())
}

/// Move every file of `src_dir` into `dest_dir`, oldest name first
///
/// Returns false if any file could not be moved.
pub fn move_files_safe(src_dir: &Path, dest_dir: &Path, logger: &SharedLogger) -> bool {
    if !src_dir.exists() {
        logger.log(
            Level::Debug,
            &[Target::Maintainer],
            &format!("Nothing to move, directory doesn't exist: {}", src_dir.display()),
            None,
        );
        return true;
    }
    if !src_dir.is_dir() {
        logger.log(
            Level::Error,
            TARGETS,
            &format!("Unable to move files; not a directory: {}", src_dir.display()),
            None,
        );
        return false;
    }
    if !dest_dir.exists() && !mkdirs_safe(dest_dir, logger) {
        return false;
    }
    if !dest_dir.is_dir() {
        logger.log(
            Level::Error,
            TARGETS,
            &format!("Unable to move files; not a directory: {}", dest_dir.display()),
            None,
        );
        return false;
    }

    let Some(mut files) = list_files_safe(src_dir, logger) else {
        return false;
    };
    files.sort_by(|a, b| natural_name_order(a, b));

    let mut all_moved = true;
    for file in files.into_iter().filter(|f| f.is_file()) {
        let Some(name) = file.file_name() else {
            continue;
        };
        if let Err(e) = move_file(&file, &dest_dir.join(name)) {
            logger.log(
                Level::Error,
                TARGETS,
                &format!("Unable to move file: {}", file.display()),
                Some(&e),
            );
            all_moved = false;
        }
    }
    all_moved
}

/// Order numeric names (batch timestamps) numerically, the rest lexically
pub fn natural_name_order(a: &Path, b: &Path) -> std::cmp::Ordering {
    let key = |p: &Path| {
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        (name.parse::<i64>().ok(), name.to_string())
    };
    match (key(a), key(b)) {
        ((Some(x), _), (Some(y), _)) => x.cmp(&y),
        ((Some(_), _), (None, _)) => std::cmp::Ordering::Less,
        ((None, _), (Some(_), _)) => std::cmp::Ordering::Greater,
        ((None, x), (None, y)) => x.cmp(&y),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;
    use vigil_logging::MemoryLogger;

    use super::*;

    fn logger() -> (SharedLogger, Arc<MemoryLogger>) {
        let memory = Arc::new(MemoryLogger::new());
        (memory.clone(), memory)
    }

    #[test]
    fn test_write_append_and_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");

        write_bytes(&path, b"ab", true).unwrap();
        write_bytes(&path, b"cd", true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abcd");

        write_bytes(&path, b"x", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_information");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("user_information.tmp").exists());
    }

    #[test]
    fn test_move_files_preserves_content() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("100"), b"a").unwrap();
        fs::write(src.join("200"), b"b").unwrap();
        let (logger, _) = logger();

        assert!(move_files_safe(&src, &dest, &logger));
        assert_eq!(fs::read(dest.join("100")).unwrap(), b"a");
        assert_eq!(fs::read(dest.join("200")).unwrap(), b"b");
        assert!(list_files_safe(&src, &logger).unwrap().is_empty());
    }

    #[test]
    fn test_move_onto_existing_appends() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dest")).unwrap();
        let src = dir.path().join("100");
        let dest = dir.path().join("dest").join("100");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        move_file(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"oldnew");
        assert!(!src.exists());
    }

    #[test]
    fn test_retried_append_after_emptied_source_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("100"), b"oldnew").unwrap();
        // Left behind by an attempt that appended but couldn't remove the source
        fs::write(src.join("100"), b"").unwrap();
        fs::write(src.join("200"), b"b").unwrap();
        let (logger, _) = logger();

        assert!(move_files_safe(&src, &dest, &logger));
        assert_eq!(fs::read(dest.join("100")).unwrap(), b"oldnew");
        assert_eq!(fs::read(dest.join("200")).unwrap(), b"b");
        assert!(list_files_safe(&src, &logger).unwrap().is_empty());
    }

    #[test]
    fn test_move_onto_existing_snapshot_replaces() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(src.join("user_information"), b"new").unwrap();
        fs::write(dest.join("user_information"), b"old").unwrap();
        let (logger, _) = logger();

        assert!(move_files_safe(&src, &dest, &logger));
        assert_eq!(fs::read(dest.join("user_information")).unwrap(), b"new");
    }

    #[test]
    fn test_move_missing_source_is_noop() {
        let dir = TempDir::new().unwrap();
        let (logger, memory) = logger();
        assert!(move_files_safe(
            &dir.path().join("missing"),
            &dir.path().join("dest"),
            &logger
        ));
        assert!(memory.contains(Level::Debug, "Nothing to move"));
    }

    #[test]
    fn test_delete_safe_handles_dirs_and_missing() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("f"), b"x").unwrap();
        let (logger, memory) = logger();

        assert!(delete_safe(&dir.path().join("a"), &logger));
        assert!(!dir.path().join("a").exists());
        assert!(delete_safe(&dir.path().join("a"), &logger));
        assert!(memory.is_empty());
    }

    #[test]
    fn test_natural_name_order() {
        let mut files = vec![
            PathBuf::from("/d/900"),
            PathBuf::from("/d/1000"),
            PathBuf::from("/d/other"),
            PathBuf::from("/d/1000_metadata"),
        ];
        files.sort_by(|a, b| natural_name_order(a, b));
        assert_eq!(
            files,
            vec![
                PathBuf::from("/d/900"),
                PathBuf::from("/d/1000"),
                PathBuf::from("/d/1000_metadata"),
                PathBuf::from("/d/other"),
            ]
        );
    }

    #[test]
    fn test_len_of_missing_file_is_zero() {
        let dir = TempDir::new().unwrap();
        let (logger, memory) = logger();
        assert_eq!(len_safe(&dir.path().join("missing"), &logger), 0);
        assert!(memory.is_empty());
    }
}
