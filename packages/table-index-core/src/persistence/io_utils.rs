//! I/O helpers for snapshot files.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::{Result, SyncError};

/// Maps an I/O error onto a transient or permanent `SyncError`.
pub fn classify_io_error(error: std::io::Error, context: &str) -> SyncError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            SyncError::TransientIo(format!("{}: {}", context, error))
        }
        _ => SyncError::Io(format!("{}: {}", context, error)),
    }
}

/// Runs `operation`, retrying only transient I/O failures.
pub fn retry_io_operation<F, T>(
    operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err @ SyncError::TransientIo(_)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Transient I/O error in {} (attempt {}/{}): {}",
                    context,
                    attempt,
                    max_retries,
                    err
                );
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Writes `bytes` to `path` through a synced temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file =
        File::create(temp_path).map_err(|e| classify_io_error(e, "creating temp file"))?;
    file.write_all(bytes)
        .map_err(|e| classify_io_error(e, "writing temp file"))?;
    file.sync_all()
        .map_err(|e| classify_io_error(e, "syncing temp file"))?;

    fs::rename(temp_path, path).map_err(|e| classify_io_error(e, "renaming temp file"))
}
