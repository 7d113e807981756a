use anyhow::Context;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 3;

/// Size-capped log file. When a write would push the active file past
/// `max_bytes`, it is renamed to `<path>.1` (older backups shift up to
/// `<path>.<max_files>`, the oldest is dropped) and a fresh file is opened.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_files: usize,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_bytes: max_bytes.max(1),
            max_files,
        })
    }

    fn backup(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_files > 0 {
            for index in (1..self.max_files).rev() {
                let from = self.backup(index);
                if from.exists() {
                    fs::rename(&from, self.backup(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Shared handle so every event goes through one rotation point
#[derive(Debug, Clone)]
pub struct SharedLogFile {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SharedLogFile {
    pub fn new(file: RotatingFile) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }
}

pub struct LogFileGuard<'a>(MutexGuard<'a, RotatingFile>);

impl Write for LogFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = LogFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileGuard(self.inner.lock())
    }
}

/// Console layer on stderr (stdout belongs to the dashboard) plus an optional
/// rotating file layer that also records the per-reading `telemetry` events.
/// `RUST_LOG` overrides the file filter.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let console_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(console_level);

    let file_layer = match log_file {
        Some(path) => {
            let file = RotatingFile::open(path, DEFAULT_MAX_BYTES, DEFAULT_MAX_FILES)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(if verbose { "debug" } else { "info" })
            });
            Some(
                fmt::layer()
                    .with_writer(SharedLogFile::new(file))
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        let mut file = RotatingFile::open(&path, 16, 2).unwrap();

        file.write_all(b"0123456789\n").unwrap();
        file.write_all(b"abcdefghij\n").unwrap();
        file.write_all(b"ABCDEFGHIJ\n").unwrap();
        file.write_all(b"last\n").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "ABCDEFGHIJ\nlast\n");
        assert_eq!(fs::read_to_string(dir.path().join("telemetry.log.1")).unwrap(), "abcdefghij\n");
        assert_eq!(fs::read_to_string(dir.path().join("telemetry.log.2")).unwrap(), "0123456789\n");
        assert!(!dir.path().join("telemetry.log.3").exists());
    }

    #[test]
    fn test_oversized_write_goes_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let mut file = RotatingFile::open(&path, 4, 1).unwrap();

        file.write_all(b"longer than the cap\n").unwrap();
        file.write_all(b"next\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "next\n");
        assert_eq!(fs::read_to_string(dir.path().join("big.log.1")).unwrap(), "longer than the cap\n");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("append.log");
        RotatingFile::open(&path, 1024, 3).unwrap().write_all(b"one\n").unwrap();
        RotatingFile::open(&path, 1024, 3).unwrap().write_all(b"two\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_shared_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.log");
        let shared = SharedLogFile::new(RotatingFile::open(&path, 1024, 3).unwrap());

        shared.make_writer().write_all(b"from one\n").unwrap();
        shared.clone().make_writer().write_all(b"from two\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "from one\nfrom two\n");
    }
}
