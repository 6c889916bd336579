//! A `log::Log` backend that appends formatted lines to the file named by
//! configuration, since `simple_logger` only ever targets stdout/stderr.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::time::now_ms;

pub struct FileLogger {
    file: Mutex<fs::File>,
    level: LevelFilter,
}

impl FileLogger {
    fn new(path: &Path, level: LevelFilter) -> std::io::Result<FileLogger> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileLogger {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} [{}] {}\n",
            now_ms(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Opens (creating parent directories as needed) and installs `log_file`
/// as the process-wide logger at `level`.
pub fn init(log_file: &str, level: LevelFilter) -> Result<(), ChordLogError> {
    let logger = FileLogger::new(Path::new(log_file), level)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

#[derive(Debug)]
pub enum ChordLogError {
    Io(std::io::Error),
    Set(SetLoggerError),
}

impl std::fmt::Display for ChordLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChordLogError::Io(err) => write!(f, "log file error: {}", err),
            ChordLogError::Set(err) => write!(f, "logger already installed: {}", err),
        }
    }
}

impl std::error::Error for ChordLogError {}

impl From<std::io::Error> for ChordLogError {
    fn from(err: std::io::Error) -> Self {
        ChordLogError::Io(err)
    }
}

impl From<SetLoggerError> for ChordLogError {
    fn from(err: SetLoggerError) -> Self {
        ChordLogError::Set(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_enabled_lines_and_skips_below_threshold() {
        let dir = std::env::temp_dir().join(format!("chord-file-logger-test-{:?}", std::thread::current().id()));
        let path = dir.join("node.log");
        let logger = FileLogger::new(&path, LevelFilter::Info).unwrap();

        logger.log(
            &Record::builder()
                .args(format_args!("hello"))
                .level(log::Level::Info)
                .target("test")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("too noisy"))
                .level(log::Level::Debug)
                .target("test")
                .build(),
        );
        logger.flush();

        let mut contents = String::new();
        fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("hello"));
        assert!(!contents.contains("too noisy"));

        let _ = fs::remove_dir_all(&dir);
    }
}
