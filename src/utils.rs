use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::Local;
use log::{LevelFilter, Record};

/// Minimal logger writing to a file when a path is given, stderr otherwise.
/// The library itself only emits `log` records; installing a logger is the
/// binary's job.
pub struct FileLogger {
    sink: Option<std::fs::File>,
}

impl FileLogger {
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let sink = match path {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };
        Ok(FileLogger { sink })
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:5} [{}] {}\n",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        match &self.sink {
            Some(file) => {
                if let Ok(mut file) = file.try_clone() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
            None => {
                let _ = std::io::stderr().write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.sink {
            if let Ok(mut file) = file.try_clone() {
                let _ = file.flush();
            }
        }
    }
}

pub fn setup_logging(path: Option<&Path>, level: LevelFilter) -> Result<()> {
    let logger = FileLogger::new(path)?;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
    log::info!(
        "{} {} logging at {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        level
    );
    Ok(())
}
