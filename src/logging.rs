// raprs - Logging Module
// Timestamped log lines to the console and/or a log file, installed
// behind the `log` facade

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Maps the 0-9 numeric levels used in config files to a `log` filter:
/// 0-3 error, 4 warn, 5-6 info, 7 debug, 8-9 trace
pub fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 | 6 => LevelFilter::Info,
        7 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub struct Logger {
    file: Option<Mutex<File>>,
    level: LevelFilter,
    log_to_console: bool,
}

impl Logger {
    pub fn new(
        logfile: Option<&str>,
        log_level: u8,
        log_to_console: bool,
    ) -> Result<Self, std::io::Error> {
        let file = match logfile {
            Some(path) => Some(Mutex::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => None,
        };
        Ok(Logger {
            file,
            level: level_filter(log_level),
            log_to_console,
        })
    }

    pub fn format_line(level: Level, message: &str) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        format!("[{}] [{}] {}\n", timestamp, level, message)
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let log_line = Self::format_line(record.level(), &record.args().to_string());
        if self.log_to_console {
            print!("{}", log_line);
        }
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(log_line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Installs the process-wide logger
pub fn init(
    logfile: Option<&str>,
    log_level: u8,
    log_to_console: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let logger = Logger::new(logfile, log_level, log_to_console)?;
    let level = logger.level;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}
