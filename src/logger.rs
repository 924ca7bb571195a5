use std::fs::OpenOptions;
use std::io::{ self, Write };
use std::sync::Mutex;
use chrono::Utc;

// Ordering matters for filtering (Debug < Info < Warning < Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl LogLevel {
    fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append-only file logger shared across the capture, pipeline, dispatcher
/// and watchdog threads. Errors are echoed to stderr as well, since they
/// usually precede a process exit.
pub struct Logger {
    file_path: String,
    file_mutex: Mutex<()>,
    min_level: LogLevel,
}

impl Logger {
    pub fn new(file_path: &str, min_level: LogLevel) -> Result<Self, io::Error> {
        // ensure the file exists up front so later appends can't surprise us
        OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(Logger {
            file_path: file_path.to_string(),
            file_mutex: Mutex::new(()),
            min_level,
        })
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), io::Error> {
        if level < self.min_level {
            return Ok(());
        }

        let _guard = self.file_mutex.lock().unwrap();

        let line = format!(
            "[{}] [{}] {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            level.as_str(),
            message
        );

        if level == LogLevel::Error {
            eprint!("{}", line);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn debug(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Debug, message)
    }
    pub fn info(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Info, message)
    }
    pub fn warn(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Warning, message)
    }
    pub fn error(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Error, message)
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("sound-mouse-logtest-{}-{}.log", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn filters_below_min_level() {
        let path = temp_log("filter");
        let logger = Logger::new(&path, LogLevel::Warning).unwrap();
        logger.debug("dropped").unwrap();
        logger.info("dropped").unwrap();
        logger.warn("kept").unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(!body.contains("dropped"));
        assert!(body.contains("kept"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn lines_carry_level_tag() {
        let path = temp_log("tag");
        let logger = Logger::new(&path, LogLevel::Debug).unwrap();
        logger.info("hello").unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("[INFO] hello"));
        let _ = std::fs::remove_file(&path);
    }
}
