use std::fs::OpenOptions;
use std::io::{ self, Write };
use std::str::FromStr;
use std::sync::Mutex;
use chrono::Utc;

// order of log (Debug < Info < Warning < Error).
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
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other =>
                Err(format!("Invalid log level: {}. Valid options: debug, info, warning, error", other)),
        }
    }
}

/// Appends timestamped lines to `file_path`, or to stderr when the path is
/// empty.
pub struct Logger {
    file_path: String,
    write_mutex: Mutex<()>,
    min_level: LogLevel,
}

impl Logger {
    pub fn new(file_path: &str, min_level: LogLevel) -> Result<Self, io::Error> {
        if !file_path.is_empty() {
            // ensure file exists
            OpenOptions::new().create(true).append(true).open(file_path)?;
        }
        Ok(Logger {
            file_path: file_path.to_string(),
            write_mutex: Mutex::new(()),
            min_level,
        })
    }

    pub fn stderr(min_level: LogLevel) -> Self {
        Logger { file_path: String::new(), write_mutex: Mutex::new(()), min_level }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn format_line(level: LogLevel, message: &str) -> String {
        format!(
            "[{}] [{}] {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            level.as_str(),
            message
        )
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }
        let line = Self::format_line(level, message);

        // a panicked writer leaves nothing half-done behind the unit guard
        let _guard = match self.write_mutex.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.file_path.is_empty() {
            let mut err = io::stderr().lock();
            err.write_all(line.as_bytes())?;
            return err.flush();
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    pub fn log_fmt(&self, level: LogLevel, args: std::fmt::Arguments) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }
        self.log(level, &format!("{}", args))
    }

    pub fn info(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Info, message)
    }
    pub fn debug(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Info, args)
    }
    pub fn warn_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Warning, args)
    }
    pub fn error_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Error, args)
    }
    pub fn debug_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Debug, args)
    }
}

#[macro_export]
macro_rules! log_info {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.info_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_warn {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.warn_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_error {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.error_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_debug {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.debug_fmt(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_log(name: &str) -> String {
        let p = std::env::temp_dir().join(format!("ambient-fp-{}-{}.log", name, std::process::id()));
        let _ = fs::remove_file(&p);
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn parses_levels() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("Error".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn filters_below_min_level() {
        let path = temp_log("filter");
        let logger = Logger::new(&path, LogLevel::Warning).unwrap();
        logger.debug("hidden debug").unwrap();
        logger.info("hidden info").unwrap();
        crate::log_warn!(logger, "shown {}", 1).unwrap();
        crate::log_error!(logger, "shown error").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let _ = fs::remove_file(&path);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[WARN] shown 1"));
        assert!(lines[1].contains("[ERROR] shown error"));
        assert!(!text.contains("hidden"));
    }
}
