use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

const LOG_BUFFER: usize = 256;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: String,
}

/// Subscription point for log records forwarded to the UI shell
#[derive(Clone)]
pub struct LogFeed {
    sender: broadcast::Sender<LogMessage>,
}

impl LogFeed {
    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }
}

pub struct KioskLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl KioskLogger {
    pub fn new(level: Level) -> (Self, LogFeed) {
        let (sender, _) = broadcast::channel(LOG_BUFFER);
        let feed = LogFeed {
            sender: sender.clone(),
        };
        (Self { sender, level }, feed)
    }

    pub fn init(level: Level) -> Result<LogFeed, SetLoggerError> {
        let (logger, feed) = KioskLogger::new(level);
        log::set_boxed_logger(Box::new(logger))
            .map(|()| log::set_max_level(level.to_level_filter()))?;
        Ok(feed)
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };

        // Nobody listening yet is not an error.
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for KioskLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}
