//! Refill kiosk library
//! Bluetooth scale link and the refill weighing flow of a bulk-product kiosk.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

use log::{Level, info};

pub use config::KioskConfig;
pub use state::KioskState;

/// Installs the kiosk logger. Falls back to `env_logger` if a logger is
/// already installed; the returned feed then stays silent.
pub fn setup_logging(level: Level) -> logging::LogFeed {
    match logging::KioskLogger::init(level) {
        Ok(feed) => {
            info!("Logging initialized");
            feed
        }
        Err(_) => {
            let _ = env_logger::builder()
                .filter_level(level.to_level_filter())
                .try_init();
            logging::KioskLogger::new(level).1
        }
    }
}
