//! Logging handle threaded through the registry, dispatcher and plugins.
//!
//! Records go through the `log` facade; the binary installs a
//! `tracing-subscriber` that picks them up. The handle only carries the log
//! target so every component can be given its own scope at construction time
//! instead of reaching for a global logger.

use std::fmt;
use std::sync::Arc;

use log::Level;

/// Root target used by [`Logger::root`].
pub const ROOT_TARGET: &str = "homemaid";

/// Scoped logger handle.
///
/// Cloning is cheap (shared target string).
#[derive(Clone)]
pub struct Logger {
    target: Arc<str>,
    enabled: bool,
}

impl Logger {
    /// Create a logger writing under `target`.
    pub fn new(target: impl AsRef<str>) -> Self {
        Self {
            target: Arc::from(target.as_ref()),
            enabled: true,
        }
    }

    /// Logger for the application root target.
    pub fn root() -> Self {
        Self::new(ROOT_TARGET)
    }

    /// A logger that drops every record.
    pub fn silent() -> Self {
        Self {
            target: Arc::from(ROOT_TARGET),
            enabled: false,
        }
    }

    /// Derive a nested logger (`parent::name`).
    pub fn child(&self, name: &str) -> Self {
        Self {
            target: Arc::from(format!("{}::{}", self.target, name)),
            enabled: self.enabled,
        }
    }

    /// The log target of this handle.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Log a message at `level`.
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        if self.enabled {
            log::log!(target: &*self.target, level, "{}", message);
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .field("enabled", &self.enabled)
            .finish()
    }
}
