//! # HomeMaid
//!
//! Message-driven command router. A free-text request (an email, an HTTP
//! call) is handed to a language model, the answer is normalized into a list
//! of `{"action": ...}` commands, and each command is routed to the plugin
//! that claims it.
//!
//! ```text
//! transport ─▶ Dispatcher ─▶ Interpreter ─▶ normalizer ─▶ PluginRegistry ─▶ Plugin
//!     ▲                                                                     │
//!     └──────────── reply ◀── ReplyComposer ◀── outcomes ◀──────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod llm;
pub mod normalizer;
pub mod plugins;
pub mod server;
pub mod storage;
pub mod transport;
pub mod utilities;

pub use app::App;
pub use config::{AppConfig, ConfigManager};
pub use dispatcher::{Dispatcher, DispatcherStats, ErrorKind, InboundMessage};
pub use llm::{Interpreter, OllamaInterpreter};
pub use normalizer::{normalize, StructuredCommand};
pub use plugins::{Plugin, PluginRegistry, PluginResult};
pub use utilities::logger::Logger;

/// Crate version reported by the HTTP channel.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
