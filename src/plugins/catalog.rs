//! Closed set of plugins this build knows how to construct.

use super::builtin::{ping_factory, PING_PLUGIN};
use super::movie_download::{movie_download_factory, MOVIE_DOWNLOAD_PLUGIN};
use super::plugin::PluginFactory;

/// Names accepted in `plugins.enabled`.
pub const KNOWN_PLUGINS: &[&str] = &[PING_PLUGIN, MOVIE_DOWNLOAD_PLUGIN];

/// Factory for the configured plugin `name`, if this build ships it.
pub fn factory_for(name: &str) -> Option<Box<dyn PluginFactory>> {
    match name {
        PING_PLUGIN => Some(Box::new(ping_factory())),
        MOVIE_DOWNLOAD_PLUGIN => Some(Box::new(movie_download_factory())),
        _ => None,
    }
}
