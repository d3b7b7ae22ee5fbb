//! Built-in `ping` plugin. Handy for checking the pipeline end to end.

use async_trait::async_trait;

use super::error::PluginError;
use super::plugin::{
    factory_fn, CommandContext, FnPluginFactory, Plugin, PluginConfig, PluginMetadata,
    PluginResult,
};
use crate::utilities::logger::Logger;

pub const PING_PLUGIN: &str = "ping";

/// Answers `ping` with `pong` and echoes `echo` commands back.
#[derive(Debug)]
pub struct PingPlugin {
    logger: Logger,
    ready: bool,
}

impl PingPlugin {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            ready: false,
        }
    }
}

#[async_trait]
impl Plugin for PingPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            PING_PLUGIN,
            "1.0.0",
            "Liveness check: replies pong, echoes text",
            &["ping", "echo"],
        )
        .with_author("HomeMaid")
    }

    async fn initialize(&mut self) -> Result<(), PluginError> {
        self.ready = true;
        self.logger.debug("Ping plugin ready");
        Ok(())
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<PluginResult, PluginError> {
        match ctx.action() {
            Some("ping") => Ok(PluginResult::success("pong")),
            Some("echo") => Ok(match ctx.arg_str("text") {
                Some(text) => PluginResult::success(text).with("text", text),
                None => PluginResult::failure("Nothing to echo: 'text' is missing"),
            }),
            other => Err(PluginError::Execution(format!(
                "Unsupported action: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    async fn cleanup(&mut self) -> Result<(), PluginError> {
        self.ready = false;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.ready
    }
}

pub type BuildFn = fn(PluginConfig, Logger) -> Result<Box<dyn Plugin>, PluginError>;

fn build(_config: PluginConfig, logger: Logger) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(PingPlugin::new(logger)))
}

/// Factory for [`PingPlugin`].
pub fn ping_factory() -> FnPluginFactory<BuildFn> {
    factory_fn(PING_PLUGIN, build as BuildFn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::StructuredCommand;
    use crate::plugins::PluginFactory;
    use chrono::Utc;
    use serde_json::json;

    fn ctx(command: serde_json::Value) -> CommandContext {
        CommandContext {
            sender: "me@home".into(),
            subject: "test".into(),
            body: String::new(),
            command: StructuredCommand::new(command),
            timestamp: Utc::now(),
            config: PluginConfig::new(),
            logger: Logger::silent(),
        }
    }

    fn ready_plugin() -> PingPlugin {
        let mut plugin = PingPlugin::new(Logger::silent());
        tokio_test::block_on(plugin.initialize()).unwrap();
        plugin
    }

    #[test]
    fn test_ping_pongs() {
        let plugin = ready_plugin();
        let result = tokio_test::block_on(plugin.execute(&ctx(json!({"action": "ping"})))).unwrap();
        assert!(result.success);
        assert_eq!(result.message, "pong");
    }

    #[test]
    fn test_echo_requires_text() {
        let plugin = ready_plugin();
        let ok = tokio_test::block_on(plugin.execute(&ctx(json!({"action": "echo", "text": "hi"}))))
            .unwrap();
        assert_eq!(ok.message, "hi");

        let missing =
            tokio_test::block_on(plugin.execute(&ctx(json!({"action": "echo"})))).unwrap();
        assert!(!missing.success);
    }

    #[test]
    fn test_health_follows_lifecycle() {
        let mut plugin = PingPlugin::new(Logger::silent());
        assert!(!tokio_test::block_on(plugin.health_check()));
        tokio_test::block_on(plugin.initialize()).unwrap();
        assert!(tokio_test::block_on(plugin.health_check()));
        tokio_test::block_on(plugin.cleanup()).unwrap();
        assert!(!tokio_test::block_on(plugin.health_check()));
    }

    #[test]
    fn test_factory_builds_named_plugin() {
        let factory = ping_factory();
        assert_eq!(factory.name(), PING_PLUGIN);
        let plugin = factory.create(PluginConfig::new(), Logger::silent()).unwrap();
        assert_eq!(plugin.metadata().commands, vec!["ping", "echo"]);
    }
}
