//! Application loop: poll the transport, dispatch, audit, reply.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::{AppConfig, ConfigManager};
use crate::dispatcher::{Dispatcher, InboundMessage};
use crate::llm::{Interpreter, OllamaInterpreter};
use crate::plugins::{catalog, PluginRegistry};
use crate::server::AppState;
use crate::storage::{record_outcomes, AuditSink, SqliteAuditStore};
use crate::transport::{MessageTransport, ReplyComposer, TransportError};
use crate::utilities::logger::Logger;

pub struct App {
    config: AppConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    transport: Arc<dyn MessageTransport>,
    audit: Arc<dyn AuditSink>,
    composer: ReplyComposer,
    logger: Logger,
}

impl App {
    pub fn new(
        config: AppConfig,
        dispatcher: Dispatcher,
        transport: Arc<dyn MessageTransport>,
        audit: Arc<dyn AuditSink>,
        logger: Logger,
    ) -> Result<Self, TransportError> {
        let composer = ReplyComposer::new(config.system.app_name.clone())?;
        Ok(Self {
            config,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            transport,
            audit,
            composer,
            logger,
        })
    }

    /// Wire everything from configuration: Ollama interpreter, SQLite audit
    /// store, and every enabled plugin. `transport` is usually built with
    /// [`transport::from_settings`](crate::transport::from_settings).
    pub async fn from_config(
        manager: &ConfigManager,
        transport: Arc<dyn MessageTransport>,
    ) -> anyhow::Result<Self> {
        let config = manager.app_config()?;
        let logger = Logger::root();

        let interpreter = OllamaInterpreter::from_settings(&config.llm)?;
        if !interpreter.test_connection().await {
            logger.warn(format!(
                "Interpretation service at {} is not reachable yet",
                interpreter.host()
            ));
        }

        if !transport.test_connection().await {
            logger.warn("Message transport is not reachable yet, will retry on each poll");
        }

        let audit = Arc::new(SqliteAuditStore::new(&config.database.path)?);
        let registry = PluginRegistry::new(logger.child("registry"));
        let dispatcher = Dispatcher::new(registry, Box::new(interpreter), logger.child("dispatcher"));

        let app = Self::new(config, dispatcher, transport, audit, logger)?;
        app.register_enabled_plugins(manager).await;
        Ok(app)
    }

    /// Register every plugin listed in `plugins.enabled`.
    ///
    /// Unknown names and failed registrations are logged and skipped. Returns
    /// the names that were registered.
    pub async fn register_enabled_plugins(&self, manager: &ConfigManager) -> Vec<String> {
        let mut registered = Vec::new();
        let mut dispatcher = self.dispatcher.lock().await;

        for name in &self.config.plugins.enabled {
            let Some(factory) = catalog::factory_for(name) else {
                self.logger.warn(format!(
                    "Unknown plugin '{}' in configuration (known: {})",
                    name,
                    catalog::KNOWN_PLUGINS.join(", ")
                ));
                continue;
            };

            match dispatcher
                .registry_mut()
                .register(factory.as_ref(), manager.plugin_config(name))
                .await
            {
                Ok(()) => registered.push(name.clone()),
                Err(e) => self
                    .logger
                    .error(format!("Failed to register plugin {}: {}", name, e)),
            }
        }

        self.logger.info(format!(
            "Registered {}/{} enabled plugin(s)",
            registered.len(),
            self.config.plugins.enabled.len()
        ));
        registered
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<Mutex<Dispatcher>> {
        self.dispatcher.clone()
    }

    /// State for the HTTP channel, sharing this app's dispatcher and audit sink.
    pub fn http_state(&self) -> AppState {
        AppState::new(self.dispatcher.clone()).with_audit(self.audit.clone())
    }

    fn is_allowed(&self, sender: &str) -> bool {
        let allowed = &self.config.transport.allowed_senders;
        allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(sender))
    }

    /// Fetch and handle one batch of unread messages. Returns how many were
    /// dispatched.
    pub async fn poll_once(&self) -> Result<usize, TransportError> {
        let messages = self
            .transport
            .fetch_unread(self.config.transport.fetch_limit)
            .await?;

        let mut handled = 0;
        for message in messages {
            if !self.is_allowed(&message.sender) {
                self.logger.warn(format!(
                    "Blocked message from non-whitelisted sender: {}",
                    message.sender
                ));
                if let Err(e) = self.transport.mark_read(&message.id).await {
                    self.logger
                        .error(format!("Failed to mark {} as read: {}", message.id, e));
                }
                continue;
            }

            self.handle_message(&message).await;
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle_message(&self, message: &InboundMessage) {
        self.logger.info(format!(
            "Handling message from {}: {}",
            message.sender, message.subject
        ));

        let started = Instant::now();
        let results = {
            let dispatcher = self.dispatcher.lock().await;
            dispatcher.process_message(message).await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        record_outcomes(self.audit.as_ref(), message, &results, duration_ms);

        match self.composer.compose(message, &results) {
            Ok(reply) => {
                if let Err(e) = self
                    .transport
                    .send_reply(&message.sender, &reply.subject, &reply.body)
                    .await
                {
                    self.logger.error(format!("Failed to send reply: {}", e));
                } else if reply.all_succeeded {
                    self.logger.info("All commands succeeded, reply sent");
                } else {
                    self.logger.warn("Some commands failed, reply sent");
                }
            }
            Err(e) => self.logger.error(format!("Failed to compose reply: {}", e)),
        }

        if let Err(e) = self.transport.mark_read(&message.id).await {
            self.logger
                .error(format!("Failed to mark {} as read: {}", message.id, e));
        }
    }

    /// Poll until `shutdown` resolves, then clean up.
    ///
    /// Shutdown is only observed between batches, so no plugin is unloaded
    /// while it is executing.
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = Duration::from_secs(self.config.transport.poll_interval_secs);
        self.logger.info(format!(
            "{} is watching for messages (polling every {}s)",
            self.config.system.app_name, self.config.transport.poll_interval_secs
        ));
        if !self.config.transport.allowed_senders.is_empty() {
            self.logger.info(format!(
                "Allowed senders: {}",
                self.config.transport.allowed_senders.join(", ")
            ));
        }

        loop {
            if let Err(e) = self.poll_once().await {
                self.logger.error(format!("Polling failed: {}", e));
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Unload all plugins and disconnect the transport.
    pub async fn shutdown(&self) {
        self.logger.info("Shutting down");
        self.dispatcher.lock().await.shutdown().await;
        if let Err(e) = self.transport.disconnect().await {
            self.logger
                .error(format!("Error disconnecting transport: {}", e));
        }
    }
}
