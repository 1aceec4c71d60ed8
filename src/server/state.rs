//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::domain::config::RelayConfig;
use crate::domain::errors::RelayResult;
use crate::llm::{CompletionBackend, OllamaChatClient};
use crate::orchestrator::TurnOrchestrator;
use crate::render::{ResponseNormalizer, TranscriptPage};
use crate::session::{ConversationStore, SessionResolver};

/// Shared application state.
pub struct AppState {
    /// Effective configuration.
    pub config: RelayConfig,
    /// Session identity resolver.
    pub resolver: SessionResolver,
    /// Chat exchange runner; owns the conversation store.
    pub orchestrator: TurnOrchestrator,
    /// Transcript page template.
    pub page: TranscriptPage,
}

impl AppState {
    /// Create state talking to the configured Ollama backend.
    ///
    /// # Errors
    /// Returns an error if the HTTP client or the page template cannot be built.
    pub fn new(config: RelayConfig) -> RelayResult<Arc<Self>> {
        let backend = Arc::new(OllamaChatClient::new(&config.backend)?);
        Self::with_backend(config, Arc::new(ConversationStore::new()), backend)
    }

    /// Create state over an explicit store and backend.
    ///
    /// # Errors
    /// Returns an error if the page template cannot be built.
    pub fn with_backend(
        config: RelayConfig,
        store: Arc<ConversationStore>,
        backend: Arc<dyn CompletionBackend>,
    ) -> RelayResult<Arc<Self>> {
        let orchestrator = TurnOrchestrator::new(
            store,
            backend,
            ResponseNormalizer::new(config.render.reasoning),
            config.orchestrator.failure_policy,
        );

        Ok(Arc::new(Self {
            resolver: SessionResolver::new(config.session.cookie_max_age_seconds),
            orchestrator,
            page: TranscriptPage::new()?,
            config,
        }))
    }

    /// The conversation store.
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        self.orchestrator.store()
    }
}
