//! Chat gateway facade: the one entry point for the HTTP layer

use std::sync::Arc;

use crate::error::GatewayError;
use crate::failover::{FailoverConfig, FailoverController};
use crate::health::ProviderStatus;
use crate::registry::ProviderRegistry;
use crate::stream::TokenStream;
use crate::types::ChatMessage;

#[derive(Debug, Clone)]
pub struct ChatGateway {
    controller: FailoverController,
}

impl ChatGateway {
    /// Create a gateway over a populated registry
    pub fn new(registry: ProviderRegistry, config: FailoverConfig) -> Result<Self, GatewayError> {
        if registry.is_empty() {
            return Err(GatewayError::NoProvidersRegistered);
        }
        Ok(Self {
            controller: FailoverController::new(Arc::new(registry), config),
        })
    }

    /// Validate `messages` and start a streamed response.
    ///
    /// Validation errors are returned immediately without contacting any
    /// provider. Provider failures arrive through the returned stream.
    pub fn chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, GatewayError> {
        validate(&messages)?;
        Ok(self.controller.chat(messages))
    }

    pub fn provider_count(&self) -> usize {
        self.controller.registry().len()
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.controller.registry().statuses()
    }

    pub fn controller(&self) -> &FailoverController {
        &self.controller
    }
}

/// Reject empty conversations and blank messages
pub fn validate(messages: &[ChatMessage]) -> Result<(), GatewayError> {
    if messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "conversation must contain at least one message".to_string(),
        ));
    }
    if let Some(pos) = messages.iter().position(|m| m.content.trim().is_empty()) {
        return Err(GatewayError::InvalidRequest(format!(
            "message {} ({}) has empty content",
            pos, messages[pos].role
        )));
    }
    Ok(())
}
