//! Cross-cutting command metadata.

use serde::{Deserialize, Serialize};

/// Cross-cutting metadata passed alongside a command.
///
/// Carries audit trail and correlation information without polluting the
/// `Command` or `DomainEvent` types. Fields are stamped onto
/// [`EventMetadata`](crate::event::EventMetadata) when events are appended.
///
/// # Examples
///
/// ```
/// use portfolio_es::CommandContext;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123");
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user ID or the
    /// broker service reporting a trade).
    pub actor: Option<String>,
    /// Correlation ID for tracing a request across services.
    pub correlation_id: Option<String>,
}

impl CommandContext {
    /// Set the actor identity.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
