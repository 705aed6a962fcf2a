use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::MultiPartAnswer;

/// Codename of the platform that serves turns submitted over the HTTP API.
pub const DEFAULT_PLATFORM: &str = "default_platform";

/// Transport a bot talks to its user through.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Stable identifier used in bot configuration (e.g. "default_platform").
    fn codename(&self) -> &str;

    /// Push an answer to the chat on this platform.
    async fn deliver(&self, chat_id: i64, answer: &MultiPartAnswer) -> Result<()>;
}

/// The HTTP API platform. Answers travel back in the API response, so there
/// is nothing to push.
#[derive(Debug, Default)]
pub struct ApiPlatform;

#[async_trait]
impl Platform for ApiPlatform {
    fn codename(&self) -> &str {
        DEFAULT_PLATFORM
    }

    async fn deliver(&self, chat_id: i64, answer: &MultiPartAnswer) -> Result<()> {
        debug!(
            "Answer for chat {} returned via API ({} chars, {} button rows)",
            chat_id,
            answer.text.len(),
            answer.buttons.len()
        );
        Ok(())
    }
}
