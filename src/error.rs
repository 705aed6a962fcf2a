use std::time::Duration;

use thiserror::Error;

/// Errors a dialog turn can end with.
///
/// The not-found variants are raised before anything is written. Every other
/// variant may leave the inbound user message persisted without an answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("dialog {0} not found")]
    DialogNotFound(i64),

    #[error("bot '{0}' is not registered")]
    BotNotFound(String),

    #[error("platform '{platform}' is not available for bot '{bot}'")]
    PlatformNotFound { bot: String, platform: String },

    /// The bot's `handle_update` returned an error.
    #[error("bot '{bot}' failed to handle update: {source}")]
    Handler {
        bot: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("bot '{bot}' did not answer within {timeout:?}")]
    HandlerTimeout { bot: String, timeout: Duration },

    /// `on_answer_sent` failed after the assistant message was stored.
    #[error("answer hook of bot '{bot}' failed: {source}")]
    AnswerHook {
        bot: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TurnError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TurnError::DialogNotFound(_)
                | TurnError::BotNotFound(_)
                | TurnError::PlatformNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(TurnError::DialogNotFound(3).is_not_found());
        assert!(TurnError::BotNotFound("ghost-bot".into()).is_not_found());
        assert!(TurnError::PlatformNotFound {
            bot: "echo".into(),
            platform: "fax".into(),
        }
        .is_not_found());
        assert!(!TurnError::HandlerTimeout {
            bot: "echo".into(),
            timeout: Duration::from_secs(1),
        }
        .is_not_found());
    }

    #[test]
    fn test_handler_error_message_includes_cause() {
        let err = TurnError::Handler {
            bot: "echo".into(),
            source: anyhow::anyhow!("upstream unavailable").into(),
        };
        assert_eq!(
            err.to_string(),
            "bot 'echo' failed to handle update: upstream unavailable"
        );
    }
}
