//! Transient values exchanged with bots during a turn.

use serde::{Deserialize, Serialize};

/// Callback data that marks a "continue" button.
pub const CONTINUE_CALLBACK: &str = "/continue";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUser {
    pub id: i64,
    pub username: String,
}

/// Normalized inbound event handed to a bot. Built fresh for every turn and
/// never stored as such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub chat_id: i64,
    pub text: String,
    /// Position the inbound message takes in its dialog.
    pub sequence_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Photo>,
    pub user: UpdateUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

/// A bot's reply for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiPartAnswer {
    pub text: String,
    /// Keyboard rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Photo>,
    /// Set when the bot has more to say on a follow-up turn.
    #[serde(default)]
    pub continues: bool,
}

impl MultiPartAnswer {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }

    /// True when the bot flagged a continuation, either explicitly or by
    /// offering a `/continue` button.
    pub fn is_continuation(&self) -> bool {
        self.continues
            || self
                .buttons
                .iter()
                .flatten()
                .any(|b| b.callback_data == CONTINUE_CALLBACK)
    }
}
