use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Bot, BotContext};
use crate::domain::{Button, MultiPartAnswer, Update, CONTINUE_CALLBACK};
use crate::memory::Role;

/// Longest answer part, a little under common chat message limits.
const MAX_ANSWER_LEN: usize = 4000;

/// Repeats what the user said. Long input is answered in parts, with a
/// `/continue` button to fetch the rest on the next turn.
pub struct EchoBot {
    ctx: BotContext,
    chat_id: Option<i64>,
}

impl EchoBot {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx, chat_id: None }
    }

    fn greeting(&self) -> MultiPartAnswer {
        MultiPartAnswer::text(format!(
            "Hello, {}! Send me anything and I'll say it back.",
            self.ctx.dialog.instance.username
        ))
    }

    /// Text of the last assistant message that was cut short, if any.
    async fn pending_remainder(&self) -> Result<Option<String>> {
        let messages = self
            .ctx
            .store
            .list_messages(self.ctx.dialog.id)
            .await
            .context("Failed to load dialog history")?;

        // The user message of this turn is already stored, so the echoed
        // text we are continuing sits two messages back.
        let source = messages
            .iter()
            .rev()
            .skip(1)
            .find(|m| m.role == Role::User && m.content != CONTINUE_CALLBACK);
        let answered: usize = messages
            .iter()
            .rev()
            .skip(1)
            .take_while(|m| m.content == CONTINUE_CALLBACK || m.role != Role::User)
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.len())
            .sum();

        Ok(source.and_then(|m| {
            let rest = m.content.trim().get(answered..)?;
            (!rest.is_empty()).then(|| rest.to_string())
        }))
    }
}

/// Split `text` at a char boundary no later than `max_len`, preferring a
/// newline or space.
fn split_at_boundary(text: &str, max_len: usize) -> (&str, &str) {
    if text.len() <= max_len {
        return (text, "");
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let cut = text[..end]
        .rfind('\n')
        .or_else(|| text[..end].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(end);
    text.split_at(cut)
}

fn answer_for(text: &str) -> MultiPartAnswer {
    let (head, tail) = split_at_boundary(text, MAX_ANSWER_LEN);
    let answer = MultiPartAnswer::text(head);
    if tail.is_empty() {
        return answer;
    }
    MultiPartAnswer {
        continues: true,
        ..answer.with_buttons(vec![vec![Button {
            text: "Continue".to_string(),
            callback_data: CONTINUE_CALLBACK.to_string(),
        }]])
    }
}

#[async_trait]
impl Bot for EchoBot {
    async fn handle_update(&mut self, update: Update) -> Result<Option<MultiPartAnswer>> {
        self.chat_id = Some(update.chat_id);
        let text = update.text.trim();

        if text == "/start" {
            return Ok(Some(self.greeting()));
        }

        if text == CONTINUE_CALLBACK {
            return Ok(self.pending_remainder().await?.map(|rest| answer_for(&rest)));
        }

        if text.is_empty() {
            if update.photo.is_some() {
                return Ok(Some(MultiPartAnswer::text("Nice picture!")));
            }
            return Ok(None);
        }

        debug!("Echoing {} chars for chat {}", text.len(), update.chat_id);
        Ok(Some(answer_for(text)))
    }

    async fn on_answer_sent(&mut self, answer: &MultiPartAnswer) -> Result<()> {
        let chat_id = self.chat_id.unwrap_or(self.ctx.dialog.id);
        self.ctx.platform.deliver(chat_id, answer).await
    }
}
