//! Executes one dialog turn from an inbound user message to a stored answer.

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bots::{Bot, BotContext, BotResolver};
use crate::config::TurnConfig;
use crate::domain::{MultiPartAnswer, Photo, Update};
use crate::error::TurnError;
use crate::instance_lock::InstanceLocks;
use crate::memory::{Dialog, MemoryStore, Message, NewMessage, Role};
use crate::update::UpdateBuilder;

/// The user message of a turn, annotated with the answer it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnsweredMessage {
    #[serde(flatten)]
    pub message: Message,
    pub answer: Option<String>,
}

pub struct DialogTurnOrchestrator {
    store: MemoryStore,
    resolver: Arc<BotResolver>,
    locks: Arc<InstanceLocks>,
    runtime: Handle,
    turn: TurnConfig,
}

impl DialogTurnOrchestrator {
    pub fn new(
        store: MemoryStore,
        resolver: Arc<BotResolver>,
        locks: Arc<InstanceLocks>,
        runtime: Handle,
        turn: TurnConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            locks,
            runtime,
            turn,
        }
    }

    pub fn locks(&self) -> &Arc<InstanceLocks> {
        &self.locks
    }

    /// Run one turn for `dialog_id`, blocking the calling thread until it
    /// finishes.
    ///
    /// Must be called from a thread outside the async runtime (e.g. inside
    /// `spawn_blocking`); the turn itself runs on the runtime this
    /// orchestrator was built with.
    pub fn submit_message(
        &self,
        dialog_id: i64,
        text: String,
        photo: Option<Photo>,
    ) -> Result<AnsweredMessage, TurnError> {
        self.runtime.block_on(self.run_turn(dialog_id, text, photo))
    }

    async fn run_turn(
        &self,
        dialog_id: i64,
        text: String,
        photo: Option<Photo>,
    ) -> Result<AnsweredMessage, TurnError> {
        let dialog = self
            .store
            .load_dialog(dialog_id)
            .await?
            .ok_or(TurnError::DialogNotFound(dialog_id))?;

        let span = info_span!(
            "turn",
            turn_id = %Uuid::new_v4(),
            dialog_id,
            instance_id = dialog.instance.id
        );
        self.execute(dialog, text, photo).instrument(span).await
    }

    async fn execute(
        &self,
        dialog: Dialog,
        text: String,
        photo: Option<Photo>,
    ) -> Result<AnsweredMessage, TurnError> {
        // Held until this function returns, whichever way it returns.
        let _guard = self.locks.acquire(dialog.instance.id).await;

        let bot_codename = dialog.instance.bot_codename.clone();
        let (platform, factory) = self.resolver.resolve(&bot_codename, &self.turn.platform)?;
        let mut bot = factory(BotContext {
            dialog: dialog.clone(),
            platform,
            store: self.store.clone(),
        });

        let update = UpdateBuilder::new(&self.store)
            .build(&dialog, text, photo)
            .await?;

        let user_message = self.store_user_message(dialog.id, &update).await?;
        debug!(
            "Stored user message #{} for bot {}",
            user_message.sequence_id, bot_codename
        );

        let answer = self.handle_update(bot.as_mut(), &bot_codename, update).await?;

        match &answer {
            Some(answer) => {
                // Messages carry one photo; extra attachments are delivered
                // but not stored.
                if answer.attachments.len() > 1 {
                    warn!(
                        "Storing 1 of {} attachments from bot {}",
                        answer.attachments.len(),
                        bot_codename
                    );
                }
                let stored = self
                    .store
                    .append_message(
                        dialog.id,
                        NewMessage {
                            role: Role::Assistant,
                            content: answer.text.clone(),
                            photo: answer.attachments.first().cloned(),
                        },
                    )
                    .await?;
                debug!("Stored assistant message #{}", stored.sequence_id);

                bot.on_answer_sent(answer).await.map_err(|e| {
                    error!("Answer hook of bot {} failed: {:#}", bot_codename, e);
                    TurnError::AnswerHook {
                        bot: bot_codename.clone(),
                        source: e.into(),
                    }
                })?;
                info!(
                    "Turn answered ({} chars{})",
                    answer.text.len(),
                    if answer.is_continuation() {
                        ", continues"
                    } else {
                        ""
                    }
                );
            }
            None => info!("Turn finished without an answer"),
        }

        let message = self
            .store
            .latest_message(dialog.id, Role::User)
            .await?
            .unwrap_or(user_message);

        Ok(AnsweredMessage {
            message,
            answer: answer.map(|a| a.text),
        })
    }

    /// Persist the user side of `update`, failing if the dialog gained
    /// messages after the update was numbered.
    async fn store_user_message(
        &self,
        dialog_id: i64,
        update: &Update,
    ) -> Result<Message, TurnError> {
        let stored = self
            .store
            .append_message(
                dialog_id,
                NewMessage::user(update.text.clone(), update.photo.clone()),
            )
            .await?;
        if stored.sequence_id != update.sequence_id {
            error!(
                "Dialog {} was written outside its turn (expected #{}, got #{})",
                dialog_id, update.sequence_id, stored.sequence_id
            );
            return Err(anyhow::anyhow!(
                "dialog {} moved from sequence {} to {} outside the turn",
                dialog_id,
                update.sequence_id,
                stored.sequence_id
            )
            .into());
        }
        Ok(stored)
    }

    async fn handle_update(
        &self,
        bot: &mut dyn Bot,
        bot_codename: &str,
        update: Update,
    ) -> Result<Option<MultiPartAnswer>, TurnError> {
        let timeout = self.turn.handler_timeout();
        match tokio::time::timeout(timeout, bot.handle_update(update)).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => {
                error!("Bot {} failed to handle update: {:#}", bot_codename, e);
                Err(TurnError::Handler {
                    bot: bot_codename.to_string(),
                    source: e.into(),
                })
            }
            Err(_) => {
                warn!("Bot {} did not answer within {:?}", bot_codename, timeout);
                Err(TurnError::HandlerTimeout {
                    bot: bot_codename.to_string(),
                    timeout,
                })
            }
        }
    }
}
