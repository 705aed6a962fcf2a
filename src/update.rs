use anyhow::Result;

use crate::domain::{Photo, Update, UpdateUser};
use crate::memory::{Dialog, MemoryStore};

/// Builds the [`Update`] a bot receives for one turn.
pub struct UpdateBuilder<'a> {
    store: &'a MemoryStore,
}

impl<'a> UpdateBuilder<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    /// The sequence id is the dialog's current message count, i.e. the
    /// position the inbound message is about to take. Only meaningful while
    /// the dialog's instance lock is held.
    pub async fn build(
        &self,
        dialog: &Dialog,
        text: String,
        photo: Option<Photo>,
    ) -> Result<Update> {
        let sequence_id = self.store.count_messages(dialog.id).await?;
        Ok(Update {
            chat_id: dialog.id,
            text,
            sequence_id,
            photo,
            user: UpdateUser {
                id: dialog.instance.id,
                username: dialog.instance.username.clone(),
            },
        })
    }
}
