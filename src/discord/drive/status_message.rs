// A Discord message that the core edits in place to show progress.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

use crate::core::drive::{DriveError, StatusChannel};
use crate::discord::commands::gdrive::{Context, Error};

pub struct MessageStatus {
    http: Arc<serenity::Http>,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
}

impl MessageStatus {
    /// Reply with `initial` and bind to the reply so later updates edit it.
    pub async fn post(ctx: Context<'_>, initial: &str) -> Result<Arc<Self>, Error> {
        let handle = ctx.say(initial).await?;
        let message = handle.message().await?;
        Ok(Arc::new(Self {
            http: ctx.serenity_context().http.clone(),
            channel_id: message.channel_id,
            message_id: message.id,
        }))
    }

    /// Replace the status text with the final result.
    pub async fn finish(&self, text: &str) -> Result<(), Error> {
        self.edit(text).await?;
        Ok(())
    }

    async fn edit(&self, text: &str) -> Result<(), serenity::Error> {
        self.channel_id
            .edit_message(
                &self.http,
                self.message_id,
                serenity::EditMessage::new().content(text),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusChannel for MessageStatus {
    async fn update(&self, text: &str) -> Result<(), DriveError> {
        self.edit(text)
            .await
            .map_err(|e| DriveError::Transfer(format!("Status update failed: {}", e)))
    }
}
