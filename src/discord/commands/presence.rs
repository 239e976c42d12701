// Bot presence.
//
// Discord-layer glue only: the presence line tells people which command to
// reach for, nothing in the core depends on it.

use poise::serenity_prelude as serenity;

/// Resets the bot's status to the default message.
pub fn reset_status(ctx: &serenity::Context) {
    let activity = serenity::ActivityData::watching("/gdrive");
    ctx.set_presence(Some(activity), serenity::OnlineStatus::Online);
}

/// Called once the bot is ready.
pub fn on_ready(ctx: &serenity::Context) {
    reset_status(ctx);
}
