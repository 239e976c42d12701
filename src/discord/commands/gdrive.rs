// Discord commands for Google Drive transfers.
//
// **Notice the pattern:**
// 1. Post a status message and bind it as the job's status channel
// 2. Call `DriveService`
// 3. Replace the status message with the formatted result
//
// This layer is THIN - no transfer logic, just translation.

use crate::core::drive::{DriveError, DriveService, JobContext};
use crate::discord::drive::formatter::{self, ATTACHMENT_THRESHOLD, MESSAGE_LIMIT};
use crate::discord::drive::MessageStatus;
use crate::infra::aria2::Aria2Client;
use crate::infra::google_drive::{GoogleDriveClient, PublicShareClient};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub type BotDriveService = DriveService<GoogleDriveClient, PublicShareClient, Aria2Client>;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state for all commands.
pub struct Data {
    pub drive: Arc<BotDriveService>,
}

/// Root `/gdrive` command. Subcommands do the work.
#[poise::command(
    slash_command,
    subcommands(
        "upload", "download", "clone", "abort", "list", "mkdir", "rm", "check", "setdir",
        "cleardir", "size"
    )
)]
pub async fn gdrive(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(
        "Google Drive commands:\n\
        `/gdrive upload <paths/links>` - Upload local files or folders, mirror links or magnets\n\
        `/gdrive download <links/ids>` - Download Drive files to the bot's staging directory\n\
        `/gdrive clone <links/ids>` - Copy files or folders into your destination\n\
        `/gdrive abort` - Cancel your running transfer\n\
        `/gdrive list [name] [parent] [limit]` - Search the drive\n\
        `/gdrive mkdir <a;b>` - Create folders\n\
        `/gdrive rm <a;b>` - Permanently delete by name, link or id\n\
        `/gdrive check <a;b>` - Show metadata\n\
        `/gdrive setdir <folder>` / `/gdrive cleardir` - Change your upload destination\n\
        `/gdrive size <target>` - Total size of a file or folder",
    )
    .await?;
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

async fn start_job(ctx: Context<'_>, initial: &str) -> Result<(Arc<MessageStatus>, JobContext), Error> {
    let status = MessageStatus::post(ctx, initial).await?;
    let job = ctx
        .data()
        .drive
        .begin_job(ctx.author().id.get(), status.clone())
        .await;
    tracing::info!(
        user_id = ctx.author().id.get(),
        job_id = %job.job_id,
        command = %ctx.invoked_command_name(),
        "Drive job started"
    );
    Ok((status, job))
}

/// Put `text` into the status message, spilling into follow-ups past the limit.
async fn deliver(ctx: Context<'_>, status: &MessageStatus, text: &str) -> Result<(), Error> {
    let mut chunks = formatter::split_message(text, MESSAGE_LIMIT).into_iter();
    let first = chunks.next().unwrap_or_default();
    status.finish(&first).await?;
    for chunk in chunks {
        ctx.say(chunk).await?;
    }
    Ok(())
}

fn index(ctx: Context<'_>) -> impl Fn(&str, bool) -> Option<String> + '_ {
    move |name: &str, is_folder: bool| ctx.data().drive.index_link(name, is_folder)
}

// ============================================================================
// TRANSFERS
// ============================================================================

/// Upload local paths, or fetch links and magnets and upload the result.
#[poise::command(slash_command)]
pub async fn upload(
    ctx: Context<'_>,
    #[description = "Space-separated local paths, URLs, magnets or Drive links"] locators: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Processing upload...`").await?;
    let report = ctx.data().drive.ingest(&job, &locators).await;
    deliver(ctx, &status, &formatter::format_batch(&report, &index(ctx))).await
}

/// Download Drive files into the staging directory.
#[poise::command(slash_command)]
pub async fn download(
    ctx: Context<'_>,
    #[description = "Space-separated Drive links or ids"] locators: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Processing download...`").await?;
    let report = ctx.data().drive.download(&job, &locators).await;
    deliver(ctx, &status, &formatter::format_batch(&report, &index(ctx))).await
}

/// Copy Drive files or folders into your destination.
#[poise::command(slash_command)]
pub async fn clone(
    ctx: Context<'_>,
    #[description = "Space-separated Drive links or ids"] locators: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Processing clone...`").await?;
    let report = ctx.data().drive.clone_remote(&job, &locators).await;
    deliver(ctx, &status, &formatter::format_batch(&report, &index(ctx))).await
}

/// Cancel your running transfer and any external downloads.
#[poise::command(slash_command)]
pub async fn abort(ctx: Context<'_>) -> Result<(), Error> {
    let triggered = ctx.data().drive.abort(ctx.author().id.get()).await;
    let reply = if triggered {
        "`[ABORT]`\n\n`Status` : **OK** - cancellation requested."
    } else {
        "`[ABORT]`\n\n`Status` : **OK** - nothing was running."
    };
    ctx.say(reply).await?;
    Ok(())
}

// ============================================================================
// MANAGEMENT
// ============================================================================

/// Search the drive by name and/or parent folder, newest first.
#[poise::command(slash_command)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Name contains"] name: Option<String>,
    #[description = "Parent folder link or id"] parent: Option<String>,
    #[description = "Maximum results (1-1000, default 25)"] limit: Option<u32>,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Loading...`").await?;
    let text = match ctx
        .data()
        .drive
        .list(&job, name.as_deref(), parent.as_deref(), limit)
        .await
    {
        Ok(items) => formatter::format_listing(&items, &index(ctx)),
        Err(e) => formatter::format_error("GDRIVE - LIST", &e),
    };

    if text.chars().count() > ATTACHMENT_THRESHOLD {
        status.finish("`[GDRIVE - LIST]`\n\n`Status` : **OK** - see attached file.").await?;
        let attachment = serenity::CreateAttachment::bytes(text.into_bytes(), "result.txt");
        ctx.send(
            poise::CreateReply::default()
                .content("Google Drive Query List.")
                .attachment(attachment),
        )
        .await?;
        return Ok(());
    }
    deliver(ctx, &status, &text).await
}

/// Create `;`-separated folders in your destination.
#[poise::command(slash_command)]
pub async fn mkdir(
    ctx: Context<'_>,
    #[description = "Folder names separated by ;"] names: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Creating folders...`").await?;
    let text = match ctx.data().drive.make_folders(&job, &names).await {
        Ok(outcomes) => formatter::format_folders(&outcomes),
        Err(e) => formatter::format_error("FOLDER", &e),
    };
    deliver(ctx, &status, &text).await
}

/// Permanently delete by name, link or id (`;`-separated).
#[poise::command(slash_command)]
pub async fn rm(
    ctx: Context<'_>,
    #[description = "Names, links or ids separated by ;"] targets: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Deleting...`").await?;
    let text = match ctx.data().drive.remove(&job, &targets).await {
        Ok(results) => formatter::format_removed(&results),
        Err(e) => formatter::format_error("FILE/FOLDER", &e),
    };
    deliver(ctx, &status, &text).await
}

/// Show metadata by name, link or id (`;`-separated).
#[poise::command(slash_command)]
pub async fn check(
    ctx: Context<'_>,
    #[description = "Names, links or ids separated by ;"] targets: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Checking...`").await?;
    let text = match ctx.data().drive.inspect(&job, &targets).await {
        Ok(results) => formatter::format_inspected(&results),
        Err(e) => formatter::format_error("FILE/FOLDER", &e),
    };
    deliver(ctx, &status, &text).await
}

/// Total size of a file or a whole folder tree.
#[poise::command(slash_command)]
pub async fn size(
    ctx: Context<'_>,
    #[description = "Name, link or id"] target: String,
) -> Result<(), Error> {
    let (status, job) = start_job(ctx, "`Calculating size...`").await?;
    let text = match ctx.data().drive.size_of(&job, &target).await {
        Ok((object, total)) => formatter::format_object(&object, Some(total)),
        Err(e) => formatter::format_error("FILE/FOLDER", &e),
    };
    deliver(ctx, &status, &text).await
}

/// Upload into this folder instead of the default one.
#[poise::command(slash_command)]
pub async fn setdir(
    ctx: Context<'_>,
    #[description = "Folder link or id"] folder: String,
) -> Result<(), Error> {
    let text = match ctx
        .data()
        .drive
        .set_destination(ctx.author().id.get(), &folder)
        .await
    {
        Ok(id) => format!(
            "`[FOLDER - SET]`\n\n`Status` : **OK** - uploads now go to [this folder]({}).",
            crate::core::drive::folder_link(&id)
        ),
        Err(e) => set_destination_error(&e),
    };
    ctx.say(text).await?;
    Ok(())
}

/// Go back to the default upload folder.
#[poise::command(slash_command)]
pub async fn cleardir(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match ctx.data().drive.clear_destination(ctx.author().id.get()).await {
        Some(_) => "`[FOLDER - RESET]`\n\n`Status` : **OK** - using the default folder again.",
        None => "`[FOLDER - RESET]`\n\n`Status` : **OK** - no custom folder was set.",
    };
    ctx.say(reply).await?;
    Ok(())
}

fn set_destination_error(error: &DriveError) -> String {
    match error {
        DriveError::InvalidInput(reason) => format!(
            "`[FOLDER - SET]`\n\n`Status` : **BAD**\n`Reason` : {}",
            reason
        ),
        other => formatter::format_error("FOLDER - SET", other),
    }
}
