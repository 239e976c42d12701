// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Transfer logic (platform-agnostic)
// - `infra/` = Implementations of core traits (Drive API, public share, aria2)
// - `discord/` = Discord-specific adapters (commands, status messages)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use anyhow::Context as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::drive::{DriveService, PathResolver, TransferConfig};
use crate::discord::commands::presence;
use crate::discord::Data;
use crate::infra::aria2::Aria2Client;
use crate::infra::google_drive::{GoogleDriveClient, PublicShareClient, ServiceAccountAuth};
use poise::serenity_prelude as serenity;

/// Parse an optional numeric environment variable, falling back on absence or garbage.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{} has an invalid value `{}`; using the default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn transfer_config_from_env() -> TransferConfig {
    let defaults = TransferConfig::default();
    TransferConfig {
        chunk_size: TransferConfig::chunk_size_from_mb(env_or("DRIVE_CHUNK_SIZE_MB", 8u64)),
        progress_interval_secs: env_or("DRIVE_PROGRESS_INTERVAL_SECS", defaults.progress_interval_secs),
        copy_pause: Duration::from_millis(env_or("DRIVE_COPY_PAUSE_MS", 500u64)),
        max_depth: env_or("DRIVE_MAX_DEPTH", defaults.max_depth),
        reuse_existing_folders: env_or("DRIVE_REUSE_FOLDERS", false),
        staging_dir: std::env::var("TEMP_DOWNLOAD_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or(defaults.staging_dir),
        index_url: std::env::var("G_DRIVE_INDEX_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty()),
        ..defaults
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;

    let config = transfer_config_from_env();
    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.staging_dir.display()))?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let auth = ServiceAccountAuth::from_env()
        .await
        .context("Failed to load Google service account credentials")?;
    tracing::info!(account = %auth.client_email(), "Using Google service account");

    let drive = Arc::new(GoogleDriveClient::new(Arc::new(auth)));
    let share = Arc::new(PublicShareClient::new());
    let downloader = Arc::new(Aria2Client::from_env());
    let resolver = PathResolver::new();

    // An unusable default folder is not fatal: uploads then go to the drive root.
    let default_root = match std::env::var("G_DRIVE_FOLDER_ID") {
        Ok(raw) if !raw.trim().is_empty() => match resolver.resolve_container(raw.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Ignoring G_DRIVE_FOLDER_ID: {}", e);
                None
            }
        },
        _ => None,
    };

    tracing::info!(
        chunk_size = config.chunk_size,
        staging_dir = %config.staging_dir.display(),
        default_root = ?default_root,
        "Drive transfer settings loaded"
    );

    let drive_service = Arc::new(DriveService::new(
        drive,
        share,
        downloader,
        resolver,
        config,
        default_root,
    ));

    // Create the data structure that will be shared across all commands
    let data = Data {
        drive: Arc::clone(&drive_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::non_privileged();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::commands::gdrive::gdrive()],
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        tracing::error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("Commands registered, bot is ready");
                presence::on_ready(ctx);
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
