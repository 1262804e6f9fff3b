// Composition root helpers.
//
// The embedding binary supplies the platform adapter; everything else
// (stores, classifiers, decoders, services) is wired here from environment
// configuration.

use crate::core::classify::MediaNormalizer;
use crate::core::enforcement::admin_directory::AdminDirectory;
use crate::core::enforcement::commands::CommandService;
use crate::core::enforcement::engine::EnforcementEngine;
use crate::core::enforcement::locks::LockService;
use crate::core::enforcement::tier::{PrivilegeResolver, StaticAuthority};
use crate::core::platform::ChatPlatform;
use crate::core::promote::PromotionService;
use crate::infra::classify::{HttpNsfwClassifier, HttpObjectClassifier};
use crate::infra::media::{FfmpegFrameDecoder, ImageFirstFrameDecoder};
use crate::infra::stores::SqliteModerationStore;
use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

/// Load `.env` and install the log subscriber. Call once, first.
pub fn init() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
}

/// Environment-driven infra configuration.
pub struct InfraConfig {
    pub database_url: String,
    pub classifier_base_url: String,
    pub scratch_dir: String,
    pub ffmpeg_binary: String,
}

impl InfraConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://warden.db".to_string()),
            classifier_base_url: std::env::var("CLASSIFIER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            scratch_dir: std::env::var("SCRATCH_DIR").unwrap_or_else(|_| "scratch".to_string()),
            ffmpeg_binary: std::env::var("FFMPEG_BINARY").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }
}

/// The fully wired moderation services.
pub struct ModerationStack {
    pub engine: Arc<EnforcementEngine>,
    pub commands: Arc<CommandService>,
    pub promotions: Arc<PromotionService>,
    pub admins: Arc<AdminDirectory>,
}

/// Build the stack against a platform adapter: open the database, run
/// migrations, and wire every service with its collaborators.
pub async fn build(
    config: InfraConfig,
    platform: Arc<dyn ChatPlatform>,
) -> anyhow::Result<ModerationStack> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let store = Arc::new(SqliteModerationStore::new(pool));
    store.migrate().await.context("running migrations")?;

    let admins = Arc::new(AdminDirectory::new());
    let resolver = Arc::new(PrivilegeResolver::new(
        StaticAuthority::from_env(),
        admins.clone(),
        store.clone(),
        platform.clone(),
    ));

    let normalizer = Arc::new(MediaNormalizer::new(
        &config.scratch_dir,
        Arc::new(FfmpegFrameDecoder::new(config.ffmpeg_binary)),
        Arc::new(ImageFirstFrameDecoder),
    ));
    let nsfw = Arc::new(HttpNsfwClassifier::new(&config.classifier_base_url));
    let objects = Arc::new(HttpObjectClassifier::new(&config.classifier_base_url));

    let engine = Arc::new(EnforcementEngine::new(
        platform.clone(),
        store.clone(),
        resolver.clone(),
        store.clone(),
        store.clone(),
        normalizer,
        nsfw,
        objects,
    ));

    let locks = Arc::new(LockService::new(store.clone(), platform.clone()));
    let commands = Arc::new(CommandService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        resolver.clone(),
        locks,
        admins.clone(),
    ));
    let promotions = Arc::new(PromotionService::new(
        platform,
        resolver,
        store,
        admins.clone(),
    ));

    Ok(ModerationStack {
        engine,
        commands,
        promotions,
        admins,
    })
}
