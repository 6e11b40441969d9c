//! ChronoScan: an HTTP service that turns uploaded medical imaging studies
//! into captions, study summaries, citation-annotated patient reports, and
//! grounded follow-up chat, backed by a specialized/general AI provider
//! pair with tiered fallback.

pub mod api;
pub mod config;
pub mod db;
pub mod imaging;
pub mod models;
pub mod pipeline;
pub mod storage;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use api::server::ServerError;
use api::types::AppContext;
use config::{ConfigError, Settings};
use db::DatabaseError;
use pipeline::captioning::CaptionPipeline;
use pipeline::conversation::ConversationOrchestrator;
use pipeline::inference::{
    FallbackChain, GeminiClient, MedGemmaClient, RetryPolicy, TextInference, VisionInference,
};
use pipeline::metadata::MetadataExtractor;
use pipeline::report::ReportSynthesizer;
use storage::{FsObjectStore, ObjectStore};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Start the service: read settings, open the database, wire the pipeline,
/// and serve until shutdown.
pub async fn run() -> Result<(), RunError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = Settings::from_env()?;
    let conn = db::open_database(&settings.database_path)?;
    let bind_addr = settings.bind_addr.clone();

    let ctx = build_context(settings, conn);
    let app = api::build_router(ctx);
    api::server::serve(app, &bind_addr).await?;
    Ok(())
}

/// Composition root: wire the provider clients and pipeline components into
/// the shared context the API handlers consume. The general provider serves
/// both as the fallback vision tier and as the only text provider.
pub fn build_context(settings: Settings, conn: Connection) -> AppContext {
    let retry = RetryPolicy::new(settings.retry_max, settings.retry_delay);
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(settings.storage_root.clone()));

    let gemini = Arc::new(GeminiClient::new(
        &settings.gemini_base_url,
        &settings.gemini_api_key,
        &settings.gemini_model,
        &settings.gemini_flash_model,
        settings.processing_timeout,
        settings.chat_timeout,
    ));
    let specialized: Arc<dyn VisionInference> = Arc::new(MedGemmaClient::new(
        &settings.medgemma_endpoint,
        &settings.medgemma_token,
        settings.processing_timeout,
    ));
    let general: Arc<dyn VisionInference> = Arc::clone(&gemini) as Arc<dyn VisionInference>;
    let text: Arc<dyn TextInference> = gemini;

    let chain = Arc::new(FallbackChain::new(specialized, general, retry));

    AppContext {
        db: Arc::new(Mutex::new(conn)),
        store: Arc::clone(&store),
        captioning: Arc::new(CaptionPipeline::new(chain, Arc::clone(&text), store, retry)),
        metadata: Arc::new(MetadataExtractor::new(Arc::clone(&text), retry)),
        reports: Arc::new(ReportSynthesizer::new(Arc::clone(&text), retry)),
        conversation: Arc::new(ConversationOrchestrator::new(text, retry)),
        settings: Arc::new(settings),
    }
}
