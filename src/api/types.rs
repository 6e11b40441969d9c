//! Shared state for the API layer.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::error::ApiError;
use crate::config::Settings;
use crate::db::DatabaseError;
use crate::pipeline::captioning::CaptionPipeline;
use crate::pipeline::conversation::ConversationOrchestrator;
use crate::pipeline::metadata::MetadataExtractor;
use crate::pipeline::report::ReportSynthesizer;
use crate::storage::ObjectStore;

/// Shared context for all API routes: the connection mutex, the object
/// store, and the pipeline components built in the composition root.
#[derive(Clone)]
pub struct AppContext {
    pub db: Arc<Mutex<Connection>>,
    pub store: Arc<dyn ObjectStore>,
    pub captioning: Arc<CaptionPipeline>,
    pub metadata: Arc<MetadataExtractor>,
    pub reports: Arc<ReportSynthesizer>,
    pub conversation: Arc<ConversationOrchestrator>,
    pub settings: Arc<Settings>,
}

impl AppContext {
    /// Run a short closure against the shared connection. The guard is
    /// released before any await, so handlers never hold it across provider
    /// calls.
    pub fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, ApiError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("lock poisoned".into()))?;
        op(&conn).map_err(ApiError::from)
    }
}
