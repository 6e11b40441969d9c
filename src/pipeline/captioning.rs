//! Per-study captioning pipeline.
//!
//! Drives a study from upload to summarized: normalize and store every
//! slice, caption each one through the tiered vision chain, rewrite the
//! captions for readability, then aggregate into a series summary. Provider
//! trouble degrades to sentinels and never fails the study; only storage,
//! imaging and database errors do.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, DatabaseError};
use crate::imaging::{self, ImagingError};
use crate::models::enums::StudyProcessingState;
use crate::models::{Study, StudyImage};
use crate::pipeline::inference::{
    FallbackChain, RetryPolicy, TextInference, CAPTION_SENTINEL, SUMMARY_SENTINEL,
};
use crate::pipeline::prompts;
use crate::storage::{study_prefix, ObjectStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Image processing error: {0}")]
    Imaging(#[from] ImagingError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Caption task failed: {0}")]
    TaskJoin(String),

    #[error("Study has no images")]
    NoImages,
}

/// One slice after captioning, not yet persisted.
#[derive(Debug, Clone)]
struct CaptionedSlice {
    slice_index: i64,
    blob_ref: String,
    raw_caption: String,
    enhanced_caption: Option<String>,
}

impl CaptionedSlice {
    fn display_caption(&self) -> &str {
        self.enhanced_caption.as_deref().unwrap_or(&self.raw_caption)
    }
}

/// Run a short closure against the shared connection. The guard must never
/// be held across an await point, so all database access goes through here.
fn with_conn<T>(
    db: &Mutex<Connection>,
    op: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
) -> Result<T, PipelineError> {
    let conn = db.lock().map_err(|_| PipelineError::LockPoisoned)?;
    op(&conn).map_err(PipelineError::from)
}

/// Orchestrates captioning and summarization for one study at a time.
pub struct CaptionPipeline {
    vision: Arc<FallbackChain>,
    text: Arc<dyn TextInference>,
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl CaptionPipeline {
    pub fn new(
        vision: Arc<FallbackChain>,
        text: Arc<dyn TextInference>,
        store: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            vision,
            text,
            store,
            retry,
        }
    }

    /// Process a fresh upload end to end and return the series summary.
    ///
    /// Images are normalized and stored in upload order; `slice_index` is
    /// assigned zero-based from that order and never changes afterwards.
    /// Every image gets exactly one caption row, sentinel or not.
    pub async fn process_upload(
        &self,
        db: &Mutex<Connection>,
        study: &Study,
        uploads: Vec<Vec<u8>>,
    ) -> Result<String, PipelineError> {
        with_conn(db, |conn| {
            db::update_study_state(conn, &study.id, StudyProcessingState::ImagesCaptioning)
        })?;

        let prefix = study_prefix(&study.patient_id, &study.id);
        let mut stored = Vec::with_capacity(uploads.len());
        for (index, bytes) in uploads.into_iter().enumerate() {
            let normalized = imaging::normalize_image(&bytes)?;
            let blob_ref =
                self.store
                    .put(&normalized.jpeg_bytes, imaging::NORMALIZED_MIME, &prefix)?;
            stored.push((index as i64, blob_ref, normalized.base64));
        }
        tracing::info!(study_id = %study.id, slices = stored.len(), "Images normalized and stored");

        let slices = self.caption_all(stored).await?;

        with_conn(db, |conn| {
            for slice in &slices {
                let image = StudyImage {
                    id: Uuid::new_v4(),
                    study_id: study.id,
                    blob_ref: slice.blob_ref.clone(),
                    slice_index: slice.slice_index,
                    raw_caption: slice.raw_caption.clone(),
                    enhanced_caption: slice.enhanced_caption.clone(),
                    created_at: Utc::now(),
                };
                db::insert_image(conn, &image)?;
            }
            db::update_study_state(conn, &study.id, StudyProcessingState::ImagesCaptioned)
        })?;

        self.finish_with_summary(db, study, &slices).await
    }

    /// Re-run captioning and summarization over a study's stored images.
    ///
    /// Slices whose blobs can no longer be fetched keep their prior
    /// captions; everything else is recomputed from the stored bytes.
    pub async fn refresh_study(
        &self,
        db: &Mutex<Connection>,
        study: &Study,
    ) -> Result<String, PipelineError> {
        let images = with_conn(db, |conn| db::list_images_for_study(conn, &study.id))?;
        if images.is_empty() {
            return Err(PipelineError::NoImages);
        }

        with_conn(db, |conn| {
            db::update_study_state(conn, &study.id, StudyProcessingState::ImagesCaptioning)
        })?;

        let total = images.len();
        let mut handles = Vec::with_capacity(total);
        for image in &images {
            match self.store.get(&image.blob_ref) {
                Ok(bytes) => {
                    let vision = Arc::clone(&self.vision);
                    let text = Arc::clone(&self.text);
                    let retry = self.retry;
                    let slice_index = image.slice_index;
                    let blob_ref = image.blob_ref.clone();
                    let base64 = BASE64.encode(&bytes);
                    handles.push(tokio::spawn(async move {
                        caption_slice(vision, text, retry, slice_index, blob_ref, base64, total)
                            .await
                    }));
                }
                Err(error) => {
                    tracing::warn!(
                        study_id = %study.id,
                        blob_ref = %image.blob_ref,
                        error = %error,
                        "Stored image unavailable, keeping prior captions"
                    );
                    let prior = CaptionedSlice {
                        slice_index: image.slice_index,
                        blob_ref: image.blob_ref.clone(),
                        raw_caption: image.raw_caption.clone(),
                        enhanced_caption: image.enhanced_caption.clone(),
                    };
                    handles.push(tokio::spawn(async move { prior }));
                }
            }
        }

        let slices = join_captioned(handles).await?;

        with_conn(db, |conn| {
            for slice in &slices {
                if let Some(image) = images.iter().find(|i| i.slice_index == slice.slice_index) {
                    db::update_image_captions(
                        conn,
                        &image.id,
                        &slice.raw_caption,
                        slice.enhanced_caption.as_deref(),
                    )?;
                }
            }
            db::update_study_state(conn, &study.id, StudyProcessingState::ImagesCaptioned)
        })?;

        self.finish_with_summary(db, study, &slices).await
    }

    /// Caption stored slices concurrently, one task per image. Results come
    /// back in `slice_index` order regardless of completion order.
    async fn caption_all(
        &self,
        stored: Vec<(i64, String, String)>,
    ) -> Result<Vec<CaptionedSlice>, PipelineError> {
        let total = stored.len();
        let mut handles = Vec::with_capacity(total);
        for (slice_index, blob_ref, base64) in stored {
            let vision = Arc::clone(&self.vision);
            let text = Arc::clone(&self.text);
            let retry = self.retry;
            handles.push(tokio::spawn(async move {
                caption_slice(vision, text, retry, slice_index, blob_ref, base64, total).await
            }));
        }
        join_captioned(handles).await
    }

    /// Summarize, persist, and mark the study summarized. Returns the
    /// summary text that was stored.
    async fn finish_with_summary(
        &self,
        db: &Mutex<Connection>,
        study: &Study,
        slices: &[CaptionedSlice],
    ) -> Result<String, PipelineError> {
        with_conn(db, |conn| {
            db::update_study_state(conn, &study.id, StudyProcessingState::Summarizing)
        })?;

        let summary = self.study_summary(study, slices).await;

        with_conn(db, |conn| {
            db::update_study_summary(conn, &study.id, &summary)?;
            db::update_study_state(conn, &study.id, StudyProcessingState::Summarized)
        })?;
        tracing::info!(study_id = %study.id, "Study summarized");
        Ok(summary)
    }

    /// Study-level summary over the slice captions. Prefers the general
    /// text model over the enhanced captions; falls back to the tiered
    /// series chain over the raw captions, which bottoms out at a sentinel.
    async fn study_summary(&self, study: &Study, slices: &[CaptionedSlice]) -> String {
        if slices.is_empty() {
            return SUMMARY_SENTINEL.to_string();
        }

        let display: Vec<String> = slices
            .iter()
            .map(|s| s.display_caption().to_string())
            .collect();
        let prompt =
            prompts::enhanced_summary_prompt(&study.title, study.modality.as_deref(), &display);

        match self
            .retry
            .run("study_summary", || self.text.generate(&prompt))
            .await
        {
            Ok(summary) => summary,
            Err(error) => {
                tracing::warn!(
                    study_id = %study.id,
                    error = %error,
                    "Summary from enhanced captions failed, falling back to series chain"
                );
                let raw: Vec<String> = slices.iter().map(|s| s.raw_caption.clone()).collect();
                self.vision.summarize_series(&raw).await.text
            }
        }
    }
}

/// Caption one slice and rewrite it for readability. Sentinel captions are
/// never enhanced, and a failed rewrite keeps the raw caption.
async fn caption_slice(
    vision: Arc<FallbackChain>,
    text: Arc<dyn TextInference>,
    retry: RetryPolicy,
    slice_index: i64,
    blob_ref: String,
    base64: String,
    total_slices: usize,
) -> CaptionedSlice {
    let captioned = vision.caption_image(&base64).await;

    let enhanced_caption = if captioned.text == CAPTION_SENTINEL {
        None
    } else {
        let prompt = prompts::caption_enhancement_prompt(
            &captioned.text,
            slice_index as usize + 1,
            total_slices,
        );
        match retry
            .run("caption_enhancement", || text.generate_fast(&prompt))
            .await
        {
            Ok(enhanced) => Some(enhanced),
            Err(error) => {
                tracing::warn!(
                    slice_index,
                    error = %error,
                    "Caption enhancement failed, keeping raw caption"
                );
                None
            }
        }
    };

    CaptionedSlice {
        slice_index,
        blob_ref,
        raw_caption: captioned.text,
        enhanced_caption,
    }
}

async fn join_captioned(
    handles: Vec<tokio::task::JoinHandle<CaptionedSlice>>,
) -> Result<Vec<CaptionedSlice>, PipelineError> {
    let mut slices = Vec::with_capacity(handles.len());
    for handle in handles {
        let slice = handle
            .await
            .map_err(|e| PipelineError::TaskJoin(e.to_string()))?;
        slices.push(slice);
    }
    slices.sort_by_key(|s| s.slice_index);
    Ok(slices)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::db::sqlite::open_memory_database;
    use crate::models::Patient;
    use crate::pipeline::inference::{MockText, MockVision, ProviderError, VisionInference};
    use crate::storage::FsObjectStore;

    use super::*;

    fn png_fixture(seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_fn(16, 16, |x, y| {
            image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn seed_study(conn: &Connection) -> Study {
        let patient = Patient {
            id: Uuid::new_v4(),
            name: "Jane Doe".into(),
            age: 54,
            sex: "F".into(),
            reason_for_imaging: None,
            created_at: Utc::now(),
        };
        db::insert_patient(conn, &patient).unwrap();
        let study = Study {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            title: "Chest CT".into(),
            modality: Some("CT".into()),
            imaging_datetime: Utc::now(),
            series_summary: String::new(),
            include_codes: false,
            processing_state: StudyProcessingState::Created,
            created_at: Utc::now(),
        };
        db::insert_study(conn, &study).unwrap();
        study
    }

    /// Vision provider that fails only for one specific image payload.
    struct SelectiveVision {
        fail_base64: String,
    }

    #[async_trait]
    impl VisionInference for SelectiveVision {
        fn provider_name(&self) -> &'static str {
            "selective"
        }

        async fn caption_image(&self, image_base64: &str) -> Result<String, ProviderError> {
            if image_base64 == self.fail_base64 {
                Err(ProviderError::Unreachable("connection refused".into()))
            } else {
                Ok(format!("Finding in {} bytes of image", image_base64.len()))
            }
        }

        async fn summarize_series(&self, captions: &[String]) -> Result<String, ProviderError> {
            Ok(format!("Series of {} slices", captions.len()))
        }
    }

    fn pipeline_with(
        specialized: Arc<dyn VisionInference>,
        general: Arc<dyn VisionInference>,
        text: Arc<dyn TextInference>,
        store: Arc<dyn ObjectStore>,
    ) -> CaptionPipeline {
        let retry = RetryPolicy::new(1, std::time::Duration::from_millis(1));
        CaptionPipeline::new(
            Arc::new(FallbackChain::new(specialized, general, retry)),
            text,
            store,
            retry,
        )
    }

    // ── upload processing ──

    #[tokio::test]
    async fn upload_captions_every_image_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let uploads = vec![png_fixture(10), png_fixture(20), png_fixture(30)];
        // The failing payload is what providers actually see: the base64 of
        // the normalized second upload.
        let failing = imaging::normalize_image(&uploads[1]).unwrap().base64;

        let pipeline = pipeline_with(
            Arc::new(SelectiveVision {
                fail_base64: failing.clone(),
            }),
            Arc::new(SelectiveVision {
                fail_base64: failing,
            }),
            Arc::new(MockText::new("Unremarkable study.")),
            Arc::clone(&store),
        );

        let summary = pipeline.process_upload(&db, &study, uploads).await.unwrap();
        assert_eq!(summary, "Unremarkable study.");

        let images = with_conn(&db, |conn| db::list_images_for_study(conn, &study.id)).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(
            images.iter().map(|i| i.slice_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // Slice 1 failed on both tiers: sentinel caption, no enhancement.
        assert_eq!(images[1].raw_caption, CAPTION_SENTINEL);
        assert!(images[1].enhanced_caption.is_none());
        for image in [&images[0], &images[2]] {
            assert!(image.raw_caption.starts_with("Finding in"));
            assert_eq!(image.enhanced_caption.as_deref(), Some("Unremarkable study."));
        }

        let loaded = with_conn(&db, |conn| db::get_study(conn, &study.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.processing_state, StudyProcessingState::Summarized);
        assert_eq!(loaded.series_summary, "Unremarkable study.");

        // Blobs really landed in the store.
        for image in &images {
            assert!(!store.get(&image.blob_ref).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn provider_outage_ends_summarized_with_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let pipeline = pipeline_with(
            Arc::new(MockVision::failing(
                "specialized",
                ProviderError::Timeout(30),
            )),
            Arc::new(MockVision::failing(
                "general",
                ProviderError::Unreachable("down".into()),
            )),
            Arc::new(MockText::failing(ProviderError::Unreachable("down".into()))),
            store,
        );

        let uploads = vec![png_fixture(1), png_fixture(2)];
        let summary = pipeline.process_upload(&db, &study, uploads).await.unwrap();
        assert_eq!(summary, SUMMARY_SENTINEL);

        let images = with_conn(&db, |conn| db::list_images_for_study(conn, &study.id)).unwrap();
        assert_eq!(images.len(), 2);
        for image in &images {
            assert_eq!(image.raw_caption, CAPTION_SENTINEL);
            assert!(image.enhanced_caption.is_none());
        }

        // Infrastructure is healthy, so the study is summarized, not failed.
        let loaded = with_conn(&db, |conn| db::get_study(conn, &study.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.processing_state, StudyProcessingState::Summarized);
    }

    #[tokio::test]
    async fn undecodable_upload_is_imaging_error() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let pipeline = pipeline_with(
            Arc::new(MockVision::new("specialized", "caption")),
            Arc::new(MockVision::new("general", "caption")),
            Arc::new(MockText::new("summary")),
            store,
        );

        let err = pipeline
            .process_upload(&db, &study, vec![b"not an image".to_vec()])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Imaging(_)));
    }

    // ── refresh ──

    #[tokio::test]
    async fn refresh_recaptions_from_stored_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let first = pipeline_with(
            Arc::new(MockVision::failing("specialized", ProviderError::Timeout(5))),
            Arc::new(MockVision::failing(
                "general",
                ProviderError::Unreachable("down".into()),
            )),
            Arc::new(MockText::failing(ProviderError::Unreachable("down".into()))),
            Arc::clone(&store),
        );
        first
            .process_upload(&db, &study, vec![png_fixture(7)])
            .await
            .unwrap();

        // Providers recover; a refresh replaces the sentinels.
        let recovered = pipeline_with(
            Arc::new(MockVision::new("specialized", "Clear lung fields")),
            Arc::new(MockVision::new("general", "unused")),
            Arc::new(MockText::new("Normal study.")),
            Arc::clone(&store),
        );
        let summary = recovered.refresh_study(&db, &study).await.unwrap();
        assert_eq!(summary, "Normal study.");

        let images = with_conn(&db, |conn| db::list_images_for_study(conn, &study.id)).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].raw_caption, "Clear lung fields");
        assert_eq!(images[0].enhanced_caption.as_deref(), Some("Normal study."));
    }

    #[tokio::test]
    async fn refresh_keeps_prior_captions_when_blob_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let pipeline = pipeline_with(
            Arc::new(MockVision::new("specialized", "Original caption")),
            Arc::new(MockVision::new("general", "unused")),
            Arc::new(MockText::new("Original summary.")),
            Arc::clone(&store),
        );
        pipeline
            .process_upload(&db, &study, vec![png_fixture(3)])
            .await
            .unwrap();

        store.delete_prefix(&study_prefix(&study.patient_id, &study.id));

        let summary = pipeline.refresh_study(&db, &study).await.unwrap();
        assert_eq!(summary, "Original summary.");

        let images = with_conn(&db, |conn| db::list_images_for_study(conn, &study.id)).unwrap();
        assert_eq!(images[0].raw_caption, "Original caption");
        assert_eq!(
            images[0].enhanced_caption.as_deref(),
            Some("Original summary.")
        );

        let loaded = with_conn(&db, |conn| db::get_study(conn, &study.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.processing_state, StudyProcessingState::Summarized);
    }

    #[tokio::test]
    async fn refresh_without_images_is_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let db = Mutex::new(open_memory_database().unwrap());
        let study = with_conn(&db, |conn| Ok(seed_study(conn))).unwrap();

        let pipeline = pipeline_with(
            Arc::new(MockVision::new("specialized", "caption")),
            Arc::new(MockVision::new("general", "caption")),
            Arc::new(MockText::new("summary")),
            store,
        );

        let err = pipeline.refresh_study(&db, &study).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoImages));
    }
}
