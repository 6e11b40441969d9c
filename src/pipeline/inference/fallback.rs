use std::fmt;
use std::sync::Arc;

use super::{RetryPolicy, VisionInference};

/// Fixed degradation text stored when no provider could caption an image.
pub const CAPTION_SENTINEL: &str =
    "Caption unavailable: image analysis failed on all providers.";

/// Fixed degradation text stored when no provider could summarize a series.
pub const SUMMARY_SENTINEL: &str =
    "Series summary unavailable: summarization failed on all providers.";

/// Which tier ultimately served a vision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingTier {
    Specialized,
    General,
    Sentinel,
}

impl fmt::Display for ServingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServingTier::Specialized => write!(f, "specialized"),
            ServingTier::General => write!(f, "general"),
            ServingTier::Sentinel => write!(f, "sentinel"),
        }
    }
}

/// A vision result together with the tier that produced it.
#[derive(Debug, Clone)]
pub struct TieredText {
    pub text: String,
    pub tier: ServingTier,
}

/// Two-tier vision degradation chain: the specialized captioner first, the
/// general model second, a fixed sentinel last.
///
/// The chain itself never fails; per-image trouble must not abort study
/// aggregation. Each tier runs under the shared retry policy, and the tier
/// that served every result is logged.
pub struct FallbackChain {
    specialized: Arc<dyn VisionInference>,
    general: Arc<dyn VisionInference>,
    retry: RetryPolicy,
}

impl FallbackChain {
    pub fn new(
        specialized: Arc<dyn VisionInference>,
        general: Arc<dyn VisionInference>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            specialized,
            general,
            retry,
        }
    }

    pub async fn caption_image(&self, image_base64: &str) -> TieredText {
        match self
            .retry
            .run("caption_image", || self.specialized.caption_image(image_base64))
            .await
        {
            Ok(text) => {
                tracing::info!(
                    tier = %ServingTier::Specialized,
                    provider = self.specialized.provider_name(),
                    "Image caption served"
                );
                return TieredText {
                    text,
                    tier: ServingTier::Specialized,
                };
            }
            Err(error) => {
                tracing::warn!(
                    provider = self.specialized.provider_name(),
                    error = %error,
                    "Specialized captioner failed, falling back"
                );
            }
        }

        match self
            .retry
            .run("caption_image_fallback", || {
                self.general.caption_image(image_base64)
            })
            .await
        {
            Ok(text) => {
                tracing::info!(
                    tier = %ServingTier::General,
                    provider = self.general.provider_name(),
                    "Image caption served"
                );
                TieredText {
                    text,
                    tier: ServingTier::General,
                }
            }
            Err(error) => {
                tracing::error!(
                    provider = self.general.provider_name(),
                    error = %error,
                    "All caption providers failed, storing sentinel"
                );
                TieredText {
                    text: CAPTION_SENTINEL.to_string(),
                    tier: ServingTier::Sentinel,
                }
            }
        }
    }

    pub async fn summarize_series(&self, captions: &[String]) -> TieredText {
        match self
            .retry
            .run("summarize_series", || {
                self.specialized.summarize_series(captions)
            })
            .await
        {
            Ok(text) => {
                tracing::info!(
                    tier = %ServingTier::Specialized,
                    provider = self.specialized.provider_name(),
                    "Series summary served"
                );
                return TieredText {
                    text,
                    tier: ServingTier::Specialized,
                };
            }
            Err(error) => {
                tracing::warn!(
                    provider = self.specialized.provider_name(),
                    error = %error,
                    "Specialized summarizer failed, falling back"
                );
            }
        }

        match self
            .retry
            .run("summarize_series_fallback", || {
                self.general.summarize_series(captions)
            })
            .await
        {
            Ok(text) => {
                tracing::info!(
                    tier = %ServingTier::General,
                    provider = self.general.provider_name(),
                    "Series summary served"
                );
                TieredText {
                    text,
                    tier: ServingTier::General,
                }
            }
            Err(error) => {
                tracing::error!(
                    provider = self.general.provider_name(),
                    error = %error,
                    "All summary providers failed, storing sentinel"
                );
                TieredText {
                    text: SUMMARY_SENTINEL.to_string(),
                    tier: ServingTier::Sentinel,
                }
            }
        }
    }
}
