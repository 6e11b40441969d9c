//! HTTP surface.
//!
//! A thin axum layer over the pipeline components: request validation and
//! DTO mapping live here, every decision that matters lives in `pipeline`.
//! Routes are nested under `/api/`.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::build_router;
pub use types::AppContext;
