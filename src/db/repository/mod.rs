//! Repository layer — entity-scoped database operations.
//!
//! One sub-module per entity; all public functions re-exported here.

mod chat;
mod image;
mod patient;
mod report;
mod study;

pub use chat::*;
pub use image::*;
pub use patient::*;
pub use report::*;
pub use study::*;
