// src/lib.rs
//! Region-based generative image editing: per-region and masked full-image
//! edits under a shared concurrency budget, compositing back into the
//! source, per-image history, and a manual patch editor.

pub mod compositing;
pub mod config;
pub mod errors;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod patch_editor;
pub mod picture;
pub mod scheduler;
pub mod services;
pub mod store;

pub use config::{ProcessConfig, Provider, ServiceConfig};
pub use errors::{RegionEditError, Result};
pub use models::{Image, ImageHistoryState, PixelRect, Region, RegionSource, RegionStatus};
pub use orchestrator::{ProcessScope, ProcessSummary, RegionProcessor};
pub use patch_editor::PatchEditor;
pub use picture::Picture;
pub use scheduler::{ConcurrencyLimiter, run_with_concurrency};
pub use store::ImageStore;
