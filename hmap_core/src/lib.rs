//! Shared types, error taxonomy and configuration for the map import core.
//!
//! This crate has no I/O of its own: it is the vocabulary that `hmap_image`,
//! `hmap_container` and `hmap_import` build on.

pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod result;

pub use config::ImportConfig;
pub use error::{ImportError, ParseError};
pub use model::{
	Coord, GridRecord, HmapGridData, HmapMarker, ImportMode, MapRecord, MarkerImage, TenantQuota, TileRecord,
};
pub use progress::{ImportPhase, ProgressEvent, ProgressSink, ProgressTracker};
pub use result::ImportResult;
