//! The outcome of one `import(...)` call, returned to the HTTP/admin layer.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
	pub success: bool,
	pub error_message: Option<String>,
	pub affected_map_ids: Vec<i64>,
	pub created_map_ids: Vec<i64>,
	pub created_grid_ids: Vec<String>,
	pub maps_created: u32,
	pub grids_imported: u32,
	pub grids_skipped: u32,
	/// Always equal to `grids_imported`: one tile rendered per imported grid.
	pub tiles_rendered: u32,
	pub markers_imported: u32,
	pub markers_skipped: u32,
	#[serde(with = "duration_secs")]
	pub duration: Duration,
}

impl ImportResult {
	pub fn failure(message: impl Into<String>, duration: Duration) -> Self {
		ImportResult {
			success: false,
			error_message: Some(message.into()),
			affected_map_ids: Vec::new(),
			created_map_ids: Vec::new(),
			created_grid_ids: Vec::new(),
			maps_created: 0,
			grids_imported: 0,
			grids_skipped: 0,
			tiles_rendered: 0,
			markers_imported: 0,
			markers_skipped: 0,
			duration,
		}
	}
}

mod duration_secs {
	use serde::Serializer;
	use std::time::Duration;

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_f64(duration.as_secs_f64())
	}
}
