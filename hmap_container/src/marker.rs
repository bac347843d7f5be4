//! Places markers parsed from a segment onto the grid they fall in.
//!
//! A marker's absolute tile coordinate is split into the grid it belongs to
//! (`tile // 100`) and its position inside that grid (`tile % 100`); a marker
//! whose grid was never imported in this run is skipped, not rolled back into,
//! since grids are only ever added, never discovered after the fact.

use async_trait::async_trait;
use hmap_core::model::HmapMarker;
use std::collections::HashSet;

/// External sink a marker is persisted to once its grid and position are known.
///
/// Kept as an async trait (rather than folded into [`PersistenceStore`](crate::store::PersistenceStore))
/// because marker storage is expected to live behind a network call in
/// production, unlike the synchronous SQLite-backed tile/grid store.
#[async_trait]
pub trait MarkerService: Send + Sync {
	async fn put_marker(
		&self,
		tenant_id: &str,
		map_id: i64,
		grid_x: i64,
		grid_y: i64,
		pos_x: u32,
		pos_y: u32,
		name: &str,
		image: &str,
	) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerImportOutcome {
	pub imported: usize,
	pub skipped: usize,
}

pub struct MarkerImporter<'a> {
	service: &'a dyn MarkerService,
}

impl<'a> MarkerImporter<'a> {
	pub fn new(service: &'a dyn MarkerService) -> Self {
		MarkerImporter { service }
	}

	/// Import every marker in `markers` into `map_id`, skipping (rather than
	/// aborting on) markers whose grid is not in `imported_grid_ids`.
	pub async fn import(
		&self,
		tenant_id: &str,
		map_id: i64,
		markers: &[HmapMarker],
		imported_grid_ids: &HashSet<String>,
	) -> MarkerImportOutcome {
		let mut outcome = MarkerImportOutcome::default();

		for marker in markers {
			let grid_x = marker.tile_x().div_euclid(100);
			let grid_y = marker.tile_y().div_euclid(100);
			let grid_id = format!("{grid_x}_{grid_y}");
			if !imported_grid_ids.contains(&grid_id) {
				outcome.skipped += 1;
				continue;
			}

			let pos_x = marker.tile_x().rem_euclid(100) as u32;
			let pos_y = marker.tile_y().rem_euclid(100) as u32;
			let image = marker.image();

			let result = self
				.service
				.put_marker(tenant_id, map_id, grid_x, grid_y, pos_x, pos_y, marker.name(), image.as_str())
				.await;

			match result {
				Ok(()) => outcome.imported += 1,
				Err(_) => outcome.skipped += 1,
			}
		}

		outcome
	}
}
