//! Five-phase driver: parse, prefetch, import, rebuild zoom pyramids, import markers.

use crate::pipeline::SegmentImporter;
use crate::reader::HmapReader;
use hmap_container::{CleanupService, MarkerImportOutcome, MarkerImporter, MarkerService, PersistenceStore, StorageQuotaService, ZoomPyramidBuilder};
use hmap_core::config::ImportConfig;
use hmap_core::error::ImportError;
use hmap_core::model::{Coord, ImportMode};
use hmap_core::progress::{ImportPhase, ProgressSink, ProgressTracker};
use hmap_core::result::ImportResult;
use hmap_image::TileResourceService;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Number of segments imported per call; the rest are logged and dropped.
const MAX_SEGMENTS: usize = 3;

#[derive(Default)]
struct Accumulator {
	affected_map_ids: Vec<i64>,
	created_map_ids: Vec<i64>,
	created_grid_ids: Vec<String>,
	maps_created: u32,
	grids_imported: u32,
	grids_skipped: u32,
	markers_imported: u32,
	markers_skipped: u32,
	map_coords: HashMap<i64, Vec<Coord>>,
}

impl Accumulator {
	fn record_segment(&mut self, map_id: i64, created_map: bool, grid_ids: Vec<String>, coords: Vec<Coord>, skipped: usize) {
		if !self.affected_map_ids.contains(&map_id) {
			self.affected_map_ids.push(map_id);
		}
		if created_map {
			self.created_map_ids.push(map_id);
			self.maps_created += 1;
		}
		self.grids_imported += grid_ids.len() as u32;
		self.grids_skipped += skipped as u32;
		self.created_grid_ids.extend(grid_ids);
		self.map_coords.entry(map_id).or_default().extend(coords);
	}

	fn into_result(self, success: bool, error_message: Option<String>, duration: Duration) -> ImportResult {
		ImportResult {
			success,
			error_message,
			affected_map_ids: self.affected_map_ids,
			created_map_ids: self.created_map_ids,
			created_grid_ids: self.created_grid_ids,
			maps_created: self.maps_created,
			grids_imported: self.grids_imported,
			grids_skipped: self.grids_skipped,
			tiles_rendered: self.grids_imported,
			markers_imported: self.markers_imported,
			markers_skipped: self.markers_skipped,
			duration,
		}
	}
}

pub struct ImportOrchestrator {
	pub store: Arc<dyn PersistenceStore>,
	pub resources: Arc<TileResourceService>,
	pub marker_service: Arc<dyn MarkerService>,
	pub config: ImportConfig,
}

impl ImportOrchestrator {
	pub fn new(
		store: Arc<dyn PersistenceStore>,
		resources: Arc<TileResourceService>,
		marker_service: Arc<dyn MarkerService>,
		config: ImportConfig,
	) -> Self {
		ImportOrchestrator {
			store,
			resources,
			marker_service,
			config,
		}
	}

	pub async fn run(
		&self,
		bytes: &[u8],
		tenant_id: &str,
		mode: ImportMode,
		sink: &dyn ProgressSink,
		cancel: &CancellationToken,
	) -> ImportResult {
		let start = Instant::now();
		let mut tracker = ProgressTracker::new(ImportPhase::Parse, 1);
		let mut acc = Accumulator::default();

		match self.run_phases(bytes, tenant_id, mode, sink, cancel, &mut tracker, &mut acc).await {
			Ok(()) => acc.into_result(true, None, start.elapsed()),
			Err(err) => acc.into_result(false, Some(err.user_message()), start.elapsed()),
		}
	}

	async fn run_phases(
		&self,
		bytes: &[u8],
		tenant_id: &str,
		mode: ImportMode,
		sink: &dyn ProgressSink,
		cancel: &CancellationToken,
		tracker: &mut ProgressTracker,
		acc: &mut Accumulator,
	) -> Result<(), ImportError> {
		// Phase 1: parse
		let container = HmapReader::parse(bytes)?;
		tracker.tick(sink, true);

		if cancel.is_cancelled() {
			return Err(ImportError::Canceled);
		}

		// Segment selection: at most MAX_SEGMENTS, by descending grid count, stable.
		let mut segments: Vec<u64> = container.segment_ids().to_vec();
		segments.sort_by(|a, b| container.grids_for_segment(*b).len().cmp(&container.grids_for_segment(*a).len()));
		let keep = self.config.max_segments.min(MAX_SEGMENTS).min(segments.len());
		let dropped = segments.split_off(keep);
		for id in &dropped {
			log::info!(
				"dropping segment {id} ({} grids): over the {} segment cap",
				container.grids_for_segment(*id).len(),
				self.config.max_segments
			);
		}

		// Phase 2: prefetch every tileset resource referenced by a selected segment.
		let mut resource_names: Vec<String> = segments
			.iter()
			.flat_map(|id| container.grids_for_segment(*id))
			.flat_map(|grid| grid.tilesets.iter().map(|t| t.resource_name.clone()))
			.collect();
		resource_names.sort();
		resource_names.dedup();

		tracker.enter_phase(ImportPhase::Prefetch, resource_names.len() as u64);
		self.resources.prefetch(&resource_names, |_done, _total| {
			tracker.tick(sink, false);
		});

		if cancel.is_cancelled() {
			return Err(ImportError::Canceled);
		}

		// Phase 3: render and persist every selected segment, sequentially.
		let total_grids: u64 = segments.iter().map(|id| container.grids_for_segment(*id).len() as u64).sum();
		tracker.enter_phase(ImportPhase::Import, total_grids);

		let quota_service = StorageQuotaService::new(self.store.clone());
		let importer = SegmentImporter {
			store: &self.store,
			quota_service: &quota_service,
			resources: &self.resources,
			storage_root: &self.config.storage_root,
			render_parallelism: self.config.render_parallelism,
			channel_capacity: self.config.channel_capacity,
			batch_size: self.config.batch_size,
		};

		let mut segment_grid_ids: HashMap<u64, HashSet<String>> = HashMap::new();
		let mut segment_map_ids: HashMap<u64, i64> = HashMap::new();
		for &segment_id in &segments {
			let grids = container.grids_for_segment(segment_id);
			segment_grid_ids.insert(segment_id, grids.iter().map(hmap_core::model::HmapGridData::grid_id).collect());

			let outcome = importer
				.import_segment(tenant_id, segment_id, mode, grids, tracker, sink, cancel)
				.await?;

			segment_map_ids.insert(segment_id, outcome.map_id);
			acc.record_segment(
				outcome.map_id,
				outcome.created_map,
				outcome.created_grid_ids,
				outcome.imported_coords,
				outcome.grids_skipped,
			);
		}

		if cancel.is_cancelled() {
			return Err(ImportError::Canceled);
		}

		// Phase 4: rebuild zoom pyramids, strictly per map, strictly ascending.
		tracker.enter_phase(ImportPhase::Zoom, acc.map_coords.len() as u64);
		let zoom_builder = ZoomPyramidBuilder::new(self.store.as_ref(), &self.config.storage_root);
		for (&map_id, coords) in &acc.map_coords {
			zoom_builder.build(map_id, tenant_id, coords).map_err(ImportError::Persistence)?;
			tracker.tick(sink, false);
		}

		if cancel.is_cancelled() {
			return Err(ImportError::Canceled);
		}

		// Phase 5: import markers, per segment, against that segment's full grid set.
		let marker_importer = MarkerImporter::new(self.marker_service.as_ref());
		let marker_segments: Vec<(u64, i64)> = segments
			.iter()
			.filter_map(|id| segment_map_ids.get(id).map(|&map_id| (*id, map_id)))
			.collect();
		let total_markers: u64 = segments.iter().map(|id| container.markers_for_segment(*id).len() as u64).sum();
		tracker.enter_phase(ImportPhase::Markers, total_markers);

		for (segment_id, map_id) in marker_segments {
			let markers = container.markers_for_segment(segment_id);
			if markers.is_empty() {
				continue;
			}
			let grid_ids = segment_grid_ids.get(&segment_id).cloned().unwrap_or_default();
			let MarkerImportOutcome { imported, skipped } = marker_importer.import(tenant_id, map_id, markers, &grid_ids).await;
			acc.markers_imported += imported as u32;
			acc.markers_skipped += skipped as u32;
			for _ in 0..markers.len() {
				tracker.tick(sink, false);
			}
		}

		Ok(())
	}

	/// Undo a failed or abandoned import: removes every map and grid this run created.
	///
	/// Cleanup is never automatic. A failed [`Self::run`] still leaves behind whatever
	/// it managed to persist before the error; the caller decides, using the returned
	/// id lists, whether to unwind it with this method.
	pub fn cleanup_after_failure(&self, tenant_id: &str, result: &ImportResult) {
		let service = CleanupService::new(self.store.as_ref(), &self.config.storage_root);
		for grid_id in &result.created_grid_ids {
			service.remove_grid(grid_id);
		}
		for &map_id in &result.created_map_ids {
			service.remove_map(tenant_id, map_id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reader::builder::ContainerBuilder;
	use async_trait::async_trait;
	use hmap_container::SqliteStore;
	use hmap_core::model::{HmapGridData, HmapMarker, TilesetRef, GRID_CELLS};
	use parking_lot::Mutex;

	#[derive(Default)]
	struct RecordingMarkerService {
		calls: Mutex<Vec<String>>,
	}

	#[async_trait]
	impl MarkerService for RecordingMarkerService {
		async fn put_marker(
			&self,
			_tenant_id: &str,
			_map_id: i64,
			_grid_x: i64,
			_grid_y: i64,
			_pos_x: u32,
			_pos_y: u32,
			name: &str,
			_image: &str,
		) -> anyhow::Result<()> {
			self.calls.lock().push(name.to_string());
			Ok(())
		}
	}

	fn grid(tile_x: i64, tile_y: i64) -> HmapGridData {
		HmapGridData {
			tile_x,
			tile_y,
			tilesets: vec![TilesetRef {
				resource_name: "gfx/tiles/grass".into(),
			}],
			tile_indices: vec![0; GRID_CELLS],
			z_map: None,
		}
	}

	fn build_orchestrator(dir: &std::path::Path) -> (ImportOrchestrator, Arc<RecordingMarkerService>) {
		let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
		let resources = Arc::new(TileResourceService::new(dir.join("cache"), 64, None));
		let marker_service = Arc::new(RecordingMarkerService::default());
		let config = ImportConfig::new(dir.to_path_buf());
		let orchestrator = ImportOrchestrator::new(store, resources, marker_service.clone(), config);
		(orchestrator, marker_service)
	}

	#[tokio::test]
	async fn create_new_two_grids_produces_one_map_and_a_zoom_one_ancestor() {
		let dir = tempfile::tempdir().unwrap();
		let (orchestrator, _markers) = build_orchestrator(dir.path());
		let bytes = ContainerBuilder::default()
			.segment(1, vec![grid(0, 0), grid(1, 0)], vec![])
			.build();

		let sink = hmap_core::progress::NullProgressSink;
		let cancel = CancellationToken::new();
		let result = orchestrator.run(&bytes, "tenant-1", ImportMode::CreateNew, &sink, &cancel).await;

		assert!(result.success, "{:?}", result.error_message);
		assert_eq!(result.maps_created, 1);
		assert_eq!(result.grids_imported, 2);
		assert_eq!(result.grids_skipped, 0);
		assert_eq!(result.created_map_ids.len(), 1);

		let map_id = result.created_map_ids[0];
		let zoom1 = orchestrator.store.get_tile(map_id, 1, Coord::new(0, 0)).unwrap();
		assert!(zoom1.is_some());
	}

	#[tokio::test]
	async fn only_three_of_five_segments_are_imported() {
		let dir = tempfile::tempdir().unwrap();
		let (orchestrator, _markers) = build_orchestrator(dir.path());
		let bytes = ContainerBuilder::default()
			.segment(1, (0..100).map(|i| grid(i, 0)).collect(), vec![])
			.segment(2, (0..50).map(|i| grid(i, 1)).collect(), vec![])
			.segment(3, (0..30).map(|i| grid(i, 2)).collect(), vec![])
			.segment(4, (0..10).map(|i| grid(i, 3)).collect(), vec![])
			.segment(5, (0..5).map(|i| grid(i, 4)).collect(), vec![])
			.build();

		let sink = hmap_core::progress::NullProgressSink;
		let cancel = CancellationToken::new();
		let result = orchestrator.run(&bytes, "tenant-1", ImportMode::CreateNew, &sink, &cancel).await;

		assert!(result.success, "{:?}", result.error_message);
		assert_eq!(result.grids_imported, 180);
		assert_eq!(result.maps_created, 3);
	}

	#[tokio::test]
	async fn marker_in_imported_grid_is_persisted_marker_outside_is_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let (orchestrator, markers) = build_orchestrator(dir.path());
		let bytes = ContainerBuilder::default()
			.segment(
				1,
				vec![grid(1, 2)],
				vec![
					HmapMarker::OtherMarker {
						name: "found".into(),
						tile_x: 150,
						tile_y: 250,
					},
					HmapMarker::OtherMarker {
						name: "lost".into(),
						tile_x: 5000,
						tile_y: 5000,
					},
				],
			)
			.build();

		let sink = hmap_core::progress::NullProgressSink;
		let cancel = CancellationToken::new();
		let result = orchestrator.run(&bytes, "tenant-1", ImportMode::CreateNew, &sink, &cancel).await;

		assert!(result.success, "{:?}", result.error_message);
		assert_eq!(result.markers_imported, 1);
		assert_eq!(result.markers_skipped, 1);
		assert_eq!(markers.calls.lock().as_slice(), ["found"]);
	}

	#[tokio::test]
	async fn cancellation_before_run_surfaces_as_canceled_with_nothing_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let (orchestrator, _markers) = build_orchestrator(dir.path());
		let bytes = ContainerBuilder::default().segment(1, vec![grid(0, 0)], vec![]).build();

		let sink = hmap_core::progress::NullProgressSink;
		let cancel = CancellationToken::new();
		cancel.cancel();
		let result = orchestrator.run(&bytes, "tenant-1", ImportMode::CreateNew, &sink, &cancel).await;

		assert!(!result.success);
		assert_eq!(result.error_message.as_deref(), Some("Canceled"));
		assert_eq!(result.maps_created, 0);
	}

	#[tokio::test]
	async fn cleanup_after_failure_removes_created_maps_and_grids() {
		let dir = tempfile::tempdir().unwrap();
		let (orchestrator, _markers) = build_orchestrator(dir.path());
		let bytes = ContainerBuilder::default()
			.segment(1, vec![grid(0, 0), grid(1, 0)], vec![])
			.build();

		let sink = hmap_core::progress::NullProgressSink;
		let cancel = CancellationToken::new();
		let result = orchestrator.run(&bytes, "tenant-1", ImportMode::CreateNew, &sink, &cancel).await;
		assert!(result.success);

		orchestrator.cleanup_after_failure("tenant-1", &result);

		let map_id = result.created_map_ids[0];
		assert!(orchestrator.store.get_tile(map_id, 0, Coord::new(0, 0)).unwrap().is_none());
	}
}
