//! Per-segment map selection and the bounded producer/consumer rendering pipeline.

use hmap_container::{BatchContext, PersistenceStore, StorageQuotaService};
use hmap_core::error::ImportError;
use hmap_core::model::{Coord, GridRecord, HmapGridData, ImportMode, TileRecord};
use hmap_core::progress::{ImportPhase, ProgressSink, ProgressTracker};
use hmap_image::{render_grid, RgbaImage, TileResourceService};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct SegmentOutcome {
	pub map_id: i64,
	pub created_map: bool,
	pub grids_imported: usize,
	pub grids_skipped: usize,
	pub created_grid_ids: Vec<String>,
	pub imported_coords: Vec<Coord>,
}

struct RenderedGrid {
	grid_record: GridRecord,
	relative_path: String,
	image: RgbaImage,
}

pub struct SegmentImporter<'a> {
	pub store: &'a Arc<dyn PersistenceStore>,
	pub quota_service: &'a StorageQuotaService,
	pub resources: &'a Arc<TileResourceService>,
	pub storage_root: &'a PathBuf,
	pub render_parallelism: usize,
	pub channel_capacity: usize,
	pub batch_size: usize,
}

impl<'a> SegmentImporter<'a> {
	/// Select or create the segment's map, render and persist every not-yet-present
	/// grid, and clear the resource service's in-memory tier on the way out.
	pub async fn import_segment(
		&self,
		tenant_id: &str,
		segment_id: u64,
		mode: ImportMode,
		grids: &[HmapGridData],
		tracker: &mut ProgressTracker,
		sink: &dyn ProgressSink,
		cancel: &CancellationToken,
	) -> Result<SegmentOutcome, ImportError> {
		let (map_id, created_map, grids_to_import, grids_skipped) = self.select_map(tenant_id, segment_id, mode, grids)?;

		let result = self
			.run_pipeline(tenant_id, map_id, &grids_to_import, tracker, sink, cancel)
			.await;

		self.resources.clear_memory_cache();

		let (imported, imported_coords) = result?;
		Ok(SegmentOutcome {
			map_id,
			created_map,
			grids_imported: imported.len(),
			grids_skipped,
			created_grid_ids: imported,
			imported_coords,
		})
	}

	fn select_map(
		&self,
		tenant_id: &str,
		segment_id: u64,
		mode: ImportMode,
		grids: &[HmapGridData],
	) -> Result<(i64, bool, Vec<HmapGridData>, usize), ImportError> {
		let map_name = format!("import-{segment_id}-{}", unix_now());
		match mode {
			ImportMode::CreateNew => {
				let map = self.store.create_map(tenant_id, &map_name).map_err(ImportError::Persistence)?;
				Ok((map.id, true, grids.to_vec(), 0))
			}
			ImportMode::Merge => {
				let grid_ids: Vec<String> = grids.iter().map(HmapGridData::grid_id).collect();
				let existing: HashSet<String> = self
					.store
					.grids_existing(tenant_id, &grid_ids)
					.map_err(ImportError::Persistence)?
					.into_iter()
					.collect();

				let (map_id, created_map) = if let Some(first_existing) = existing.iter().next() {
					let map_id = self
						.store
						.map_id_for_grid(tenant_id, first_existing)
						.map_err(ImportError::Persistence)?
						.ok_or_else(|| ImportError::Persistence(anyhow::anyhow!("grid {first_existing} has no owning map")))?;
					(map_id, false)
				} else {
					let map = self.store.create_map(tenant_id, &map_name).map_err(ImportError::Persistence)?;
					(map.id, true)
				};

				let remaining: Vec<HmapGridData> = grids
					.iter()
					.filter(|g| !existing.contains(&g.grid_id()))
					.cloned()
					.collect();
				let skipped = grids.len() - remaining.len();
				Ok((map_id, created_map, remaining, skipped))
			}
		}
	}

	async fn run_pipeline(
		&self,
		tenant_id: &str,
		map_id: i64,
		grids: &[HmapGridData],
		tracker: &mut ProgressTracker,
		sink: &dyn ProgressSink,
		cancel: &CancellationToken,
	) -> Result<(Vec<String>, Vec<Coord>), ImportError> {
		if cancel.is_cancelled() {
			return Err(ImportError::Canceled);
		}

		let (tx, mut rx) = mpsc::channel::<RenderedGrid>(self.channel_capacity);
		let semaphore = Arc::new(Semaphore::new(self.render_parallelism));
		let first_producer_error: Arc<OnceLock<ImportError>> = Arc::new(OnceLock::new());

		// Producers and the consumer must be polled concurrently: a producer's
		// `blocking_send` only unblocks once the consumer drains the channel, and the
		// consumer only starts once this function is awaited, so spawning every
		// producer before awaiting the consumer would deadlock on any segment larger
		// than `channel_capacity + render_parallelism`.
		let produce = async {
			let mut producer_handles = Vec::with_capacity(grids.len());
			for grid in grids {
				if cancel.is_cancelled() {
					break;
				}
				let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
				let tx = tx.clone();
				let resources = self.resources.clone();
				let tenant_id = tenant_id.to_string();
				let storage_root = self.storage_root.clone();
				let first_error = first_producer_error.clone();
				let grid = grid.clone();
				let cancel = cancel.clone();

				let handle = tokio::task::spawn_blocking(move || {
					let _permit = permit;
					if cancel.is_cancelled() {
						return;
					}
					let coord = grid.coord();
					let grid_id = grid.grid_id();
					let relative_path = format!("tenants/{tenant_id}/{map_id}/0/{}_{}.png", coord.x, coord.y);
					let image = render_grid(&grid, &resources);

					let grid_record = GridRecord {
						id: grid_id,
						map_id,
						coord,
						next_update: unix_now() - 60,
						tenant_id: tenant_id.clone(),
					};

					let rendered = RenderedGrid {
						grid_record,
						relative_path,
						image,
					};

					if tx.blocking_send(rendered).is_err() {
						let _ = first_error.set(ImportError::Canceled);
					}
					let _ = storage_root;
				});
				producer_handles.push(handle);
			}
			drop(tx);

			for handle in producer_handles {
				let _ = handle.await;
			}
		};

		let ((), consumer_outcome) = tokio::join!(
			produce,
			self.consume(tenant_id, &mut rx, tracker, sink, cancel, &first_producer_error)
		);

		if let Some(err) = first_producer_error.get() {
			return Err(clone_import_error(err));
		}
		consumer_outcome
	}

	async fn consume(
		&self,
		tenant_id: &str,
		rx: &mut mpsc::Receiver<RenderedGrid>,
		tracker: &mut ProgressTracker,
		sink: &dyn ProgressSink,
		cancel: &CancellationToken,
		first_producer_error: &Arc<OnceLock<ImportError>>,
	) -> Result<(Vec<String>, Vec<Coord>), ImportError> {
		let mut batch = BatchContext::new(self.batch_size);
		let mut imported_ids = Vec::new();
		let mut imported_coords = Vec::new();
		let mut canceled = false;

		while let Some(rendered) = rx.recv().await {
			if cancel.is_cancelled() || first_producer_error.get().is_some() {
				// drop the buffer without writing or flushing; draining continues so
				// producers never block on a full channel after cancellation.
				canceled = cancel.is_cancelled();
				continue;
			}

			let absolute_path = self.storage_root.join(&rendered.relative_path);
			if let Some(parent) = absolute_path.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(ImportError::Io)?;
			}
			let png_bytes = rendered.image.to_png().map_err(ImportError::Persistence)?;
			tokio::fs::write(&absolute_path, &png_bytes).await.map_err(ImportError::Io)?;

			let file_size_bytes = png_bytes.len() as u64;
			let mb = file_size_bytes as f64 / (1024.0 * 1024.0);
			let coord = rendered.grid_record.coord;
			let grid_id = rendered.grid_record.id.clone();

			let tile_record = TileRecord {
				map_id: rendered.grid_record.map_id,
				coord,
				zoom: 0,
				file_path: rendered.relative_path,
				cache_timestamp: unix_now(),
				tenant_id: tenant_id.to_string(),
				file_size_bytes,
			};

			batch.add(rendered.grid_record, tile_record, mb);
			imported_ids.push(grid_id);
			imported_coords.push(coord);
			tracker.tick(sink, false);

			if batch.should_flush() {
				self.flush(tenant_id, &mut batch)?;
			}
		}

		if canceled {
			return Err(ImportError::Canceled);
		}

		if batch.has_pending_items() {
			self.flush(tenant_id, &mut batch)?;
		}

		Ok((imported_ids, imported_coords))
	}

	fn flush(&self, tenant_id: &str, batch: &mut BatchContext) -> Result<(), ImportError> {
		let (grids, tiles, mb) = batch.extract_batch();
		self.quota_service.check(tenant_id, mb)?;
		self
			.store
			.flush_batch(tenant_id, &grids, &tiles, mb)
			.map_err(ImportError::Persistence)
	}
}

fn clone_import_error(err: &ImportError) -> ImportError {
	match err {
		ImportError::Canceled => ImportError::Canceled,
		ImportError::QuotaExceeded {
			tenant_id,
			attempted_mb,
			quota_mb,
		} => ImportError::QuotaExceeded {
			tenant_id: tenant_id.clone(),
			attempted_mb: *attempted_mb,
			quota_mb: *quota_mb,
		},
		ImportError::ResourceFetch { resource, reason } => ImportError::ResourceFetch {
			resource: resource.clone(),
			reason: reason.clone(),
		},
		ImportError::Parse(e) => ImportError::Parse(e.clone()),
		ImportError::Io(e) => ImportError::Io(std::io::Error::new(e.kind(), e.to_string())),
		ImportError::Persistence(e) => ImportError::Persistence(anyhow::anyhow!("{e}")),
	}
}

fn unix_now() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use hmap_container::SqliteStore;
	use hmap_core::model::TilesetRef;
	use hmap_core::progress::NullProgressSink;

	fn grid(tile_x: i64, tile_y: i64) -> HmapGridData {
		HmapGridData {
			tile_x,
			tile_y,
			tilesets: vec![TilesetRef {
				resource_name: "gfx/tiles/grass".into(),
			}],
			tile_indices: vec![0; hmap_core::model::GRID_CELLS],
			z_map: None,
		}
	}

	async fn run_segment(
		store: Arc<dyn PersistenceStore>,
		storage_root: PathBuf,
		segment_id: u64,
		mode: ImportMode,
		grids: &[HmapGridData],
	) -> Result<SegmentOutcome, ImportError> {
		let quota_service = StorageQuotaService::new(store.clone());
		let resources = Arc::new(TileResourceService::new(storage_root.join("cache"), 64, None));
		let importer = SegmentImporter {
			store: &store,
			quota_service: &quota_service,
			resources: &resources,
			storage_root: &storage_root,
			render_parallelism: 4,
			channel_capacity: 20,
			batch_size: 500,
		};
		let mut tracker = ProgressTracker::new(ImportPhase::Import, grids.len() as u64);
		let sink = NullProgressSink;
		let cancel = CancellationToken::new();
		importer
			.import_segment("tenant-1", segment_id, mode, grids, &mut tracker, &sink, &cancel)
			.await
	}

	#[tokio::test]
	async fn create_new_renders_and_persists_every_grid() {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
		let grids = vec![grid(0, 0), grid(1, 0)];

		let outcome = run_segment(store.clone(), dir.path().to_path_buf(), 1, ImportMode::CreateNew, &grids)
			.await
			.unwrap();

		assert!(outcome.created_map);
		assert_eq!(outcome.grids_imported, 2);
		assert_eq!(outcome.grids_skipped, 0);
		assert_eq!(outcome.imported_coords.len(), 2);

		let tile = store.get_tile(outcome.map_id, 0, Coord::new(0, 0)).unwrap().unwrap();
		let png_path = dir.path().join(&tile.file_path);
		assert!(png_path.exists());
		assert_eq!(std::fs::metadata(&png_path).unwrap().len(), tile.file_size_bytes);
	}

	#[tokio::test]
	async fn merge_skips_grids_already_present_on_the_target_map() {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().unwrap());

		let first = run_segment(
			store.clone(),
			dir.path().to_path_buf(),
			1,
			ImportMode::CreateNew,
			&[grid(5, 7)],
		)
		.await
		.unwrap();

		let outcome = run_segment(
			store.clone(),
			dir.path().to_path_buf(),
			2,
			ImportMode::Merge,
			&[grid(5, 7), grid(6, 7), grid(8, 8)],
		)
		.await
		.unwrap();

		assert_eq!(outcome.map_id, first.map_id);
		assert!(!outcome.created_map);
		assert_eq!(outcome.grids_imported, 2);
		assert_eq!(outcome.grids_skipped, 1);
	}

	#[tokio::test]
	async fn segment_larger_than_channel_plus_parallelism_does_not_deadlock() {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
		let quota_service = StorageQuotaService::new(store.clone());
		let resources = Arc::new(TileResourceService::new(dir.path().join("cache"), 64, None));
		let storage_root = dir.path().to_path_buf();
		let importer = SegmentImporter {
			store: &store,
			quota_service: &quota_service,
			resources: &resources,
			storage_root: &storage_root,
			render_parallelism: 2,
			channel_capacity: 2,
			batch_size: 500,
		};
		let grids: Vec<HmapGridData> = (0..20).map(|i| grid(i, 0)).collect();
		let mut tracker = ProgressTracker::new(ImportPhase::Import, grids.len() as u64);
		let sink = NullProgressSink;
		let cancel = CancellationToken::new();

		let outcome = tokio::time::timeout(
			std::time::Duration::from_secs(10),
			importer.import_segment("tenant-1", 1, ImportMode::CreateNew, &grids, &mut tracker, &sink, &cancel),
		)
		.await
		.expect("pipeline must not deadlock once grids outnumber channel_capacity + render_parallelism")
		.unwrap();

		assert_eq!(outcome.grids_imported, 20);
	}

	#[tokio::test]
	async fn cancellation_before_start_yields_canceled_with_nothing_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
		let quota_service = StorageQuotaService::new(store.clone());
		let resources = Arc::new(TileResourceService::new(dir.path().join("cache"), 64, None));
		let storage_root = dir.path().to_path_buf();
		let importer = SegmentImporter {
			store: &store,
			quota_service: &quota_service,
			resources: &resources,
			storage_root: &storage_root,
			render_parallelism: 4,
			channel_capacity: 20,
			batch_size: 500,
		};
		let grids = vec![grid(0, 0), grid(1, 0), grid(2, 0)];
		let mut tracker = ProgressTracker::new(ImportPhase::Import, grids.len() as u64);
		let sink = NullProgressSink;
		let cancel = CancellationToken::new();
		cancel.cancel();

		let result = importer
			.import_segment("tenant-1", 1, ImportMode::CreateNew, &grids, &mut tracker, &sink, &cancel)
			.await;

		assert!(matches!(result, Err(ImportError::Canceled)));
	}
}
