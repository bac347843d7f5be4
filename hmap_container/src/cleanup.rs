//! Best-effort teardown used when an import fails partway through and the maps
//! it created must not be left behind half-populated.
//!
//! Every step here is written to tolerate the thing it's deleting already being
//! gone: a crash between two cleanup steps must not turn a failed import into a
//! stuck one on retry.

use crate::store::PersistenceStore;
use std::path::{Path, PathBuf};

pub struct CleanupService<'a> {
	store: &'a dyn PersistenceStore,
	storage_root: &'a Path,
}

impl<'a> CleanupService<'a> {
	pub fn new(store: &'a dyn PersistenceStore, storage_root: &'a Path) -> Self {
		CleanupService { store, storage_root }
	}

	/// Remove a grid row by id. Never fails the caller: a grid that was never
	/// flushed, or already removed, is not an error.
	pub fn remove_grid(&self, grid_id: &str) {
		if let Err(err) = self.store.delete_grid(grid_id) {
			log::warn!("cleanup: failed to delete grid {grid_id}: {err:#}");
		}
	}

	/// Tear down one map created during a failed import: its rendered tiles on
	/// disk, its tile/map rows, and the storage it had been charged against.
	pub fn remove_map(&self, tenant_id: &str, map_id: i64) {
		let map_dir = self.map_directory(tenant_id, map_id);
		let freed_mb = directory_size_mb(&map_dir);

		if map_dir.exists() {
			if let Err(err) = std::fs::remove_dir_all(&map_dir) {
				log::warn!("cleanup: failed to remove directory {}: {err:#}", map_dir.display());
			}
		}

		if let Err(err) = self.store.delete_tiles_for_map(map_id) {
			log::warn!("cleanup: failed to delete tile rows for map {map_id}: {err:#}");
		}

		if let Err(err) = self.store.delete_map(map_id) {
			log::warn!("cleanup: failed to delete map row {map_id}: {err:#}");
		}

		if freed_mb > 0.0 {
			if let Err(err) = self.store.decrement_quota(tenant_id, freed_mb) {
				log::warn!("cleanup: failed to refund quota for tenant {tenant_id}: {err:#}");
			}
		}
	}

	fn map_directory(&self, tenant_id: &str, map_id: i64) -> PathBuf {
		self.storage_root.join("tenants").join(tenant_id).join(map_id.to_string())
	}
}

/// Sum of every rendered tile's size under `dir`, in megabytes. Zero if `dir`
/// doesn't exist. Only `.png` files count toward the refund: a stray non-tile
/// file under a map directory was never charged against the quota.
fn directory_size_mb(dir: &Path) -> f64 {
	fn walk(dir: &Path, total_bytes: &mut u64) {
		let Ok(entries) = std::fs::read_dir(dir) else {
			return;
		};
		for entry in entries.flatten() {
			let path = entry.path();
			if path.is_dir() {
				walk(&path, total_bytes);
			} else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")) {
				if let Ok(metadata) = entry.metadata() {
					*total_bytes += metadata.len();
				}
			}
		}
	}

	let mut total_bytes = 0u64;
	walk(dir, &mut total_bytes);
	total_bytes as f64 / (1024.0 * 1024.0)
}
