//! The persistence trait the rest of the container crate is built against, plus
//! its SQLite-backed implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use hmap_core::model::{Coord, GridRecord, MapRecord, TenantQuota, TileRecord};

/// Logical persistence contract for `Maps`, `Grids`, `Tiles` and `TenantQuotas`.
///
/// Implementations are expected to be safe to call from a single writer thread;
/// the import pipeline never calls these concurrently with itself (see the
/// concurrency model: persistence is strictly single-writer).
pub trait PersistenceStore: Send + Sync {
	fn create_map(&self, tenant_id: &str, name: &str) -> Result<MapRecord>;

	/// Of `grid_ids`, return the subset that already exists for `tenant_id`, in a
	/// single round trip.
	fn grids_existing(&self, tenant_id: &str, grid_ids: &[String]) -> Result<Vec<String>>;

	fn map_id_for_grid(&self, tenant_id: &str, grid_id: &str) -> Result<Option<i64>>;

	/// Insert grids, tiles and bump the tenant's storage counter in one
	/// crash-consistent transaction.
	fn flush_batch(&self, tenant_id: &str, grids: &[GridRecord], tiles: &[TileRecord], mb_delta: f64) -> Result<()>;

	fn get_quota(&self, tenant_id: &str) -> Result<TenantQuota>;

	fn get_tile(&self, map_id: i64, zoom: u8, coord: Coord) -> Result<Option<TileRecord>>;

	/// Used by the zoom pyramid builder: one row at a time, strictly sequential.
	fn upsert_tile(&self, tile: &TileRecord) -> Result<()>;

	fn delete_grid(&self, grid_id: &str) -> Result<()>;

	fn delete_tiles_for_map(&self, map_id: i64) -> Result<()>;

	fn delete_map(&self, map_id: i64) -> Result<()>;

	fn decrement_quota(&self, tenant_id: &str, delta_mb: f64) -> Result<()>;
}
