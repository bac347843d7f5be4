//! SQLite-backed `PersistenceStore`: a pooled `r2d2::Pool<SqliteConnectionManager>`,
//! one transaction per logical write.

use super::PersistenceStore;
use anyhow::{Context, Result};
use hmap_core::model::{Coord, GridRecord, MapRecord, TenantQuota, TileRecord};
use r2d2::Pool;
use r2d2_sqlite::{rusqlite::params, SqliteConnectionManager};
use std::path::Path;

pub struct SqliteStore {
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
	pub fn open(path: &Path) -> Result<Self> {
		let manager = SqliteConnectionManager::file(path);
		let pool = Pool::builder().max_size(4).build(manager).context("opening sqlite pool")?;
		let store = SqliteStore { pool };
		store.migrate()?;
		Ok(store)
	}

	pub fn open_in_memory() -> Result<Self> {
		let manager = SqliteConnectionManager::memory();
		let pool = Pool::builder()
			.max_size(1)
			.build(manager)
			.context("opening in-memory sqlite pool")?;
		let store = SqliteStore { pool };
		store.migrate()?;
		Ok(store)
	}

	fn migrate(&self) -> Result<()> {
		self.pool.get()?.execute_batch(
			"CREATE TABLE IF NOT EXISTS maps (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				name TEXT NOT NULL,
				tenant_id TEXT NOT NULL,
				hidden INTEGER NOT NULL DEFAULT 0,
				priority INTEGER NOT NULL DEFAULT 0,
				created_at INTEGER NOT NULL,
				UNIQUE (tenant_id, name)
			);
			CREATE TABLE IF NOT EXISTS grids (
				id TEXT PRIMARY KEY,
				map_id INTEGER NOT NULL,
				coord_x INTEGER NOT NULL,
				coord_y INTEGER NOT NULL,
				next_update INTEGER NOT NULL,
				tenant_id TEXT NOT NULL
			);
			CREATE TABLE IF NOT EXISTS tiles (
				map_id INTEGER NOT NULL,
				zoom INTEGER NOT NULL,
				coord_x INTEGER NOT NULL,
				coord_y INTEGER NOT NULL,
				file TEXT NOT NULL,
				cache INTEGER NOT NULL,
				tenant_id TEXT NOT NULL,
				file_size_bytes INTEGER NOT NULL,
				PRIMARY KEY (map_id, zoom, coord_x, coord_y)
			);
			CREATE TABLE IF NOT EXISTS tenant_quotas (
				tenant_id TEXT PRIMARY KEY,
				current_storage_mb REAL NOT NULL DEFAULT 0,
				quota_mb REAL NOT NULL DEFAULT 0
			);",
		)?;
		Ok(())
	}

	/// Test/demo helper: seed a tenant's quota ceiling.
	pub fn set_quota_ceiling(&self, tenant_id: &str, quota_mb: f64) -> Result<()> {
		self.pool.get()?.execute(
			"INSERT INTO tenant_quotas (tenant_id, current_storage_mb, quota_mb) VALUES (?1, 0, ?2)
			 ON CONFLICT(tenant_id) DO UPDATE SET quota_mb = excluded.quota_mb",
			params![tenant_id, quota_mb],
		)?;
		Ok(())
	}
}

impl PersistenceStore for SqliteStore {
	fn create_map(&self, tenant_id: &str, name: &str) -> Result<MapRecord> {
		let conn = self.pool.get()?;
		let created_at = unix_now();
		conn.execute(
			"INSERT INTO maps (name, tenant_id, hidden, priority, created_at) VALUES (?1, ?2, 0, 0, ?3)",
			params![name, tenant_id, created_at],
		)?;
		let id = conn.last_insert_rowid();
		Ok(MapRecord {
			id,
			name: name.to_string(),
			tenant_id: tenant_id.to_string(),
			hidden: false,
			priority: 0,
			created_at,
		})
	}

	fn grids_existing(&self, tenant_id: &str, grid_ids: &[String]) -> Result<Vec<String>> {
		if grid_ids.is_empty() {
			return Ok(Vec::new());
		}
		let conn = self.pool.get()?;
		let placeholders = grid_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
		let sql = format!("SELECT id FROM grids WHERE tenant_id = ? AND id IN ({placeholders})");
		let mut stmt = conn.prepare(&sql)?;
		let mut rusqlite_params: Vec<&dyn r2d2_sqlite::rusqlite::ToSql> = vec![&tenant_id];
		rusqlite_params.extend(grid_ids.iter().map(|g| g as &dyn r2d2_sqlite::rusqlite::ToSql));
		let rows = stmt.query_map(rusqlite_params.as_slice(), |row| row.get::<_, String>(0))?;
		let mut existing = Vec::new();
		for row in rows {
			existing.push(row?);
		}
		Ok(existing)
	}

	fn map_id_for_grid(&self, tenant_id: &str, grid_id: &str) -> Result<Option<i64>> {
		let conn = self.pool.get()?;
		let result = conn.query_row(
			"SELECT map_id FROM grids WHERE tenant_id = ?1 AND id = ?2",
			params![tenant_id, grid_id],
			|row| row.get::<_, i64>(0),
		);
		match result {
			Ok(map_id) => Ok(Some(map_id)),
			Err(r2d2_sqlite::rusqlite::Error::QueryReturnedNoRows) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn flush_batch(&self, tenant_id: &str, grids: &[GridRecord], tiles: &[TileRecord], mb_delta: f64) -> Result<()> {
		let mut conn = self.pool.get()?;
		let tx = conn.transaction()?;
		for grid in grids {
			tx.execute(
				"INSERT OR REPLACE INTO grids (id, map_id, coord_x, coord_y, next_update, tenant_id)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
				params![grid.id, grid.map_id, grid.coord.x, grid.coord.y, grid.next_update, grid.tenant_id],
			)?;
		}
		for tile in tiles {
			upsert_tile_tx(&tx, tile)?;
		}
		tx.execute(
			"INSERT INTO tenant_quotas (tenant_id, current_storage_mb, quota_mb) VALUES (?1, ?2, 0)
			 ON CONFLICT(tenant_id) DO UPDATE SET current_storage_mb = current_storage_mb + ?2",
			params![tenant_id, mb_delta],
		)?;
		tx.commit()?;
		Ok(())
	}

	fn get_quota(&self, tenant_id: &str) -> Result<TenantQuota> {
		let conn = self.pool.get()?;
		let result = conn.query_row(
			"SELECT current_storage_mb, quota_mb FROM tenant_quotas WHERE tenant_id = ?1",
			params![tenant_id],
			|row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
		);
		match result {
			Ok((current_storage_mb, quota_mb)) => Ok(TenantQuota {
				current_storage_mb,
				quota_mb,
			}),
			Err(r2d2_sqlite::rusqlite::Error::QueryReturnedNoRows) => Ok(TenantQuota {
				current_storage_mb: 0.0,
				quota_mb: f64::MAX,
			}),
			Err(e) => Err(e.into()),
		}
	}

	fn get_tile(&self, map_id: i64, zoom: u8, coord: Coord) -> Result<Option<TileRecord>> {
		let conn = self.pool.get()?;
		let result = conn.query_row(
			"SELECT file, cache, tenant_id, file_size_bytes FROM tiles
			 WHERE map_id = ?1 AND zoom = ?2 AND coord_x = ?3 AND coord_y = ?4",
			params![map_id, zoom, coord.x, coord.y],
			|row| {
				Ok(TileRecord {
					map_id,
					coord,
					zoom,
					file_path: row.get(0)?,
					cache_timestamp: row.get(1)?,
					tenant_id: row.get(2)?,
					file_size_bytes: row.get::<_, i64>(3)? as u64,
				})
			},
		);
		match result {
			Ok(tile) => Ok(Some(tile)),
			Err(r2d2_sqlite::rusqlite::Error::QueryReturnedNoRows) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn upsert_tile(&self, tile: &TileRecord) -> Result<()> {
		let conn = self.pool.get()?;
		upsert_tile_tx(&conn, tile)
	}

	fn delete_grid(&self, grid_id: &str) -> Result<()> {
		self.pool.get()?.execute("DELETE FROM grids WHERE id = ?1", params![grid_id])?;
		Ok(())
	}

	fn delete_tiles_for_map(&self, map_id: i64) -> Result<()> {
		self
			.pool
			.get()?
			.execute("DELETE FROM tiles WHERE map_id = ?1", params![map_id])?;
		Ok(())
	}

	fn delete_map(&self, map_id: i64) -> Result<()> {
		self.pool.get()?.execute("DELETE FROM maps WHERE id = ?1", params![map_id])?;
		Ok(())
	}

	fn decrement_quota(&self, tenant_id: &str, delta_mb: f64) -> Result<()> {
		self.pool.get()?.execute(
			"UPDATE tenant_quotas SET current_storage_mb = MAX(0, current_storage_mb - ?2) WHERE tenant_id = ?1",
			params![tenant_id, delta_mb],
		)?;
		Ok(())
	}
}

fn upsert_tile_tx(conn: &r2d2_sqlite::rusqlite::Connection, tile: &TileRecord) -> Result<()> {
	conn.execute(
		"INSERT INTO tiles (map_id, zoom, coord_x, coord_y, file, cache, tenant_id, file_size_bytes)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
		 ON CONFLICT(map_id, zoom, coord_x, coord_y) DO UPDATE SET
			file = excluded.file,
			cache = excluded.cache,
			file_size_bytes = excluded.file_size_bytes",
		params![
			tile.map_id,
			tile.zoom,
			tile.coord.x,
			tile.coord.y,
			tile.file_path,
			tile.cache_timestamp,
			tile.tenant_id,
			tile.file_size_bytes as i64,
		],
	)?;
	Ok(())
}

fn unix_now() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}
