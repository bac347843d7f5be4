//! Data model shared by the reader, renderer and persistence layers.

use serde::{Deserialize, Serialize};

/// Integer grid/tile coordinate pair, used both for grid coordinates and
/// for zoom-pyramid tile coordinates.
///
/// `parent()` walks one level up the pyramid using *floored* division so the
/// tree stays contiguous across the origin; see `(-1).div_euclid(2) == -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
	pub x: i64,
	pub y: i64,
}

impl Coord {
	pub fn new(x: i64, y: i64) -> Self {
		Coord { x, y }
	}

	/// Floored-division parent, one zoom level up.
	pub fn parent(&self) -> Coord {
		Coord {
			x: self.x.div_euclid(2),
			y: self.y.div_euclid(2),
		}
	}

	/// The four children of this coord one zoom level down, in
	/// `(top-left, top-right, bottom-left, bottom-right)` order.
	pub fn children(&self) -> [Coord; 4] {
		let (x, y) = (self.x * 2, self.y * 2);
		[
			Coord::new(x, y),
			Coord::new(x + 1, y),
			Coord::new(x, y + 1),
			Coord::new(x + 1, y + 1),
		]
	}
}

/// Whether a segment should be merged into an existing map or always create one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportMode {
	CreateNew,
	Merge,
}

/// A tileset reference used to paint one terrain cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilesetRef {
	pub resource_name: String,
}

/// One 100x100 terrain grid, as parsed from the `.hmap` container.
#[derive(Debug, Clone)]
pub struct HmapGridData {
	pub tile_x: i64,
	pub tile_y: i64,
	pub tilesets: Vec<TilesetRef>,
	/// Row-major `[y * 100 + x]`, each value a tileset index into `tilesets`.
	pub tile_indices: Vec<u16>,
	/// Row-major height map, same layout as `tile_indices`, if present.
	pub z_map: Option<Vec<f32>>,
}

pub const GRID_SIDE: usize = 100;
pub const GRID_CELLS: usize = GRID_SIDE * GRID_SIDE;

impl HmapGridData {
	/// The id this grid is addressed by, unique within the file and per tenant.
	pub fn grid_id(&self) -> String {
		format!("{}_{}", self.tile_x, self.tile_y)
	}

	pub fn coord(&self) -> Coord {
		Coord::new(self.tile_x, self.tile_y)
	}
}

/// An icon marker placed somewhere in the explored world, in absolute tile coordinates.
#[derive(Debug, Clone)]
pub enum HmapMarker {
	SMarker {
		name: String,
		tile_x: i64,
		tile_y: i64,
		resource_name: String,
	},
	OtherMarker {
		name: String,
		tile_x: i64,
		tile_y: i64,
	},
}

pub const PLACEHOLDER_MARKER_RESOURCE: &str = "gfx/terobjs/mm/custom";

impl HmapMarker {
	pub fn name(&self) -> &str {
		match self {
			HmapMarker::SMarker { name, .. } | HmapMarker::OtherMarker { name, .. } => name,
		}
	}

	pub fn tile_x(&self) -> i64 {
		match self {
			HmapMarker::SMarker { tile_x, .. } | HmapMarker::OtherMarker { tile_x, .. } => *tile_x,
		}
	}

	pub fn tile_y(&self) -> i64 {
		match self {
			HmapMarker::SMarker { tile_y, .. } | HmapMarker::OtherMarker { tile_y, .. } => *tile_y,
		}
	}

	/// The icon image to render for this marker: its own resource, or the placeholder.
	pub fn image(&self) -> MarkerImage {
		match self {
			HmapMarker::SMarker { resource_name, .. } => MarkerImage::Resource(resource_name.clone()),
			HmapMarker::OtherMarker { .. } => MarkerImage::Placeholder,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerImage {
	Resource(String),
	Placeholder,
}

impl MarkerImage {
	pub fn as_str(&self) -> &str {
		match self {
			MarkerImage::Resource(name) => name,
			MarkerImage::Placeholder => PLACEHOLDER_MARKER_RESOURCE,
		}
	}
}

/// A persisted grid row.
#[derive(Debug, Clone)]
pub struct GridRecord {
	pub id: String,
	pub map_id: i64,
	pub coord: Coord,
	/// Unix seconds; written as `now - 60` to flag the grid as immediately stale.
	pub next_update: i64,
	pub tenant_id: String,
}

/// A persisted tile row, primary key `(map_id, zoom, coord)`.
#[derive(Debug, Clone)]
pub struct TileRecord {
	pub map_id: i64,
	pub coord: Coord,
	pub zoom: u8,
	pub file_path: String,
	pub cache_timestamp: i64,
	pub tenant_id: String,
	pub file_size_bytes: u64,
}

/// A persisted map row.
#[derive(Debug, Clone)]
pub struct MapRecord {
	pub id: i64,
	pub name: String,
	pub tenant_id: String,
	pub hidden: bool,
	pub priority: i32,
	pub created_at: i64,
}

/// Per-tenant running storage counter and enforced ceiling.
#[derive(Debug, Clone, Copy)]
pub struct TenantQuota {
	pub current_storage_mb: f64,
	pub quota_mb: f64,
}

impl TenantQuota {
	pub fn would_exceed(&self, additional_mb: f64) -> bool {
		self.current_storage_mb + additional_mb > self.quota_mb
	}
}
