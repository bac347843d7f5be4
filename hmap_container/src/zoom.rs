//! Recomputes every ancestor zoom level touched by one map's newly imported grids.
//!
//! Zoom `k` composites zoom `k-1`, so levels must be built strictly in ascending
//! order, and within one level updates are sequential because the persistence
//! layer is single-writer.

use anyhow::Result;
use hmap_core::model::{Coord, TileRecord};
use hmap_image::RgbaImage;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::path::Path;

use crate::store::PersistenceStore;

pub const MAX_ZOOM: u8 = 6;

pub struct ZoomPyramidBuilder<'a> {
	store: &'a dyn PersistenceStore,
	storage_root: &'a Path,
}

impl<'a> ZoomPyramidBuilder<'a> {
	pub fn new(store: &'a dyn PersistenceStore, storage_root: &'a Path) -> Self {
		ZoomPyramidBuilder { store, storage_root }
	}

	/// Build zoom levels 1..=6 for `map_id`, covering every ancestor of `coords`
	/// (the zoom-0 coordinates of grids imported in this call).
	pub fn build(&self, map_id: i64, tenant_id: &str, coords: &[Coord]) -> Result<()> {
		let pairs = Self::ancestors(coords);

		for zoom in 1..=MAX_ZOOM {
			let level_coords: BTreeSet<Coord> = pairs
				.iter()
				.filter(|(z, _)| *z == zoom)
				.map(|(_, c)| *c)
				.collect();
			for coord in level_coords {
				self.update_one(map_id, tenant_id, zoom, coord)?;
			}
		}
		Ok(())
	}

	/// Every `(zoom, coord)` pair reached by walking `parent()` six times from
	/// each input coord, deduplicated.
	fn ancestors(coords: &[Coord]) -> Vec<(u8, Coord)> {
		coords
			.iter()
			.flat_map(|&coord| {
				let mut current = coord;
				(1..=MAX_ZOOM).map(move |zoom| {
					current = current.parent();
					(zoom, current)
				})
			})
			.unique()
			.collect()
	}

	fn update_one(&self, map_id: i64, tenant_id: &str, zoom: u8, coord: Coord) -> Result<()> {
		let mut composite = RgbaImage::new(200, 200);
		for (i, child) in coord.children().into_iter().enumerate() {
			if let Some(child_tile) = self.store.get_tile(map_id, zoom - 1, child)? {
				let bytes = std::fs::read(self.storage_root.join(&child_tile.file_path))?;
				let child_image = RgbaImage::from_png_bytes(&bytes)?;
				let (ox, oy) = ((i % 2) as u32 * 100, (i / 2) as u32 * 100);
				paste_downscaled(&mut composite, &child_image, ox, oy);
			}
			// missing children stay transparent: composite starts fully zeroed
		}

		let downsampled = downscale_half(&composite);
		let relative_path = format!("tenants/{tenant_id}/{map_id}/{zoom}/{}_{}.png", coord.x, coord.y);
		let absolute_path = self.storage_root.join(&relative_path);
		if let Some(parent) = absolute_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let png = downsampled.to_png()?;
		std::fs::write(&absolute_path, &png)?;

		self.store.upsert_tile(&TileRecord {
			map_id,
			coord,
			zoom,
			file_path: relative_path,
			cache_timestamp: unix_now(),
			tenant_id: tenant_id.to_string(),
			file_size_bytes: png.len() as u64,
		})?;
		Ok(())
	}
}

/// Paste `src` (100x100) at `(ox, oy)` in the 200x200 `dst`, unscaled: the caller
/// halves the whole composite afterward.
fn paste_downscaled(dst: &mut RgbaImage, src: &RgbaImage, ox: u32, oy: u32) {
	for y in 0..src.height {
		for x in 0..src.width {
			dst.set_pixel(ox + x, oy + y, src.get_pixel(x, y));
		}
	}
}

/// Halve a 200x200 image to 100x100 by 2x2 box averaging.
fn downscale_half(src: &RgbaImage) -> RgbaImage {
	let mut out = RgbaImage::new(src.width / 2, src.height / 2);
	for y in 0..out.height {
		for x in 0..out.width {
			let mut sum = [0u32; 4];
			for dy in 0..2 {
				for dx in 0..2 {
					let p = src.get_pixel(x * 2 + dx, y * 2 + dy);
					for c in 0..4 {
						sum[c] += p[c] as u32;
					}
				}
			}
			out.set_pixel(x, y, [
				(sum[0] / 4) as u8,
				(sum[1] / 4) as u8,
				(sum[2] / 4) as u8,
				(sum[3] / 4) as u8,
			]);
		}
	}
	out
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
	use crate::store::SqliteStore;

	#[test]
	fn ancestors_cover_six_levels_and_dedupe() {
		let pairs = ZoomPyramidBuilder::ancestors(&[Coord::new(0, 0), Coord::new(1, 0)]);
		// (0,0) and (1,0) share the same parent at zoom 1: (0,0)
		let zoom1: Vec<_> = pairs.iter().filter(|(z, _)| *z == 1).collect();
		assert_eq!(zoom1.len(), 1);
		let max_zoom = pairs.iter().map(|(z, _)| *z).max().unwrap();
		assert_eq!(max_zoom, MAX_ZOOM);
	}

	#[test]
	fn build_writes_a_tile_row_for_every_ancestor_level() {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteStore::open_in_memory().unwrap();
		let map = store.create_map("tenant-1", "m").unwrap();

		// seed a single zoom-0 tile so the pyramid has something to composite
		let zero_tile_path = dir.path().join("tenants/tenant-1/1/0/0_0.png");
		std::fs::create_dir_all(zero_tile_path.parent().unwrap()).unwrap();
		let image = RgbaImage::new(100, 100);
		std::fs::write(&zero_tile_path, image.to_png().unwrap()).unwrap();
		store
			.upsert_tile(&TileRecord {
				map_id: map.id,
				coord: Coord::new(0, 0),
				zoom: 0,
				file_path: "tenants/tenant-1/1/0/0_0.png".into(),
				cache_timestamp: 0,
				tenant_id: "tenant-1".into(),
				file_size_bytes: 1,
			})
			.unwrap();

		let builder = ZoomPyramidBuilder::new(&store, dir.path());
		builder.build(map.id, "tenant-1", &[Coord::new(0, 0)]).unwrap();

		for zoom in 1..=MAX_ZOOM {
			let coord = {
				let mut c = Coord::new(0, 0);
				for _ in 0..zoom {
					c = c.parent();
				}
				c
			};
			assert!(
				store.get_tile(map.id, zoom, coord).unwrap().is_some(),
				"missing zoom {zoom} tile"
			);
		}
	}
}
