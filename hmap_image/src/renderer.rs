//! The three-pass terrain shader: base sampling, cliff shading, priority borders.
//!
//! All three passes are deterministic; the exact numeric thresholds and wrapping
//! semantics below are part of the public contract, not an implementation detail.

use crate::image::RgbaImage;
use crate::resource_service::TileResourceService;
use hmap_core::model::{HmapGridData, GRID_SIDE};

pub const MISSING_COLOR: [u8; 4] = [128, 128, 128, 255];
pub const CLIFF_THRESHOLD: f32 = 2.0;
pub const CLIFF_EPSILON: f32 = 0.01;

#[inline]
fn euclid_rem(a: i64, m: i64) -> i64 {
	((a % m) + m) % m
}

/// Render one grid into a 100x100 RGBA image, given the resolved tileset textures.
pub fn render_grid(grid: &HmapGridData, resources: &TileResourceService) -> RgbaImage {
	let side = GRID_SIDE as u32;
	let mut image = RgbaImage::new(side, side);

	let textures: Vec<Option<RgbaImage>> = grid
		.tilesets
		.iter()
		.map(|t| resources.get_tile_image(&t.resource_name))
		.collect();

	pass1_base_sampling(grid, &textures, &mut image);
	if let Some(z_map) = &grid.z_map {
		pass2_cliff_shading(z_map, &mut image);
	}
	pass3_priority_borders(grid, &mut image);

	image
}

fn pass1_base_sampling(grid: &HmapGridData, textures: &[Option<RgbaImage>], image: &mut RgbaImage) {
	let side = GRID_SIDE;
	for y in 0..side {
		for x in 0..side {
			let idx = y * side + x;
			let tset_idx = grid.tile_indices[idx] as usize;
			let pixel = match textures.get(tset_idx).and_then(|t| t.as_ref()) {
				None => MISSING_COLOR,
				Some(texture) => {
					let tw = texture.width as i64;
					let th = texture.height as i64;
					let sx = euclid_rem(x as i64, tw) as u32;
					let sy = euclid_rem(y as i64, th) as u32;
					texture.get_pixel(sx, sy)
				}
			};
			image.set_pixel(x as u32, y as u32, pixel);
		}
	}
}

fn pass2_cliff_shading(z_map: &[f32], image: &mut RgbaImage) {
	let side = GRID_SIDE;
	let threshold = CLIFF_THRESHOLD + CLIFF_EPSILON;

	let mut cliffs = Vec::new();
	for y in 1..side - 1 {
		for x in 1..side - 1 {
			let idx = y * side + x;
			let z = z_map[idx];
			let neighbors = [
				z_map[idx - 1],
				z_map[idx + 1],
				z_map[idx - side],
				z_map[idx + side],
			];
			if neighbors.iter().any(|n| (n - z).abs() > threshold) {
				cliffs.push((x, y));
			}
		}
	}

	for (cx, cy) in cliffs {
		for dy in -1i32..=1 {
			for dx in -1i32..=1 {
				let nx = cx as i32 + dx;
				let ny = cy as i32 + dy;
				if nx < 0 || ny < 0 || nx as usize >= side || ny as usize >= side {
					continue;
				}
				let factor = if dx == 0 && dy == 0 { 1.0f32 } else { 0.1f32 };
				darken(image, nx as u32, ny as u32, factor);
			}
		}
	}
}

fn darken(image: &mut RgbaImage, x: u32, y: u32, factor: f32) {
	let [r, g, b, a] = image.get_pixel(x, y);
	let blend = |c: u8| (c as f32 * (1.0 - factor)).round().clamp(0.0, 255.0) as u8;
	image.set_pixel(x, y, [blend(r), blend(g), blend(b), a]);
}

fn pass3_priority_borders(grid: &HmapGridData, image: &mut RgbaImage) {
	let side = GRID_SIDE;
	let indices = &grid.tile_indices;
	for y in 0..side {
		for x in 0..side {
			let idx = y * side + x;
			let this_value = indices[idx];
			let mut neighbors = Vec::with_capacity(4);
			if x > 0 {
				neighbors.push(indices[idx - 1]);
			}
			if x + 1 < side {
				neighbors.push(indices[idx + 1]);
			}
			if y > 0 {
				neighbors.push(indices[idx - side]);
			}
			if y + 1 < side {
				neighbors.push(indices[idx + side]);
			}
			if neighbors.into_iter().any(|n| n > this_value) {
				image.set_pixel(x as u32, y as u32, [0, 0, 0, 255]);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hmap_core::model::{TilesetRef, GRID_CELLS};
	use std::path::PathBuf;

	fn resources() -> TileResourceService {
		TileResourceService::new(PathBuf::from(std::env::temp_dir().join("hmap_render_test")), 16, None)
	}

	fn identity_grid() -> HmapGridData {
		HmapGridData {
			tile_x: 0,
			tile_y: 0,
			tilesets: vec![TilesetRef {
				resource_name: "gfx/tiles/grass".into(),
			}],
			tile_indices: vec![0; GRID_CELLS],
			z_map: None,
		}
	}

	#[test]
	fn missing_tileset_renders_grey_before_pass3() {
		let mut grid = identity_grid();
		grid.tile_indices = vec![5; GRID_CELLS]; // 5 is out of range: only 1 tileset
		let image = render_grid(&grid, &resources());
		// uniform tile_indices => no neighbor is strictly greater => pass 3 never fires
		assert_eq!(image.get_pixel(50, 50), MISSING_COLOR);
	}

	#[test]
	fn pass3_overwrites_lower_priority_neighbor_with_opaque_black() {
		let mut grid = identity_grid();
		// two tilesets, both missing (no resource service backing), but indices differ
		grid.tilesets.push(TilesetRef {
			resource_name: "gfx/tiles/rock".into(),
		});
		let side = GRID_SIDE;
		let mut indices = vec![0u16; GRID_CELLS];
		indices[10 * side + 10] = 1; // higher priority neighbor of (10,11) say
		indices[10 * side + 11] = 0;
		grid.tile_indices = indices;

		let image = render_grid(&grid, &resources());
		// (10,11) has a neighbor (10,10) with strictly greater index -> painted black
		assert_eq!(image.get_pixel(11, 10), [0, 0, 0, 255]);
	}

	#[test]
	fn pass3_is_independent_of_z_map() {
		let mut grid = identity_grid();
		grid.tilesets.push(TilesetRef {
			resource_name: "gfx/tiles/rock".into(),
		});
		let side = GRID_SIDE;
		let mut indices = vec![0u16; GRID_CELLS];
		indices[50 * side + 50] = 1;
		grid.tile_indices = indices;

		let without_z = render_grid(&grid, &resources());

		let mut with_z = grid.clone();
		with_z.z_map = Some(vec![0.0; GRID_CELLS]);
		let with_z_image = render_grid(&with_z, &resources());

		for y in 0..side as u32 {
			for x in 0..side as u32 {
				let a = without_z.get_pixel(x, y);
				let b = with_z_image.get_pixel(x, y);
				// pass 3 output (black or not) must match on every pixel that pass 2 cannot touch,
				// i.e. any pixel that ends up painted black by pass 3 in one must in the other too.
				let a_is_black = a == [0, 0, 0, 255];
				let b_is_black = b == [0, 0, 0, 255];
				assert_eq!(a_is_black, b_is_black, "mismatch at ({x},{y})");
			}
		}
	}

	#[test]
	fn cliff_threshold_boundary() {
		let side = GRID_SIDE;
		let mut z_map = vec![0.0f32; GRID_CELLS];
		// row 10 at z=0, row 11 at z=2.01 (just above threshold) across a span
		for x in 10..20 {
			z_map[11 * side + x] = 2.01;
		}
		let mut grid = identity_grid();
		grid.z_map = Some(z_map);
		let image = render_grid(&grid, &resources());
		// the darkened center of (15, 11) is blended fully toward black from MISSING_COLOR
		let px = image.get_pixel(15, 11);
		assert_eq!(px, [0, 0, 0, 255]);
	}

	#[test]
	fn cliff_threshold_exactly_2_00_does_not_trigger() {
		let side = GRID_SIDE;
		let mut z_map = vec![0.0f32; GRID_CELLS];
		for x in 10..20 {
			z_map[11 * side + x] = 2.00;
		}
		let mut grid = identity_grid();
		grid.z_map = Some(z_map);
		let image = render_grid(&grid, &resources());
		assert_eq!(image.get_pixel(15, 11), MISSING_COLOR);
	}

	#[test]
	fn texture_wrap_uses_euclidean_remainder() {
		let mut texture = RgbaImage::new(7, 5);
		texture.set_pixel(0, 0, [9, 9, 9, 255]);
		let mut resources_ = resources();
		// inject directly via disk cache write path isn't available without a fetcher;
		// assert the arithmetic helper matches indexing at (0,0) for any multiple of the
		// texture size, which is what the renderer relies on.
		let _ = &mut resources_;
		assert_eq!(euclid_rem(0, 7), 0);
		assert_eq!(euclid_rem(100, 7), 100 % 7);
		assert_eq!(euclid_rem(-1, 7), 6);
	}

	#[test]
	fn two_renders_are_byte_identical() {
		let grid = identity_grid();
		let a = render_grid(&grid, &resources());
		let b = render_grid(&grid, &resources());
		assert_eq!(a, b);
	}
}
