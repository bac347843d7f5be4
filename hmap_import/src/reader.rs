//! Parses the binary `.hmap` container into an in-memory [`HmapContainer`].
//!
//! The grammar: a 4-byte magic and a version byte, then a segment count, then
//! per segment a 64-bit id, a grid list and a marker list, each length-prefixed.
//! Grids carry a fixed-size tileset list, a 10000-entry tile-index array and an
//! optional 10000-entry height array; markers carry a discriminant byte, a
//! length-prefixed name and, for `SMarker`, a length-prefixed resource name.
//! Every multi-byte integer is little-endian.

use byteorder::{LittleEndian, ReadBytesExt};
use hmap_core::error::ParseError;
use hmap_core::model::{HmapGridData, HmapMarker, TilesetRef, GRID_CELLS};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

const MAGIC: &[u8; 4] = b"HMAP";
const MARKER_KIND_S: u8 = 0;
const MARKER_KIND_OTHER: u8 = 1;

pub struct HmapContainer {
	segment_ids: Vec<u64>,
	grids: BTreeMap<u64, Vec<HmapGridData>>,
	markers: BTreeMap<u64, Vec<HmapMarker>>,
}

impl HmapContainer {
	/// Distinct segment ids, in file order.
	pub fn segment_ids(&self) -> &[u64] {
		&self.segment_ids
	}

	pub fn grids_for_segment(&self, id: u64) -> &[HmapGridData] {
		self.grids.get(&id).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn markers_for_segment(&self, id: u64) -> &[HmapMarker] {
		self.markers.get(&id).map(Vec::as_slice).unwrap_or(&[])
	}
}

pub struct HmapReader;

impl HmapReader {
	/// Parse a complete `.hmap` byte stream. The whole stream is buffered in
	/// memory first: imports are bounded by the segment-count cap upstream, not
	/// by streaming incrementally through this reader.
	pub fn parse(bytes: &[u8]) -> Result<HmapContainer, ParseError> {
		let mut cursor = Cursor::new(bytes);

		let mut magic = [0u8; 4];
		read_exact(&mut cursor, &mut magic)?;
		if &magic != MAGIC {
			return Err(ParseError::new(0, "bad magic"));
		}
		let _version = read_u16(&mut cursor)?;

		let segment_count = read_u32(&mut cursor)?;
		let mut segment_ids = Vec::with_capacity(segment_count as usize);
		let mut grids = BTreeMap::new();
		let mut markers = BTreeMap::new();

		for _ in 0..segment_count {
			let segment_id = read_u64(&mut cursor)?;
			segment_ids.push(segment_id);

			let grid_count = read_u32(&mut cursor)?;
			let mut segment_grids = Vec::with_capacity(grid_count as usize);
			for _ in 0..grid_count {
				segment_grids.push(read_grid(&mut cursor)?);
			}
			grids.insert(segment_id, segment_grids);

			let marker_count = read_u32(&mut cursor)?;
			let mut segment_markers = Vec::with_capacity(marker_count as usize);
			for _ in 0..marker_count {
				segment_markers.push(read_marker(&mut cursor)?);
			}
			markers.insert(segment_id, segment_markers);
		}

		Ok(HmapContainer {
			segment_ids,
			grids,
			markers,
		})
	}
}

fn read_grid(cursor: &mut Cursor<&[u8]>) -> Result<HmapGridData, ParseError> {
	let tile_x = read_i64(cursor)?;
	let tile_y = read_i64(cursor)?;

	let tileset_count = read_u16(cursor)?;
	let mut tilesets = Vec::with_capacity(tileset_count as usize);
	for _ in 0..tileset_count {
		tilesets.push(TilesetRef {
			resource_name: read_string(cursor)?,
		});
	}

	let mut tile_indices = Vec::with_capacity(GRID_CELLS);
	for _ in 0..GRID_CELLS {
		tile_indices.push(read_u16(cursor)?);
	}

	let has_z_map = read_u8(cursor)?;
	let z_map = if has_z_map != 0 {
		let mut values = Vec::with_capacity(GRID_CELLS);
		for _ in 0..GRID_CELLS {
			values.push(read_f32(cursor)?);
		}
		Some(values)
	} else {
		None
	};

	Ok(HmapGridData {
		tile_x,
		tile_y,
		tilesets,
		tile_indices,
		z_map,
	})
}

fn read_marker(cursor: &mut Cursor<&[u8]>) -> Result<HmapMarker, ParseError> {
	let kind = read_u8(cursor)?;
	let name = read_string(cursor)?;
	let tile_x = read_i64(cursor)?;
	let tile_y = read_i64(cursor)?;

	match kind {
		MARKER_KIND_S => Ok(HmapMarker::SMarker {
			name,
			tile_x,
			tile_y,
			resource_name: read_string(cursor)?,
		}),
		MARKER_KIND_OTHER => Ok(HmapMarker::OtherMarker { name, tile_x, tile_y }),
		other => Err(offset_error(cursor, format!("unknown marker kind {other}"))),
	}
}

fn offset_error(cursor: &Cursor<&[u8]>, reason: impl Into<String>) -> ParseError {
	ParseError::new(cursor.position(), reason)
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<(), ParseError> {
	cursor.read_exact(buf).map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
	cursor.read_u8().map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, ParseError> {
	cursor
		.read_u16::<LittleEndian>()
		.map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ParseError> {
	cursor
		.read_u32::<LittleEndian>()
		.map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, ParseError> {
	cursor
		.read_u64::<LittleEndian>()
		.map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64, ParseError> {
	cursor
		.read_i64::<LittleEndian>()
		.map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32, ParseError> {
	cursor
		.read_f32::<LittleEndian>()
		.map_err(|_| offset_error(cursor, "unexpected end of stream"))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ParseError> {
	let len = read_u16(cursor)?;
	let mut buf = vec![0u8; len as usize];
	read_exact(cursor, &mut buf)?;
	String::from_utf8(buf).map_err(|_| offset_error(cursor, "invalid utf-8 in string"))
}

#[cfg(test)]
pub(crate) mod builder {
	//! Assembles valid `.hmap` byte streams for tests.
	use super::*;
	use byteorder::WriteBytesExt;

	#[derive(Default)]
	pub struct ContainerBuilder {
		segments: Vec<(u64, Vec<HmapGridData>, Vec<HmapMarker>)>,
	}

	impl ContainerBuilder {
		pub fn segment(mut self, id: u64, grids: Vec<HmapGridData>, markers: Vec<HmapMarker>) -> Self {
			self.segments.push((id, grids, markers));
			self
		}

		pub fn build(self) -> Vec<u8> {
			let mut out = Vec::new();
			out.extend_from_slice(MAGIC);
			out.write_u16::<LittleEndian>(1).unwrap();
			out.write_u32::<LittleEndian>(self.segments.len() as u32).unwrap();
			for (id, grids, markers) in &self.segments {
				out.write_u64::<LittleEndian>(*id).unwrap();
				out.write_u32::<LittleEndian>(grids.len() as u32).unwrap();
				for grid in grids {
					write_grid(&mut out, grid);
				}
				out.write_u32::<LittleEndian>(markers.len() as u32).unwrap();
				for marker in markers {
					write_marker(&mut out, marker);
				}
			}
			out
		}
	}

	fn write_string(out: &mut Vec<u8>, s: &str) {
		out.write_u16::<LittleEndian>(s.len() as u16).unwrap();
		out.extend_from_slice(s.as_bytes());
	}

	fn write_grid(out: &mut Vec<u8>, grid: &HmapGridData) {
		out.write_i64::<LittleEndian>(grid.tile_x).unwrap();
		out.write_i64::<LittleEndian>(grid.tile_y).unwrap();
		out.write_u16::<LittleEndian>(grid.tilesets.len() as u16).unwrap();
		for tileset in &grid.tilesets {
			write_string(out, &tileset.resource_name);
		}
		assert_eq!(grid.tile_indices.len(), GRID_CELLS);
		for &idx in &grid.tile_indices {
			out.write_u16::<LittleEndian>(idx).unwrap();
		}
		match &grid.z_map {
			Some(values) => {
				out.write_u8(1).unwrap();
				assert_eq!(values.len(), GRID_CELLS);
				for &v in values {
					out.write_f32::<LittleEndian>(v).unwrap();
				}
			}
			None => out.write_u8(0).unwrap(),
		}
	}

	fn write_marker(out: &mut Vec<u8>, marker: &HmapMarker) {
		match marker {
			HmapMarker::SMarker {
				name,
				tile_x,
				tile_y,
				resource_name,
			} => {
				out.write_u8(MARKER_KIND_S).unwrap();
				write_string(out, name);
				out.write_i64::<LittleEndian>(*tile_x).unwrap();
				out.write_i64::<LittleEndian>(*tile_y).unwrap();
				write_string(out, resource_name);
			}
			HmapMarker::OtherMarker { name, tile_x, tile_y } => {
				out.write_u8(MARKER_KIND_OTHER).unwrap();
				write_string(out, name);
				out.write_i64::<LittleEndian>(*tile_x).unwrap();
				out.write_i64::<LittleEndian>(*tile_y).unwrap();
			}
		}
	}
}
