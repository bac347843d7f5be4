//! An owned RGBA8 pixel buffer.
//!
//! Kept deliberately simple (a flat byte vec plus width/height) rather than reusing
//! `image::RgbaImage` directly everywhere, so cloning, disposal and byte-identical
//! comparisons in tests are unambiguous — see the determinism property in the
//! renderer's contract.

use anyhow::{Context, Result};
use std::io::Cursor;

#[derive(Clone, PartialEq, Eq)]
pub struct RgbaImage {
	pub width: u32,
	pub height: u32,
	/// Row-major RGBA8, 4 bytes per pixel.
	pub data: Vec<u8>,
}

impl RgbaImage {
	pub fn new(width: u32, height: u32) -> Self {
		RgbaImage {
			width,
			height,
			data: vec![0u8; (width * height * 4) as usize],
		}
	}

	#[inline]
	pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
		let i = self.index(x, y);
		[self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
	}

	#[inline]
	pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
		let i = self.index(x, y);
		self.data[i..i + 4].copy_from_slice(&rgba);
	}

	#[inline]
	fn index(&self, x: u32, y: u32) -> usize {
		((y * self.width + x) * 4) as usize
	}

	/// Encode as a PNG byte buffer.
	pub fn to_png(&self) -> Result<Vec<u8>> {
		let mut buf = Vec::new();
		{
			let mut cursor = Cursor::new(&mut buf);
			let encoder = image::codecs::png::PngEncoder::new(&mut cursor);
			use image::ImageEncoder;
			encoder
				.write_image(&self.data, self.width, self.height, image::ExtendedColorType::Rgba8)
				.context("encoding grid tile as PNG")?;
		}
		Ok(buf)
	}

	/// Decode tileset/resource PNGs fetched from disk cache or network.
	pub fn from_png_bytes(bytes: &[u8]) -> Result<Self> {
		let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
			.context("decoding resource PNG")?
			.to_rgba8();
		Ok(RgbaImage {
			width: decoded.width(),
			height: decoded.height(),
			data: decoded.into_raw(),
		})
	}
}
