//! Resolves tileset resource names to owned RGBA images, with a two-tier cache.
//!
//! The on-disk tier is keyed by a percent-encoded resource name, turning
//! arbitrary resource paths into safe file names. The in-memory tier is a
//! bounded LRU reset between segments by `clear_memory_cache`.

use crate::image::RgbaImage;
use anyhow::Result;
use moka::sync::Cache as MokaCache;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("could not fetch resource '{resource}': {reason}")]
pub struct FetchError {
	pub resource: String,
	pub reason: String,
}

/// Fetches the raw bytes of a tileset resource from the network on a cache miss.
///
/// A trait so tests and headless imports can supply a stub instead of hitting
/// the network; the default implementation is [`HttpResourceFetcher`].
pub trait ResourceFetcher: Send + Sync {
	fn fetch(&self, resource_name: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `{base_url}/{resource_name}.png` with a blocking client.
pub struct HttpResourceFetcher {
	base_url: String,
	client: reqwest::blocking::Client,
}

impl HttpResourceFetcher {
	pub fn new(base_url: impl Into<String>) -> Self {
		HttpResourceFetcher {
			base_url: base_url.into(),
			client: reqwest::blocking::Client::new(),
		}
	}
}

impl ResourceFetcher for HttpResourceFetcher {
	fn fetch(&self, resource_name: &str) -> Result<Vec<u8>, FetchError> {
		let url = format!("{}/{resource_name}.png", self.base_url.trim_end_matches('/'));
		let to_err = |reason: String| FetchError {
			resource: resource_name.to_string(),
			reason,
		};
		let response = self.client.get(&url).send().map_err(|e| to_err(e.to_string()))?;
		if !response.status().is_success() {
			return Err(to_err(format!("HTTP {}", response.status())));
		}
		response.bytes().map(|b| b.to_vec()).map_err(|e| to_err(e.to_string()))
	}
}

/// Bulk-prefetch progress: `(resources_done, resources_total)`.
pub type PrefetchProgress<'a> = dyn FnMut(usize, usize) + 'a;

fn encode_cache_filename(resource_name: &str) -> String {
	resource_name
		.bytes()
		.map(|b| {
			if (b as char).is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b',') {
				(b as char).to_string()
			} else {
				format!("%{b:02x}")
			}
		})
		.collect()
}

pub struct TileResourceService {
	disk_cache_dir: PathBuf,
	memory_cache: MokaCache<String, RgbaImage>,
	fetcher: Option<Box<dyn ResourceFetcher>>,
	first_network_error: OnceLock<FetchError>,
}

impl TileResourceService {
	pub fn new(disk_cache_dir: PathBuf, memory_cache_capacity: u64, fetcher: Option<Box<dyn ResourceFetcher>>) -> Self {
		fs::create_dir_all(&disk_cache_dir).ok();
		TileResourceService {
			disk_cache_dir,
			memory_cache: MokaCache::builder().max_capacity(memory_cache_capacity).build(),
			fetcher,
			first_network_error: OnceLock::new(),
		}
	}

	fn disk_path(&self, resource_name: &str) -> PathBuf {
		self.disk_cache_dir.join(encode_cache_filename(resource_name))
	}

	/// Resolve a resource name to an owned RGBA image. Returns `None` ("missing")
	/// if the resource is ultimately unavailable; never aliases a cached buffer.
	pub fn get_tile_image(&self, resource_name: &str) -> Option<RgbaImage> {
		if let Some(image) = self.memory_cache.get(resource_name) {
			return Some(image);
		}

		let disk_path = self.disk_path(resource_name);
		if let Ok(bytes) = fs::read(&disk_path) {
			if let Ok(image) = RgbaImage::from_png_bytes(&bytes) {
				self.memory_cache.insert(resource_name.to_string(), image.clone());
				return Some(image);
			}
		}

		let fetcher = self.fetcher.as_ref()?;
		match fetcher.fetch(resource_name) {
			Ok(bytes) => match RgbaImage::from_png_bytes(&bytes) {
				Ok(image) => {
					let _ = fs::write(&disk_path, &bytes);
					self.memory_cache.insert(resource_name.to_string(), image.clone());
					Some(image)
				}
				Err(e) => {
					self.record_network_error(resource_name, e.to_string());
					None
				}
			},
			Err(e) => {
				self.record_network_error(resource_name, e.reason.clone());
				None
			}
		}
	}

	fn record_network_error(&self, resource_name: &str, reason: String) {
		log::warn!("resource '{resource_name}' unavailable: {reason}");
		let _ = self.first_network_error.set(FetchError {
			resource: resource_name.to_string(),
			reason,
		});
	}

	/// The first network error encountered since this service was created, if any.
	pub fn first_network_error(&self) -> Option<&FetchError> {
		self.first_network_error.get()
	}

	/// Bulk-resolve a list of resources, reporting progress as `(done, total)`.
	pub fn prefetch(&self, resources: &[String], mut on_progress: impl FnMut(usize, usize)) {
		let total = resources.len();
		for (i, resource) in resources.iter().enumerate() {
			self.get_tile_image(resource);
			on_progress(i + 1, total);
		}
	}

	/// Reset the in-memory LRU tier; called between segments. The on-disk tier
	/// persists across the whole import.
	pub fn clear_memory_cache(&self) {
		self.memory_cache.invalidate_all();
	}
}
