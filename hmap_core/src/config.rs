//! Import configuration, with the defaults named in the component design.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImportConfig {
	/// Root of the per-tenant tile/disk-cache filesystem layout.
	pub storage_root: PathBuf,
	/// Base URL used to fetch tileset resources on a cache miss. `None` disables
	/// network fetch entirely (every miss becomes "missing").
	pub network_base_url: Option<String>,
	/// Concurrent rendering workers per segment.
	pub render_parallelism: usize,
	/// Bounded channel capacity between producers and the consumer.
	pub channel_capacity: usize,
	/// Batch size threshold at which `BatchContext` flushes.
	pub batch_size: usize,
	/// Maximum number of segments imported per call.
	pub max_segments: usize,
}

impl ImportConfig {
	pub fn new(storage_root: PathBuf) -> Self {
		ImportConfig {
			storage_root,
			network_base_url: None,
			render_parallelism: 4,
			channel_capacity: 20,
			batch_size: 500,
			max_segments: 3,
		}
	}

	pub fn with_network_base_url(mut self, url: impl Into<String>) -> Self {
		self.network_base_url = Some(url.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_component_design() {
		let cfg = ImportConfig::new(PathBuf::from("/tmp/storage"));
		assert_eq!(cfg.render_parallelism, 4);
		assert_eq!(cfg.channel_capacity, 20);
		assert_eq!(cfg.batch_size, 500);
		assert_eq!(cfg.max_segments, 3);
		assert!(cfg.network_base_url.is_none());
	}
}
