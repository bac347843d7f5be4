//! Mutable accumulator for one segment's pending writes.
//!
//! Owned exclusively by the consumer task and never touched by producers, so it
//! needs no internal locking.

use hmap_core::model::{GridRecord, TileRecord};

#[derive(Default)]
pub struct BatchContext {
	batch_size: usize,
	pending_grids: Vec<GridRecord>,
	pending_tiles: Vec<TileRecord>,
	pending_mb: f64,
}

impl BatchContext {
	pub fn new(batch_size: usize) -> Self {
		BatchContext {
			batch_size,
			pending_grids: Vec::new(),
			pending_tiles: Vec::new(),
			pending_mb: 0.0,
		}
	}

	pub fn add(&mut self, grid: GridRecord, tile: TileRecord, mb: f64) {
		self.pending_grids.push(grid);
		self.pending_tiles.push(tile);
		self.pending_mb += mb;
	}

	pub fn should_flush(&self) -> bool {
		self.pending_grids.len() >= self.batch_size || self.pending_tiles.len() >= self.batch_size
	}

	pub fn has_pending_items(&self) -> bool {
		!self.pending_grids.is_empty() || !self.pending_tiles.is_empty() || self.pending_mb != 0.0
	}

	/// Atomically return and reset all three accumulators.
	pub fn extract_batch(&mut self) -> (Vec<GridRecord>, Vec<TileRecord>, f64) {
		(
			std::mem::take(&mut self.pending_grids),
			std::mem::take(&mut self.pending_tiles),
			std::mem::take(&mut self.pending_mb),
		)
	}
}
