//! Phased progress reporting.
//!
//! Five phases with fixed overall-progress weights. Reporting is throttled to at
//! most once per 100ms per phase, unless the report is the first or last item of
//! a phase, is forced, or at least 1% of the phase has elapsed since the last report.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportPhase {
	Parse,
	Prefetch,
	Import,
	Zoom,
	Markers,
}

impl ImportPhase {
	/// Overall-progress weight, in percent, summing to 100 across all phases.
	pub fn weight(&self) -> f64 {
		match self {
			ImportPhase::Parse => 2.0,
			ImportPhase::Prefetch => 18.0,
			ImportPhase::Import => 60.0,
			ImportPhase::Zoom => 15.0,
			ImportPhase::Markers => 5.0,
		}
	}

	pub fn number(&self) -> u8 {
		match self {
			ImportPhase::Parse => 1,
			ImportPhase::Prefetch => 2,
			ImportPhase::Import => 3,
			ImportPhase::Zoom => 4,
			ImportPhase::Markers => 5,
		}
	}

	/// Sum of the weights of all phases strictly before this one.
	fn weight_before(&self) -> f64 {
		[
			ImportPhase::Parse,
			ImportPhase::Prefetch,
			ImportPhase::Import,
			ImportPhase::Zoom,
			ImportPhase::Markers,
		]
		.into_iter()
		.filter(|p| p.number() < self.number())
		.map(|p| p.weight())
		.sum()
	}
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
	pub phase: ImportPhase,
	pub current_item: u64,
	pub total_items: u64,
	pub phase_number: u8,
	pub overall_percent: f64,
	pub elapsed_seconds: f64,
	pub items_per_second: f64,
}

/// Receives progress events. Implemented by callers (the HTTP/admin layer); a
/// no-op sink is used in tests and headless runs.
pub trait ProgressSink: Send + Sync {
	fn on_progress(&self, event: ProgressEvent);
}

/// A sink that drops every event: used whenever no caller-supplied sink is configured.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
	fn on_progress(&self, _event: ProgressEvent) {}
}

const THROTTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks progress for the currently active phase and decides when to emit.
pub struct ProgressTracker {
	start: Instant,
	phase: ImportPhase,
	total_items: u64,
	current_item: u64,
	last_report: Option<Instant>,
	last_report_item: u64,
}

impl ProgressTracker {
	pub fn new(start: ImportPhase, total_items: u64) -> Self {
		ProgressTracker {
			start: Instant::now(),
			phase: start,
			total_items,
			current_item: 0,
			last_report: None,
			last_report_item: 0,
		}
	}

	/// Switch to a new phase, resetting the per-phase item counter.
	pub fn enter_phase(&mut self, phase: ImportPhase, total_items: u64) {
		self.phase = phase;
		self.total_items = total_items;
		self.current_item = 0;
		self.last_report = None;
		self.last_report_item = 0;
	}

	/// Advance the current phase's counter by one item and report through
	/// `sink` if throttling allows it (or `force` is set).
	pub fn tick(&mut self, sink: &dyn ProgressSink, force: bool) {
		self.current_item += 1;
		self.maybe_report(sink, force);
	}

	fn maybe_report(&mut self, sink: &dyn ProgressSink, force: bool) {
		let is_first = self.current_item <= 1;
		let is_last = self.total_items > 0 && self.current_item >= self.total_items;
		let now = Instant::now();
		let due_to_time = match self.last_report {
			None => true,
			Some(last) => now.duration_since(last) >= THROTTLE_INTERVAL,
		};
		let one_percent_items = (self.total_items as f64 * 0.01).max(1.0) as u64;
		let due_to_progress = self.current_item.saturating_sub(self.last_report_item) >= one_percent_items;

		if !(force || is_first || is_last || due_to_time || due_to_progress) {
			return;
		}

		self.last_report = Some(now);
		self.last_report_item = self.current_item;
		sink.on_progress(self.event());
	}

	pub fn event(&self) -> ProgressEvent {
		let elapsed = self.start.elapsed().as_secs_f64();
		let phase_fraction = if self.total_items == 0 {
			1.0
		} else {
			(self.current_item as f64 / self.total_items as f64).min(1.0)
		};
		let overall_percent = self.phase.weight_before() + phase_fraction * self.phase.weight();
		let items_per_second = if elapsed > 0.0 {
			self.current_item as f64 / elapsed
		} else {
			0.0
		};
		ProgressEvent {
			phase: self.phase,
			current_item: self.current_item,
			total_items: self.total_items,
			phase_number: self.phase.number(),
			overall_percent,
			elapsed_seconds: elapsed,
			items_per_second,
		}
	}
}
