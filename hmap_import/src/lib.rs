//! Binary container parsing, rendering pipeline and five-phase import orchestration.
//!
//! [`reader`] turns raw bytes into an [`reader::HmapContainer`]; [`pipeline`] renders
//! and persists one segment at a time over a bounded producer/consumer channel;
//! [`orchestrator`] drives parse, prefetch, import, zoom and marker phases in sequence
//! and reports weighted progress across all of them.

pub mod orchestrator;
pub mod pipeline;
pub mod reader;

pub use orchestrator::ImportOrchestrator;
pub use pipeline::{SegmentImporter, SegmentOutcome};
pub use reader::{HmapContainer, HmapReader};

use hmap_container::{MarkerService, PersistenceStore};
use hmap_core::config::ImportConfig;
use hmap_core::model::ImportMode;
use hmap_core::progress::{NullProgressSink, ProgressSink};
use hmap_core::result::ImportResult;
use hmap_image::TileResourceService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parse `bytes` as an `.hmap` container and import it for `tenant_id`.
///
/// This is the single entry point a host application calls: it owns no state of its
/// own and is safe to invoke concurrently for different tenants as long as `store`,
/// `resources` and `marker_service` are each shared behind their own synchronization.
#[allow(clippy::too_many_arguments)]
pub async fn import(
	bytes: &[u8],
	tenant_id: &str,
	mode: ImportMode,
	store: Arc<dyn PersistenceStore>,
	resources: Arc<TileResourceService>,
	marker_service: Arc<dyn MarkerService>,
	config: ImportConfig,
	sink: Option<&dyn ProgressSink>,
	cancel: Option<&CancellationToken>,
) -> ImportResult {
	let orchestrator = ImportOrchestrator::new(store, resources, marker_service, config);
	let null_sink = NullProgressSink;
	let owned_token = CancellationToken::new();
	let sink = sink.unwrap_or(&null_sink);
	let cancel = cancel.unwrap_or(&owned_token);
	orchestrator.run(bytes, tenant_id, mode, sink, cancel).await
}
