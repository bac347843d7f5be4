//! Error taxonomy for the import pipeline. Producers and the consumer each
//! surface at most one first error; the orchestrator prefers a producer error
//! over a consumer error when both are present.

use thiserror::Error;

/// Corrupt or truncated `.hmap` input. Fatal; no partial state is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error at offset {offset}: {reason}")]
pub struct ParseError {
	pub offset: u64,
	pub reason: String,
}

impl ParseError {
	pub fn new(offset: u64, reason: impl Into<String>) -> Self {
		ParseError {
			offset,
			reason: reason.into(),
		}
	}
}

/// The complete error taxonomy surfaced by the import core.
#[derive(Debug, Error)]
pub enum ImportError {
	#[error(transparent)]
	Parse(#[from] ParseError),

	/// A tileset resource could not be fetched. Recovered locally by the renderer
	/// (gray pixels substituted); this variant is only raised when the caller asks
	/// for the first retained network error explicitly.
	#[error("resource fetch error for '{resource}': {reason}")]
	ResourceFetch { resource: String, reason: String },

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("persistence error: {0}")]
	Persistence(#[source] anyhow::Error),

	#[error("quota exceeded for tenant {tenant_id}: would reach {attempted_mb:.2}MB of {quota_mb:.2}MB")]
	QuotaExceeded {
		tenant_id: String,
		attempted_mb: f64,
		quota_mb: f64,
	},

	#[error("Canceled")]
	Canceled,
}

impl ImportError {
	/// The abstract, user-facing cause string placed into `ImportResult::error_message`.
	///
	/// Deliberately coarse: callers get a stable category, not a stack trace.
	pub fn user_message(&self) -> String {
		match self {
			ImportError::Parse(_) => "Parse error".to_string(),
			ImportError::ResourceFetch { .. } => "Resource fetch error".to_string(),
			ImportError::Io(_) => "IO error".to_string(),
			ImportError::Persistence(_) => "Persistence error".to_string(),
			ImportError::QuotaExceeded { .. } => "Quota exceeded".to_string(),
			ImportError::Canceled => "Canceled".to_string(),
		}
	}
}
