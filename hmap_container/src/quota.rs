//! Per-tenant storage accounting, enforced at batch-flush time.

use crate::store::PersistenceStore;
use hmap_core::error::ImportError;
use std::sync::Arc;

pub struct StorageQuotaService {
	store: Arc<dyn PersistenceStore>,
}

impl StorageQuotaService {
	pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
		StorageQuotaService { store }
	}

	/// Check whether flushing `additional_mb` more would exceed the tenant's quota.
	/// Callers should check this before calling the store's `flush_batch`.
	pub fn check(&self, tenant_id: &str, additional_mb: f64) -> Result<(), ImportError> {
		let quota = self
			.store
			.get_quota(tenant_id)
			.map_err(ImportError::Persistence)?;
		if quota.would_exceed(additional_mb) {
			return Err(ImportError::QuotaExceeded {
				tenant_id: tenant_id.to_string(),
				attempted_mb: quota.current_storage_mb + additional_mb,
				quota_mb: quota.quota_mb,
			});
		}
		Ok(())
	}
}
