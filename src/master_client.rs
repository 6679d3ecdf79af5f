//! Contracts for the external collaborators the filer core depends on but
//! does not implement: the volume servers that hold chunk bytes, and the
//! master/locator service that assigns and resolves file-ids.
//!
//! The wire protocol, HTTP parsing and gRPC transport behind these traits are
//! out of scope for this crate; callers supply a concrete implementation.

use crate::cancel::CancellationContext;
use crate::error::FilerError;
use async_trait::async_trait;

/// A newly assigned file-id and the volume URL to upload its bytes to.
#[derive(Debug, Clone)]
pub struct Assignment {
	pub file_id: String,
	pub upload_url: String,
	pub auth: String,
	pub ttl_sec: u32,
}

/// Placement policy for a new chunk assignment.
#[derive(Debug, Clone, Default)]
pub struct AssignPolicy {
	pub collection: String,
	pub replication: String,
	pub disk_type: String,
}

/// Result of uploading one chunk's bytes to a volume server.
#[derive(Debug, Clone)]
pub struct UploadResult {
	pub size: u64,
	pub e_tag: String,
}

/// Capability set for talking to volume servers: upload, lookup, download
/// and delete of chunk bytes by file-id. Every call accepts a cancellation
/// context; closing it while a call is in flight returns `Canceled`.
#[async_trait]
pub trait VolumeClient: Send + Sync {
	/// Upload `data` to `assignment.upload_url`, authenticated with
	/// `assignment.auth`.
	async fn upload(
		&self,
		ctx: &CancellationContext,
		assignment: &Assignment,
		data: &[u8],
	) -> Result<UploadResult, FilerError>;

	/// Resolve a file-id to the volume URLs currently serving it.
	async fn lookup(&self, ctx: &CancellationContext, file_id: &str) -> Result<Vec<String>, FilerError>;

	/// Fetch a chunk's raw bytes, used to resolve manifest chunks back into
	/// the chunk list they stand in for.
	async fn download(&self, ctx: &CancellationContext, file_id: &str) -> Result<Vec<u8>, FilerError>;

	/// Request deletion of a chunk's bytes. Best-effort: callers retry via
	/// the deletion queue rather than treating failure here as fatal.
	async fn delete(&self, ctx: &CancellationContext, file_id: &str) -> Result<(), FilerError>;
}

/// Capability set for talking to the master/locator service: assigning new
/// file-ids ahead of an upload.
#[async_trait]
pub trait MasterClient: Send + Sync {
	async fn assign(&self, ctx: &CancellationContext, policy: &AssignPolicy) -> Result<Assignment, FilerError>;
}

#[cfg(test)]
pub(crate) mod mock {
	use super::*;
	use std::sync::atomic::{AtomicU64, Ordering};
	use std::sync::Mutex;

	/// In-memory volume/master client used by tests: "uploads" are kept in a
	/// map keyed by file-id so tests can assert on exactly what was sent.
	pub struct MockVolume {
		pub next_id: AtomicU64,
		pub blobs: Mutex<std::collections::HashMap<String, Vec<u8>>>,
		pub fail_next: std::sync::atomic::AtomicUsize,
	}

	impl MockVolume {
		pub fn new() -> Self {
			MockVolume {
				next_id: AtomicU64::new(1),
				blobs: Mutex::new(std::collections::HashMap::new()),
				fail_next: std::sync::atomic::AtomicUsize::new(0),
			}
		}

		/// Make the next `n` upload attempts fail, to exercise the retry loop.
		pub fn fail_next_uploads(&self, n: usize) {
			self.fail_next.store(n, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl MasterClient for MockVolume {
		async fn assign(&self, ctx: &CancellationContext, _policy: &AssignPolicy) -> Result<Assignment, FilerError> {
			ctx.check()?;
			let id = self.next_id.fetch_add(1, Ordering::SeqCst);
			Ok(Assignment {
				file_id: format!("1,{:x}", id),
				upload_url: format!("http://mock-volume/1,{:x}", id),
				auth: "mock-auth".to_string(),
				ttl_sec: 0,
			})
		}
	}

	#[async_trait]
	impl VolumeClient for MockVolume {
		async fn upload(
			&self,
			ctx: &CancellationContext,
			assignment: &Assignment,
			data: &[u8],
		) -> Result<UploadResult, FilerError> {
			ctx.check()?;
			if self.fail_next.load(Ordering::SeqCst) > 0 {
				self.fail_next.fetch_sub(1, Ordering::SeqCst);
				return Err(FilerError::Upload(crate::error::UploadError::AssignFailed {
					message: "mock induced failure".to_string(),
				}));
			}
			self.blobs.lock().unwrap().insert(assignment.file_id.clone(), data.to_vec());
			Ok(UploadResult { size: data.len() as u64, e_tag: crate::util::hash(data) })
		}

		async fn lookup(&self, ctx: &CancellationContext, _file_id: &str) -> Result<Vec<String>, FilerError> {
			ctx.check()?;
			Ok(vec!["http://mock-volume".to_string()])
		}

		async fn download(&self, ctx: &CancellationContext, file_id: &str) -> Result<Vec<u8>, FilerError> {
			ctx.check()?;
			self.blobs
				.lock()
				.unwrap()
				.get(file_id)
				.cloned()
				.ok_or_else(|| FilerError::NotFound { path: file_id.to_string() })
		}

		async fn delete(&self, ctx: &CancellationContext, file_id: &str) -> Result<(), FilerError> {
			ctx.check()?;
			self.blobs.lock().unwrap().remove(file_id);
			Ok(())
		}
	}
}

// vim: ts=4
