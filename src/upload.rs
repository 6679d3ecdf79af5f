//! Chunked upload pipeline.
//!
//! Consumes an HTTP body, splits it into chunks of the configured size,
//! assigns a file-id and uploads each chunk (retrying transient failures),
//! and produces the resulting chunk list. Small payloads are returned as
//! inline content instead of being chunked at all. `commit` ties a finished
//! upload into the entry store, and `resolve_manifest_chunks` expands a
//! chunk list that was compacted into a manifest back into the chunks it
//! stands in for.

use crate::cancel::CancellationContext;
use crate::chunking::ChunkConfig;
use crate::deletion_queue::DeletionQueue;
use crate::entry::{maybe_manifestize, now_unix, Attr, Entry, FileChunk};
use crate::error::{FilerError, UploadError};
use crate::filer::Filer;
use crate::master_client::{AssignPolicy, MasterClient, VolumeClient};
use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Paths under this prefix inline everything up to 4KiB regardless of the
/// configured `save_to_filer_limit`, matching how small config/state files
/// under `/etc/` are expected to live directly on the entry.
const ETC_INLINE_LIMIT: usize = 4 * 1024;
const ETC_PREFIX: &str = "/etc/";

/// Outcome of running a reader through the pipeline.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
	/// Set when the payload was chunked onto volume servers.
	pub chunks: Vec<FileChunk>,
	/// Set instead of `chunks` when the payload was small enough to inline.
	pub content: Option<Vec<u8>>,
	/// MD5 of the entire payload, for the `Content-MD5` response header.
	pub md5: [u8; 16],
	pub total_size: u64,
}

pub struct ChunkedUploadPipeline<M: MasterClient + VolumeClient> {
	client: Arc<M>,
	config: ChunkConfig,
	max_attempts: u32,
	retry_delay: Duration,
}

impl<M: MasterClient + VolumeClient> ChunkedUploadPipeline<M> {
	pub fn new(client: Arc<M>, config: ChunkConfig, max_attempts: u32, retry_delay_ms: u64) -> Self {
		ChunkedUploadPipeline {
			client,
			config,
			max_attempts,
			retry_delay: Duration::from_millis(retry_delay_ms),
		}
	}

	fn inline_limit(&self, path: &str) -> usize {
		if path.starts_with(ETC_PREFIX) {
			ETC_INLINE_LIMIT
		} else {
			self.config.save_to_filer_limit
		}
	}

	/// Read `reader` to completion, producing either inline content or a
	/// chunk list. `path` selects the inline threshold: files under `/etc/`
	/// use a fixed small limit instead of `save_to_filer_limit`.
	/// `chunk_offset_base` shifts every produced chunk's offset, used by
	/// append uploads to continue past the existing file size. `is_append`
	/// disables the inline-content short-circuit, since append onto inline
	/// content is not supported (see error kind `unsupported`).
	pub async fn upload_reader_to_chunks<R: AsyncRead + Unpin>(
		&self,
		ctx: &CancellationContext,
		path: &str,
		mut reader: R,
		policy: &AssignPolicy,
		chunk_offset_base: u64,
		is_append: bool,
	) -> Result<UploadOutcome, FilerError> {
		ctx.check()?;
		let mut hasher = Md5::new();
		let mut chunks = Vec::new();
		let chunk_size = self.config.chunk_size();
		let inline_limit = self.inline_limit(path);
		let mut chunk_offset = chunk_offset_base;
		let mut total_size: u64 = 0;
		let mut first = true;

		loop {
			let mut buf = vec![0u8; chunk_size];
			let n = read_full(&mut reader, &mut buf).await.map_err(UploadError::from)?;
			buf.truncate(n);
			hasher.update(&buf);
			total_size += n as u64;

			if first && !is_append && n < inline_limit {
				return Ok(UploadOutcome {
					chunks: Vec::new(),
					content: Some(buf),
					md5: hasher.finalize().into(),
					total_size,
				});
			}
			first = false;

			if n == 0 {
				break;
			}

			let chunk = self.upload_one_chunk(ctx, policy, &buf, chunk_offset).await?;
			let is_last = n < chunk_size;
			chunk_offset += n as u64;
			chunks.push(chunk);
			if is_last {
				break;
			}
		}

		Ok(UploadOutcome { chunks, content: None, md5: hasher.finalize().into(), total_size })
	}

	/// Assign a file-id and upload `data`, retrying assignment+upload as a
	/// unit up to `max_attempts` times with a fixed delay between attempts —
	/// each attempt gets a fresh file-id so a partial write on a dead volume
	/// never becomes visible.
	async fn upload_one_chunk(
		&self,
		ctx: &CancellationContext,
		policy: &AssignPolicy,
		data: &[u8],
		offset: u64,
	) -> Result<FileChunk, FilerError> {
		let mut last_err = String::new();
		for attempt in 0..self.max_attempts {
			ctx.check()?;
			let assignment = match self.client.assign(ctx, policy).await {
				Ok(a) => a,
				Err(e) => {
					last_err = e.to_string();
					if attempt + 1 < self.max_attempts {
						tokio::time::sleep(self.retry_delay).await;
					}
					continue;
				}
			};
			match self.client.upload(ctx, &assignment, data).await {
				Ok(result) => {
					return Ok(FileChunk {
						file_id: assignment.file_id,
						offset,
						size: result.size,
						mtime: now_unix(),
						e_tag: result.e_tag,
						is_compressed: false,
						cipher_key: None,
						source_file_id: None,
						is_chunk_manifest: false,
					});
				}
				Err(e) => {
					last_err = e.to_string();
					if attempt + 1 < self.max_attempts {
						tokio::time::sleep(self.retry_delay).await;
					}
				}
			}
		}
		Err(FilerError::Upload(UploadError::UploadRetriesExhausted {
			attempts: self.max_attempts,
			last_error: last_err,
		}))
	}

	/// Expand any `is_chunk_manifest` chunk in `chunks` back into the chunk
	/// list it stands in for, downloading its payload from the volume that
	/// holds it. Non-manifest chunks pass through unchanged. Manifests are
	/// not expected to nest, so expansion is a single pass.
	pub async fn resolve_manifest_chunks(
		&self,
		ctx: &CancellationContext,
		chunks: &[FileChunk],
	) -> Result<Vec<FileChunk>, FilerError> {
		let mut resolved = Vec::with_capacity(chunks.len());
		for chunk in chunks {
			ctx.check()?;
			if !chunk.is_chunk_manifest {
				resolved.push(chunk.clone());
				continue;
			}
			let payload = self.client.download(ctx, &chunk.file_id).await?;
			let tail: Vec<FileChunk> = serde_json::from_slice(&payload)
				.map_err(|e| FilerError::Other { message: format!("corrupt chunk manifest: {}", e) })?;
			resolved.extend(tail);
		}
		Ok(resolved)
	}

	/// Finish an upload: compact its chunk list into a manifest chunk if it
	/// crossed `manifest_threshold`, stamp the resulting attributes, and
	/// persist the entry through `filer`. If persistence fails after chunks
	/// were already written to volumes — the "upload succeeded, metadata
	/// didn't" case — every chunk just uploaded (including a freshly written
	/// manifest chunk) is enqueued for reclamation instead of being leaked.
	pub async fn commit(
		&self,
		ctx: &CancellationContext,
		filer: &Filer,
		deletion_queue: &DeletionQueue,
		policy: &AssignPolicy,
		full_path: &str,
		mut attr: Attr,
		outcome: UploadOutcome,
		o_excl: bool,
	) -> Result<Entry, FilerError> {
		attr.file_size = outcome.total_size;
		attr.md5 = outcome.md5.to_vec();

		let manifest_threshold = self.config.manifest_threshold;
		let policy_for_manifest = policy.clone();
		let chunks = match maybe_manifestize(manifest_threshold, outcome.chunks, |payload| async move {
			self.upload_one_chunk(ctx, &policy_for_manifest, &payload, 0).await
		})
		.await
		{
			Ok(chunks) => chunks,
			Err(e) => return Err(e),
		};

		let entry = Entry {
			full_path: full_path.to_string(),
			attr,
			chunks: chunks.clone(),
			extended: Default::default(),
			content: outcome.content.unwrap_or_default(),
		};

		match filer.create_entry(ctx, entry.clone(), o_excl).await {
			Ok(()) => Ok(entry),
			Err(e) => {
				for chunk in &chunks {
					deletion_queue.enqueue(chunk.file_id.clone());
				}
				Err(e)
			}
		}
	}
}

/// Read until `buf` is full or the reader is exhausted, unlike a single
/// `read()` call which may return short reads from a pipe or socket.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		let n = reader.read(&mut buf[filled..]).await?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}


// vim: ts=4
