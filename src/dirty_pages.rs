//! Dirty-page coalescer.
//!
//! Buffers writes from a mounted filesystem client as contiguous byte
//! intervals per file. Once buffered bytes cross the configured limit, the
//! largest interval is flushed to a chunk; flushes run as independent tasks
//! so a slow upload does not stall the next write, but the resulting chunk
//! list is appended in a fixed order regardless of which flush finishes
//! first. A failed flush is latched rather than silently dropped: the next
//! `add_page` or `flush_all` call surfaces it.

use crate::cancel::CancellationContext;
use crate::chunking::ChunkConfig;
use crate::entry::FileChunk;
use crate::error::FilerError;
use crate::master_client::{AssignPolicy, MasterClient, VolumeClient};
use crate::upload::ChunkedUploadPipeline;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// A contiguous, not-yet-flushed byte range.
#[derive(Debug, Clone)]
struct Interval {
	offset: u64,
	data: Vec<u8>,
}

impl Interval {
	fn end(&self) -> u64 {
		self.offset + self.data.len() as u64
	}
	fn size(&self) -> u64 {
		self.data.len() as u64
	}
}

/// Coalesces adjacent writes into larger intervals so sequential writers
/// produce one chunk per flush instead of one chunk per syscall-sized write.
#[derive(Default)]
struct IntervalSet {
	intervals: Vec<Interval>,
}

impl IntervalSet {
	fn total_size(&self) -> u64 {
		self.intervals.iter().map(|i| i.size()).sum()
	}

	fn add_interval(&mut self, offset: u64, data: Vec<u8>) {
		let end = offset + data.len() as u64;
		if let Some(pos) = self.intervals.iter().position(|i| i.end() == offset) {
			self.intervals[pos].data.extend_from_slice(&data);
			return;
		}
		if let Some(pos) = self.intervals.iter().position(|i| i.offset == end) {
			let mut merged = data;
			merged.extend_from_slice(&self.intervals[pos].data);
			self.intervals[pos].data = merged;
			self.intervals[pos].offset = offset;
			return;
		}
		self.intervals.push(Interval { offset, data });
	}

	/// Pop the largest buffered interval, for largest-first flush under
	/// memory pressure.
	fn remove_largest(&mut self) -> Option<Interval> {
		if self.intervals.is_empty() {
			return None;
		}
		let (pos, _) =
			self.intervals.iter().enumerate().max_by_key(|(_, i)| i.size()).unwrap();
		Some(self.intervals.remove(pos))
	}

	fn drain_all(&mut self) -> Vec<Interval> {
		std::mem::take(&mut self.intervals)
	}
}

pub struct ContinuousDirtyPages<M: MasterClient + VolumeClient + 'static> {
	path: String,
	policy: AssignPolicy,
	pipeline: Arc<ChunkedUploadPipeline<M>>,
	intervals: Mutex<IntervalSet>,
	/// Ensures chunks are appended in lock-acquisition order, independent of
	/// which background flush task actually finishes first.
	chunks: Arc<Mutex<Vec<FileChunk>>>,
	limiter: Option<Arc<Semaphore>>,
	chunk_size_limit: u64,
	in_flight: Mutex<JoinSet<()>>,
	/// First flush failure encountered, latched until the caller observes it
	/// via `add_page`/`flush_all`. A flush that loses its chunk bytes to a
	/// failed upload must not be allowed to silently disappear from the
	/// entry's eventual chunk list.
	error: Arc<Mutex<Option<FilerError>>>,
}

impl<M: MasterClient + VolumeClient + 'static> ContinuousDirtyPages<M> {
	pub fn new(
		path: impl Into<String>,
		policy: AssignPolicy,
		pipeline: Arc<ChunkedUploadPipeline<M>>,
		config: &ChunkConfig,
		concurrent_writers: usize,
	) -> Self {
		ContinuousDirtyPages {
			path: path.into(),
			policy,
			pipeline,
			intervals: Mutex::new(IntervalSet::default()),
			chunks: Arc::new(Mutex::new(Vec::new())),
			limiter: if concurrent_writers > 0 {
				Some(Arc::new(Semaphore::new(concurrent_writers)))
			} else {
				None
			},
			chunk_size_limit: config.chunk_size() as u64,
			in_flight: Mutex::new(JoinSet::new()),
			error: Arc::new(Mutex::new(None)),
		}
	}

	/// Buffer `data` at `offset`. A write larger than the chunk size limit
	/// bypasses the interval buffer entirely and flushes immediately, after
	/// first flushing whatever was already buffered so chunk order is
	/// preserved. Returns the first latched flush failure, if any, instead of
	/// accepting more writes behind a silently broken upload.
	pub async fn add_page(&self, offset: u64, data: Vec<u8>) -> Result<(), FilerError> {
		if let Some(e) = self.take_latched_error().await {
			return Err(e);
		}
		if data.len() as u64 > self.chunk_size_limit {
			self.flush_all().await?;
			self.save_to_storage(offset, data).await;
			// This write bypasses the interval buffer entirely, so join it
			// immediately rather than leaving its failure to be discovered by
			// some later, unrelated call.
			self.flush_all().await?;
		} else {
			{
				let mut intervals = self.intervals.lock().await;
				intervals.add_interval(offset, data);
			}
			while self.intervals.lock().await.total_size() >= self.chunk_size_limit {
				self.flush_largest().await;
			}
		}
		if let Some(e) = self.take_latched_error().await {
			return Err(e);
		}
		Ok(())
	}

	async fn flush_largest(&self) {
		let popped = self.intervals.lock().await.remove_largest();
		if let Some(interval) = popped {
			self.save_to_storage(interval.offset, interval.data).await;
		}
	}

	/// Flush every buffered interval and wait for all in-flight uploads
	/// (including ones already dispatched) to finish. Returns the first
	/// flush failure observed across this call and every call since the
	/// last time it was reported.
	pub async fn flush_all(&self) -> Result<(), FilerError> {
		let drained = self.intervals.lock().await.drain_all();
		for interval in drained {
			self.save_to_storage(interval.offset, interval.data).await;
		}
		let mut in_flight = self.in_flight.lock().await;
		while in_flight.join_next().await.is_some() {}
		drop(in_flight);
		match self.take_latched_error().await {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	async fn take_latched_error(&self) -> Option<FilerError> {
		self.error.lock().await.take()
	}

	/// Dispatch one interval as a background upload. The mtime is stamped
	/// here, at dispatch time, not when the upload eventually completes —
	/// otherwise chunk mtimes would depend on upload latency rather than
	/// write order. A failed upload is latched on `self.error` rather than
	/// dropped, so it surfaces on the next call instead of silently losing
	/// the bytes that were supposed to become a chunk.
	async fn save_to_storage(&self, offset: u64, data: Vec<u8>) {
		let mtime = crate::entry::now_unix();
		let pipeline = self.pipeline.clone();
		let policy = self.policy.clone();
		let limiter = self.limiter.clone();
		let chunks = self.chunks_handle();
		let error = self.error.clone();
		let path = self.path.clone();

		let task = async move {
			let _permit = match &limiter {
				Some(sem) => Some(sem.clone().acquire_owned().await),
				None => None,
			};
			// A flushed interval is never a whole small file, just a buffered
			// write — it must always become a chunk, never inline content.
			let ctx = CancellationContext::new();
			let result = pipeline
				.upload_reader_to_chunks(&ctx, &path, std::io::Cursor::new(data), &policy, offset, true)
				.await;
			match result {
				Ok(outcome) => {
					let mut chunk_list = chunks.lock().await;
					for mut chunk in outcome.chunks {
						chunk.mtime = mtime;
						chunk_list.push(chunk);
					}
				}
				Err(e) => {
					let mut latch = error.lock().await;
					if latch.is_none() {
						*latch = Some(e);
					}
				}
			}
		};

		let mut in_flight = self.in_flight.lock().await;
		in_flight.spawn(task);
	}

	fn chunks_handle(&self) -> Arc<Mutex<Vec<FileChunk>>> {
		self.chunks.clone()
	}

	pub async fn committed_chunks(&self) -> Vec<FileChunk> {
		self.chunks.lock().await.clone()
	}

	pub fn path(&self) -> &str {
		&self.path
	}
}


// vim: ts=4
