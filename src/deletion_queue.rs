//! Unbounded deletion queue.
//!
//! Chunks orphaned by overwrites or deletes are not reclaimed inline with
//! the request that orphaned them — the caller enqueues their file-ids and
//! a background task drains the queue against the volume client. This keeps
//! a delete or overwrite request from blocking on however many chunks the
//! old entry happened to have.

use crate::cancel::CancellationContext;
use crate::master_client::VolumeClient;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct DeletionQueue {
	sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeletionQueue {
	/// Spawn `workers` background tasks draining a shared queue against
	/// `client`. Returns a handle whose `enqueue` can be cloned freely; the
	/// queue itself is drained until `shutdown` is called.
	pub fn spawn<V: VolumeClient + 'static>(client: Arc<V>, workers: usize) -> Self {
		let (tx, rx) = mpsc::unbounded_channel::<String>();
		let rx = Arc::new(Mutex::new(rx));
		let worker_count = workers.max(1);
		let mut handles = Vec::with_capacity(worker_count);
		for _ in 0..worker_count {
			let client = client.clone();
			let rx = rx.clone();
			handles.push(tokio::spawn(async move {
				loop {
					let file_id = {
						let mut guard = rx.lock().await;
						guard.recv().await
					};
					match file_id {
						Some(file_id) => {
							let ctx = CancellationContext::new();
							if let Err(e) = client.delete(&ctx, &file_id).await {
								warn!(file_id = %file_id, error = %e, "failed to reclaim chunk");
							} else {
								debug!(file_id = %file_id, "reclaimed chunk");
							}
						}
						None => break,
					}
				}
			}));
		}
		DeletionQueue { sender: Mutex::new(Some(tx)), workers: Mutex::new(handles) }
	}

	/// Enqueue a single file-id for reclamation. Never blocks; the queue is
	/// unbounded so a burst of deletes (e.g. `rm -rf` on a large directory)
	/// never applies backpressure to the request that triggered it. A no-op
	/// after `shutdown`.
	pub fn enqueue(&self, file_id: impl Into<String>) {
		if let Ok(guard) = self.sender.try_lock() {
			if let Some(sender) = guard.as_ref() {
				let _ = sender.send(file_id.into());
			}
		}
	}

	pub fn enqueue_many<I: IntoIterator<Item = String>>(&self, file_ids: I) {
		for id in file_ids {
			self.enqueue(id);
		}
	}

	/// Stop accepting new work, let every worker drain whatever is already
	/// queued, then wait for them to exit. Safe to call more than once.
	pub async fn shutdown(&self) {
		let sender = self.sender.lock().await.take();
		drop(sender);
		let handles = std::mem::take(&mut *self.workers.lock().await);
		for handle in handles {
			let _ = handle.await;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::master_client::mock::MockVolume;
	use std::time::Duration;

	#[tokio::test]
	async fn enqueued_chunk_is_eventually_reclaimed() {
		let client = Arc::new(MockVolume::new());
		client.blobs.lock().unwrap().insert("1,abc".to_string(), vec![1, 2, 3]);
		let queue = DeletionQueue::spawn(client.clone(), 2);
		queue.enqueue("1,abc");
		for _ in 0..50 {
			if !client.blobs.lock().unwrap().contains_key("1,abc") {
				queue.shutdown().await;
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("chunk was not reclaimed in time");
	}

	#[tokio::test]
	async fn enqueue_does_not_block_caller() {
		let client = Arc::new(MockVolume::new());
		let queue = DeletionQueue::spawn(client, 1);
		for i in 0..1000 {
			queue.enqueue(format!("1,{}", i));
		}
		queue.shutdown().await;
	}

	#[tokio::test]
	async fn shutdown_drains_outstanding_work_before_returning() {
		let client = Arc::new(MockVolume::new());
		for i in 0..20 {
			client.blobs.lock().unwrap().insert(format!("1,{}", i), vec![0]);
		}
		let queue = DeletionQueue::spawn(client.clone(), 4);
		for i in 0..20 {
			queue.enqueue(format!("1,{}", i));
		}
		queue.shutdown().await;
		assert!(client.blobs.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn enqueue_after_shutdown_is_a_silent_no_op() {
		let client = Arc::new(MockVolume::new());
		let queue = DeletionQueue::spawn(client, 1);
		queue.shutdown().await;
		queue.enqueue("1,late");
	}
}

// vim: ts=4
