//! Meta-log buffer and cross-filer aggregation.
//!
//! Every metadata mutation is appended to a local in-memory log and
//! broadcast to subscribers. A `MetaAggregator` subscribes to peer filers'
//! logs and replays their events into the local store, using a signature
//! set on each event to suppress replication loops: an event already
//! carrying this filer's own `store_id` in its signature list has already
//! been applied here and is skipped. `MetaLogBuffer::spawn_push_loop` drains
//! the local buffer to every configured peer at a fixed interval, and
//! `MetaAggregator::start_peer` subscribes to one peer with bounded
//! exponential backoff, resuming from the highest timestamp it has already
//! ingested from that peer.

use crate::cancel::CancellationContext;
use crate::entry::Entry;
use crate::error::{FilerError, ReplicationError};
use crate::store::FilerStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const STORE_ID_KEY: &str = "filer.store.id";

/// Starting backoff delay for a dropped peer subscription, doubled on each
/// consecutive failure up to `MAX_PEER_BACKOFF`.
const INITIAL_PEER_BACKOFF: Duration = Duration::from_secs(1);
const MAX_PEER_BACKOFF: Duration = Duration::from_secs(30);

/// One metadata mutation, replicated to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
	pub timestamp_ns: i64,
	pub old_entry: Option<Entry>,
	pub new_entry: Option<Entry>,
	pub delete_chunks: Vec<String>,
	/// store_ids of every filer that has already applied this event.
	pub signatures: Vec<i32>,
}

/// Load this filer's replication signature from the K/V side-channel,
/// generating and persisting a new random one on first boot. Failing to
/// read or persist it is fatal: the process must refuse to start rather
/// than risk two filers colliding on the same signature.
pub async fn load_or_create_store_signature(store: &dyn FilerStore) -> Result<i32, FilerError> {
	let ctx = CancellationContext::uncancelable();
	match store.kv_get(&ctx, STORE_ID_KEY).await {
		Ok(bytes) if bytes.len() == 4 => {
			let mut arr = [0u8; 4];
			arr.copy_from_slice(&bytes);
			Ok(i32::from_be_bytes(arr))
		}
		Ok(_) => Err(FilerError::Replication(ReplicationError::SignatureBootFailed {
			message: "stored filer.store.id was not 4 bytes".to_string(),
		})),
		Err(FilerError::KvNotFound { .. }) => {
			let id = Uuid::new_v4();
			let mut arr = [0u8; 4];
			arr.copy_from_slice(&id.as_bytes()[0..4]);
			let signature = i32::from_be_bytes(arr);
			store.kv_put(&ctx, STORE_ID_KEY, signature.to_be_bytes().to_vec()).await.map_err(|e| {
				FilerError::Replication(ReplicationError::SignatureBootFailed {
					message: e.to_string(),
				})
			})?;
			Ok(signature)
		}
		Err(e) => Err(FilerError::Replication(ReplicationError::SignatureBootFailed {
			message: e.to_string(),
		})),
	}
}

/// Resolve the peer set to dial: `peers` with `self_address` appended if it
/// is non-empty and not already present, so a filer started without its own
/// address in its static peer list still participates in a full mesh when
/// every peer lists the others. `self_address` itself is never dialed by the
/// caller; see `MetaAggregator::start_configured_peers`.
pub fn peers_including_self(peers: &[String], self_address: &str) -> Vec<String> {
	let mut all: Vec<String> = peers.to_vec();
	if !self_address.is_empty() && !all.iter().any(|p| p == self_address) {
		all.push(self_address.to_string());
	}
	all
}

/// A destination this filer pushes its local meta-log to.
#[async_trait]
pub trait PeerSink: Send + Sync {
	async fn push(&self, events: &[EventRecord]) -> Result<(), FilerError>;
}

pub struct MetaLogBuffer {
	store_id: i32,
	sender: broadcast::Sender<EventRecord>,
	buffer: Mutex<VecDeque<EventRecord>>,
	flush_interval: Duration,
}

impl MetaLogBuffer {
	pub fn new(store_id: i32, flush_interval_secs: u64) -> Self {
		let (sender, _) = broadcast::channel(1024);
		MetaLogBuffer {
			store_id,
			sender,
			buffer: Mutex::new(VecDeque::new()),
			flush_interval: Duration::from_secs(flush_interval_secs.max(1)),
		}
	}

	pub fn store_id(&self) -> i32 {
		self.store_id
	}

	pub fn flush_interval(&self) -> Duration {
		self.flush_interval
	}

	/// Append a locally-originated mutation and broadcast it to subscribers.
	/// `signatures` always includes this filer's own store_id, marking the
	/// event as already applied here.
	pub async fn append_event(&self, old: Option<&Entry>, new: Option<&Entry>, delete_chunks: Vec<String>) {
		let event = EventRecord {
			timestamp_ns: now_nanos(),
			old_entry: old.cloned(),
			new_entry: new.cloned(),
			delete_chunks,
			signatures: vec![self.store_id],
		};
		self.buffer.lock().await.push_back(event.clone());
		// No subscribers is the common case on a standalone filer; ignore.
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
		self.sender.subscribe()
	}

	pub async fn buffered_len(&self) -> usize {
		self.buffer.lock().await.len()
	}

	/// Remove and return every buffered event, for a push cycle to drain.
	pub async fn drain(&self) -> Vec<EventRecord> {
		self.buffer.lock().await.drain(..).collect()
	}

	/// Spawn a background task that drains the local buffer to every sink in
	/// `sinks` every `flush_interval`, even if the buffer is not full. A sink
	/// push failure is logged and the drained events are dropped rather than
	/// requeued — the next interval's drain will carry whatever accumulates
	/// in the meantime, and a peer that is down for one interval catches up
	/// from `MetaAggregator::start_peer`'s own resume-from-timestamp logic on
	/// the pull side rather than this push side retrying.
	pub fn spawn_push_loop(self: &Arc<Self>, sinks: Vec<Arc<dyn PeerSink>>) -> tokio::task::JoinHandle<()> {
		let me = self.clone();
		tokio::spawn(async move {
			if sinks.is_empty() {
				return;
			}
			loop {
				tokio::time::sleep(me.flush_interval).await;
				let events = me.drain().await;
				if events.is_empty() {
					continue;
				}
				for sink in &sinks {
					if let Err(e) = sink.push(&events).await {
						warn!(error = %e, "failed to push meta-log events to peer");
					}
				}
			}
		})
	}

	pub async fn shutdown(&self) {
		debug!(store_id = self.store_id, "meta-log buffer shut down");
	}
}

fn now_nanos() -> i64 {
	crate::entry::now_unix() * 1_000_000_000
}

/// A remote filer's event stream, abstracted so the aggregator does not
/// depend on a concrete transport.
#[async_trait]
pub trait PeerSource: Send + Sync {
	/// Subscribe starting after `from_ts_ns`, returning a channel of events
	/// as they occur.
	async fn subscribe(&self, from_ts_ns: i64) -> Result<mpsc::Receiver<EventRecord>, FilerError>;
}

/// Replays peer filers' metadata mutations into the local store.
pub struct MetaAggregator {
	store_id: i32,
	store: Arc<dyn FilerStore>,
	last_ingested_ts: Mutex<HashMap<String, i64>>,
}

impl MetaAggregator {
	pub fn new(store_id: i32, store: Arc<dyn FilerStore>) -> Self {
		MetaAggregator { store_id, store, last_ingested_ts: Mutex::new(HashMap::new()) }
	}

	/// Start a subscription per peer in `peers`, skipping `self_address` so a
	/// filer never subscribes to itself when its own address is listed
	/// alongside its peers.
	pub fn start_configured_peers(
		self: &Arc<Self>,
		peers: &[String],
		self_address: &str,
		connect: impl Fn(String) -> Arc<dyn PeerSource>,
	) {
		for peer_name in peers_including_self(peers, self_address) {
			if peer_name == self_address {
				continue;
			}
			let source = connect(peer_name.clone());
			self.start_peer(peer_name, source);
		}
	}

	/// Subscribe to one peer and spawn a task draining its events into the
	/// local store. A dropped connection is retried with exponential
	/// backoff starting at `INITIAL_PEER_BACKOFF`, capped at
	/// `MAX_PEER_BACKOFF`, resuming each time from the highest timestamp
	/// already ingested from this peer rather than replaying its whole log.
	pub fn start_peer(self: &Arc<Self>, peer_name: String, peer: Arc<dyn PeerSource>) {
		let aggregator = self.clone();
		tokio::spawn(async move {
			let mut backoff = INITIAL_PEER_BACKOFF;
			loop {
				let resume_from = aggregator.resume_point(&peer_name).await;
				match peer.subscribe(resume_from).await {
					Ok(mut rx) => {
						backoff = INITIAL_PEER_BACKOFF;
						while let Some(event) = rx.recv().await {
							aggregator.note_ingested(&peer_name, event.timestamp_ns).await;
							if let Err(e) = aggregator.replay(&event).await {
								warn!(peer = %peer_name, error = %e, "failed to replay peer event");
							}
						}
						warn!(peer = %peer_name, "peer subscription ended, reconnecting");
					}
					Err(e) => {
						warn!(peer = %peer_name, error = %e, "failed to subscribe to peer, retrying");
					}
				}
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(MAX_PEER_BACKOFF);
			}
		});
	}

	async fn resume_point(&self, peer_name: &str) -> i64 {
		self.last_ingested_ts.lock().await.get(peer_name).copied().unwrap_or(0)
	}

	async fn note_ingested(&self, peer_name: &str, ts: i64) {
		let mut seen = self.last_ingested_ts.lock().await;
		let entry = seen.entry(peer_name.to_string()).or_insert(0);
		if ts > *entry {
			*entry = ts;
		}
	}

	/// Apply a single event, unless our own signature is already present
	/// (meaning we are the originator or have already replayed it), which
	/// breaks replication loops in a multi-peer fan-out. The caller is
	/// responsible for appending this filer's signature before forwarding
	/// the event onward to any further peer.
	pub async fn replay(&self, event: &EventRecord) -> Result<(), FilerError> {
		if event.signatures.contains(&self.store_id) {
			return Ok(());
		}
		let ctx = CancellationContext::uncancelable();
		match (&event.old_entry, &event.new_entry) {
			(_, Some(new_entry)) => {
				// Bypass create_entry/update_entry so this replay does not
				// re-enter the local meta-log and fan back out to peers.
				if self.store.find_entry(&ctx, &new_entry.full_path).await?.is_some() {
					self.store.update_entry(&ctx, new_entry).await?;
				} else {
					self.store.insert_entry(&ctx, new_entry).await?;
				}
			}
			(Some(old_entry), None) => {
				self.store.delete_entry(&ctx, &old_entry.full_path).await?;
			}
			(None, None) => {}
		}
		Ok(())
	}
}

/// Hash `key` into one of `partition_count` partitions using unsigned
/// arithmetic throughout, so there is no negative remainder to correct for.
pub fn partition_for_key(key: &str, partition_count: usize) -> usize {
	if partition_count == 0 {
		return 0;
	}
	let mut hasher = std::collections::hash_map::DefaultHasher::new();
	key.hash(&mut hasher);
	(hasher.finish() as usize) % partition_count
}


// vim: ts=4
