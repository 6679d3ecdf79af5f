//! Filer core: create/find/update/delete with parent-directory
//! materialization, TTL expiry, bucket tracking and change notification
//! fan-out into the meta-log.

use crate::cancel::CancellationContext;
use crate::config::FilerConfig;
use crate::deletion_queue::DeletionQueue;
use crate::entry::{root_entry, Entry, MODE_DIR};
use crate::error::FilerError;
use crate::metalog::MetaLogBuffer;
use crate::store::FilerStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-bucket settings inherited by everything created under a top-level
/// bucket directory (a direct child of `config.dir_buckets_path`). Recorded
/// once when the bucket directory itself is created, from its own attrs and
/// `config.fsync_buckets` membership.
#[derive(Debug, Clone, Default)]
pub struct BucketConfig {
	/// Whether writes under this bucket must be durable before being
	/// acknowledged, per `config.fsync_buckets`.
	pub fsync: bool,
	pub replication: String,
	pub collection: String,
}

pub struct Filer {
	store: Arc<dyn FilerStore>,
	config: FilerConfig,
	deletion_queue: Arc<DeletionQueue>,
	meta_log: Arc<MetaLogBuffer>,
	buckets: Mutex<HashMap<String, BucketConfig>>,
}

impl Filer {
	pub fn new(
		store: Arc<dyn FilerStore>,
		config: FilerConfig,
		deletion_queue: Arc<DeletionQueue>,
		meta_log: Arc<MetaLogBuffer>,
	) -> Self {
		Filer { store, config, deletion_queue, meta_log, buckets: Mutex::new(HashMap::new()) }
	}

	pub fn config(&self) -> &FilerConfig {
		&self.config
	}

	/// Create `entry`. If `o_excl` is set, an existing entry at the same
	/// path is an error rather than being overwritten. The root path is a
	/// no-op success, matching `/` always existing.
	pub async fn create_entry(&self, ctx: &CancellationContext, mut entry: Entry, o_excl: bool) -> Result<(), FilerError> {
		ctx.check()?;
		if entry.full_path == "/" {
			return Ok(());
		}
		self.ensure_parent_directory(ctx, &entry).await?;
		self.apply_bucket_inheritance(&mut entry).await;

		let old = self.find_entry_raw(ctx, &entry.full_path).await?;
		match old {
			None => {
				self.store.insert_entry(ctx, &entry).await?;
			}
			Some(_) if o_excl => {
				return Err(FilerError::AlreadyExists { path: entry.full_path.clone() });
			}
			Some(old_entry) => {
				self.update_entry(ctx, old_entry, entry.clone()).await?;
				self.register_bucket_if_root(&entry).await;
				return Ok(());
			}
		}

		self.register_bucket_if_root(&entry).await;
		self.meta_log.append_event(None, Some(&entry), Vec::new()).await;
		Ok(())
	}

	/// Replace `old` with `new` at the same path. A file cannot become a
	/// directory or vice versa; `crtime` is preserved from the old entry.
	pub async fn update_entry(&self, ctx: &CancellationContext, old: Entry, mut new: Entry) -> Result<(), FilerError> {
		ctx.check()?;
		if old.is_directory() != new.is_directory() {
			return Err(if new.is_directory() {
				FilerError::NotADirectory { path: old.full_path.clone() }
			} else {
				FilerError::IsADirectory { path: old.full_path.clone() }
			});
		}
		new.attr.crtime = old.attr.crtime;
		self.store.update_entry(ctx, &new).await?;

		let orphaned = chunks_not_in_new(&old, &new);
		self.meta_log.append_event(Some(&old), Some(&new), orphaned.clone()).await;
		for file_id in orphaned {
			self.deletion_queue.enqueue(file_id);
		}
		Ok(())
	}

	/// Look up `path`, deleting and reporting not-found for entries whose
	/// TTL has elapsed.
	pub async fn find_entry(&self, ctx: &CancellationContext, path: &str) -> Result<Entry, FilerError> {
		if path == "/" {
			return Ok(root_entry());
		}
		match self.find_entry_raw(ctx, path).await? {
			Some(entry) => Ok(entry),
			None => Err(FilerError::not_found(path)),
		}
	}

	async fn find_entry_raw(&self, ctx: &CancellationContext, path: &str) -> Result<Option<Entry>, FilerError> {
		let entry = match self.store.find_entry(ctx, path).await? {
			Some(e) => e,
			None => return Ok(None),
		};
		let now = crate::entry::now_unix();
		if entry.is_expired(now) {
			debug!(path = %path, "entry expired, deleting");
			self.store.delete_one_entry(ctx, &entry).await?;
			return Ok(None);
		}
		Ok(Some(entry))
	}

	/// Delete `path`. Directory deletes remove all descendants first.
	/// Every chunk belonging to the removed entries is enqueued for
	/// reclamation rather than deleted synchronously.
	pub async fn delete_entry(&self, ctx: &CancellationContext, path: &str) -> Result<(), FilerError> {
		let entry = self.find_entry(ctx, path).await?;
		if entry.is_directory() {
			self.store.delete_folder_children(ctx, path).await?;
		}
		self.store.delete_one_entry(ctx, &entry).await?;
		self.meta_log
			.append_event(Some(&entry), None, entry.chunks.iter().map(|c| c.file_id.clone()).collect())
			.await;
		for chunk in &entry.chunks {
			self.deletion_queue.enqueue(chunk.file_id.clone());
		}
		Ok(())
	}

	pub async fn list_directory_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
	) -> Result<Vec<Entry>, FilerError> {
		let parent = self.find_entry(ctx, dir_path).await?;
		if !parent.is_directory() {
			return Err(FilerError::NotADirectory { path: dir_path.to_string() });
		}
		let now = crate::entry::now_unix();
		let mut entries =
			self.store.list_directory_entries(ctx, dir_path, start_file_name, inclusive, limit).await?;
		let before = entries.len();
		entries.retain(|e| !e.is_expired(now));
		let expired_count = before - entries.len();
		if expired_count > 0 {
			debug!(dir = %dir_path, expired_count, "filtered expired entries from listing");
		}
		Ok(entries)
	}

	/// List direct children of `dir_path` whose name starts with `prefix`,
	/// e.g. for a bucket's "find all objects under this key prefix" query.
	pub async fn list_directory_prefixed_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		prefix: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
	) -> Result<Vec<Entry>, FilerError> {
		let parent = self.find_entry(ctx, dir_path).await?;
		if !parent.is_directory() {
			return Err(FilerError::NotADirectory { path: dir_path.to_string() });
		}
		let now = crate::entry::now_unix();
		let mut entries = Vec::new();
		self.store
			.list_directory_prefixed_entries(ctx, dir_path, prefix, start_file_name, inclusive, limit, &mut |e| {
				entries.push(e)
			})
			.await?;
		entries.retain(|e| !e.is_expired(now));
		Ok(entries)
	}

	/// The top-level bucket name `full_path` lives under, if any — i.e. it is
	/// (or is a descendant of) a direct child of `config.dir_buckets_path`.
	fn bucket_name_for(&self, full_path: &str) -> Option<String> {
		let root = self.config.dir_buckets_path.trim_end_matches('/');
		if root.is_empty() {
			return None;
		}
		let rest = full_path.strip_prefix(root)?.strip_prefix('/')?;
		let name = rest.split('/').next().unwrap_or("");
		if name.is_empty() {
			None
		} else {
			Some(name.to_string())
		}
	}

	/// Whether `full_path` falls under a bucket configured for fsync-like
	/// durability.
	pub async fn bucket_requires_fsync(&self, full_path: &str) -> bool {
		match self.bucket_name_for(full_path) {
			Some(name) => self.buckets.lock().await.get(&name).map(|b| b.fsync).unwrap_or(false),
			None => false,
		}
	}

	/// If `entry` is itself a bucket root (a direct child of
	/// `dir_buckets_path`), cache its collection/replication/fsync settings
	/// so descendants can inherit them.
	async fn register_bucket_if_root(&self, entry: &Entry) {
		let root = self.config.dir_buckets_path.trim_end_matches('/');
		if root.is_empty() {
			return;
		}
		let rest = match entry.full_path.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
			Some(r) if !r.is_empty() && !r.contains('/') => r,
			_ => return,
		};
		let cfg = BucketConfig {
			fsync: self.config.fsync_buckets.iter().any(|b| b == rest),
			replication: entry.attr.replication.clone(),
			collection: entry.attr.collection.clone(),
		};
		self.buckets.lock().await.insert(rest.to_string(), cfg);
	}

	/// Fill in `collection`/`replication` from the owning bucket's cached
	/// config when the entry itself did not specify one.
	async fn apply_bucket_inheritance(&self, entry: &mut Entry) {
		let name = match self.bucket_name_for(&entry.full_path) {
			Some(n) => n,
			None => return,
		};
		let cfg = match self.buckets.lock().await.get(&name).cloned() {
			Some(c) => c,
			None => return,
		};
		if entry.attr.collection.is_empty() {
			entry.attr.collection = cfg.collection;
		}
		if entry.attr.replication.is_empty() {
			entry.attr.replication = cfg.replication;
		}
	}

	/// Recursively create any missing ancestor directories of `entry`,
	/// tolerating a concurrent creator: a directory that appears between our
	/// own existence check and insert is not an error, since `insert_entry`
	/// always succeeds by overwriting — we re-check before and after
	/// recursing so a racing creator's directory is adopted rather than
	/// clobbered.
	async fn ensure_parent_directory(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		let parent_path = match entry.parent_path() {
			Some(p) => p,
			None => return Ok(()),
		};
		if parent_path == "/" {
			return Ok(());
		}
		if let Some(existing) = self.find_entry_raw(ctx, &parent_path).await? {
			return if existing.is_directory() {
				Ok(())
			} else {
				Err(FilerError::NotADirectory { path: parent_path })
			};
		}
		// Recurse first so every ancestor exists before this level is created.
		let grandparent = Entry::new_directory(parent_path.clone(), entry.attr.mode | MODE_DIR);
		self.ensure_parent_directory(ctx, &grandparent).await?;

		// A concurrent creator may have materialized this level while we were
		// recursing into the grandparent; re-check before clobbering it.
		if let Some(existing) = self.find_entry_raw(ctx, &parent_path).await? {
			return if existing.is_directory() {
				Ok(())
			} else {
				Err(FilerError::NotADirectory { path: parent_path })
			};
		}

		let mut dir_entry = Entry::new_directory(parent_path.clone(), entry.attr.mode | MODE_DIR | 0o110);
		dir_entry.attr.uid = entry.attr.uid;
		dir_entry.attr.gid = entry.attr.gid;
		dir_entry.attr.collection = entry.attr.collection.clone();
		dir_entry.attr.replication = entry.attr.replication.clone();
		dir_entry.attr.user_name = entry.attr.user_name.clone();
		dir_entry.attr.group_names = entry.attr.group_names.clone();

		self.store.insert_entry(ctx, &dir_entry).await?;
		self.register_bucket_if_root(&dir_entry).await;
		self.meta_log.append_event(None, Some(&dir_entry), Vec::new()).await;
		Ok(())
	}

	pub async fn shutdown(&self) {
		info!("shutting down filer");
		self.deletion_queue.shutdown().await;
		self.meta_log.shutdown().await;
		self.store.shutdown().await;
	}
}

/// Chunks present in `old` but not in `new`, orphaned by the update and due
/// for reclamation. Append is expected to only ever add chunks, but an
/// overwrite (full `PUT`) drops the previous chunk list entirely.
fn chunks_not_in_new(old: &Entry, new: &Entry) -> Vec<String> {
	let new_ids: std::collections::HashSet<&str> =
		new.chunks.iter().map(|c| c.file_id.as_str()).collect();
	old.chunks.iter().filter(|c| !new_ids.contains(c.file_id.as_str())).map(|c| c.file_id.clone()).collect()
}


// vim: ts=4
