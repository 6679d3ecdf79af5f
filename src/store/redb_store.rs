//! Reference `FilerStore` backend on top of `redb`, an embedded ACID
//! key-value engine. Entries are serialized with `serde_json` and keyed by
//! their full path; a second table holds the K/V side-channel.

use crate::cancel::CancellationContext;
use crate::entry::Entry;
use crate::error::{FilerError, StoreError};
use crate::store::{FilerStore, TransactionId};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

pub struct RedbFilerStore {
	db: Mutex<Database>,
	next_tx: AtomicU64,
}

impl RedbFilerStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, FilerError> {
		let db = Database::create(path).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let txn =
				db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			{
				txn.open_table(ENTRIES_TABLE)
					.map_err(|e| StoreError::Backend { source: Box::new(e) })?;
				txn.open_table(KV_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			}
			txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		}
		Ok(RedbFilerStore { db: Mutex::new(db), next_tx: AtomicU64::new(1) })
	}

	fn put_entry(&self, entry: &Entry) -> Result<(), FilerError> {
		let bytes = serde_json::to_vec(entry)
			.map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		let db = self.db.lock().unwrap();
		let txn = db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let mut table =
				txn.open_table(ENTRIES_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			table
				.insert(entry.full_path.as_str(), bytes.as_slice())
				.map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		}
		txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	fn remove_entry(&self, path: &str) -> Result<(), FilerError> {
		let db = self.db.lock().unwrap();
		let txn = db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let mut table =
				txn.open_table(ENTRIES_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			table.remove(path).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		}
		txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	/// Direct children of `dir_path` whose name passes `inclusive`/`prefix`
	/// filtering, in path order, capped at `limit`. Shared by both the plain
	/// and prefix-filtered listing calls.
	fn list_matching_children(
		&self,
		dir_path: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
		name_prefix: Option<&str>,
	) -> Result<Vec<Entry>, FilerError> {
		let prefix = if dir_path == "/" { "/".to_string() } else { format!("{}/", dir_path) };
		let db = self.db.lock().unwrap();
		let txn = db.begin_read().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		let table =
			txn.open_table(ENTRIES_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		let mut entries: Vec<Entry> = table
			.iter()
			.map_err(|e| StoreError::Backend { source: Box::new(e) })?
			.filter_map(|r| r.ok())
			.filter_map(|(k, v)| {
				let key = k.value();
				if !key.starts_with(&prefix) {
					return None;
				}
				let rest = &key[prefix.len()..];
				// Only direct children: no further path separator.
				if rest.is_empty() || rest.contains('/') {
					return None;
				}
				serde_json::from_slice::<Entry>(v.value()).ok()
			})
			.collect();
		entries.sort_by(|a, b| a.full_path.cmp(&b.full_path));
		entries.retain(|e| {
			let name = e.name();
			if let Some(p) = name_prefix {
				if !name.starts_with(p) {
					return false;
				}
			}
			if start_file_name.is_empty() {
				true
			} else if inclusive {
				name >= start_file_name
			} else {
				name > start_file_name
			}
		});
		if limit > 0 {
			entries.truncate(limit);
		}
		Ok(entries)
	}
}

#[async_trait]
impl FilerStore for RedbFilerStore {
	fn name(&self) -> &'static str {
		"redb"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	async fn insert_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		ctx.check()?;
		self.put_entry(entry)
	}

	async fn update_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		ctx.check()?;
		self.put_entry(entry)
	}

	async fn find_entry(&self, ctx: &CancellationContext, path: &str) -> Result<Option<Entry>, FilerError> {
		ctx.check()?;
		let db = self.db.lock().unwrap();
		let txn = db.begin_read().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		let table =
			txn.open_table(ENTRIES_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		match table.get(path).map_err(|e| StoreError::Backend { source: Box::new(e) })? {
			Some(bytes) => {
				let entry: Entry = serde_json::from_slice(bytes.value())
					.map_err(|e| StoreError::Backend { source: Box::new(e) })?;
				Ok(Some(entry))
			}
			None => Ok(None),
		}
	}

	async fn delete_entry(&self, ctx: &CancellationContext, path: &str) -> Result<(), FilerError> {
		ctx.check()?;
		self.remove_entry(path)
	}

	async fn delete_one_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		ctx.check()?;
		// Path-keyed backend: no secondary index keyed on the chunk list to
		// clean up, so this is equivalent to `delete_entry(&entry.full_path)`.
		self.remove_entry(&entry.full_path)
	}

	async fn delete_folder_children(&self, ctx: &CancellationContext, dir_path: &str) -> Result<(), FilerError> {
		ctx.check()?;
		let prefix = if dir_path == "/" { "/".to_string() } else { format!("{}/", dir_path) };
		let db = self.db.lock().unwrap();
		let txn = db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let mut table =
				txn.open_table(ENTRIES_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			let keys: Vec<String> = table
				.iter()
				.map_err(|e| StoreError::Backend { source: Box::new(e) })?
				.filter_map(|r| r.ok())
				.map(|(k, _)| k.value().to_string())
				.filter(|k| k.starts_with(&prefix))
				.collect();
			for key in keys {
				table.remove(key.as_str()).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			}
		}
		txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	async fn list_directory_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
	) -> Result<Vec<Entry>, FilerError> {
		ctx.check()?;
		self.list_matching_children(dir_path, start_file_name, inclusive, limit, None)
	}

	async fn list_directory_prefixed_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		prefix: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
		cb: &mut (dyn FnMut(Entry) + Send),
	) -> Result<(), FilerError> {
		ctx.check()?;
		let entries =
			self.list_matching_children(dir_path, start_file_name, inclusive, limit, Some(prefix))?;
		for entry in entries {
			cb(entry);
		}
		Ok(())
	}

	async fn kv_get(&self, ctx: &CancellationContext, key: &str) -> Result<Vec<u8>, FilerError> {
		ctx.check()?;
		let db = self.db.lock().unwrap();
		let txn = db.begin_read().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		let table = txn.open_table(KV_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		match table.get(key).map_err(|e| StoreError::Backend { source: Box::new(e) })? {
			Some(v) => Ok(v.value().to_vec()),
			None => Err(FilerError::KvNotFound { key: key.to_string() }),
		}
	}

	async fn kv_put(&self, ctx: &CancellationContext, key: &str, value: Vec<u8>) -> Result<(), FilerError> {
		ctx.check()?;
		let db = self.db.lock().unwrap();
		let txn = db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let mut table =
				txn.open_table(KV_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			table
				.insert(key, value.as_slice())
				.map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		}
		txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	async fn kv_delete(&self, ctx: &CancellationContext, key: &str) -> Result<(), FilerError> {
		ctx.check()?;
		let db = self.db.lock().unwrap();
		let txn = db.begin_write().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		{
			let mut table =
				txn.open_table(KV_TABLE).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
			table.remove(key).map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		}
		txn.commit().map_err(|e| StoreError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	// Every CRUD call above already commits its own redb write transaction,
	// so a multi-op transaction scope here would only buy batching, not
	// atomicity. We hand out distinct ids and treat begin/commit/rollback as
	// bookkeeping rather than buffering writes.
	async fn begin_transaction(&self, ctx: &CancellationContext) -> Result<TransactionId, FilerError> {
		ctx.check()?;
		Ok(TransactionId(self.next_tx.fetch_add(1, Ordering::SeqCst)))
	}

	async fn commit_transaction(&self, ctx: &CancellationContext, _tx: TransactionId) -> Result<(), FilerError> {
		ctx.check()?;
		Ok(())
	}

	async fn rollback_transaction(&self, ctx: &CancellationContext, _tx: TransactionId) -> Result<(), FilerError> {
		ctx.check()?;
		Ok(())
	}

	async fn shutdown(&self) {}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::entry::Entry;
	use tempfile::TempDir;

	fn open_store() -> (RedbFilerStore, TempDir) {
		let dir = TempDir::new().unwrap();
		let store = RedbFilerStore::open(dir.path().join("filer.redb")).unwrap();
		(store, dir)
	}

	fn ctx() -> CancellationContext {
		CancellationContext::new()
	}

	#[tokio::test]
	async fn insert_then_find_round_trips() {
		let (store, _dir) = open_store();
		let entry = Entry::new_directory("/a", 0o755);
		store.insert_entry(&ctx(), &entry).await.unwrap();
		let found = store.find_entry(&ctx(), "/a").await.unwrap().unwrap();
		assert_eq!(found.full_path, "/a");
	}

	#[tokio::test]
	async fn insert_twice_overwrites_without_error() {
		let (store, _dir) = open_store();
		let mut entry = Entry::new_directory("/a", 0o755);
		store.insert_entry(&ctx(), &entry).await.unwrap();
		entry.attr.mode |= 0o111;
		store.insert_entry(&ctx(), &entry).await.unwrap();
		let found = store.find_entry(&ctx(), "/a").await.unwrap().unwrap();
		assert_eq!(found.attr.mode, entry.attr.mode);
	}

	#[tokio::test]
	async fn list_directory_entries_returns_direct_children_only() {
		let (store, _dir) = open_store();
		store.insert_entry(&ctx(), &Entry::new_directory("/a", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/b", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/b/c", 0o755)).await.unwrap();
		let children = store.list_directory_entries(&ctx(), "/a", "", false, 0).await.unwrap();
		assert_eq!(children.len(), 1);
		assert_eq!(children[0].full_path, "/a/b");
	}

	#[tokio::test]
	async fn list_directory_prefixed_entries_filters_by_name_prefix() {
		let (store, _dir) = open_store();
		store.insert_entry(&ctx(), &Entry::new_directory("/a", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/report-1", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/report-2", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/notes", 0o755)).await.unwrap();

		let mut seen = Vec::new();
		store
			.list_directory_prefixed_entries(&ctx(), "/a", "report-", "", false, 0, &mut |e| seen.push(e.full_path))
			.await
			.unwrap();
		seen.sort();
		assert_eq!(seen, vec!["/a/report-1".to_string(), "/a/report-2".to_string()]);
	}

	#[tokio::test]
	async fn delete_folder_children_removes_descendants() {
		let (store, _dir) = open_store();
		store.insert_entry(&ctx(), &Entry::new_directory("/a", 0o755)).await.unwrap();
		store.insert_entry(&ctx(), &Entry::new_directory("/a/b", 0o755)).await.unwrap();
		store.delete_folder_children(&ctx(), "/a").await.unwrap();
		assert!(store.find_entry(&ctx(), "/a/b").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn kv_round_trip_and_not_found() {
		let (store, _dir) = open_store();
		assert_eq!(store.kv_get(&ctx(), "filer.store.id").await.unwrap_err().kind(), "kv_not_found");
		store.kv_put(&ctx(), "filer.store.id", vec![1, 2, 3, 4]).await.unwrap();
		assert_eq!(store.kv_get(&ctx(), "filer.store.id").await.unwrap(), vec![1, 2, 3, 4]);
	}

	#[tokio::test]
	async fn canceled_context_is_rejected_before_touching_the_database() {
		let (store, _dir) = open_store();
		let canceled = ctx();
		canceled.cancel();
		let err = store.find_entry(&canceled, "/a").await.unwrap_err();
		assert_eq!(err.kind(), "canceled");
	}
}

// vim: ts=4
