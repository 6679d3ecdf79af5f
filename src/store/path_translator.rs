//! Path-translating store decorator.
//!
//! Wraps any `FilerStore` so that its key space appears re-rooted under a
//! configured prefix: the wrapped store only ever sees paths relative to
//! `store_root`, while callers keep addressing the store by its full,
//! un-translated path.

use crate::cancel::CancellationContext;
use crate::entry::Entry;
use crate::error::FilerError;
use crate::store::{FilerStore, TransactionId};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

pub struct PathTranslator {
	inner: Arc<dyn FilerStore>,
	store_root: String,
}

impl PathTranslator {
	/// Wrap `inner` so paths are translated relative to `store_root`.
	/// Wrapping a store that is already a `PathTranslator` collapses to a
	/// single layer instead of double-translating, regardless of the new
	/// prefix: re-rooting an already re-rooted store under a second prefix
	/// would translate twice on every call, so the outer wrap is dropped and
	/// the existing translator is returned unchanged.
	pub fn new(store_root: impl Into<String>, inner: Arc<dyn FilerStore>) -> Arc<dyn FilerStore> {
		if inner.as_any().downcast_ref::<PathTranslator>().is_some() {
			return inner;
		}
		let mut root = store_root.into();
		if !root.ends_with('/') {
			root.push('/');
		}
		if root == "/" {
			return inner;
		}
		Arc::new(PathTranslator { inner, store_root: root })
	}

	fn translate(&self, full_path: &str) -> String {
		if self.store_root == "/" {
			return full_path.to_string();
		}
		let stripped = &self.store_root[..self.store_root.len() - 1];
		match full_path.strip_prefix(stripped) {
			Some("") => "/".to_string(),
			Some(rest) => rest.to_string(),
			None => full_path.to_string(),
		}
	}

	fn untranslate(&self, path: &str) -> String {
		if self.store_root == "/" {
			return path.to_string();
		}
		let stripped = &self.store_root[..self.store_root.len() - 1];
		if path == "/" {
			stripped.to_string()
		} else {
			format!("{}{}", stripped, path)
		}
	}

	fn with_translated_path(&self, entry: &Entry) -> Entry {
		let mut translated = entry.clone();
		translated.full_path = self.translate(&entry.full_path);
		translated
	}

	fn with_untranslated_path(&self, mut entry: Entry) -> Entry {
		entry.full_path = self.untranslate(&entry.full_path);
		entry
	}
}

#[async_trait]
impl FilerStore for PathTranslator {
	fn name(&self) -> &'static str {
		"path_translator"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	async fn insert_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		self.inner.insert_entry(ctx, &self.with_translated_path(entry)).await
	}

	async fn update_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		self.inner.update_entry(ctx, &self.with_translated_path(entry)).await
	}

	async fn find_entry(&self, ctx: &CancellationContext, path: &str) -> Result<Option<Entry>, FilerError> {
		let translated_path = self.translate(path);
		let found = self.inner.find_entry(ctx, &translated_path).await?;
		Ok(found.map(|e| self.with_untranslated_path(e)))
	}

	async fn delete_entry(&self, ctx: &CancellationContext, path: &str) -> Result<(), FilerError> {
		self.inner.delete_entry(ctx, &self.translate(path)).await
	}

	async fn delete_one_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError> {
		self.inner.delete_one_entry(ctx, &self.with_translated_path(entry)).await
	}

	async fn delete_folder_children(&self, ctx: &CancellationContext, dir_path: &str) -> Result<(), FilerError> {
		self.inner.delete_folder_children(ctx, &self.translate(dir_path)).await
	}

	async fn list_directory_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
	) -> Result<Vec<Entry>, FilerError> {
		let entries = self
			.inner
			.list_directory_entries(ctx, &self.translate(dir_path), start_file_name, inclusive, limit)
			.await?;
		Ok(entries.into_iter().map(|e| self.with_untranslated_path(e)).collect())
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
		let translated_dir = self.translate(dir_path);
		let mut forward = |entry: Entry| cb(self.with_untranslated_path(entry));
		self.inner
			.list_directory_prefixed_entries(
				ctx,
				&translated_dir,
				prefix,
				start_file_name,
				inclusive,
				limit,
				&mut forward,
			)
			.await
	}

	async fn kv_get(&self, ctx: &CancellationContext, key: &str) -> Result<Vec<u8>, FilerError> {
		self.inner.kv_get(ctx, key).await
	}

	async fn kv_put(&self, ctx: &CancellationContext, key: &str, value: Vec<u8>) -> Result<(), FilerError> {
		self.inner.kv_put(ctx, key, value).await
	}

	async fn kv_delete(&self, ctx: &CancellationContext, key: &str) -> Result<(), FilerError> {
		self.inner.kv_delete(ctx, key).await
	}

	async fn begin_transaction(&self, ctx: &CancellationContext) -> Result<TransactionId, FilerError> {
		self.inner.begin_transaction(ctx).await
	}

	async fn commit_transaction(&self, ctx: &CancellationContext, tx: TransactionId) -> Result<(), FilerError> {
		self.inner.commit_transaction(ctx, tx).await
	}

	async fn rollback_transaction(&self, ctx: &CancellationContext, tx: TransactionId) -> Result<(), FilerError> {
		self.inner.rollback_transaction(ctx, tx).await
	}

	async fn shutdown(&self) {
		self.inner.shutdown().await
	}
}


// vim: ts=4
