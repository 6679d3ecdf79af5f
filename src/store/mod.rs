//! Entry store abstraction: the capability set every backing store
//! (K/V, tabular, or otherwise) must satisfy. The filer core is written
//! entirely against `FilerStore` and never assumes a concrete backend.

pub mod path_translator;
pub mod redb_store;

use crate::cancel::CancellationContext;
use crate::entry::Entry;
use crate::error::FilerError;
use async_trait::async_trait;
use std::any::Any;

pub use path_translator::PathTranslator;
pub use redb_store::RedbFilerStore;

/// Opaque handle to an in-flight transaction. Stores that are naturally
/// atomic per call (e.g. a single redb write) can treat every transaction id
/// as a no-op scope; stores that batch multiple writes use it to group them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

/// Capability set for a metadata backing store. Every call accepts a
/// cancellation context; closing it while a call is in flight returns
/// `Canceled`.
#[async_trait]
pub trait FilerStore: Send + Sync {
	fn name(&self) -> &'static str;

	/// Support for downcasting a trait object back to its concrete type,
	/// used by `PathTranslator::new` to detect and collapse double-wrapping.
	fn as_any(&self) -> &dyn Any;

	/// Create or overwrite `entry`. No parent check: the caller is
	/// responsible for ensuring ancestor directories exist first.
	async fn insert_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError>;
	async fn update_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError>;
	async fn find_entry(&self, ctx: &CancellationContext, path: &str) -> Result<Option<Entry>, FilerError>;
	async fn delete_entry(&self, ctx: &CancellationContext, path: &str) -> Result<(), FilerError>;

	/// Delete an entry the caller already holds, letting backends that key
	/// on more than the path (or that need the embedded chunk list to
	/// clean up secondary indexes) use that information. Backends that are
	/// purely path-keyed can implement this as `delete_entry(&entry.full_path)`.
	async fn delete_one_entry(&self, ctx: &CancellationContext, entry: &Entry) -> Result<(), FilerError>;

	/// Delete every entry whose path is a descendant of `dir_path`.
	async fn delete_folder_children(&self, ctx: &CancellationContext, dir_path: &str) -> Result<(), FilerError>;

	/// List direct children of `dir_path`, in path order, starting strictly
	/// after (or at, if `inclusive`) `start_file_name`.
	async fn list_directory_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
	) -> Result<Vec<Entry>, FilerError>;

	/// List direct children of `dir_path` whose name starts with `prefix`,
	/// invoking `cb` for each in path order instead of buffering them into a
	/// `Vec`, for backends that can stream a prefix scan directly off their
	/// index.
	async fn list_directory_prefixed_entries(
		&self,
		ctx: &CancellationContext,
		dir_path: &str,
		prefix: &str,
		start_file_name: &str,
		inclusive: bool,
		limit: usize,
		cb: &mut (dyn FnMut(Entry) + Send),
	) -> Result<(), FilerError>;

	/// K/V side-channel, used for bootstrap state such as the store's
	/// replication signature.
	async fn kv_get(&self, ctx: &CancellationContext, key: &str) -> Result<Vec<u8>, FilerError>;
	async fn kv_put(&self, ctx: &CancellationContext, key: &str, value: Vec<u8>) -> Result<(), FilerError>;
	async fn kv_delete(&self, ctx: &CancellationContext, key: &str) -> Result<(), FilerError>;

	/// Open a transaction scope. Mutations issued with this id attached are
	/// held back until `commit_transaction`; `rollback_transaction` discards
	/// them. Stores without multi-op transaction support may implement this
	/// as an immediate no-op pair, since every individual call they take is
	/// already atomic.
	async fn begin_transaction(&self, ctx: &CancellationContext) -> Result<TransactionId, FilerError>;
	async fn commit_transaction(&self, ctx: &CancellationContext, tx: TransactionId) -> Result<(), FilerError>;
	async fn rollback_transaction(&self, ctx: &CancellationContext, tx: TransactionId) -> Result<(), FilerError>;

	async fn shutdown(&self);
}

// vim: ts=4
