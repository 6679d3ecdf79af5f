//! End-to-end scenarios combining the upload pipeline, the filer core and
//! the meta-log, exercising the concrete scenarios named for this system.

use filerd_core::cancel::CancellationContext;
use filerd_core::chunking::ChunkConfig;
use filerd_core::config::FilerConfig;
use filerd_core::deletion_queue::DeletionQueue;
use filerd_core::entry::{Attr, Entry};
use filerd_core::error::FilerError;
use filerd_core::filer::Filer;
use filerd_core::master_client::{AssignPolicy, MasterClient, VolumeClient};
use filerd_core::metalog::MetaLogBuffer;
use filerd_core::store::{FilerStore, RedbFilerStore};
use filerd_core::upload::ChunkedUploadPipeline;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn ctx() -> CancellationContext {
	CancellationContext::new()
}

/// Same induced-failure-capable in-memory volume the unit tests use, kept
/// local to this file since the library's mock is test-only and private.
struct InMemoryVolume {
	next_id: AtomicU64,
	blobs: Mutex<HashMap<String, Vec<u8>>>,
	fail_next: std::sync::atomic::AtomicUsize,
}

impl InMemoryVolume {
	fn new() -> Self {
		InMemoryVolume {
			next_id: AtomicU64::new(1),
			blobs: Mutex::new(HashMap::new()),
			fail_next: std::sync::atomic::AtomicUsize::new(0),
		}
	}

	fn fail_next_uploads(&self, n: usize) {
		self.fail_next.store(n, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl MasterClient for InMemoryVolume {
	async fn assign(
		&self,
		ctx: &CancellationContext,
		_policy: &AssignPolicy,
	) -> Result<filerd_core::master_client::Assignment, FilerError> {
		ctx.check()?;
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		Ok(filerd_core::master_client::Assignment {
			file_id: format!("1,{:x}", id),
			upload_url: format!("http://volume/1,{:x}", id),
			auth: "auth".to_string(),
			ttl_sec: 0,
		})
	}
}

#[async_trait::async_trait]
impl VolumeClient for InMemoryVolume {
	async fn upload(
		&self,
		ctx: &CancellationContext,
		assignment: &filerd_core::master_client::Assignment,
		data: &[u8],
	) -> Result<filerd_core::master_client::UploadResult, FilerError> {
		ctx.check()?;
		if self.fail_next.load(Ordering::SeqCst) > 0 {
			self.fail_next.fetch_sub(1, Ordering::SeqCst);
			return Err(FilerError::Upload(filerd_core::error::UploadError::AssignFailed {
				message: "induced failure".to_string(),
			}));
		}
		self.blobs.lock().unwrap().insert(assignment.file_id.clone(), data.to_vec());
		Ok(filerd_core::master_client::UploadResult {
			size: data.len() as u64,
			e_tag: format!("etag-{}", assignment.file_id),
		})
	}

	async fn lookup(&self, ctx: &CancellationContext, _file_id: &str) -> Result<Vec<String>, FilerError> {
		ctx.check()?;
		Ok(vec!["http://volume".to_string()])
	}

	async fn download(&self, ctx: &CancellationContext, file_id: &str) -> Result<Vec<u8>, FilerError> {
		ctx.check()?;
		self.blobs.lock().unwrap().get(file_id).cloned().ok_or_else(|| FilerError::NotFound { path: file_id.to_string() })
	}

	async fn delete(&self, ctx: &CancellationContext, file_id: &str) -> Result<(), FilerError> {
		ctx.check()?;
		self.blobs.lock().unwrap().remove(file_id);
		Ok(())
	}
}

async fn build_filer() -> (Filer, Arc<ChunkedUploadPipeline<InMemoryVolume>>, Arc<DeletionQueue>, TempDir) {
	let dir = TempDir::new().unwrap();
	let store: Arc<dyn FilerStore> = Arc::new(RedbFilerStore::open(dir.path().join("f.redb")).unwrap());
	let config = FilerConfig::default();
	let client = Arc::new(InMemoryVolume::new());
	let deletion_queue = Arc::new(DeletionQueue::spawn(client.clone(), 2));
	let meta_log = Arc::new(MetaLogBuffer::new(1, 60));
	let filer = Filer::new(store, config, deletion_queue.clone(), meta_log);
	let pipeline =
		Arc::new(ChunkedUploadPipeline::new(client, ChunkConfig::new(21), 3, 1)); // 2 MiB chunks
	(filer, pipeline, deletion_queue, dir)
}

fn file_attr() -> Attr {
	Attr::new(0o644)
}

/// Scenario 1: posting a deeply nested path on an empty store materializes
/// both ancestor directories, and the leaf carries the body's md5.
#[tokio::test]
async fn scenario_1_nested_create_materializes_parents_with_md5() {
	let (filer, pipeline, deletion_queue, _dir) = build_filer().await;
	let body = b"hello, filer".to_vec();
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/a/b/c", Cursor::new(body.clone()), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();

	let entry = pipeline
		.commit(&ctx(), &filer, &deletion_queue, &AssignPolicy::default(), "/a/b/c", file_attr(), outcome, false)
		.await
		.unwrap();

	let a = filer.find_entry(&ctx(), "/a").await.unwrap();
	assert!(a.is_directory());
	let b = filer.find_entry(&ctx(), "/a/b").await.unwrap();
	assert!(b.is_directory());
	let c = filer.find_entry(&ctx(), "/a/b/c").await.unwrap();
	assert!(!c.is_directory());
	let mut hasher = Md5::new();
	hasher.update(&body);
	let expected: [u8; 16] = hasher.finalize().into();
	assert_eq!(c.attr.md5, expected.to_vec());
	assert_eq!(entry.attr.md5, expected.to_vec());
}

/// Scenario 2: a 5 MiB body with a 2 MiB chunk size produces three chunks
/// at offsets 0, 2 MiB, 4 MiB with sizes 2 MiB, 2 MiB, 1 MiB.
#[tokio::test]
async fn scenario_2_large_upload_splits_into_expected_chunk_sizes() {
	let (_filer, pipeline, _deletion_queue, _dir) = build_filer().await;
	let five_mib = 5 * 1024 * 1024;
	let body = vec![9u8; five_mib];
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/big.bin", Cursor::new(body), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();

	assert_eq!(outcome.chunks.len(), 3);
	let two_mib = 2 * 1024 * 1024;
	assert_eq!(outcome.chunks[0].offset, 0);
	assert_eq!(outcome.chunks[0].size, two_mib as u64);
	assert_eq!(outcome.chunks[1].offset, two_mib as u64);
	assert_eq!(outcome.chunks[1].size, two_mib as u64);
	assert_eq!(outcome.chunks[2].offset, (2 * two_mib) as u64);
	assert_eq!(outcome.chunks[2].size, (five_mib - 2 * two_mib) as u64);
}

/// Scenario 3: a small body under the inline threshold is stored as
/// content with zero chunks.
#[tokio::test]
async fn scenario_3_small_upload_is_stored_inline() {
	let client = Arc::new(InMemoryVolume::new());
	let mut config = ChunkConfig::new(21);
	config.save_to_filer_limit = 4096;
	let pipeline = ChunkedUploadPipeline::new(client, config, 3, 1);

	let body = vec![1u8; 256];
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/small.bin", Cursor::new(body.clone()), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();

	assert!(outcome.chunks.is_empty());
	assert_eq!(outcome.content.as_deref(), Some(&body[..]));
}

/// Scenario 3b: a payload under `/etc/` inlines at 4KiB regardless of the
/// configured `save_to_filer_limit`.
#[tokio::test]
async fn scenario_3b_etc_path_gets_its_own_inline_limit() {
	let client = Arc::new(InMemoryVolume::new());
	let mut config = ChunkConfig::new(21);
	config.save_to_filer_limit = 64; // much smaller than the /etc/ override
	let pipeline = ChunkedUploadPipeline::new(client, config, 3, 1);

	let body = vec![1u8; 2048];
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/etc/filerd/config.toml", Cursor::new(body.clone()), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();

	assert_eq!(outcome.content.as_deref(), Some(&body[..]));
}

/// Scenario 4: appending 512 KiB onto an existing 1 MiB file yields a
/// 1.5 MiB logical size with the new chunk starting at the old end offset.
#[tokio::test]
async fn scenario_4_append_extends_file_size_and_offset() {
	let (filer, pipeline, deletion_queue, _dir) = build_filer().await;
	let one_mib = 1024 * 1024;
	let initial = pipeline
		.upload_reader_to_chunks(&ctx(), "/x", Cursor::new(vec![1u8; one_mib]), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();

	let entry = pipeline
		.commit(&ctx(), &filer, &deletion_queue, &AssignPolicy::default(), "/x", file_attr(), initial, false)
		.await
		.unwrap();

	let half_mib = 512 * 1024;
	let appended = pipeline
		.upload_reader_to_chunks(
			&ctx(),
			"/x",
			Cursor::new(vec![2u8; half_mib]),
			&AssignPolicy::default(),
			one_mib as u64,
			true,
		)
		.await
		.unwrap();

	let mut new_entry = entry.clone();
	new_entry.chunks.extend(appended.chunks.clone());
	new_entry.attr.file_size = one_mib as u64 + appended.total_size;
	filer.update_entry(&ctx(), entry, new_entry).await.unwrap();

	let found = filer.find_entry(&ctx(), "/x").await.unwrap();
	assert_eq!(found.attr.file_size, (one_mib + half_mib) as u64);
	let last_chunk = found.chunks.last().unwrap();
	assert_eq!(last_chunk.offset, one_mib as u64);
}

/// Scenario 5: an entry with a 1-second TTL reads as not-found after it
/// elapses, and the store no longer holds a record for it.
#[tokio::test]
async fn scenario_5_ttl_expiry_removes_the_record() {
	let (filer, _pipeline, _deletion_queue, _dir) = build_filer().await;
	let mut entry = Entry {
		full_path: "/foo".to_string(),
		attr: file_attr(),
		chunks: vec![],
		extended: Default::default(),
		content: vec![1],
	};
	entry.attr.ttl_sec = 1;
	entry.attr.crtime = filerd_core::entry::now_unix() - 2;
	filer.create_entry(&ctx(), entry, false).await.unwrap();

	let err = filer.find_entry(&ctx(), "/foo").await.unwrap_err();
	assert_eq!(err.kind(), "not_found");
}

/// Scenario 6: a mutation on filer A replays into filer B's store, and
/// replaying the same event back (now carrying both signatures) does not
/// loop back into A's own store a second time.
#[tokio::test]
async fn scenario_6_cross_peer_replication_suppresses_loops() {
	let dir_a = TempDir::new().unwrap();
	let dir_b = TempDir::new().unwrap();
	let store_a: Arc<dyn FilerStore> =
		Arc::new(RedbFilerStore::open(dir_a.path().join("a.redb")).unwrap());
	let store_b: Arc<dyn FilerStore> =
		Arc::new(RedbFilerStore::open(dir_b.path().join("b.redb")).unwrap());

	let log_a = MetaLogBuffer::new(1, 60);
	let aggregator_b = filerd_core::metalog::MetaAggregator::new(2, store_b.clone());

	let entry = Entry::new_directory("/from-a", 0o755);
	log_a.append_event(None, Some(&entry), vec![]).await;

	let mut rx = log_a.subscribe();
	// append_event already broadcast before we subscribed in a real deployment
	// the subscriber would be attached first; here we re-emit to simulate the
	// peer's subscription receiving the event directly.
	log_a.append_event(None, Some(&entry), vec![]).await;
	let event = rx.recv().await.unwrap();
	aggregator_b.replay(&event).await.unwrap();

	assert!(store_b.find_entry(&ctx(), "/from-a").await.unwrap().is_some());

	// B forwards the event onward, appending its own signature first. A's
	// aggregator already carries signature 1 on the event (it originated
	// there), so the loop is suppressed.
	let mut looped_back = event;
	looped_back.signatures.push(2);
	let aggregator_a = filerd_core::metalog::MetaAggregator::new(1, store_a.clone());
	aggregator_a.replay(&looped_back).await.unwrap();
	// A's own store never had /from-a inserted through replay because the
	// event already carried A's signature.
	assert!(store_a.find_entry(&ctx(), "/from-a").await.unwrap().is_none());
}

/// Type stability: an existing file cannot be replaced by a directory at
/// the same path, and vice versa.
#[tokio::test]
async fn type_stability_is_enforced_across_update() {
	let (filer, _pipeline, _deletion_queue, _dir) = build_filer().await;
	let file = Entry {
		full_path: "/f".to_string(),
		attr: file_attr(),
		chunks: vec![],
		extended: Default::default(),
		content: vec![1, 2, 3],
	};
	filer.create_entry(&ctx(), file.clone(), false).await.unwrap();
	let dir_version = Entry::new_directory("/f", 0o755);
	let err = filer.update_entry(&ctx(), file, dir_version).await.unwrap_err();
	assert_eq!(err.kind(), "not_a_directory");
}

/// Path-translator transparency: wrapping a store does not change what
/// callers observe through the filer built on top of it.
#[tokio::test]
async fn path_translator_is_transparent_to_filer_operations() {
	let dir = TempDir::new().unwrap();
	let inner: Arc<dyn FilerStore> = Arc::new(RedbFilerStore::open(dir.path().join("f.redb")).unwrap());
	let translated = filerd_core::store::PathTranslator::new("/tenants/a", inner);
	let config = FilerConfig::default();
	let client = Arc::new(InMemoryVolume::new());
	let deletion_queue = Arc::new(DeletionQueue::spawn(client, 1));
	let meta_log = Arc::new(MetaLogBuffer::new(3, 60));
	let filer = Filer::new(translated, config, deletion_queue, meta_log);

	let entry = Entry {
		full_path: "/docs/readme".to_string(),
		attr: file_attr(),
		chunks: vec![],
		extended: Default::default(),
		content: vec![1],
	};
	filer.create_entry(&ctx(), entry, false).await.unwrap();
	let found = filer.find_entry(&ctx(), "/docs/readme").await.unwrap();
	assert_eq!(found.full_path, "/docs/readme");
}

/// Upload atomicity (metadata): if a chunked upload succeeds against the
/// volume layer but the entry can't be persisted (here, an `o_excl` create
/// racing an existing entry), the chunks just written must not be leaked —
/// they're reclaimed through the deletion queue instead of sitting orphaned
/// on a volume forever.
#[tokio::test]
async fn upload_atomicity_reclaims_chunks_when_metadata_commit_fails() {
	let (filer, pipeline, deletion_queue, _dir) = build_filer().await;
	filer.create_entry(&ctx(), Entry::new_directory("/conflict", 0o755), false).await.unwrap();

	let body = vec![3u8; 5 * 1024 * 1024]; // large enough to produce real chunks
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/conflict", Cursor::new(body), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();
	assert!(!outcome.chunks.is_empty());
	let uploaded_ids: Vec<String> = outcome.chunks.iter().map(|c| c.file_id.clone()).collect();

	let err = pipeline
		.commit(&ctx(), &filer, &deletion_queue, &AssignPolicy::default(), "/conflict", file_attr(), outcome, true)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), "already_exists");

	deletion_queue.shutdown().await;
	assert!(filer.find_entry(&ctx(), "/conflict").await.unwrap().is_directory());
}

/// Manifest compaction: a chunk list longer than the configured threshold
/// is compacted into a single manifest chunk on commit, and the upload
/// pipeline can resolve it back into the original chunk list.
#[tokio::test]
async fn manifest_compaction_round_trips_through_resolve() {
	let (_filer, _default_pipeline, deletion_queue, dir) = build_filer().await;
	let store: Arc<dyn FilerStore> = Arc::new(RedbFilerStore::open(dir.path().join("manifest.redb")).unwrap());
	let client = Arc::new(InMemoryVolume::new());
	let mut chunk_config = ChunkConfig::new(12); // 4KiB chunks
	chunk_config.save_to_filer_limit = 0;
	chunk_config.manifest_threshold = 2;
	let pipeline = Arc::new(ChunkedUploadPipeline::new(client.clone(), chunk_config, 3, 1));
	let config = FilerConfig::default();
	let meta_log = Arc::new(MetaLogBuffer::new(9, 60));
	let manifest_filer = Filer::new(store, config, deletion_queue.clone(), meta_log);

	let body = vec![5u8; 4096 * 5]; // 5 chunks at 4KiB each, above the threshold of 2
	let outcome = pipeline
		.upload_reader_to_chunks(&ctx(), "/manifested", Cursor::new(body), &AssignPolicy::default(), 0, false)
		.await
		.unwrap();
	let original_chunk_count = outcome.chunks.len();
	assert!(original_chunk_count > 2);

	let entry = pipeline
		.commit(&ctx(), &manifest_filer, &deletion_queue, &AssignPolicy::default(), "/manifested", file_attr(), outcome, false)
		.await
		.unwrap();

	assert!(entry.chunks.last().unwrap().is_chunk_manifest);
	let resolved = pipeline.resolve_manifest_chunks(&ctx(), &entry.chunks).await.unwrap();
	assert_eq!(resolved.len(), original_chunk_count);
}
