//! Entry and chunk data model.
//!
//! An `Entry` is a single path in the directory hierarchy: a directory, a
//! regular file, or a file small enough to be stored inline. Files above the
//! inline threshold are represented as an ordered list of `FileChunk`
//! references into the volume store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bit OR'd into `Attr::mode` to mark a directory, mirroring Unix `S_IFDIR`.
pub const MODE_DIR: u32 = 0o40000;

/// Reference to one chunk of file content stored on a remote volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
	pub file_id: String,
	pub offset: u64,
	pub size: u64,
	pub mtime: i64,
	pub e_tag: String,
	#[serde(default)]
	pub is_compressed: bool,
	#[serde(default)]
	pub cipher_key: Option<Vec<u8>>,
	#[serde(default)]
	pub source_file_id: Option<String>,
	/// Set when this chunk's payload is itself a serialized list of
	/// `FileChunk`s (a manifest), used to compact long chunk lists.
	#[serde(default)]
	pub is_chunk_manifest: bool,
}

impl FileChunk {
	pub fn end_offset(&self) -> u64 {
		self.offset + self.size
	}
}

/// File attributes, analogous to a POSIX `stat` result plus filer-specific
/// replication/collection placement hints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attr {
	pub mtime: i64,
	pub crtime: i64,
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	#[serde(default)]
	pub mime: String,
	#[serde(default)]
	pub user_name: String,
	#[serde(default)]
	pub group_names: Vec<String>,
	#[serde(default)]
	pub collection: String,
	#[serde(default)]
	pub replication: String,
	#[serde(default)]
	pub ttl_sec: i32,
	#[serde(default)]
	pub disk_type: String,
	#[serde(default)]
	pub md5: Vec<u8>,
	pub file_size: u64,
}

impl Attr {
	pub fn is_directory(&self) -> bool {
		self.mode & MODE_DIR != 0
	}

	/// New attribute set for the given mode, stamped with the current time
	/// and the process's effective uid/gid when the caller did not specify
	/// one. Mirrors the defaulting behavior of the original filer: uid/gid
	/// and timestamps are not supplied by callers that only care about mode.
	pub fn new(mode: u32) -> Self {
		let now = now_unix();
		Attr {
			mtime: now,
			crtime: now,
			mode,
			uid: crate::util::get_effective_uid(),
			gid: crate::util::get_effective_gid(),
			mime: String::new(),
			user_name: String::new(),
			group_names: Vec::new(),
			collection: String::new(),
			replication: String::new(),
			ttl_sec: 0,
			disk_type: String::new(),
			md5: Vec::new(),
			file_size: 0,
		}
	}
}

pub fn now_unix() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// A single path in the hierarchy: its attributes, its chunk list (empty for
/// directories and inline files), extended metadata, and optional inline
/// content for small files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
	pub full_path: String,
	pub attr: Attr,
	#[serde(default)]
	pub chunks: Vec<FileChunk>,
	#[serde(default)]
	pub extended: HashMap<String, Vec<u8>>,
	#[serde(default)]
	pub content: Vec<u8>,
}

impl Entry {
	pub fn new_directory(full_path: impl Into<String>, mode: u32) -> Self {
		Entry {
			full_path: full_path.into(),
			attr: Attr::new(mode | MODE_DIR),
			chunks: Vec::new(),
			extended: HashMap::new(),
			content: Vec::new(),
		}
	}

	pub fn is_directory(&self) -> bool {
		self.attr.is_directory()
	}

	/// Total logical size: inline content length, or the sum of chunk sizes
	/// after resolving manifests is the caller's responsibility — this is the
	/// authoritative `file_size` stamped on the entry, not recomputed here.
	pub fn size(&self) -> u64 {
		if !self.content.is_empty() {
			self.content.len() as u64
		} else {
			self.attr.file_size
		}
	}

	/// True once `ttl_sec` has elapsed since creation.
	pub fn is_expired(&self, now: i64) -> bool {
		self.attr.ttl_sec > 0 && now > self.attr.crtime + self.attr.ttl_sec as i64
	}

	pub fn name(&self) -> &str {
		self.full_path.rsplit('/').next().unwrap_or("")
	}

	pub fn parent_path(&self) -> Option<String> {
		if self.full_path == "/" {
			return None;
		}
		match self.full_path.rfind('/') {
			Some(0) => Some("/".to_string()),
			Some(idx) => Some(self.full_path[..idx].to_string()),
			None => None,
		}
	}
}

/// If `chunks` exceeds `manifest_threshold`, compact everything past the
/// first `manifest_threshold - 1` entries into a single manifest chunk,
/// serialized and persisted by `save_as_chunk`. Below the threshold (or when
/// `manifest_threshold` is 0, meaning manifests are disabled), `chunks` is
/// returned unchanged. Called once per successful write; a failure from
/// `save_as_chunk` surfaces as a write failure.
pub async fn maybe_manifestize<F, Fut>(
	manifest_threshold: usize,
	mut chunks: Vec<FileChunk>,
	save_as_chunk: F,
) -> Result<Vec<FileChunk>, crate::error::FilerError>
where
	F: FnOnce(Vec<u8>) -> Fut,
	Fut: std::future::Future<Output = Result<FileChunk, crate::error::FilerError>>,
{
	if manifest_threshold == 0 || chunks.len() <= manifest_threshold {
		return Ok(chunks);
	}
	let tail = chunks.split_off(manifest_threshold - 1);
	let payload = serde_json::to_vec(&tail)
		.map_err(|e| crate::error::FilerError::Other { message: e.to_string() })?;
	let mut manifest_chunk = save_as_chunk(payload).await?;
	manifest_chunk.is_chunk_manifest = true;
	chunks.push(manifest_chunk);
	Ok(chunks)
}

/// The synthetic root entry. Never persisted; always present.
pub fn root_entry() -> Entry {
	Entry {
		full_path: "/".to_string(),
		attr: Attr {
			mtime: 0,
			crtime: 0,
			mode: MODE_DIR | 0o755,
			uid: crate::util::get_effective_uid(),
			gid: crate::util::get_effective_gid(),
			mime: String::new(),
			user_name: String::new(),
			group_names: Vec::new(),
			collection: String::new(),
			replication: String::new(),
			ttl_sec: 0,
			disk_type: String::new(),
			md5: Vec::new(),
			file_size: 0,
		},
		chunks: Vec::new(),
		extended: HashMap::new(),
		content: Vec::new(),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn directory_bit_round_trips() {
		let e = Entry::new_directory("/a/b", 0o755);
		assert!(e.is_directory());
		assert_eq!(e.parent_path().as_deref(), Some("/a"));
	}

	#[test]
	fn root_is_directory_and_has_no_parent() {
		let r = root_entry();
		assert!(r.is_directory());
		assert_eq!(r.parent_path(), None);
	}

	#[test]
	fn ttl_expiry() {
		let mut e = Entry::new_directory("/a", 0o755);
		e.attr.ttl_sec = 10;
		e.attr.crtime = 0;
		assert!(!e.is_expired(5));
		assert!(e.is_expired(11));
	}

	#[test]
	fn file_size_prefers_inline_content() {
		let mut e = Entry::new_directory("/a", 0o644);
		e.attr.mode = 0o644;
		e.attr.file_size = 100;
		e.content = vec![1, 2, 3];
		assert_eq!(e.size(), 3);
	}

	fn chunk(offset: u64) -> FileChunk {
		FileChunk {
			file_id: format!("1,{}", offset),
			offset,
			size: 1,
			mtime: 0,
			e_tag: String::new(),
			is_compressed: false,
			cipher_key: None,
			source_file_id: None,
			is_chunk_manifest: false,
		}
	}

	#[tokio::test]
	async fn below_threshold_is_unchanged() {
		let chunks = vec![chunk(0), chunk(1)];
		let out = maybe_manifestize(10, chunks.clone(), |_| async {
			panic!("save_as_chunk should not be called below the threshold")
		})
		.await
		.unwrap();
		assert_eq!(out.len(), 2);
	}

	#[tokio::test]
	async fn above_threshold_compacts_tail_into_a_manifest_chunk() {
		let chunks: Vec<FileChunk> = (0..5).map(chunk).collect();
		let out = maybe_manifestize(3, chunks, |payload| async move {
			let tail: Vec<FileChunk> = serde_json::from_slice(&payload).unwrap();
			assert_eq!(tail.len(), 3);
			Ok(chunk(999))
		})
		.await
		.unwrap();
		// 2 untouched head chunks + 1 manifest chunk replacing the tail of 3.
		assert_eq!(out.len(), 3);
		assert!(out.last().unwrap().is_chunk_manifest);
	}
}

// vim: ts=4
