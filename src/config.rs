#![allow(dead_code)]

//! Unified configuration for the filer core.
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (`FilerConfig::default()`)
//! 2. Config file (`~/.config/filerd/config.toml`)
//! 3. Environment variables (`FILERD_*` prefix)
//! 4. Caller-supplied overrides (highest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unified configuration for the filer core: chunking, buckets, replication
/// and the deletion queue all read from one struct, the way the upstream
/// `Config` consolidates what used to be two dozen scattered types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilerConfig {
	// ========================================================================
	// RUNTIME & STATE
	// ========================================================================
	/// Directory for local filer state (store_id file, embedded store db)
	pub filer_dir: PathBuf,

	/// Collection used when a request does not specify one
	pub default_collection: String,

	/// Replication placement string used when a request does not specify one
	pub default_replication: String,

	// ========================================================================
	// CHUNKING & UPLOAD
	// ========================================================================
	/// Chunk size in bits (2^chunk_bits = default chunk size)
	pub chunk_bits: u32,

	/// Maximum chunk size factor (multiplied by 2^chunk_bits)
	pub max_chunk_size_factor: usize,

	/// Payloads at or under this many bytes are stored inline on the entry
	/// rather than as a chunk on a volume server.
	pub save_to_filer_limit: usize,

	/// Number of upload attempts per chunk before giving up
	pub upload_max_attempts: u32,

	/// Delay between failed upload attempts
	pub upload_retry_delay_ms: u64,

	/// Chunk count threshold above which an entry's chunk list is compacted
	/// into a manifest chunk.
	pub manifest_threshold: usize,

	// ========================================================================
	// DIRTY PAGE COALESCER
	// ========================================================================
	/// Bytes of buffered dirty pages per file before a flush is forced
	pub dirty_page_limit: usize,

	/// Maximum number of concurrent background flush writers (0 = unbounded)
	pub concurrent_writers: usize,

	// ========================================================================
	// DIRECTORY / BUCKET LAYOUT
	// ========================================================================
	/// Path under which top-level directories are treated as buckets
	pub dir_buckets_path: String,

	/// Bucket names that require fsync-like durability before acknowledging
	/// a write
	pub fsync_buckets: Vec<String>,

	// ========================================================================
	// TTL / EXPIRY
	// ========================================================================
	/// How often the background sweep checks for TTL-expired entries
	pub ttl_sweep_interval_secs: u64,

	// ========================================================================
	// REPLICATION
	// ========================================================================
	/// Meta-log collection name used when publishing to peers
	pub meta_log_collection: String,

	/// Meta-log replication placement string
	pub meta_log_replication: String,

	/// How often the local meta-log buffer is flushed even if not full
	pub meta_log_flush_interval_secs: u64,

	/// Peer filer addresses to aggregate metadata from
	pub peers: Vec<String>,

	/// This filer's own advertised address. Appended to `peers` if absent
	/// when resolving the peer set, and skipped when starting subscriptions
	/// so a filer never subscribes to itself. Empty means standalone.
	pub self_address: String,

	// ========================================================================
	// DELETION QUEUE
	// ========================================================================
	/// Number of background workers draining the deletion queue
	pub deletion_workers: usize,

	// ========================================================================
	// OUTPUT & LOGGING
	// ========================================================================
	/// Log level (trace, debug, info, warn, error)
	pub log_level: String,

	/// Log format
	pub log_format: LogFormat,
}

impl Default for FilerConfig {
	fn default() -> Self {
		FilerConfig {
			filer_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".filerd"))
				.unwrap_or_else(|| PathBuf::from(".filerd")),
			default_collection: String::new(),
			default_replication: String::new(),

			chunk_bits: 20, // ~1MB chunks
			max_chunk_size_factor: 16,
			save_to_filer_limit: 256 * 1024,
			upload_max_attempts: 3,
			upload_retry_delay_ms: 251,
			manifest_threshold: 1000,

			dirty_page_limit: 2 * 1024 * 1024,
			concurrent_writers: 0,

			dir_buckets_path: "/buckets".to_string(),
			fsync_buckets: vec![],

			ttl_sweep_interval_secs: 60,

			meta_log_collection: String::new(),
			meta_log_replication: String::new(),
			meta_log_flush_interval_secs: 60,
			peers: vec![],
			self_address: String::new(),

			deletion_workers: 4,

			log_level: "info".to_string(),
			log_format: LogFormat::Pretty,
		}
	}
}

impl FilerConfig {
	pub fn chunk_size(&self) -> usize {
		1usize << self.chunk_bits
	}

	pub fn max_chunk_size(&self) -> usize {
		self.chunk_size() * self.max_chunk_size_factor
	}

	pub fn validate(&self) -> Result<(), crate::error::FilerError> {
		if self.chunk_bits == 0 || self.chunk_bits > 30 {
			return Err(crate::error::FilerError::InvalidConfig {
				message: format!("chunk_bits out of range: {}", self.chunk_bits),
			});
		}
		if self.upload_max_attempts == 0 {
			return Err(crate::error::FilerError::InvalidConfig {
				message: "upload_max_attempts must be at least 1".to_string(),
			});
		}
		Ok(())
	}
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
	Json,
	#[default]
	Pretty,
	Compact,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_default() {
		let config = FilerConfig::default();
		assert_eq!(config.chunk_bits, 20);
		assert_eq!(config.chunk_size(), 1 << 20);
		assert_eq!(config.dir_buckets_path, "/buckets");
	}

	#[test]
	fn test_config_validate_rejects_zero_attempts() {
		let mut config = FilerConfig::default();
		config.upload_max_attempts = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_config_serialization_round_trip() {
		let config = FilerConfig::default();
		let json = serde_json::to_string(&config).expect("failed to serialize");
		let deserialized: FilerConfig = serde_json::from_str(&json).expect("failed to deserialize");
		assert_eq!(config.chunk_bits, deserialized.chunk_bits);
		assert_eq!(config.dir_buckets_path, deserialized.dir_buckets_path);
	}
}

// vim: ts=4
