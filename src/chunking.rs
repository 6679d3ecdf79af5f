//! Chunk sizing configuration shared by the upload pipeline and the dirty
//! page coalescer.
#![allow(dead_code)]

/// Chunk size in bits (2^20 = ~1MB average chunks)
pub const CHUNK_BITS: u32 = 20;

/// Maximum chunk size factor (multiplied by 2^CHUNK_BITS)
pub const MAX_CHUNK_SIZE_FACTOR: usize = 16;

/// Maximum chunk size in bytes
pub const MAX_CHUNK_SIZE: usize = (1 << CHUNK_BITS) * MAX_CHUNK_SIZE_FACTOR;

/// Default chunk bits, exposed as its own name for call sites that build a
/// `ChunkConfig` without reading it off `FilerConfig`.
pub const DEFAULT_CHUNK_BITS: u32 = CHUNK_BITS;

/// Chunking configuration used by a single upload or dirty-page session.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
	/// Target chunk size in bits
	pub chunk_bits: u32,

	/// Maximum chunk size in bytes
	pub max_chunk_size: usize,

	/// Payloads at or under this size are stored inline rather than chunked
	pub save_to_filer_limit: usize,

	/// Chunk count above which a chunk list is compacted into a manifest
	/// chunk by the upload commit step. 0 disables manifest compaction.
	pub manifest_threshold: usize,
}

impl Default for ChunkConfig {
	fn default() -> Self {
		ChunkConfig {
			chunk_bits: DEFAULT_CHUNK_BITS,
			max_chunk_size: (1 << DEFAULT_CHUNK_BITS) * MAX_CHUNK_SIZE_FACTOR,
			save_to_filer_limit: 256 * 1024,
			manifest_threshold: 1000,
		}
	}
}

impl ChunkConfig {
	pub fn new(chunk_bits: u32) -> Self {
		ChunkConfig {
			chunk_bits,
			max_chunk_size: (1 << chunk_bits) * MAX_CHUNK_SIZE_FACTOR,
			save_to_filer_limit: 256 * 1024,
			manifest_threshold: 1000,
		}
	}

	pub fn from_filer_config(config: &crate::config::FilerConfig) -> Self {
		ChunkConfig {
			chunk_bits: config.chunk_bits,
			max_chunk_size: config.max_chunk_size(),
			save_to_filer_limit: config.save_to_filer_limit,
			manifest_threshold: config.manifest_threshold,
		}
	}

	pub fn chunk_size(&self) -> usize {
		1usize << self.chunk_bits
	}

	pub fn validate(&self) -> Result<(), String> {
		if self.chunk_bits == 0 || self.chunk_bits > 32 {
			return Err("chunk_bits must be between 1 and 32".to_string());
		}
		if self.max_chunk_size < self.chunk_size() {
			return Err("max_chunk_size must be >= chunk_size".to_string());
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn default_chunk_size_is_one_mebibyte() {
		let cfg = ChunkConfig::default();
		assert_eq!(cfg.chunk_size(), 1 << 20);
	}

	#[test]
	fn validate_rejects_zero_bits() {
		let cfg = ChunkConfig::new(0);
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn from_filer_config_carries_inline_limit() {
		let fc = crate::config::FilerConfig::default();
		let cc = ChunkConfig::from_filer_config(&fc);
		assert_eq!(cc.save_to_filer_limit, fc.save_to_filer_limit);
	}
}

// vim: ts=4
