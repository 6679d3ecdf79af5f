//! Error types for filer operations

use std::error::Error;
use std::fmt;
use std::io;

/// Helper function to reduce Box::new() boilerplate when wrapping errors into
/// `Box<dyn Error + Send + Sync>` for error variant fields.
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Unified error type for filer operations.
///
/// Direct variants cover the error kinds callers are expected to match on
/// (`not_found`, `already_exists`, ...); nested variants carry richer,
/// subsystem-specific detail.
#[derive(Debug)]
pub enum FilerError {
	/// No entry at the given path
	NotFound { path: String },

	/// Path component expected to be a directory is not one
	NotADirectory { path: String },

	/// Path expected to be a file is a directory
	IsADirectory { path: String },

	/// `o_excl` create collided with an existing entry
	AlreadyExists { path: String },

	/// K/V side-channel key was absent
	KvNotFound { key: String },

	/// The requested operation is not supported
	Unsupported { message: String },

	/// Operation was canceled by the caller
	Canceled,

	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Backing store error (nested)
	Store(StoreError),

	/// Chunk upload pipeline error (nested)
	Upload(UploadError),

	/// Meta-log replication error (nested)
	Replication(ReplicationError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for FilerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FilerError::NotFound { path } => write!(f, "not found: {}", path),
			FilerError::NotADirectory { path } => write!(f, "not a directory: {}", path),
			FilerError::IsADirectory { path } => write!(f, "is a directory: {}", path),
			FilerError::AlreadyExists { path } => write!(f, "already exists: {}", path),
			FilerError::KvNotFound { key } => write!(f, "kv key not found: {}", key),
			FilerError::Unsupported { message } => write!(f, "unsupported: {}", message),
			FilerError::Canceled => write!(f, "operation canceled"),
			FilerError::Io(e) => write!(f, "I/O error: {}", e),
			FilerError::InvalidConfig { message } => write!(f, "invalid configuration: {}", message),
			FilerError::Store(e) => write!(f, "store error: {}", e),
			FilerError::Upload(e) => write!(f, "upload error: {}", e),
			FilerError::Replication(e) => write!(f, "replication error: {}", e),
			FilerError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for FilerError {}

impl FilerError {
	/// The error kind as named in the external interface contract (`not_found`,
	/// `store_failed`, ...), independent of the human-readable message.
	pub fn kind(&self) -> &'static str {
		match self {
			FilerError::NotFound { .. } => "not_found",
			FilerError::NotADirectory { .. } => "not_a_directory",
			FilerError::IsADirectory { .. } => "is_a_directory",
			FilerError::AlreadyExists { .. } => "already_exists",
			FilerError::KvNotFound { .. } => "kv_not_found",
			FilerError::Unsupported { .. } => "unsupported",
			FilerError::Canceled => "canceled",
			FilerError::Upload(_) => "upload_failed",
			FilerError::Store(_) => "store_failed",
			_ => "error",
		}
	}

	pub fn not_found(path: impl Into<String>) -> Self {
		FilerError::NotFound { path: path.into() }
	}
}

impl From<io::Error> for FilerError {
	fn from(e: io::Error) -> Self {
		FilerError::Io(e)
	}
}

impl From<String> for FilerError {
	fn from(e: String) -> Self {
		FilerError::Other { message: e }
	}
}

impl From<StoreError> for FilerError {
	fn from(e: StoreError) -> Self {
		FilerError::Store(e)
	}
}

impl From<UploadError> for FilerError {
	fn from(e: UploadError) -> Self {
		FilerError::Upload(e)
	}
}

impl From<ReplicationError> for FilerError {
	fn from(e: ReplicationError) -> Self {
		FilerError::Replication(e)
	}
}

impl From<Box<dyn Error + Send + Sync>> for FilerError {
	fn from(e: Box<dyn Error + Send + Sync>) -> Self {
		FilerError::Other { message: e.to_string() }
	}
}

/// Backing-store specific errors
#[derive(Debug)]
pub enum StoreError {
	/// The underlying transaction/database engine reported an error
	Backend { source: Box<dyn Error + Send + Sync> },

	/// A transaction was used outside its begin/commit scope
	NoActiveTransaction,

	/// Attempted to commit or rollback twice
	TransactionAlreadyClosed,

	/// The store was asked for a capability it does not implement
	CapabilityUnavailable { what: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Backend { source } => write!(f, "backend error: {}", source),
			StoreError::NoActiveTransaction => write!(f, "no active transaction"),
			StoreError::TransactionAlreadyClosed => write!(f, "transaction already closed"),
			StoreError::CapabilityUnavailable { what } => {
				write!(f, "store does not support {}", what)
			}
		}
	}
}

impl Error for StoreError {}

/// Chunked upload pipeline errors
#[derive(Debug)]
pub enum UploadError {
	/// Reading the request body failed
	ReadFailed { source: io::Error },

	/// The volume client could not assign a file-id
	AssignFailed { message: String },

	/// All retry attempts to upload a chunk failed
	UploadRetriesExhausted { attempts: u32, last_error: String },

	/// Response from the volume server carried an unexpected size
	SizeMismatch { expected: u64, actual: u64 },
}

impl fmt::Display for UploadError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			UploadError::ReadFailed { source } => write!(f, "read input: {}", source),
			UploadError::AssignFailed { message } => write!(f, "failed to assign volume: {}", message),
			UploadError::UploadRetriesExhausted { attempts, last_error } => {
				write!(f, "upload failed after {} attempts: {}", attempts, last_error)
			}
			UploadError::SizeMismatch { expected, actual } => {
				write!(f, "uploaded size mismatch: expected {}, got {}", expected, actual)
			}
		}
	}
}

impl Error for UploadError {}

impl From<io::Error> for UploadError {
	fn from(e: io::Error) -> Self {
		UploadError::ReadFailed { source: e }
	}
}

/// Meta-log replication errors
#[derive(Debug)]
pub enum ReplicationError {
	/// Peer stream disconnected
	PeerDisconnected { peer: String },

	/// Event could not be replayed into the local store
	ReplayFailed { source: Box<dyn Error + Send + Sync> },

	/// Local store_id could not be loaded or persisted at boot
	SignatureBootFailed { message: String },
}

impl fmt::Display for ReplicationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReplicationError::PeerDisconnected { peer } => write!(f, "peer disconnected: {}", peer),
			ReplicationError::ReplayFailed { source } => write!(f, "replay failed: {}", source),
			ReplicationError::SignatureBootFailed { message } => {
				write!(f, "failed to establish store signature: {}", message)
			}
		}
	}
}

impl Error for ReplicationError {}

// vim: ts=4
