//! # filerd-core - distributed filesystem metadata service
//!
//! A storage-backend-agnostic filer: a tree of `Entry` metadata records
//! backed by a pluggable key/value store, with content chunked across a
//! volume layer addressed through a master, and metadata changes fanned out
//! to peer filers through an append-only meta-log.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use filerd_core::config::FilerConfig;
//! use filerd_core::filer::Filer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FilerConfig::default();
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod cancel;
pub mod chunking;
pub mod config;
pub mod deletion_queue;
pub mod dirty_pages;
pub mod entry;
pub mod error;
pub mod filer;
pub mod logging;
pub mod master_client;
pub mod metalog;
pub mod store;
pub mod upload;
pub mod util;

pub use cancel::CancellationContext;
pub use config::FilerConfig;
pub use entry::{root_entry, Attr, Entry, FileChunk, MODE_DIR};
pub use error::{FilerError, ReplicationError, StoreError, UploadError};
pub use filer::Filer;
pub use store::{FilerStore, PathTranslator, RedbFilerStore, TransactionId};

// vim: ts=4
