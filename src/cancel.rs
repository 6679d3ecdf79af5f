//! Cooperative cancellation context.
//!
//! Every call that may suspend on a store, a volume server or a peer stream
//! accepts a `CancellationContext`. Closing it cancels in-flight work that
//! shares it and causes the call to return `FilerError::Canceled` rather than
//! whatever partial result it had. This crate has no `tokio_util` dependency,
//! so the context is a small owned type built on an `Arc<AtomicBool>` rather
//! than a runtime-provided token.

use crate::error::FilerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancellationContext(Arc<AtomicBool>);

impl CancellationContext {
	pub fn new() -> Self {
		CancellationContext(Arc::new(AtomicBool::new(false)))
	}

	/// A context that is never canceled, for call sites with no cancellation
	/// signal of their own to thread through (background workers, tests).
	pub fn uncancelable() -> Self {
		CancellationContext::new()
	}

	/// Cancel this context. Every clone sharing the same underlying flag
	/// observes the cancellation.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_canceled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}

	/// Check the context, returning `Canceled` if it has been closed. Call
	/// sites that accept a context call this before (and, for long loops,
	/// periodically during) their work.
	pub fn check(&self) -> Result<(), FilerError> {
		if self.is_canceled() {
			Err(FilerError::Canceled)
		} else {
			Ok(())
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn fresh_context_is_not_canceled() {
		let ctx = CancellationContext::new();
		assert!(ctx.check().is_ok());
	}

	#[test]
	fn cancel_is_visible_through_clones() {
		let ctx = CancellationContext::new();
		let clone = ctx.clone();
		clone.cancel();
		assert_eq!(ctx.check().unwrap_err().kind(), "canceled");
	}
}

// vim: ts=4
