//! Shared types, adapter traits, and core utilities for podsync.
//!
//! The request scheduler and every storage adapter depend on this crate, so
//! adapters can be built without pulling in the scheduler itself.

pub mod error;
pub mod prelude;
pub mod request_adapter;
pub mod types;

/// Lock a `std::sync::Mutex`, turning poisoning into `Error::Internal`.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal("mutex poisoned".to_string()))
	};
}

// vim: ts=4
