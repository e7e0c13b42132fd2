use std::io;

use thiserror::Error;

/// Failures surfaced by the fallible allocator entry points.
///
/// The allocation APIs communicate failure through null pointers; only
/// `init`, `protect`, and their global wrappers carry a typed error.
#[derive(Debug, Error)]
pub enum AllocatorError {
  #[error("allocator is already initialized")]
  AlreadyInitialized,

  #[error("allocator is not initialized")]
  Uninitialized,

  #[error("invalid argument")]
  InvalidArgument,

  #[error("mapping pages from the OS failed: {0}")]
  MapFailed(#[source] io::Error),

  #[error("changing page protection failed: {0}")]
  ProtectFailed(#[source] io::Error),

  #[error("pointer does not belong to a live allocation")]
  UnknownPointer,
}
