//! Resource locking: file-backed store plus the manager API over it.
//!
//! No component outside this module touches the lock directory's
//! representation; everything goes through `LockManager`, including the
//! read-only `inspect` query.

pub mod manager;
pub mod store;

pub use manager::{LockManager, LockToken};
pub use store::{LockRecord, LockStore, ReadState};
