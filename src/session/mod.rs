//! Session Admission and Tracking
//!
//! The session registry decides which transport connections are admitted
//! and tracks their lifetime: authentication, activity, byte accounting,
//! and idle eviction. All registry operations are synchronous and never
//! suspend; the lock is only held for map mutation.

pub mod manager;

pub use manager::{ConnectionManager, ConnectionRecord, SessionStats};
