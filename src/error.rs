//! Domain Errors
//!
//! Rejections and transport failures raised by the registries and the
//! transport layer. Startup failures (bind, config) propagate as
//! `anyhow::Error` instead; an empty healthy set is `None` from `select`,
//! not an error. Nothing here is retried.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// Admission or assignment over a configured limit; non-fatal, counted
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The id is already live; the existing record is left untouched
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    /// The named connection or server does not exist
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Socket-level failure; the connection is forced closed
    #[error("transport error: {0}")]
    Transport(String),
}
