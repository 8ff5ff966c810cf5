//! Coordination primitives for the supervisor loop.
//!
//! The [`shutdown`] module broadcasts a single shutdown signal to every waiting task. The
//! [`flag`] module polls the file-based shutdown and reload flags placed next to the data
//! file by operators. Both are only consulted between supervisor cycles, never while a
//! repair sequence is running.

pub mod flag;
pub mod shutdown;
