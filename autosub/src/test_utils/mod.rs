//! Fakes and builders for testing the reconciliation engine without a replication control
//! plane or engine tools.
//!
//! - [`control_plane`] simulates datastores and subscriptions behind the textual command
//!   interface and records the transcript.
//! - [`tool_runner`] records external tool runs and returns configured exit codes.
//! - [`topology`] builds engines, subscriptions, enabled topologies and test tunables.

pub mod control_plane;
pub mod tool_runner;
pub mod topology;
