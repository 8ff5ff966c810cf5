//! Detection and repair of change data capture subscriptions stopped by source table
//! definition changes.
//!
//! The [`supervisor::Supervisor`] periodically runs the [`checker::FailureChecker`] for every
//! source datastore. Failed subscriptions are diagnosed from their event log, the tables
//! that can be repaired without breaking sibling subscriptions are selected, and once the
//! pending state is confirmed stable the [`repair::Repairman`] stops the subscriptions of
//! the source, clears its staging store, re-adds the tables, remaps the columns and starts
//! everything again.

mod macros;

pub mod checker;
pub mod concurrency;
pub mod control;
pub mod error;
pub mod model;
pub mod repair;
pub mod report;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tool;
pub mod validator;
