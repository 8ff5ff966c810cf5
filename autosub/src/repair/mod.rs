//! Repair of the subscriptions stopped by a table definition change.

mod repairman;

pub use repairman::{RepairOutcome, Repairman, is_bookmark, is_large_object};
