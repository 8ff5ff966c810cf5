//! Engines, subscriptions and the runtime monitor topology.

pub mod engine;
pub mod latch;
pub mod monitor;
pub mod signature;
pub mod subscription;
pub mod topology;

pub use engine::{Engine, EngineRegistry};
pub use latch::ReportLatch;
pub use monitor::{ColumnState, Monitor, RepairMode};
pub use signature::ChangeSignature;
pub use subscription::Subscription;
pub use topology::{SourceGroup, TargetGroup, Topology};
