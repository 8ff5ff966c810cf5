mod autosub;
mod base;
mod control_plane;
mod engine;
mod globals;
mod subscription;

pub use autosub::AutosubConfig;
pub use base::ValidationError;
pub use control_plane::ControlPlaneConfig;
pub use engine::{CommandTemplates, EngineConfig, EngineRole};
pub use globals::GlobalsConfig;
pub use subscription::{RefreshMode, SubscriptionConfig};
