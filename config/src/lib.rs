//! Configuration model and loading for the subscription auto-repair service.
//!
//! The [`shared`] module holds the serde types describing datastores, subscriptions and
//! service tunables. [`load_config`] and [`load_config_from`] merge the base file, the
//! environment-specific file and `APP_`-prefixed environment variables into one of them.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
