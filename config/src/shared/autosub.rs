use std::collections::HashSet;

use serde::Deserialize;

use crate::load::Config;
use crate::shared::{
    ControlPlaneConfig, EngineConfig, GlobalsConfig, SubscriptionConfig, ValidationError,
};

/// Root configuration of the auto-repair service.
#[derive(Clone, Debug, Deserialize)]
pub struct AutosubConfig {
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub globals: GlobalsConfig,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl AutosubConfig {
    /// Returns the engine named `name`, compared case-insensitively.
    pub fn engine(&self, name: &str) -> Option<&EngineConfig> {
        self.engines
            .iter()
            .find(|engine| engine.name.eq_ignore_ascii_case(name))
    }

    /// Checks naming and cross references between engines and subscriptions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.globals.poll_period_ms == 0 {
            return Err(ValidationError::PollPeriodZero);
        }

        let mut engine_names = HashSet::new();
        for engine in &self.engines {
            if engine.name.trim().is_empty() {
                return Err(ValidationError::BlankName);
            }
            if !engine_names.insert(engine.name.to_uppercase()) {
                return Err(ValidationError::DuplicateEngine(engine.name.clone()));
            }
        }

        let mut subscription_names = HashSet::new();
        for subscription in &self.subscriptions {
            if subscription.name.trim().is_empty() {
                return Err(ValidationError::BlankName);
            }
            if !subscription_names.insert(subscription.name.to_uppercase()) {
                return Err(ValidationError::DuplicateSubscription(
                    subscription.name.clone(),
                ));
            }

            let source = self.referenced_engine(subscription, &subscription.source)?;
            if !source.role.is_source() {
                return Err(ValidationError::RoleMismatch {
                    subscription: subscription.name.clone(),
                    engine: source.name.clone(),
                    expected: "source",
                });
            }

            let target = self.referenced_engine(subscription, &subscription.target)?;
            if !target.role.is_target() {
                return Err(ValidationError::RoleMismatch {
                    subscription: subscription.name.clone(),
                    engine: target.name.clone(),
                    expected: "target",
                });
            }
        }

        Ok(())
    }

    fn referenced_engine(
        &self,
        subscription: &SubscriptionConfig,
        name: &str,
    ) -> Result<&EngineConfig, ValidationError> {
        self.engine(name)
            .ok_or_else(|| ValidationError::UnknownEngine {
                subscription: subscription.name.clone(),
                engine: name.to_string(),
            })
    }
}

impl Config for AutosubConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
