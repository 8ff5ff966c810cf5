use std::collections::BTreeMap;

use config::shared::{CommandTemplates, EngineConfig, EngineRole};

/// Substitution token for the remote execution prefix.
pub const TOKEN_RSH: &str = "RSH";
/// Substitution token for the engine installation directory.
pub const TOKEN_CDC_HOME: &str = "CDC_HOME";
/// Substitution token for the engine instance name.
pub const TOKEN_INSTANCE: &str = "INSTANCE";

fn token(name: &str) -> String {
    format!("${{{name}}}")
}

/// Normalizes a datastore name the way the control plane reports it.
pub fn normalize_datastore_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// A replication datastore endpoint together with the state derived during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    name: String,
    role: EngineRole,
    remote_exec: String,
    install_dir: String,
    instance: String,
    commands: CommandTemplates,
    pinned_ddl_aware: Option<bool>,
    enabled: bool,
    ddl_aware: bool,
}

impl Engine {
    /// Builds a disabled engine from its configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            name: normalize_datastore_name(&config.name),
            role: config.role,
            remote_exec: config.remote_exec.clone(),
            install_dir: config.install_dir.clone(),
            instance: config.instance.clone(),
            commands: config.commands.clone(),
            pinned_ddl_aware: config.ddl_aware,
            enabled: false,
            ddl_aware: config.ddl_aware.unwrap_or(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> EngineRole {
        self.role
    }

    pub fn commands(&self) -> &CommandTemplates {
        &self.commands
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_ddl_aware(&self) -> bool {
        self.ddl_aware
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Records DDL awareness derived from the version probe, unless the configuration pins it.
    pub fn derive_ddl_aware(&mut self, probed: bool) {
        self.ddl_aware = self.pinned_ddl_aware.unwrap_or(probed);
    }

    /// Expands the engine tokens of a command template.
    ///
    /// Engine tokens are expanded in the template text before it is split into arguments, so
    /// a remote execution prefix such as `ssh cdc@db1` yields several arguments.
    pub fn expand_command(&self, template: &str) -> String {
        template
            .replace(&token(TOKEN_RSH), &self.remote_exec)
            .replace(&token(TOKEN_CDC_HOME), &self.install_dir)
            .replace(&token(TOKEN_INSTANCE), &self.instance)
    }
}

/// All engines of one configuration generation, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Engine>,
}

impl EngineRegistry {
    pub fn new<'a>(configs: impl IntoIterator<Item = &'a EngineConfig>) -> Self {
        let engines = configs
            .into_iter()
            .map(|config| {
                let engine = Engine::new(config);
                (engine.name.clone(), engine)
            })
            .collect();

        Self { engines }
    }

    pub fn insert(&mut self, engine: Engine) {
        self.engines.insert(engine.name.clone(), engine);
    }

    pub fn get(&self, name: &str) -> Option<&Engine> {
        self.engines.get(&normalize_datastore_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Engine> {
        self.engines.get_mut(&normalize_datastore_name(name))
    }

    /// Returns `true` when the named engine exists and is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(Engine::is_enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Engine> {
        self.engines.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Engine> {
        self.engines.values_mut()
    }
}
