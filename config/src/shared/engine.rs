use std::fmt;

use serde::{Deserialize, Serialize};

const DEFAULT_VERSION_COMMAND: &str = "${RSH} ${CDC_HOME}/bin/dmshowversion -I ${INSTANCE}";
const DEFAULT_EVENTS_COMMAND: &str = "${RSH} ${CDC_HOME}/bin/dmshowevents -I ${INSTANCE} -a -c 1";
const DEFAULT_CLEAR_STAGING_COMMAND: &str =
    "${RSH} ${CDC_HOME}/bin/dmclearstagingstore -I ${INSTANCE}";
const DEFAULT_BOOKMARK_GET_COMMAND: &str =
    "${RSH} ${CDC_HOME}/bin/dmshowbookmark -I ${INSTANCE} -s ${SUB}";
const DEFAULT_BOOKMARK_PUT_COMMAND: &str =
    "${RSH} ${CDC_HOME}/bin/dmsetbookmark -I ${INSTANCE} -s ${SUB} -l ${BOOKMARK}";
const DEFAULT_READD_TABLE_COMMAND: &str =
    "${RSH} ${CDC_HOME}/bin/dmreaddtable -I ${INSTANCE} -t ${TABLE}";

/// Role a datastore plays in replication.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    #[serde(alias = "Source", alias = "SOURCE")]
    Source,
    #[serde(alias = "Target", alias = "TARGET")]
    Target,
    /// Both a source and a target.
    #[serde(alias = "Dual", alias = "both", alias = "Both", alias = "BOTH")]
    Dual,
}

impl EngineRole {
    pub fn is_source(&self) -> bool {
        matches!(self, EngineRole::Source | EngineRole::Dual)
    }

    pub fn is_target(&self) -> bool {
        matches!(self, EngineRole::Target | EngineRole::Dual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineRole::Source => "source",
            EngineRole::Target => "target",
            EngineRole::Dual => "dual",
        }
    }
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External tool command lines with `${TOKEN}` placeholders.
///
/// Any template left unset falls back to the stock command of the replication engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplates {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub events: Option<String>,
    #[serde(default)]
    pub clear_staging: Option<String>,
    #[serde(default)]
    pub bookmark_get: Option<String>,
    #[serde(default)]
    pub bookmark_put: Option<String>,
    #[serde(default)]
    pub readd_table: Option<String>,
}

impl CommandTemplates {
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION_COMMAND)
    }

    pub fn events(&self) -> &str {
        self.events.as_deref().unwrap_or(DEFAULT_EVENTS_COMMAND)
    }

    pub fn clear_staging(&self) -> &str {
        self.clear_staging
            .as_deref()
            .unwrap_or(DEFAULT_CLEAR_STAGING_COMMAND)
    }

    pub fn bookmark_get(&self) -> &str {
        self.bookmark_get
            .as_deref()
            .unwrap_or(DEFAULT_BOOKMARK_GET_COMMAND)
    }

    pub fn bookmark_put(&self) -> &str {
        self.bookmark_put
            .as_deref()
            .unwrap_or(DEFAULT_BOOKMARK_PUT_COMMAND)
    }

    pub fn readd_table(&self) -> &str {
        self.readd_table
            .as_deref()
            .unwrap_or(DEFAULT_READD_TABLE_COMMAND)
    }
}

/// A replication datastore endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Datastore name as registered in the control plane.
    pub name: String,
    pub role: EngineRole,
    /// Remote execution prefix substituted for `${RSH}`, e.g. `ssh cdc@host`.
    #[serde(default)]
    pub remote_exec: String,
    /// Engine installation directory substituted for `${CDC_HOME}`.
    #[serde(default)]
    pub install_dir: String,
    /// Engine instance name substituted for `${INSTANCE}`.
    #[serde(default)]
    pub instance: String,
    /// Pins DDL awareness instead of deriving it from the version probe.
    #[serde(default)]
    pub ddl_aware: Option<bool>,
    #[serde(default)]
    pub commands: CommandTemplates,
}
