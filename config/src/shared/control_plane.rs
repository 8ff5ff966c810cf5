use secrecy::SecretString;
use serde::Deserialize;

/// Default port of the replication access server.
const fn default_port() -> u16 {
    10101
}

/// Connection settings for the replication control plane.
///
/// `url` addresses the scripting bridge, while `host`, `port` and the credentials are
/// forwarded by the bridge to the access server it fronts.
///
/// This intentionally does not implement `Serialize` so the password cannot leak.
#[derive(Clone, Debug, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base url of the scripting bridge, e.g. `http://localhost:8080`.
    pub url: String,
    /// Access server host name.
    pub host: String,
    /// Access server port.
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}
