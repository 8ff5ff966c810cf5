use config::shared::ControlPlaneConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::autosub_error;
use crate::control::base::{
    ControlPlane, ControlPlaneConnector, RESULT_ALREADY_CONNECTED, RESULT_OK, ResultTable,
    ScriptOutput, ScriptResponse,
};
use crate::error::{AutosubResult, ErrorKind};

#[derive(Serialize)]
struct OpenSessionRequest<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session: String,
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireResult {
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Value {
        value: String,
    },
}

#[derive(Deserialize)]
struct ExecuteResponse {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Option<WireResult>,
}

impl From<ExecuteResponse> for ScriptResponse {
    fn from(response: ExecuteResponse) -> Self {
        let output = match response.result {
            Some(WireResult::Table { columns, rows }) => {
                ScriptOutput::Table(ResultTable::new(columns, rows))
            }
            Some(WireResult::Value { value }) => ScriptOutput::Value(value),
            None => ScriptOutput::Empty,
        };

        ScriptResponse {
            code: response.code,
            message: response.message,
            output,
        }
    }
}

/// Opens sessions through the HTTP scripting bridge in front of the access server.
#[derive(Debug, Clone)]
pub struct HttpControlPlaneConnector {
    client: Client,
    config: ControlPlaneConfig,
}

impl HttpControlPlaneConnector {
    pub fn new(config: ControlPlaneConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }
}

impl ControlPlaneConnector for HttpControlPlaneConnector {
    type Session = HttpControlPlane;

    async fn connect(&self) -> AutosubResult<HttpControlPlane> {
        let request = OpenSessionRequest {
            host: &self.config.host,
            port: self.config.port,
            username: &self.config.username,
            password: self.config.password.expose_secret(),
        };

        let response: OpenSessionResponse = self
            .client
            .post(format!("{}/v1/sessions", self.base_url()))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.code != RESULT_OK && response.code != RESULT_ALREADY_CONNECTED {
            return Err(autosub_error!(
                ErrorKind::ConnectionFailed,
                "Access server refused the connection",
                format!("{}: {}", response.code, response.message)
            ));
        }

        debug!(session = %response.session, "control plane session opened");

        Ok(HttpControlPlane {
            client: self.client.clone(),
            session_url: format!("{}/v1/sessions/{}", self.base_url(), response.session),
            closed: false,
        })
    }
}

/// A session of the HTTP scripting bridge.
#[derive(Debug)]
pub struct HttpControlPlane {
    client: Client,
    session_url: String,
    closed: bool,
}

impl ControlPlane for HttpControlPlane {
    async fn execute(&mut self, command: &str) -> AutosubResult<ScriptResponse> {
        if self.closed {
            return Err(autosub_error!(
                ErrorKind::InvalidState,
                "Control plane session is closed"
            ));
        }

        let response: ExecuteResponse = self
            .client
            .post(format!("{}/execute", self.session_url))
            .json(&ExecuteRequest { command })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.into())
    }

    async fn close(&mut self) -> AutosubResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(err) = self
            .client
            .delete(&self.session_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
        {
            warn!(error = %err, "failed to close control plane session");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_results_are_decoded() {
        let response: ExecuteResponse = serde_json::from_str(
            r#"{"code": 0, "message": "", "result": {"type": "table", "columns": ["EVENT ID"], "rows": [["9505"], ["1463"]]}}"#,
        )
        .unwrap();
        let response = ScriptResponse::from(response);

        assert!(response.is_ok());
        let ScriptOutput::Table(table) = response.output else {
            panic!("expected a table");
        };
        assert_eq!(table.value(1, "event id"), Some("1463"));
    }

    #[test]
    fn rejected_commands_keep_code_and_message() {
        let response: ExecuteResponse = serde_json::from_str(
            r#"{"code": 2003, "message": "Subscription is locked", "result": null}"#,
        )
        .unwrap();
        let response = ScriptResponse::from(response);

        assert_eq!(response.code, 2003);
        assert_eq!(response.message, "Subscription is locked");
        assert_eq!(response.output, ScriptOutput::Empty);
    }
}
