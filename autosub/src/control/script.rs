use std::collections::BTreeSet;

use config::shared::EngineRole;
use tracing::debug;

use crate::autosub_error;
use crate::control::base::{ControlPlane, ResultTable, ScriptOutput};
use crate::error::{AutosubResult, ErrorKind};
use crate::model::engine::normalize_datastore_name;
use crate::report::{RecoveryReport, ReportCategory};

/// Replication state of a healthy subscription.
pub const STATE_MIRROR_CONTINUOUS: &str = "Mirror Continuous";

/// Replication state of a subscription stopped by an error.
pub const STATE_FAILED: &str = "Failed";

const COLUMN_SUBSCRIPTION: &str = "SUBSCRIPTION";
const COLUMN_STATE: &str = "STATE";
const COLUMN_TARGET_DATASTORE: &str = "TARGET DATASTORE";
const COLUMN_EVENT_ID: &str = "EVENT ID";
const COLUMN_SOURCE_TABLE: &str = "SOURCE TABLE";
const COLUMN_SOURCE_COLUMN: &str = "SOURCE COLUMN";
const COLUMN_REPLICATE: &str = "REPLICATE";
const COLUMN_DATA_TYPE: &str = "DATA TYPE";

/// One row of `monitor replication`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationStatus {
    pub subscription: String,
    pub state: String,
    pub target: String,
}

impl ReplicationStatus {
    pub fn is_mirroring(&self) -> bool {
        self.state.eq_ignore_ascii_case(STATE_MIRROR_CONTINUOUS)
    }

    pub fn is_failed(&self) -> bool {
        self.state.eq_ignore_ascii_case(STATE_FAILED)
    }
}

/// One row of `list source columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    pub data_type: String,
    pub replicated: bool,
}

/// Splits `schema.table` into its parts. A name without a dot has an empty schema.
pub fn split_table_name(full_name: &str) -> (&str, &str) {
    match full_name.rsplit_once('.') {
        Some((schema, table)) => {
            let schema = schema.split('.').next().unwrap_or(schema);
            (schema, table)
        }
        None => ("", full_name),
    }
}

/// Command-level wrapper over a control plane session.
///
/// Tracks which datastores are connected and which ones are the current source and target
/// context, turns rejected commands into [`ErrorKind::ScriptExecutionFailed`] errors and
/// records every exchange into the recovery report.
#[derive(Debug)]
pub struct Script<C> {
    session: C,
    report: RecoveryReport,
    connected: BTreeSet<String>,
    current_source: Option<String>,
    current_target: Option<String>,
}

impl<C> Script<C>
where
    C: ControlPlane,
{
    pub fn new(session: C, report: RecoveryReport) -> Self {
        Self {
            session,
            report,
            connected: BTreeSet::new(),
            current_source: None,
            current_target: None,
        }
    }

    pub fn session(&self) -> &C {
        &self.session
    }

    pub fn current_source(&self) -> Option<&str> {
        self.current_source.as_deref()
    }

    pub fn current_target(&self) -> Option<&str> {
        self.current_target.as_deref()
    }

    /// Closes the underlying session.
    pub async fn close(mut self) -> AutosubResult<()> {
        self.session.close().await
    }

    /// Runs a command and fails if the control plane rejects it.
    pub async fn execute(&mut self, command: &str) -> AutosubResult<ScriptOutput> {
        debug!(command, "control plane command");
        self.report.record(ReportCategory::Command, command);

        let response = self.session.execute(command).await?;
        if !response.is_ok() {
            let detail = format!("{}: {}", response.code, response.message);
            debug!(command, detail = %detail, "control plane command rejected");
            self.report.record(ReportCategory::CommandError, &detail);

            return Err(autosub_error!(
                ErrorKind::ScriptExecutionFailed,
                "Control plane rejected the command",
                detail
            ));
        }

        Ok(response.output)
    }

    /// Runs a command expected to produce a table.
    pub async fn table(&mut self, command: &str) -> AutosubResult<ResultTable> {
        match self.execute(command).await? {
            ScriptOutput::Table(table) => Ok(table),
            other => Err(autosub_error!(
                ErrorKind::InvalidState,
                "Control plane returned no table",
                format!("command `{command}` returned {other:?}")
            )),
        }
    }

    /// Makes `name` the current datastore in the given context, connecting it on first use.
    ///
    /// [`EngineRole::Dual`] selects the datastore as both source and target.
    pub async fn select_datastore(&mut self, name: &str, role: EngineRole) -> AutosubResult<()> {
        let name = normalize_datastore_name(name);
        let connected = self.connected.contains(&name);

        let command = match role {
            EngineRole::Source => {
                let other_context = self.current_target.as_deref() == Some(name.as_str());
                datastore_command(&name, connected, Some("source"), other_context)
            }
            EngineRole::Target => {
                let other_context = self.current_source.as_deref() == Some(name.as_str());
                datastore_command(&name, connected, Some("target"), other_context)
            }
            EngineRole::Dual => datastore_command(&name, connected, None, false),
        };
        self.execute(&command).await?;
        self.connected.insert(name.clone());

        match role {
            EngineRole::Source => self.current_source = Some(name),
            EngineRole::Target => self.current_target = Some(name),
            EngineRole::Dual => {
                self.current_source = Some(name.clone());
                self.current_target = Some(name);
            }
        }

        Ok(())
    }

    pub async fn monitor_replication(&mut self) -> AutosubResult<Vec<ReplicationStatus>> {
        let table = self.table("monitor replication;").await?;
        let statuses = (0..table.row_count())
            .map(|row| ReplicationStatus {
                subscription: cell(&table, row, COLUMN_SUBSCRIPTION),
                state: cell(&table, row, COLUMN_STATE),
                target: cell(&table, row, COLUMN_TARGET_DATASTORE),
            })
            .collect();

        Ok(statuses)
    }

    pub async fn select_subscription(&mut self, subscription: &str) -> AutosubResult<()> {
        self.execute(&format!("select subscription name \"{subscription}\";"))
            .await
            .map(|_| ())
    }

    /// Returns the ids of the source-side events of `subscription`, as ordered by the control plane.
    pub async fn list_subscription_events(
        &mut self,
        subscription: &str,
    ) -> AutosubResult<Vec<String>> {
        let table = self
            .table(&format!(
                "list subscription events name \"{subscription}\" type source;"
            ))
            .await?;

        Ok((0..table.row_count())
            .map(|row| cell(&table, row, COLUMN_EVENT_ID))
            .collect())
    }

    /// Returns the message text of the event at `index` in the last listed events.
    pub async fn subscription_event_text(&mut self, index: usize) -> AutosubResult<String> {
        let table = self
            .table(&format!(
                "show subscription event details row {} ;",
                index + 1
            ))
            .await?;

        table.value_at(1, 1).map(str::to_string).ok_or_else(|| {
            autosub_error!(
                ErrorKind::InvalidState,
                "Event details have no message text",
                format!("event row {}", index + 1)
            )
        })
    }

    /// Lists the source tables mapped by the selected subscription.
    pub async fn list_table_mappings(&mut self) -> AutosubResult<Vec<String>> {
        let table = self.table("list table mappings;").await?;
        Ok((0..table.row_count())
            .map(|row| cell(&table, row, COLUMN_SOURCE_TABLE))
            .collect())
    }

    /// Selects the mapping of the schema-qualified source table `full_name`.
    pub async fn select_table_mapping(&mut self, full_name: &str) -> AutosubResult<()> {
        let (schema, table) = split_table_name(full_name);
        self.execute(&format!(
            "select table mapping sourceSchema \"{schema}\" sourceTable \"{table}\";"
        ))
        .await
        .map(|_| ())
    }

    pub async fn list_source_columns(&mut self) -> AutosubResult<Vec<SourceColumn>> {
        let table = self.table("list source columns;").await?;
        Ok((0..table.row_count())
            .map(|row| SourceColumn {
                name: cell(&table, row, COLUMN_SOURCE_COLUMN),
                data_type: cell(&table, row, COLUMN_DATA_TYPE),
                replicated: cell(&table, row, COLUMN_REPLICATE).eq_ignore_ascii_case("yes"),
            })
            .collect())
    }

    pub async fn filter_source_column(&mut self, column: &str, replicate: bool) -> AutosubResult<()> {
        let command = if replicate {
            format!("filter source column name \"{column}\" replicate yes;")
        } else {
            format!("filter source column name \"{column}\" replicate no critical no;")
        };
        self.execute(&command).await.map(|_| ())
    }

    pub async fn lock_subscription(&mut self) -> AutosubResult<()> {
        self.execute("lock subscription;").await.map(|_| ())
    }

    pub async fn unlock_subscription(&mut self) -> AutosubResult<()> {
        self.execute("unlock subscription;").await.map(|_| ())
    }

    pub async fn describe_subscription(&mut self) -> AutosubResult<()> {
        self.execute("describe subscription;").await.map(|_| ())
    }

    pub async fn reassign_table_mapping(&mut self) -> AutosubResult<()> {
        self.execute("reassign table mapping;").await.map(|_| ())
    }

    pub async fn flag_refresh(&mut self) -> AutosubResult<()> {
        self.execute("flag refresh;").await.map(|_| ())
    }

    pub async fn end_replication(&mut self, wait_secs: u64) -> AutosubResult<()> {
        self.execute(&format!("end replication method immediate wait {wait_secs};"))
            .await
            .map(|_| ())
    }

    pub async fn start_mirroring(&mut self, wait_secs: u64) -> AutosubResult<()> {
        self.execute(&format!("start mirroring wait {wait_secs};"))
            .await
            .map(|_| ())
    }
}

fn datastore_command(
    name: &str,
    connected: bool,
    context: Option<&str>,
    is_other_context: bool,
) -> String {
    let verb = if connected { "select" } else { "connect" };
    match context {
        Some(context) if !(connected && is_other_context) => {
            format!("{verb} datastore name \"{name}\" context {context};")
        }
        _ => format!("{verb} datastore name \"{name}\";"),
    }
}

fn cell(table: &ResultTable, row: usize, column: &str) -> String {
    table.value(row, column).unwrap_or_default().trim().to_string()
}
