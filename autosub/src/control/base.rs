use std::future::Future;

use crate::error::AutosubResult;

/// Result code of a successful command.
pub const RESULT_OK: i32 = 0;

/// Result code returned when connecting to something already connected.
pub const RESULT_ALREADY_CONNECTED: i32 = 1101;

/// Tabular command result, with every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_at(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    /// Finds a column by name, ignoring case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn value_at(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    /// Returns the cell of `row` in the column called `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        self.column_index(name)
            .and_then(|column| self.value_at(row, column))
    }
}

/// Output of a control plane command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScriptOutput {
    Table(ResultTable),
    Value(String),
    #[default]
    Empty,
}

/// Raw reply of the control plane to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    /// Vendor result code, [`RESULT_OK`] on success.
    pub code: i32,
    pub message: String,
    pub output: ScriptOutput,
}

impl ScriptResponse {
    pub fn ok(output: ScriptOutput) -> Self {
        Self {
            code: RESULT_OK,
            message: String::new(),
            output,
        }
    }

    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            output: ScriptOutput::Empty,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == RESULT_OK
    }
}

/// An open session with the replication control plane.
///
/// Implementations return `Err` only when the session itself fails. A command rejected by
/// the control plane is a successful exchange carrying a non-zero [`ScriptResponse::code`].
pub trait ControlPlane: Send {
    /// Sends one textual command and returns the reply.
    fn execute(&mut self, command: &str)
    -> impl Future<Output = AutosubResult<ScriptResponse>> + Send;

    /// Releases the session.
    fn close(&mut self) -> impl Future<Output = AutosubResult<()>> + Send;
}

/// Opens control plane sessions.
pub trait ControlPlaneConnector: Send + Sync {
    type Session: ControlPlane;

    fn connect(&self) -> impl Future<Output = AutosubResult<Self::Session>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_addressable_by_index_and_name() {
        let table = ResultTable::new(
            vec!["SUBSCRIPTION".to_string(), "STATE".to_string()],
            vec![vec!["SUB1".to_string(), "Failed".to_string()]],
        );

        assert_eq!(table.row_count(), 1);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.column_at(1), Some("STATE"));
        assert_eq!(table.value(0, "state"), Some("Failed"));
        assert_eq!(table.value_at(0, 0), Some("SUB1"));
        assert_eq!(table.value(0, "TARGET DATASTORE"), None);
        assert_eq!(table.value_at(1, 0), None);
    }
}
