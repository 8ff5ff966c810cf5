use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bail;
use crate::control::{
    ControlPlane, ControlPlaneConnector, ResultTable, STATE_MIRROR_CONTINUOUS, ScriptOutput,
    ScriptResponse,
};
use crate::error::{AutosubResult, ErrorKind};

/// State a subscription reaches after `end replication`.
pub const STATE_INACTIVE: &str = "Inactive";

/// Result code of commands rejected through [`FakeControlPlane::fail_command`].
pub const INJECTED_FAILURE_CODE: i32 = 9000;

/// Result code of commands the fake does not understand or cannot apply.
pub const UNSUPPORTED_CODE: i32 = 9999;

/// A source column of a fake table mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeColumn {
    pub name: String,
    pub data_type: String,
    pub replicated: bool,
}

impl FakeColumn {
    pub fn new(name: &str, data_type: &str, replicated: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            replicated,
        }
    }
}

/// How a fake subscription reacts to `end replication`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum StopBehavior {
    #[default]
    Stop,
    Reject,
    Ignore,
}

/// Builder and state of a fake subscription.
#[derive(Debug, Clone)]
pub struct FakeSubscription {
    name: String,
    source: String,
    target: String,
    state: String,
    /// Newest first.
    events: Vec<(String, String)>,
    tables: BTreeMap<String, Vec<FakeColumn>>,
    locked: bool,
    refreshed: BTreeSet<String>,
    stop: StopBehavior,
}

impl FakeSubscription {
    /// Creates a mirroring subscription without tables or events.
    pub fn new(name: &str, source: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_uppercase(),
            target: target.to_uppercase(),
            state: STATE_MIRROR_CONTINUOUS.to_string(),
            events: Vec::new(),
            tables: BTreeMap::new(),
            locked: false,
            refreshed: BTreeSet::new(),
            stop: StopBehavior::Stop,
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    /// Appends an event. Events are listed in the order they were added, newest first.
    pub fn with_event(mut self, id: &str, text: &str) -> Self {
        self.events.push((id.to_string(), text.to_string()));
        self
    }

    /// Rejects `end replication` for this subscription.
    pub fn rejecting_stop(mut self) -> Self {
        self.stop = StopBehavior::Reject;
        self
    }

    /// Accepts `end replication` but keeps mirroring.
    pub fn ignoring_stop(mut self) -> Self {
        self.stop = StopBehavior::Ignore;
        self
    }

    pub fn with_table(mut self, table: &str, columns: Vec<FakeColumn>) -> Self {
        self.tables.insert(table.to_string(), columns);
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    datastores: BTreeSet<String>,
    subscriptions: Vec<FakeSubscription>,
    reassigned_columns: BTreeMap<(String, String), Vec<FakeColumn>>,
    failing_prefixes: Vec<String>,
    fail_connections: bool,
    transcript: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
}

impl FakeState {
    fn subscription(&self, name: &str) -> Option<&FakeSubscription> {
        self.subscriptions
            .iter()
            .find(|sub| sub.name.eq_ignore_ascii_case(name))
    }

    fn subscription_mut(&mut self, name: &str) -> Option<&mut FakeSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|sub| sub.name.eq_ignore_ascii_case(name))
    }
}

/// In-memory replication control plane.
///
/// Interprets the commands issued by [`crate::control::Script`] against a set of fake
/// datastores and subscriptions. Every command is kept in a transcript. Clones share state,
/// so a test keeps one handle for inspection and hands another one to the code under test.
#[derive(Debug, Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<FakeState>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_datastore(&self, name: &str) {
        self.lock().datastores.insert(name.to_uppercase());
    }

    pub fn add_subscription(&self, subscription: FakeSubscription) {
        let mut state = self.lock();
        state.datastores.insert(subscription.source.clone());
        state.datastores.insert(subscription.target.clone());
        state.subscriptions.push(subscription);
    }

    /// Columns a table mapping exposes after `reassign table mapping`.
    pub fn set_reassigned_columns(&self, subscription: &str, table: &str, columns: Vec<FakeColumn>) {
        self.lock()
            .reassigned_columns
            .insert((subscription.to_string(), table.to_string()), columns);
    }

    /// Rejects every command starting with `prefix`.
    pub fn fail_command(&self, prefix: &str) {
        self.lock().failing_prefixes.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing_prefixes.clear();
    }

    pub fn fail_connections(&self, fail: bool) {
        self.lock().fail_connections = fail;
    }

    /// Opens a session directly, bypassing connection failures.
    pub fn session(&self) -> FakeSession {
        self.lock().sessions_opened += 1;
        FakeSession {
            state: self.state.clone(),
            context: SessionContext::default(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.lock()
            .transcript
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    pub fn clear_commands(&self) {
        self.lock().transcript.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.lock().sessions_closed
    }

    pub fn subscription_state(&self, subscription: &str) -> Option<String> {
        self.lock()
            .subscription(subscription)
            .map(|sub| sub.state.clone())
    }

    pub fn set_state(&self, subscription: &str, new_state: &str) {
        if let Some(sub) = self.lock().subscription_mut(subscription) {
            sub.state = new_state.to_string();
        }
    }

    pub fn is_locked(&self, subscription: &str) -> bool {
        self.lock()
            .subscription(subscription)
            .is_some_and(|sub| sub.locked)
    }

    /// Tables flagged for refresh in `subscription`.
    pub fn refresh_flagged(&self, subscription: &str) -> BTreeSet<String> {
        self.lock()
            .subscription(subscription)
            .map(|sub| sub.refreshed.clone())
            .unwrap_or_default()
    }

    /// Current replicate flag of every column of a table mapping.
    pub fn column_flags(&self, subscription: &str, table: &str) -> BTreeMap<String, bool> {
        self.lock()
            .subscription(subscription)
            .and_then(|sub| sub.tables.get(table))
            .map(|columns| {
                columns
                    .iter()
                    .map(|column| (column.name.clone(), column.replicated))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ControlPlaneConnector for FakeControlPlane {
    type Session = FakeSession;

    async fn connect(&self) -> AutosubResult<FakeSession> {
        if self.lock().fail_connections {
            bail!(
                ErrorKind::ConnectionFailed,
                "Could not connect to the control plane",
                "fake control plane refuses connections"
            );
        }

        Ok(self.session())
    }
}

#[derive(Debug, Default)]
struct SessionContext {
    connected: BTreeSet<String>,
    current_source: Option<String>,
    current_target: Option<String>,
    subscription: Option<String>,
    mapping: Option<String>,
    events_of: Option<String>,
}

/// A session of [`FakeControlPlane`] with its own datastore context.
#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    context: SessionContext,
}

impl ControlPlane for FakeSession {
    async fn execute(&mut self, command: &str) -> AutosubResult<ScriptResponse> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.transcript.push(command.to_string());

        if state
            .failing_prefixes
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return Ok(ScriptResponse::rejected(
                INJECTED_FAILURE_CODE,
                format!("injected failure for `{command}`"),
            ));
        }

        let response = interpret(&mut state, &mut self.context, command)
            .unwrap_or_else(|message| ScriptResponse::rejected(UNSUPPORTED_CODE, message));

        Ok(response)
    }

    async fn close(&mut self) -> AutosubResult<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions_closed += 1;
        Ok(())
    }
}

type Interpreted = Result<ScriptResponse, String>;

fn interpret(state: &mut FakeState, context: &mut SessionContext, command: &str) -> Interpreted {
    let command = command.trim().trim_end_matches(';').trim();

    if command.starts_with("connect datastore") || command.starts_with("select datastore") {
        return select_datastore(state, context, command);
    }
    if command == "monitor replication" {
        return monitor_replication(state, context);
    }
    if command.starts_with("select subscription") {
        return select_subscription(state, context, command);
    }
    if command.starts_with("list subscription events") {
        return list_events(state, context, command);
    }
    if command.starts_with("show subscription event details") {
        return event_details(state, context, command);
    }
    if command.starts_with("select table mapping") {
        return select_table_mapping(state, context, command);
    }
    if command.starts_with("filter source column") {
        return filter_source_column(state, context, command);
    }

    match command {
        "list table mappings" => {
            let sub = selected_subscription(state, context)?;
            let rows = sub.tables.keys().map(|table| vec![table.clone()]).collect();
            Ok(table(&["SOURCE TABLE"], rows))
        }
        "list source columns" => {
            let (sub, mapping) = selected_mapping(state, context)?;
            let rows = sub.tables[&mapping]
                .iter()
                .map(|column| {
                    vec![
                        column.name.clone(),
                        column.data_type.clone(),
                        if column.replicated { "Yes" } else { "No" }.to_string(),
                    ]
                })
                .collect();
            Ok(table(&["SOURCE COLUMN", "DATA TYPE", "REPLICATE"], rows))
        }
        "lock subscription" => {
            selected_subscription_mut(state, context)?.locked = true;
            Ok(empty())
        }
        "unlock subscription" => {
            let sub = selected_subscription_mut(state, context)?;
            if !sub.locked {
                return Err(format!("subscription {} is not locked", sub.name));
            }
            sub.locked = false;
            Ok(empty())
        }
        "describe subscription" => {
            selected_subscription(state, context)?;
            Ok(empty())
        }
        "reassign table mapping" => {
            let (sub, mapping) = selected_mapping(state, context)?;
            let key = (sub.name.clone(), mapping.clone());
            let Some(columns) = state.reassigned_columns.get(&key).cloned() else {
                return Ok(empty());
            };
            if let Some(sub) = state.subscription_mut(&key.0) {
                sub.tables.insert(mapping, columns);
            }
            Ok(empty())
        }
        "flag refresh" => {
            let (sub, mapping) = selected_mapping(state, context)?;
            let name = sub.name.clone();
            if let Some(sub) = state.subscription_mut(&name) {
                sub.refreshed.insert(mapping);
            }
            Ok(empty())
        }
        _ if command.starts_with("end replication") => {
            let sub = selected_subscription_mut(state, context)?;
            match sub.stop {
                StopBehavior::Stop => sub.state = STATE_INACTIVE.to_string(),
                StopBehavior::Reject => {
                    return Err(format!("subscription {} refused to stop", sub.name));
                }
                StopBehavior::Ignore => {}
            }
            Ok(empty())
        }
        _ if command.starts_with("start mirroring") => {
            let sub = selected_subscription_mut(state, context)?;
            if sub.locked {
                return Err(format!("subscription {} is locked", sub.name));
            }
            sub.state = STATE_MIRROR_CONTINUOUS.to_string();
            Ok(empty())
        }
        _ => Err(format!("unsupported command `{command}`")),
    }
}

fn select_datastore(state: &FakeState, context: &mut SessionContext, command: &str) -> Interpreted {
    let name = quoted(command, "name").ok_or("missing datastore name")?.to_uppercase();
    if !state.datastores.contains(&name) {
        return Err(format!("unknown datastore {name}"));
    }
    if command.starts_with("select") && !context.connected.contains(&name) {
        return Err(format!("datastore {name} is not connected"));
    }
    context.connected.insert(name.clone());

    if command.ends_with("context source") {
        context.current_source = Some(name);
    } else if command.ends_with("context target") {
        context.current_target = Some(name);
    } else {
        context.current_source = Some(name.clone());
        context.current_target = Some(name);
    }
    context.subscription = None;
    context.mapping = None;

    Ok(empty())
}

fn monitor_replication(state: &FakeState, context: &SessionContext) -> Interpreted {
    let source = context.current_source.as_ref().ok_or("no source datastore selected")?;
    let rows = state
        .subscriptions
        .iter()
        .filter(|sub| &sub.source == source)
        .map(|sub| vec![sub.name.clone(), sub.state.clone(), sub.target.clone()])
        .collect();

    Ok(table(&["SUBSCRIPTION", "STATE", "TARGET DATASTORE"], rows))
}

fn select_subscription(state: &FakeState, context: &mut SessionContext, command: &str) -> Interpreted {
    let name = quoted(command, "name").ok_or("missing subscription name")?;
    let sub = state
        .subscription(&name)
        .ok_or_else(|| format!("unknown subscription {name}"))?;
    if context.current_source.as_ref() != Some(&sub.source)
        || context.current_target.as_ref() != Some(&sub.target)
    {
        return Err(format!("subscription {name} does not belong to the selected datastores"));
    }
    context.subscription = Some(sub.name.clone());
    context.mapping = None;

    Ok(empty())
}

fn list_events(state: &FakeState, context: &mut SessionContext, command: &str) -> Interpreted {
    let name = quoted(command, "name").ok_or("missing subscription name")?;
    let sub = state
        .subscription(&name)
        .ok_or_else(|| format!("unknown subscription {name}"))?;
    if context.current_source.as_ref() != Some(&sub.source) {
        return Err(format!("source of subscription {name} is not selected"));
    }
    context.events_of = Some(sub.name.clone());
    let rows = sub.events.iter().map(|(id, _)| vec![id.clone()]).collect();

    Ok(table(&["EVENT ID"], rows))
}

fn event_details(state: &FakeState, context: &SessionContext, command: &str) -> Interpreted {
    let row: usize = command
        .split_whitespace()
        .last()
        .and_then(|row| row.parse().ok())
        .ok_or("missing event row")?;
    let sub = context
        .events_of
        .as_ref()
        .and_then(|name| state.subscription(name))
        .ok_or("no events listed")?;
    let (id, text) = row
        .checked_sub(1)
        .and_then(|index| sub.events.get(index))
        .ok_or_else(|| format!("no event at row {row}"))?;

    Ok(table(
        &["PROPERTY", "VALUE"],
        vec![
            vec!["EVENT ID".to_string(), id.clone()],
            vec!["MESSAGE".to_string(), text.clone()],
        ],
    ))
}

fn select_table_mapping(state: &FakeState, context: &mut SessionContext, command: &str) -> Interpreted {
    let schema = quoted(command, "sourceSchema").unwrap_or_default();
    let table_name = quoted(command, "sourceTable").ok_or("missing source table")?;
    let full_name = if schema.is_empty() {
        table_name
    } else {
        format!("{schema}.{table_name}")
    };

    let sub = selected_subscription(state, context)?;
    if !sub.tables.contains_key(&full_name) {
        return Err(format!("no table mapping for {full_name} in {}", sub.name));
    }
    context.mapping = Some(full_name);

    Ok(empty())
}

fn filter_source_column(state: &mut FakeState, context: &SessionContext, command: &str) -> Interpreted {
    let column = quoted(command, "name").ok_or("missing column name")?;
    let replicate = command.contains("replicate yes");
    let (sub, mapping) = selected_mapping(state, context)?;
    let name = sub.name.clone();

    let columns = state
        .subscription_mut(&name)
        .and_then(|sub| sub.tables.get_mut(&mapping))
        .ok_or("table mapping disappeared")?;
    let entry = columns
        .iter_mut()
        .find(|candidate| candidate.name == column)
        .ok_or_else(|| format!("unknown column {column}"))?;
    entry.replicated = replicate;

    Ok(empty())
}

fn selected_subscription<'a>(
    state: &'a FakeState,
    context: &SessionContext,
) -> Result<&'a FakeSubscription, String> {
    context
        .subscription
        .as_ref()
        .and_then(|name| state.subscription(name))
        .ok_or_else(|| "no subscription selected".to_string())
}

fn selected_subscription_mut<'a>(
    state: &'a mut FakeState,
    context: &SessionContext,
) -> Result<&'a mut FakeSubscription, String> {
    let name = context
        .subscription
        .as_ref()
        .ok_or("no subscription selected")?;
    state
        .subscription_mut(name)
        .ok_or_else(|| format!("unknown subscription {name}"))
}

fn selected_mapping<'a>(
    state: &'a FakeState,
    context: &SessionContext,
) -> Result<(&'a FakeSubscription, String), String> {
    let sub = selected_subscription(state, context)?;
    let mapping = context
        .mapping
        .as_ref()
        .filter(|mapping| sub.tables.contains_key(*mapping))
        .ok_or("no table mapping selected")?;

    Ok((sub, mapping.clone()))
}

/// Returns the double-quoted value following `keyword`.
fn quoted(command: &str, keyword: &str) -> Option<String> {
    let start = command.find(&format!("{keyword} \""))? + keyword.len() + 2;
    let length = command[start..].find('"')?;
    Some(command[start..start + length].to_string())
}

fn table(columns: &[&str], rows: Vec<Vec<String>>) -> ScriptResponse {
    let columns = columns.iter().map(|column| column.to_string()).collect();
    ScriptResponse::ok(ScriptOutput::Table(ResultTable::new(columns, rows)))
}

fn empty() -> ScriptResponse {
    ScriptResponse::ok(ScriptOutput::Empty)
}
