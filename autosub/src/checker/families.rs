use std::fmt;

/// Id of the event logged when a subscription starts. Events older than it belong to a
/// previous failure episode.
pub const SUBSCRIPTION_START_EVENT_ID: &str = "1463";

/// Recognized event messages reporting that a source table definition changed under a
/// running subscription.
///
/// Each family knows its event id, how to extract the table name from the message text and
/// whether the failure can only be resolved with a full refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureFamily {
    /// Critical DDL change reported by DDL-aware capture engines:
    /// `... (DDL) change for source table METADEMO.TAB0 and will shutdown. Please re-add ...`
    DdlChange,
    /// Log parsing failure after a definition change:
    /// `... error while parsing logs for table myuser.pgtab1 at position 00000000/017235d8 ...`
    LogParse,
    /// `... table definition has changed for table "myuser.pgtab1".`
    DefinitionChanged,
    /// `... the latest table definition for table metademo.tab0 is newer than the table definition ...`
    DefinitionNewer,
}

impl FailureFamily {
    pub const ALL: [FailureFamily; 4] = [
        FailureFamily::DdlChange,
        FailureFamily::LogParse,
        FailureFamily::DefinitionChanged,
        FailureFamily::DefinitionNewer,
    ];

    pub fn event_id(&self) -> &'static str {
        match self {
            FailureFamily::DdlChange => "9505",
            FailureFamily::LogParse => "9506",
            FailureFamily::DefinitionChanged => "9602",
            FailureFamily::DefinitionNewer => "9519",
        }
    }

    pub fn from_event_id(event_id: &str) -> Option<FailureFamily> {
        let event_id = event_id.trim();
        Self::ALL
            .into_iter()
            .find(|family| family.event_id() == event_id)
    }

    /// Returns `true` if re-adding the table metadata is not enough and data must be refreshed.
    pub fn requires_refresh(&self) -> bool {
        matches!(self, FailureFamily::LogParse)
    }

    /// Extracts the schema-qualified table name from a normalized message.
    pub fn parse_table(&self, text: &str) -> Option<String> {
        let table = match self {
            FailureFamily::DdlChange => between(
                text,
                "(DDL) change for source table ",
                " and will shutdown. Please re-add ",
            ),
            FailureFamily::LogParse => {
                between(text, "error while parsing logs for table ", " at position ")
            }
            FailureFamily::DefinitionChanged => {
                let start = text.find("definition has changed for table ")?
                    + "definition has changed for table ".len();
                if !text.ends_with("\".") || start >= text.len() - 1 {
                    return None;
                }
                Some(&text[start..text.len() - 1])
            }
            FailureFamily::DefinitionNewer => between(
                text,
                "table definition for table ",
                " is newer than the table definition ",
            ),
        }?;

        let table = table.replace('"', "");
        let table = table.trim();
        if table.is_empty() {
            return None;
        }

        Some(table.to_string())
    }
}

impl fmt::Display for FailureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.event_id())
    }
}

/// Collapses CR/LF sequences of a multi-line event message into single spaces.
pub fn normalize_message(text: &str) -> String {
    text.replace("\n\r", " ").replace(['\n', '\r'], " ")
}

/// Returns the text between the end of `begin` and the following `end`.
fn between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let length = text[start..].find(end)?;
    if length == 0 {
        return None;
    }
    Some(&text[start..start + length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_map_to_families() {
        assert_eq!(FailureFamily::from_event_id("9505"), Some(FailureFamily::DdlChange));
        assert_eq!(FailureFamily::from_event_id(" 9519 "), Some(FailureFamily::DefinitionNewer));
        assert_eq!(FailureFamily::from_event_id(SUBSCRIPTION_START_EVENT_ID), None);
        assert_eq!(FailureFamily::from_event_id("1234"), None);
    }

    #[test]
    fn ddl_change_message_yields_table() {
        let text = "IBM Data Replication has encountered a critical data definition (DDL) change \
                    for source table METADEMO.TAB0 and will shutdown. Please re-add the table definition.";
        assert_eq!(
            FailureFamily::DdlChange.parse_table(text).as_deref(),
            Some("METADEMO.TAB0")
        );
        assert!(!FailureFamily::DdlChange.requires_refresh());
    }

    #[test]
    fn log_parse_message_requires_refresh() {
        let text = "IBM Data Replication will be shutdown due to an error while parsing logs \
                    for table myuser.pgtab1 at position 00000000/017235d8. The table definition may have changed.";
        assert_eq!(
            FailureFamily::LogParse.parse_table(text).as_deref(),
            Some("myuser.pgtab1")
        );
        assert!(FailureFamily::LogParse.requires_refresh());
    }

    #[test]
    fn definition_changed_message_strips_quotes() {
        let text = "An exception has occurred during mirroring. Stopping replication because \
                    table definition has changed for table \"myuser.pgtab1\".";
        assert_eq!(
            FailureFamily::DefinitionChanged.parse_table(text).as_deref(),
            Some("myuser.pgtab1")
        );
        assert_eq!(
            FailureFamily::DefinitionChanged.parse_table("definition has changed for table \"a.b\""),
            None
        );
    }

    #[test]
    fn definition_newer_message_yields_table() {
        let text = "IBM Data Replication will be shutdown because the latest table definition \
                    for table \"metademo\".\"tab0\" is newer than the table definition for the current operation.";
        assert_eq!(
            FailureFamily::DefinitionNewer.parse_table(text).as_deref(),
            Some("metademo.tab0")
        );
    }

    #[test]
    fn malformed_messages_yield_nothing() {
        let text = "Subscription stopped because of an unexpected error.";
        for family in FailureFamily::ALL {
            assert_eq!(family.parse_table(text), None, "{family}");
        }
        assert_eq!(
            FailureFamily::DdlChange
                .parse_table("(DDL) change for source table  and will shutdown. Please re-add "),
            None
        );
    }

    #[test]
    fn line_breaks_become_spaces() {
        assert_eq!(
            normalize_message("for source table\n\rAPP.T1 and\nwill\rstop"),
            "for source table APP.T1 and will stop"
        );
    }
}
