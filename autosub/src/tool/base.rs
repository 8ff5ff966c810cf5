use std::collections::BTreeMap;
use std::future::Future;

/// Token replaced by the source datastore name.
pub const TOKEN_SOURCE: &str = "SOURCE";
/// Token replaced by the subscription name.
pub const TOKEN_SUB: &str = "SUB";
/// Token replaced by a bookmark value.
pub const TOKEN_BOOKMARK: &str = "BOOKMARK";
/// Token replaced by a schema-qualified table name.
pub const TOKEN_TABLE: &str = "TABLE";

/// Values for the `${TOKEN}` placeholders of a command template.
pub type Substitutions = BTreeMap<String, String>;

/// Exit code reported when the tool could not be started at all.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Outcome of an external tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    /// Standard output followed by standard error.
    pub output: String,
}

impl ToolOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external engine tools.
///
/// A non-zero exit code is the only failure signal, so `run` has no error channel.
pub trait ToolRunner: Send + Sync {
    /// Runs `template` after substituting the placeholders. `label` names the tool in logs.
    fn run(
        &self,
        label: &str,
        template: &str,
        substitutions: &Substitutions,
    ) -> impl Future<Output = ToolOutput> + Send;
}

/// Splits a command line into arguments on whitespace, keeping double-quoted runs together.
pub fn split_arguments(command: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in command.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            ch if ch.is_whitespace() && !in_quotes => {
                if has_token {
                    arguments.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            ch => {
                current.push(ch);
                has_token = true;
            }
        }
    }
    if has_token {
        arguments.push(current);
    }

    arguments
}

/// Replaces every `${TOKEN}` of `argument` that has a value in `substitutions`.
pub fn substitute(argument: &str, substitutions: &Substitutions) -> String {
    if !argument.contains("${") {
        return argument.to_string();
    }

    substitutions
        .iter()
        .fold(argument.to_string(), |argument, (token, value)| {
            argument.replace(&format!("${{{token}}}"), value)
        })
}

/// Splits `template` and substitutes each argument.
pub fn prepare_command(template: &str, substitutions: &Substitutions) -> Vec<String> {
    split_arguments(template)
        .iter()
        .map(|argument| substitute(argument, substitutions))
        .collect()
}
