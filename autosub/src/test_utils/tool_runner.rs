use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::tool::{Substitutions, ToolOutput, ToolRunner, prepare_command};

/// One recorded tool run, after substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub label: String,
    pub arguments: Vec<String>,
}

impl ToolInvocation {
    pub fn command_line(&self) -> String {
        self.arguments.join(" ")
    }
}

#[derive(Debug, Default)]
struct Inner {
    invocations: Vec<ToolInvocation>,
    failing_labels: BTreeMap<String, i32>,
    failing_arguments: BTreeMap<String, i32>,
    outputs: BTreeMap<String, String>,
}

/// Tool runner that never spawns anything.
///
/// Every run succeeds unless a failure was configured for its label or for one of its
/// substituted arguments.
#[derive(Debug, Clone, Default)]
pub struct FakeToolRunner {
    inner: Arc<Mutex<Inner>>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every run with `label` exit with `exit_code`.
    pub fn fail_label(&self, label: &str, exit_code: i32) {
        self.lock()
            .failing_labels
            .insert(label.to_string(), exit_code);
    }

    /// Makes every run having `value` among its arguments exit with `exit_code`.
    pub fn fail_argument(&self, value: &str, exit_code: i32) {
        self.lock()
            .failing_arguments
            .insert(value.to_string(), exit_code);
    }

    /// Output returned by runs with `label`.
    pub fn set_output(&self, label: &str, output: &str) {
        self.lock()
            .outputs
            .insert(label.to_string(), output.to_string());
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.lock().invocations.clone()
    }

    pub fn invocations_of(&self, label: &str) -> Vec<ToolInvocation> {
        self.lock()
            .invocations
            .iter()
            .filter(|invocation| invocation.label == label)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ToolRunner for FakeToolRunner {
    async fn run(&self, label: &str, template: &str, substitutions: &Substitutions) -> ToolOutput {
        let arguments = prepare_command(template, substitutions);
        let mut inner = self.lock();

        let exit_code = inner
            .failing_labels
            .get(label)
            .copied()
            .or_else(|| {
                arguments
                    .iter()
                    .find_map(|argument| inner.failing_arguments.get(argument).copied())
            })
            .unwrap_or(0);
        let output = inner.outputs.get(label).cloned().unwrap_or_default();

        inner.invocations.push(ToolInvocation {
            label: label.to_string(),
            arguments,
        });

        ToolOutput { exit_code, output }
    }
}
