use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error};

use crate::report::{RecoveryReport, ReportCategory};
use crate::tool::base::{
    SPAWN_FAILED_EXIT_CODE, Substitutions, ToolOutput, ToolRunner, prepare_command,
};

/// Runs tools as local child processes, typically behind a remote shell prefix.
#[derive(Debug, Clone, Default)]
pub struct ShellToolRunner {
    report: RecoveryReport,
}

impl ShellToolRunner {
    pub fn new(report: RecoveryReport) -> Self {
        Self { report }
    }

    fn spawn_failed(&self, label: &str, reason: String) -> ToolOutput {
        error!(tool = label, reason = %reason, "failed to run external tool");
        self.report
            .record(ReportCategory::ShellStatus, &SPAWN_FAILED_EXIT_CODE.to_string());

        ToolOutput {
            exit_code: SPAWN_FAILED_EXIT_CODE,
            output: reason,
        }
    }
}

impl ToolRunner for ShellToolRunner {
    async fn run(&self, label: &str, template: &str, substitutions: &Substitutions) -> ToolOutput {
        let arguments = prepare_command(template, substitutions);
        debug!(tool = label, command = ?arguments, "running external tool");
        self.report
            .record(ReportCategory::ShellCommand, &format!("{arguments:?}"));

        let Some((program, args)) = arguments.split_first() else {
            return self.spawn_failed(label, "empty command".to_string());
        };

        let result = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => return self.spawn_failed(label, err.to_string()),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        for line in text.lines() {
            debug!(tool = label, "{line}");
            self.report.record(ReportCategory::ShellOutput, line);
        }

        let exit_code = output.status.code().unwrap_or(SPAWN_FAILED_EXIT_CODE);
        debug!(tool = label, exit_code, "external tool completed");
        self.report
            .record(ReportCategory::ShellStatus, &exit_code.to_string());

        ToolOutput {
            exit_code,
            output: text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_reports_spawn_failure() {
        let runner = ShellToolRunner::default();
        let output = runner
            .run("show-version", "/nonexistent/autosub-tool -v", &Substitutions::new())
            .await;

        assert_eq!(output.exit_code, SPAWN_FAILED_EXIT_CODE);
        assert!(!output.is_success());
    }

    #[tokio::test]
    async fn empty_command_is_a_spawn_failure() {
        let runner = ShellToolRunner::default();
        let output = runner.run("clear-staging", "  ", &Substitutions::new()).await;
        assert_eq!(output.exit_code, SPAWN_FAILED_EXIT_CODE);
    }
}
