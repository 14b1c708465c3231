//! Subprocess seam for the steps that wrap external neuroimaging tools.

use crate::prelude::{StepError, StepResult};
use log::debug;
use std::io;
use std::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait ToolRunner: Send + Sync {
    fn invoke(&self, command: &str, args: &[String]) -> io::Result<ToolOutput>;
}

/// Runs tools as child processes and captures their output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn invoke(&self, command: &str, args: &[String]) -> io::Result<ToolOutput> {
        let output = Command::new(command).args(args).output()?;
        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Invokes `command` and maps launch failures and nonzero exits to
/// `StepError::Tool`.
pub fn run_tool(tools: &dyn ToolRunner, command: &str, args: &[String]) -> StepResult<ToolOutput> {
    let rendered = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    debug!("running {}", rendered);
    let output = tools.invoke(command, args).map_err(|e| StepError::Tool {
        command: rendered.clone(),
        code: None,
        stderr: e.to_string(),
    })?;
    if !output.success() {
        return Err(StepError::Tool {
            command: rendered,
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}
