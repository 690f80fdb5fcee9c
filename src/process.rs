//! Blocking invocation of external tools (cutadapt, jellyfish, blat).
use log::debug;
use std::process::{Command, Output};

use crate::error::Error;

/// Render a command line for log and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion.
///
/// Failing to spawn the process and a non-zero exit status are both reported
/// as [`Error::Tool`] carrying the command line and the tool's stderr.
pub fn run_tool(tool: &str, cmd: &mut Command) -> Result<Output, Error> {
    let command = describe(cmd);
    debug!("Running {}", command);

    let output = cmd.output().map_err(|e| Error::Tool {
        tool: tool.to_string(),
        command: command.clone(),
        detail: format!("could not start process: {e}"),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Tool {
            tool: tool.to_string(),
            command,
            detail: format!("exited with {}: {}", output.status, stderr.trim()),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_tool_error() {
        let mut cmd = Command::new("/nonexistent/kmer-sv-tool");
        cmd.arg("--help");
        match run_tool("fake", &mut cmd) {
            Err(Error::Tool { tool, command, .. }) => {
                assert_eq!(tool, "fake");
                assert!(command.contains("--help"));
            }
            other => panic!("expected tool error, got {:?}", other),
        }
    }

    #[test]
    fn test_describe_joins_args() {
        let mut cmd = Command::new("jellyfish");
        cmd.args(["count", "-m", "15"]);
        assert_eq!(describe(&cmd), "jellyfish count -m 15");
    }
}
