//! The subprocess runner: starts a shell command with a timeout
//! and invokes a completion with combined output and exit code.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::check::status;

/// The outcome of running a command to completion (or to its timeout).
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    pub output: String,
    pub status: i64,
}

/// Starts a shell command with an optional timeout. Implementations own the
/// decision of which shell to invoke; the Tokio-backed reference
/// implementation uses `sh -c`.
#[async_trait]
pub trait SubprocessRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> SubprocessOutput;
}

/// Runs commands through `sh -c`, capturing stdout and stderr combined (in
/// the order the process produced them is not guaranteed — they are read as
/// two independent streams and concatenated, stdout first, matching the
/// common "combined output" contract of process-supervision tooling).
///
/// A command that exceeds `timeout` is killed and reported with status
/// [`status::CRITICAL`] and an explanatory message — a timed-out check is
/// actionable, not merely unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSubprocessRunner;

#[async_trait]
impl SubprocessRunner for TokioSubprocessRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> SubprocessOutput {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return SubprocessOutput {
                    output: format!("failed to spawn command: {e}"),
                    status: status::UNKNOWN,
                }
            }
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let wait = async {
            let read_stdout = async {
                let mut out = String::new();
                if let Some(s) = stdout.as_mut() {
                    let _ = s.read_to_string(&mut out).await;
                }
                out
            };
            let read_stderr = async {
                let mut err = String::new();
                if let Some(s) = stderr.as_mut() {
                    let _ = s.read_to_string(&mut err).await;
                }
                err
            };
            // Read both streams concurrently: the child can block on a full
            // stderr pipe while stdout is still open, so reading them in
            // sequence can deadlock waiting for the first to close.
            let (out, err) = tokio::join!(read_stdout, read_stderr);
            let exit = child.wait().await;
            (out, err, exit)
        };

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await,
            None => Ok(wait.await),
        };

        match outcome {
            Ok((out, err, Ok(exit_status))) => SubprocessOutput {
                output: format!("{out}{err}"),
                status: exit_status.code().map(i64::from).unwrap_or(status::UNKNOWN),
            },
            Ok((out, err, Err(e))) => SubprocessOutput {
                output: format!("{out}{err}process wait failed: {e}"),
                status: status::UNKNOWN,
            },
            Err(_elapsed) => {
                let _ = child.start_kill();
                SubprocessOutput {
                    output: format!("execution timed out after {:?}", timeout.unwrap()),
                    status: status::CRITICAL,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let runner = TokioSubprocessRunner;
        let result = runner.run("echo hello", None).await;
        assert_eq!(result.output.trim(), "hello");
        assert_eq!(result.status, status::OK);
    }

    #[tokio::test]
    async fn captures_nonzero_exit_code() {
        let runner = TokioSubprocessRunner;
        let result = runner.run("exit 2", None).await;
        assert_eq!(result.status, 2);
    }

    #[tokio::test]
    async fn timeout_reports_critical() {
        let runner = TokioSubprocessRunner;
        let result = runner
            .run("sleep 5", Some(Duration::from_millis(50)))
            .await;
        assert_eq!(result.status, status::CRITICAL);
        assert!(result.output.contains("timed out"));
    }
}
