use std::future::Future;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::command::CommandLine;
use crate::types::{FailureCause, InvocationFailure};

/// How long to wait for pipe readers after the child has exited or been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes a command line and yields its stdout, or a structured failure.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, InvocationFailure>> + Send;
}

/// Runs the scanner as a real child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandLine, timeout: Duration) -> Result<String, InvocationFailure> {
        run_command(command, timeout).await
    }
}

/// Spawn `command`, capture both streams fully and enforce `timeout`.
///
/// - Exit status zero before the deadline yields stdout.
/// - Nonzero exit, signal termination, timeout and spawn errors all yield
///   `InvocationFailure`; `cause` records which one it was.
/// - On timeout the child is killed and whatever it had written is kept.
pub async fn run_command(command: &CommandLine, timeout: Duration) -> Result<String, InvocationFailure> {
    let rendered = command.to_string();
    debug!(command = %rendered, ?timeout, "spawning scanner");

    let mut child = match Command::new(command.program())
        .args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %rendered, error = %e, "failed to spawn scanner");
            return Err(InvocationFailure {
                message: format!("failed to start {}: {e}", command.program()),
                details: e.to_string(),
                cause: FailureCause::Spawn,
                command: rendered,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
    };

    let stdout_task = child.stdout.take().map(spawn_drain);
    let stderr_task = child.stderr.take().map(spawn_drain);

    let cause = match time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => None,
        Ok(Ok(status)) => Some(match status.code() {
            Some(code) => FailureCause::Exit { code },
            None => FailureCause::Signal,
        }),
        Ok(Err(e)) => {
            warn!(command = %rendered, error = %e, "failed waiting for scanner");
            Some(FailureCause::Wait)
        }
        Err(_) => {
            warn!(command = %rendered, ?timeout, "scanner timed out, killing it");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed out scanner");
            }
            Some(FailureCause::Timeout {
                millis: timeout.as_millis() as u64,
            })
        }
    };

    let (stdout, stderr) = tokio::join!(collect(stdout_task), collect(stderr_task));

    match cause {
        None => Ok(stdout),
        Some(cause) => {
            let message = failure_message(command.program(), &cause, timeout);
            let details = failure_details(&message, &cause, &stdout, &stderr);
            Err(InvocationFailure {
                message,
                details,
                cause,
                command: rendered,
                stdout,
                stderr,
            })
        }
    }
}

fn failure_message(program: &str, cause: &FailureCause, timeout: Duration) -> String {
    match cause {
        FailureCause::Exit { code } => format!("{program} exited with status {code}"),
        FailureCause::Signal => format!("{program} was terminated by a signal"),
        FailureCause::Timeout { .. } => format!("{program} timed out after {timeout:?}"),
        FailureCause::Spawn => format!("failed to start {program}"),
        FailureCause::Wait => format!("failed waiting for {program}"),
    }
}

// Scanner diagnostics land on either stream ("0 hosts up" on stdout,
// "Failed to resolve" on stderr), so both go into the classified text.
// Markup lines are left out: XML output always carries `<hosts up=.. down=..>`.
fn failure_details(message: &str, cause: &FailureCause, stdout: &str, stderr: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if matches!(cause, FailureCause::Timeout { .. } | FailureCause::Signal | FailureCause::Wait) {
        parts.push(message);
    }
    parts.extend(
        stderr
            .lines()
            .chain(stdout.lines().filter(|line| !is_markup(line)))
            .map(str::trim)
            .filter(|line| !line.is_empty()),
    );
    if parts.is_empty() {
        return message.to_string();
    }
    parts.join("\n")
}

fn is_markup(line: &str) -> bool {
    line.trim_start().starts_with('<')
}

type Captured = Arc<Mutex<Vec<u8>>>;

// Output is accumulated as it arrives so a reader stuck behind a lingering
// grandchild still leaves the partial capture behind.
fn spawn_drain<R>(reader: R) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let captured = Captured::default();
    let sink = captured.clone();
    let handle = tokio::spawn(async move {
        let mut reader = reader;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    });
    (captured, handle)
}

async fn collect(stream: Option<(Captured, JoinHandle<()>)>) -> String {
    let Some((captured, handle)) = stream else {
        return String::new();
    };
    if time::timeout(DRAIN_GRACE, handle).await.is_err() {
        debug!("output pipe still open after grace period, keeping partial capture");
    }
    let bytes = captured.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::OutputFormat;

    fn cmd(binary: &str, flags: &[&str], target: &str) -> CommandLine {
        CommandLine::new(
            binary,
            flags.iter().map(|f| f.to_string()).collect(),
            OutputFormat::Text,
            target,
        )
    }

    #[tokio::test]
    async fn zero_exit_returns_stdout() {
        let out = run_command(&cmd("echo", &["-T4", "-F"], "scanme.nmap.org"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "-T4 -F scanme.nmap.org");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let err = run_command(&cmd("false", &[], "x"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.cause, FailureCause::Exit { code: 1 });
        assert!(err.message.contains("exited with status 1"));
        assert_eq!(err.command, r#""false" "x""#);
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let started = std::time::Instant::now();
        let err = run_command(&cmd("sleep", &[], "10"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.cause, FailureCause::Timeout { millis: 200 });
        assert!(err.details.contains("timed out"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        let err = run_command(
            &cmd("/nonexistent/definitely-not-nmap", &[], "x"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.cause, FailureCause::Spawn);
        assert!(err.stdout.is_empty() && err.stderr.is_empty());
    }

    #[test]
    fn details_skip_xml_markup_lines() {
        let stdout = "<?xml version=\"1.0\"?>\n<nmaprun>\n<runstats><hosts up=\"1\" down=\"0\" total=\"1\"/></runstats>\n</nmaprun>\n";
        let details = failure_details(
            "nmap exited with status 1",
            &FailureCause::Exit { code: 1 },
            stdout,
            "dnet: Failed to open device eth0\n",
        );
        assert_eq!(details, "dnet: Failed to open device eth0");
    }

    #[test]
    fn details_keep_plain_text_stdout() {
        let details = failure_details(
            "nmap exited with status 1",
            &FailureCause::Exit { code: 1 },
            "Note: Host seems down.\nNmap done: 1 IP address (0 hosts up)\n",
            "",
        );
        assert_eq!(details, "Note: Host seems down.\nNmap done: 1 IP address (0 hosts up)");
    }
}
