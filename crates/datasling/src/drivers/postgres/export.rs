//! Bulk export through the native dump tool.
//!
//! `psql` runs `\copy ( query ) TO STDOUT` in CSV mode. Its stdout is bridged
//! into the blocking CSV decoder so rows stream while the process is still
//! running; stderr is collected on a separate task. A supervisor task forwards
//! decoded rows, then reaps the process and reports a non-zero exit through
//! the stream.

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use crate::codec::read_stream;
use crate::core::catalog::tool_available;
use crate::core::datastream::{Datastream, RowSender};
use crate::error::{Result, SlingError};

use super::super::common::Address;

/// Placeholder for the connection URL in reported command lines.
const DBURL_PLACEHOLDER: &str = "$DBURL";

/// Build the `\copy` meta-command for `sql`, flattened to one line.
pub(super) fn copy_command(sql: &str) -> String {
    let flat = sql
        .trim()
        .trim_end_matches(';')
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "\\copy ( {} ) TO STDOUT WITH CSV HEADER DELIMITER ',' QUOTE '\"' ESCAPE '\"'",
        flat
    )
}

/// Arguments after the tool name, with `target` in the URL position.
fn dump_args(target: &str, copy: &str) -> Vec<String> {
    vec![
        target.to_string(),
        "-X".to_string(),
        "-q".to_string(),
        // Fail instead of prompting when no password is supplied.
        "-w".to_string(),
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
        "-c".to_string(),
        copy.to_string(),
    ]
}

/// Command line safe to show in errors and logs.
pub(super) fn redacted_command(tool: &str, copy: &str) -> String {
    let args = dump_args(DBURL_PLACEHOLDER, copy);
    let mut line = tool.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(' ') || arg.contains('"') {
            line.push('\'');
            line.push_str(&arg);
            line.push('\'');
        } else {
            line.push_str(&arg);
        }
    }
    line
}

/// Start the dump tool and stream its CSV output.
///
/// Returns `BulkPath` when the tool is unavailable, cannot be launched, or
/// produces no readable header; callers fall back to the cursor path.
pub(super) async fn export_via_dump(
    address: &Address,
    sql: &str,
    capacity: usize,
) -> Result<Datastream> {
    let tool = address.kind().capabilities().dump_tool.ok_or_else(|| {
        SlingError::BulkPath(format!("{} has no native dump tool", address.kind()))
    })?;

    let name = tool.to_string();
    let available = tokio::task::spawn_blocking(move || tool_available(&name))
        .await
        .unwrap_or(false);
    if !available {
        return Err(SlingError::BulkPath(format!("{} not found on PATH", tool)));
    }

    let copy = copy_command(sql);
    let mut cmd = Command::new(tool);
    cmd.args(dump_args(&address.without_password(), &copy));
    if let Some(password) = address.password()? {
        cmd.env("PGPASSWORD", password);
    }
    stream_command(cmd, tool, redacted_command(tool, &copy), capacity).await
}

/// Launch `cmd` and stream the CSV it writes to stdout.
async fn stream_command(
    mut cmd: Command,
    tool: &str,
    command_line: String,
    capacity: usize,
) -> Result<Datastream> {
    debug!("Launching {}", command_line);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| SlingError::BulkPath(format!("failed to launch {}: {}", tool, e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SlingError::BulkPath(format!("{} stdout unavailable", tool)))?;
    let stderr_task = collect_stderr(&mut child);

    let decoded = match read_stream(SyncIoBridge::new(stdout), capacity).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = child.kill().await;
            let stderr = stderr_task.await.unwrap_or_default();
            return Err(SlingError::BulkPath(format!(
                "{} produced no CSV header ({}){}",
                tool,
                e,
                stderr_suffix(&stderr)
            )));
        }
    };

    info!("Streaming export through {}", tool);
    let (tx, stream) = Datastream::channel(decoded.fields().to_vec(), capacity);
    tokio::spawn(supervise(child, decoded, stderr_task, tx, command_line));
    Ok(stream)
}

fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            let _ = err.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    })
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Forward decoded rows, then reap the process.
async fn supervise(
    mut child: Child,
    mut decoded: Datastream,
    stderr_task: JoinHandle<String>,
    tx: RowSender,
    command_line: String,
) {
    let cancel = tx.cancel_token();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Export consumer went away; killing dump process");
                let _ = child.kill().await;
                return;
            }
            next = decoded.next_row() => next,
        };
        match next {
            Some(Ok(row)) => {
                if tx.send(row).await.is_err() {
                    let _ = child.kill().await;
                    return;
                }
            }
            Some(Err(e)) => {
                let _ = child.kill().await;
                tx.fail(e).await;
                return;
            }
            None => break,
        }
    }

    let status = child.wait().await;
    let stderr = stderr_task.await.unwrap_or_default();
    match status {
        Ok(status) if status.success() => {
            debug!(
                "Dump process exited cleanly after {} rows",
                decoded.stats().rows_sent()
            );
        }
        Ok(status) => {
            warn!("Dump process exited with {}", status);
            tx.fail(SlingError::Export {
                command: command_line,
                stderr,
            })
            .await;
        }
        Err(e) => {
            tx.fail(SlingError::Export {
                command: command_line,
                stderr: format!("could not wait for process: {}", e),
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_command_flattens_newlines() {
        let cmd = copy_command("SELECT *\n  FROM public.test1\r\n WHERE id > 1;");
        assert_eq!(
            cmd,
            "\\copy ( SELECT * FROM public.test1 WHERE id > 1 ) TO STDOUT WITH CSV HEADER \
             DELIMITER ',' QUOTE '\"' ESCAPE '\"'"
        );
    }

    #[test]
    fn test_redacted_command_hides_url() {
        let copy = copy_command("SELECT 1");
        let line = redacted_command("psql", &copy);
        assert!(line.starts_with("psql $DBURL -X -q -w -v ON_ERROR_STOP=1 -c '"));
        assert!(!line.contains("postgres://"));
    }

    #[test]
    fn test_dump_args_never_prompt() {
        let args = dump_args("postgresql://u@h/db", "\\copy ( SELECT 1 ) TO STDOUT");
        assert_eq!(args[0], "postgresql://u@h/db");
        assert!(args.iter().any(|a| a == "-w"));
        assert_eq!(args.last().map(String::as_str), Some("\\copy ( SELECT 1 ) TO STDOUT"));
    }

    #[test]
    fn test_stderr_suffix() {
        assert_eq!(stderr_suffix(""), "");
        assert_eq!(stderr_suffix("boom"), ": boom");
    }

    #[tokio::test]
    async fn test_kind_without_dump_tool_is_bulk_path() {
        let address = Address::parse("redshift://u:pw@cluster.example.com:5439/dev").unwrap();
        let err = export_via_dump(&address, "SELECT 1", 8).await.unwrap_err();
        assert!(err.is_recoverable(), "unexpected error: {}", err);
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_export_error_with_stderr() {
        let script = "printf 'a,b\\n1,2\\n'; echo 'relation \"nope\" does not exist' >&2; exit 3";
        let line = "psql $DBURL -c 'SELECT 1'".to_string();
        let mut stream = stream_command(shell(script), "sh", line.clone(), 8)
            .await
            .unwrap();
        assert_eq!(stream.fields(), &["a".to_string(), "b".to_string()]);
        assert!(stream.next_row().await.unwrap().is_ok());

        match stream.next_row().await {
            Some(Err(SlingError::Export { command, stderr })) => {
                assert_eq!(command, line);
                assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
            }
            other => panic!("expected export error, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(stream.next_row().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_ends_stream() {
        let script = "printf 'n\\n1\\n2\\n3\\n'";
        let stream = stream_command(shell(script), "sh", "sh".into(), 2)
            .await
            .unwrap();
        assert_eq!(stream.collect_rows().await.unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_header_is_bulk_path_with_stderr() {
        let script = "echo 'FATAL: password authentication failed' >&2; exit 2";
        let err = stream_command(shell(script), "sh", "sh".into(), 8)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("password authentication failed"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_is_bulk_path() {
        let cmd = Command::new("/nonexistent/datasling-dump-tool");
        let err = stream_command(cmd, "dump", "dump".into(), 8).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_stream_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut cmd = shell("echo $$ > \"$1\"; printf 'n\\n'; exec yes 1");
        cmd.arg("sh").arg(&pid_file);

        let mut stream = stream_command(cmd, "sh", "sh".into(), 4).await.unwrap();
        assert!(stream.next_row().await.unwrap().is_ok());
        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        drop(stream);

        let mut alive = true;
        for _ in 0..50 {
            let status = std::process::Command::new("kill")
                .args(["-0", &pid])
                .stderr(Stdio::null())
                .status()
                .unwrap();
            if !status.success() {
                alive = false;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(!alive, "dump process {} still running", pid);
    }
}
