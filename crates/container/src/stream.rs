//! JSONL event streaming from a container's stdout, with a wall-clock
//! deadline and OOM (exit 137) detection (§4.3 "Streaming protocol").
//! Grounded on the Python original's `_stream_process`.

use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{ContainerError, Result};

/// One line of the container's JSONL protocol, or the terminal outcome once
/// the process exits.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Line(Value),
    Exited { code: Option<i32> },
}

/// Writes `payload` to the child's stdin then drops it, closing the pipe so
/// the entrypoint sees EOF.
pub async fn send_payload(child: &mut Child, payload: &[u8]) -> Result<()> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload).await?;
        stdin.shutdown().await?;
    }
    Ok(())
}

/// Streams JSONL events from `child`'s stdout until EOF or `deadline`
/// elapses. Malformed lines are reported as `ProtocolError` but do not stop
/// the stream. Exit code 137 is mapped to `ContainerError::Oom` by the
/// caller once the stream is exhausted (checked via `Child::wait`).
type LineReader = tokio::io::Lines<BufReader<tokio::process::ChildStdout>>;

pub fn events(mut child: Child, deadline: Duration) -> impl Stream<Item = Result<ContainerEvent>> {
    let stdout = child.stdout.take().expect("child spawned with piped stdout");
    let lines: LineReader = BufReader::new(stdout).lines();
    let deadline_at = Instant::now() + deadline;

    futures::stream::unfold(
        (Some(child), lines, false),
        move |(mut child, mut lines, mut done)| async move {
            if done {
                return None;
            }
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if let Some(c) = child.as_mut() {
                    let _ = c.start_kill();
                }
                done = true;
                return Some((Err(ContainerError::Timeout), (child, lines, done)));
            }

            match tokio::time::timeout(remaining, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    let parsed = serde_json::from_str::<Value>(&line)
                        .map(ContainerEvent::Line)
                        .map_err(|e| {
                            warn!(%line, error = %e, "malformed container event");
                            ContainerError::ProtocolError(line.clone())
                        });
                    Some((parsed, (child, lines, done)))
                }
                Ok(Ok(None)) => {
                    done = true;
                    let exit = if let Some(mut c) = child.take() {
                        c.wait().await.ok().map(|s| s.code()).unwrap_or(None)
                    } else {
                        None
                    };
                    Some((Ok(ContainerEvent::Exited { code: exit }), (None, lines, done)))
                }
                Ok(Err(e)) => {
                    done = true;
                    Some((Err(ContainerError::Io(e)), (child, lines, done)))
                }
                Err(_) => {
                    if let Some(c) = child.as_mut() {
                        let _ = c.start_kill();
                    }
                    done = true;
                    Some((Err(ContainerError::Timeout), (child, lines, done)))
                }
            }
        },
    )
}

/// `true` when `code` is the OOM-killer's exit status (§4.3 "Streaming
/// protocol": "Exit code 137 is treated as OOM").
pub fn is_oom_exit(code: Option<i32>) -> bool {
    code == Some(137)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_137_is_recognized_as_oom() {
        assert!(is_oom_exit(Some(137)));
        assert!(!is_oom_exit(Some(0)));
        assert!(!is_oom_exit(None));
    }
}
