//! External tool invocation with live output

use std::ffi::OsStr;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited unsuccessfully (code {code:?})")]
    Exit { program: String, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `program` to completion, re-emitting its stdout and stderr line by line.
///
/// Both pipes are drained concurrently with the wait, so a chatty child can
/// never block on a full pipe, and both readers reach EOF before the exit
/// status is inspected. The child is killed if this future is dropped.
pub async fn run_streamed<I, S>(program: &str, args: I, label: &str) -> Result<(), ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (out, err, status) = tokio::join!(
        drain(stdout, label, "stdout"),
        drain(stderr, label, "stderr"),
        child.wait(),
    );
    out?;
    err?;
    let status = status?;

    if !status.success() {
        return Err(ProcessError::Exit {
            program: program.to_string(),
            code: status.code(),
        });
    }

    Ok(())
}

async fn drain<R>(stream: Option<R>, label: &str, stream_name: &str) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(());
    };

    // Split on raw bytes: tool output is not guaranteed to be UTF-8
    let mut lines = BufReader::new(stream).split(b'\n');
    while let Some(line) = lines.next_segment().await? {
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            info!("[{}] {}: {}", label, stream_name, line);
        }
    }

    Ok(())
}
