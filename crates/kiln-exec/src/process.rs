//! Process spawning with optional terminal tee.

use crate::command::{ExecMode, ExecOutput};
use crate::error::{ExecError, ExecResult};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Bytes of each stream kept in memory when output is teed to the terminal.
pub const STREAM_TAIL_BYTES: usize = 64 * 1024;

/// Runs a prepared command to completion.
///
/// `label` names the program in launch errors.
pub(crate) async fn run(mut cmd: Command, mode: ExecMode, label: &str) -> ExecResult<ExecOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ExecError::Launch {
        program: label.to_string(),
        reason: e.to_string(),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Pipe("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Pipe("stderr not captured".to_string()))?;

    let (status, out, err) = match mode {
        ExecMode::Stream => tokio::join!(
            child.wait(),
            pump(stdout, Some(tokio::io::stdout()), Some(STREAM_TAIL_BYTES)),
            pump(stderr, Some(tokio::io::stderr()), Some(STREAM_TAIL_BYTES)),
        ),
        ExecMode::Capture => tokio::join!(
            child.wait(),
            pump(stdout, None::<tokio::io::Stdout>, None),
            pump(stderr, None::<tokio::io::Stderr>, None),
        ),
    };

    let status = status?;
    let output = ExecOutput {
        success: status.success(),
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&out?).into_owned(),
        stderr: String::from_utf8_lossy(&err?).into_owned(),
    };

    if mode == ExecMode::Capture {
        debug!(program = label, exit_code = ?output.exit_code, stdout = %output.stdout.trim_end(), "captured output");
        if !output.stderr.trim().is_empty() {
            debug!(program = label, stderr = %output.stderr.trim_end(), "captured stderr");
        }
    }

    Ok(output)
}

/// Copies `reader` to `echo` (when given) chunk by chunk. Returns the bytes
/// read, or only the last `tail` of them when a limit is set.
async fn pump<R, W>(mut reader: R, mut echo: Option<W>, tail: Option<usize>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(w) = echo.as_mut() {
            w.write_all(&buf[..n]).await?;
            w.flush().await?;
        }
        captured.extend_from_slice(&buf[..n]);
        if let Some(limit) = tail {
            if captured.len() > limit {
                let excess = captured.len() - limit;
                captured.drain(..excess);
            }
        }
    }
    Ok(captured)
}
