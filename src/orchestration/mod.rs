//! Orchestration module for the external image backend
//!
//! Provides backend-agnostic image and working-container management:
//! - `ImageStore`: the capability every backend implements
//! - `BuildahStore`: buildah CLI implementation

pub mod buildah;
#[cfg(test)]
pub(crate) mod fake;
pub mod images;
mod store;

pub use buildah::{BuildahStore, DEFAULT_BUILDAH_PATH};
pub use images::{CommitOptions, ConfigChange, ImageRecord};
pub use store::ImageStore;

use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Max number of output lines to include in step error messages.
const STEP_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of step output for error diagnostics.
///
/// Returns the last `STEP_ERROR_TAIL_LINES` lines so error messages are
/// actionable without being overwhelming.
pub(crate) fn error_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(STEP_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns the last `STEP_ERROR_TAIL_LINES` lines for error reporting. Bytes
/// that are not valid UTF-8 are replaced, never treated as end of stream, so
/// both pipes are always drained. This is a standalone async function (not
/// behind `async_trait`) to avoid lifetime issues with the `dyn Fn` callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STEP_ERROR_TAIL_LINES);

    let mut stderr_reader = child.stderr.take().map(OutputLines::new);
    let mut stdout_reader = child.stdout.take().map(OutputLines::new);

    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = next_line(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        push_tail(&mut tail, line);
                    }
                    None => stderr_done = true,
                }
            }
            line = next_line(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        push_tail(&mut tail, line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }

    tail.into()
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == STEP_ERROR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Raw line reader over a child pipe.
///
/// The buffer outlives each read so a read cancelled by `select!` resumes
/// where it stopped.
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(_) if self.buf.is_empty() => None,
            Ok(_) => {
                let line = decode_line(&self.buf);
                self.buf.clear();
                Some(line)
            }
            Err(_) => None,
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn next_line<R>(reader: &mut Option<OutputLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await,
        None => None,
    }
}
