//! Streaming decompression through external tools
//!
//! The decompressor runs as a child process. A pump task forwards its stdout
//! in fixed-size chunks over a bounded channel, so at most
//! `CHANNEL_CAPACITY * CHUNK_SIZE` decompressed bytes are in flight while the
//! loader consumes them. Readers only see an [`AsyncBufRead`]; swapping in an
//! in-process decoder would not change the loader.
//!
//! A decompressor that exits unsuccessfully (truncated or corrupt archive)
//! surfaces as an I/O error after the last good chunk, never as a clean EOF.
//!
//! [`AsyncBufRead`]: tokio::io::AsyncBufRead

use crate::archive::ArchiveFormat;
use crate::config::DecompressorConfig;
use crate::error::{IngestError, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

/// Read size for decompressor output
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the decompressor and the loader
pub const CHANNEL_CAPACITY: usize = 4;

/// Longest stderr excerpt carried into an error message
const STDERR_EXCERPT: usize = 512;

/// Decompressed archive content as a buffered byte stream
pub type ArchiveStream = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// Start decompressing `path`, choosing the tool from its extension alone.
pub fn open_stream(path: &Path, decompressors: &DecompressorConfig) -> Result<ArchiveStream> {
    let format = ArchiveFormat::from_path(path)?;
    let (program, args) = decompressors
        .command(format)
        .split_first()
        .ok_or_else(|| IngestError::Config(format!("no decompressor configured for .{}", format)))?;

    let mut child = Command::new(program)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| IngestError::Decompression(format!("failed to start {}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| IngestError::Decompression(format!("{} has no stdout", program)))?;
    let stderr = child.stderr.take();

    debug!(program = %program, path = %path.display(), "Started decompressor");

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump(child, stdout, stderr, tx, program.clone()));

    Ok(StreamReader::new(ReceiverStream::new(rx)))
}

async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    program: String,
) {
    // Drained concurrently so a chatty decompressor cannot block on a full pipe
    let stderr_task = stderr.map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    let mut chunks = ReaderStream::with_capacity(stdout, CHUNK_SIZE);

    while let Some(chunk) = chunks.next().await {
        let broken = chunk.is_err();
        if tx.send(chunk).await.is_err() || broken {
            // Reader went away or the pipe failed; nothing left to deliver
            let _ = child.start_kill();
            let _ = child.wait().await;
            return;
        }
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        },
    };

    if status.success() {
        return;
    }

    let stderr_text = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let excerpt = String::from_utf8_lossy(&stderr_text);
    let excerpt = excerpt.trim();
    let excerpt: String = excerpt.chars().take(STDERR_EXCERPT).collect();

    warn!(program = %program, %status, stderr = %excerpt, "Decompressor failed");

    let _ = tx
        .send(Err(io::Error::other(format!(
            "{} exited with {}: {}",
            program, status, excerpt
        ))))
        .await;
}
