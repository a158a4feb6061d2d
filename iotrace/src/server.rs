//! Unix socket front end: a line-oriented control socket and a binary event socket.
//!
//! Every control reply ends with a line reading `ok` or `error: <reason>`.

use crate::control::{Controller, Reply, MAX_COMMAND_LEN};
use crate::ingest::Ingestor;
use crate::resolve::IdentityResolver;
use crate::snapshot::SnapshotReader;
use crate::types::Error;
use anyhow::Context as _;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::UnixListener;

/// Log entries rendered per write when streaming a log.
const LOG_CHUNK: usize = 256;

/// Binds `path`, replacing a stale socket file and creating its directory.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale socket {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

pub async fn serve_control<R>(listener: UnixListener, controller: Arc<Controller<R>>) -> anyhow::Result<()>
where
    R: IdentityResolver + 'static,
{
    loop {
        let (stream, _) = listener.accept().await.context("control accept failed")?;
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(err) = handle_control(stream, &controller).await {
                warn!("control connection failed: {err}");
            }
        });
    }
}

pub async fn serve_events(listener: UnixListener, ingestor: Arc<Ingestor>) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("event accept failed")?;
        let ingestor = Arc::clone(&ingestor);
        tokio::spawn(async move {
            match ingestor.run(stream).await {
                Ok(frames) => debug!("event source closed after {frames} frames"),
                Err(err) => warn!("event source failed: {err}"),
            }
        });
    }
}

/// Serves one control connection until the peer closes it.
///
/// Lines longer than [`MAX_COMMAND_LEN`] or not valid UTF-8 are rejected
/// without closing the connection.
pub async fn handle_control<S, R>(stream: S, controller: &Controller<R>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: IdentityResolver,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_COMMAND_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        } else if line.len() > MAX_COMMAND_LEN {
            let len = line.len() + discard_line(&mut reader).await?;
            warn!("rejected command of {len} bytes");
            let reason = Error::CommandTooLong(len).to_string();
            write_reply(&mut writer, Reply::Rejected(reason)).await?;
            continue;
        }

        let reply = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => controller.handle_line(text).await,
            Err(err) => {
                warn!("rejected command: {err}");
                Reply::Rejected(format!("command is not valid UTF-8: {err}"))
            }
        };
        write_reply(&mut writer, reply).await?;
    }

    Ok(())
}

/// Skips input up to and including the next newline. Returns the bytes skipped.
async fn discard_line<B>(reader: &mut B) -> std::io::Result<usize>
where
    B: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(skipped);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(skipped + end);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
                skipped += len;
            }
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: Reply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match reply {
        Reply::Lines(lines) => {
            let mut out = String::new();
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
            out.push_str("ok\n");
            writer.write_all(out.as_bytes()).await?;
        }
        Reply::Log(resource) => {
            let mut position = 0;
            loop {
                let mut chunk = String::new();
                let mut reader = SnapshotReader::open_at(Arc::clone(&resource), position);
                for record in reader.by_ref().take(LOG_CHUNK) {
                    chunk.push_str(&record.to_string());
                    chunk.push('\n');
                }
                position = reader.position();

                if chunk.is_empty() {
                    break;
                }
                writer.write_all(chunk.as_bytes()).await?;
            }
            writer.write_all(b"ok\n").await?;
        }
        Reply::Rejected(reason) => {
            writer
                .write_all(format!("error: {reason}\n").as_bytes())
                .await?;
        }
    }

    writer.flush().await
}

/// Resolves once Ctrl-C or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
