//! Transfer server: accept loop plus one independent session task per
//! connection.
//!
//! A session answers LIST, DOWNLOAD and QUIT against a fixed, read-only root
//! directory. Sessions share nothing but that path, so one slow or broken
//! client never stalls the accept loop or another session.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::protocol::{CHUNK_SIZE, MAX_LINE_LEN};
use crate::protocol_core::{
    chunk_lengths, decode, join_listing, resolve_under_root, validate_filename, Command,
    FileMetadata, Response,
};

/// State shared (read-only) by every session
struct SessionContext {
    root: PathBuf,
    config: ServerConfig,
}

/// A bound, not yet running server
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl Server {
    /// Validate the root directory and bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        if !config.root.is_dir() {
            anyhow::bail!("Root path is not a directory: {}", config.root.display());
        }
        let root = std::fs::canonicalize(&config.root)
            .with_context(|| format!("Failed to canonicalize root path: {}", config.root.display()))?;
        let bind = config.bind.address();
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        info!(bind = %bind, root = %root.display(), "ferry server listening");
        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext { root, config }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Canonical served directory
    pub fn root(&self) -> &Path {
        &self.ctx.root
    }

    /// Accept connections forever, spawning one session task for each.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(
                async move {
                    info!("connected");
                    match handle_session(stream, &ctx).await {
                        Ok(()) => info!("connection closed"),
                        Err(e) => {
                            let msg = format!("{e:#}");
                            warn!(error = %msg, "session aborted");
                        }
                    }
                }
                .instrument(info_span!("session", %peer)),
            );
        }
    }

    /// Run until `shutdown` completes. Running sessions are not awaited.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            res = self.run() => res,
            _ = shutdown => {
                info!("shutting down");
                Ok(())
            }
        }
    }
}

/// Bind and run a server with the given configuration.
pub async fn serve(config: ServerConfig) -> Result<()> {
    Server::bind(config).await?.run().await
}

/// Session loop: AwaitCommand -> (LIST | DOWNLOAD | QUIT). Returns when the
/// peer quits or disconnects; errors abort the session.
async fn handle_session(stream: TcpStream, ctx: &SessionContext) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut reader = BufReader::new(rd);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .await
            .context("read command")?;
        if n == 0 {
            debug!("peer disconnected");
            return Ok(());
        }
        if n == MAX_LINE_LEN && line.last() != Some(&b'\n') {
            // Cannot resync on an unterminated oversized line
            let _ = write_response(&mut wr, &Response::Error("Command too long".into()), ctx).await;
            anyhow::bail!("command line exceeds {} bytes", MAX_LINE_LEN);
        }

        let fields = match decode(&line) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "malformed command");
                write_response(&mut wr, &Response::Error("Malformed command".into()), ctx).await?;
                continue;
            }
        };
        let cmd = Command::from_fields(&fields);
        debug!(?cmd, "received command");

        match cmd {
            Command::List => {
                let resp = match list_files(&ctx.root).await {
                    Ok(names) => Response::Ok(join_listing(&names)),
                    Err(e) => {
                        warn!(error = %e, "listing failed");
                        Response::Error(format!("Could not list files: {e}"))
                    }
                };
                write_response(&mut wr, &resp, ctx).await?;
            }
            Command::Download(Some(name)) => send_file(&mut wr, &name, ctx).await?,
            Command::Download(None) => {
                write_response(&mut wr, &Response::Error("Filename not provided".into()), ctx)
                    .await?;
            }
            Command::Quit => {
                info!("client requested quit");
                // Best effort: the peer may already be gone
                let _ = write_response(&mut wr, &Response::Ok("Goodbye!".into()), ctx).await;
                return Ok(());
            }
            Command::Unknown(_) => {
                write_response(&mut wr, &Response::Error("Unknown command".into()), ctx).await?;
            }
            Command::Malformed(_) => {
                write_response(&mut wr, &Response::Error("Malformed command".into()), ctx).await?;
            }
        }
    }
}

/// Regular files directly under `root`, sorted by name. Names that cannot
/// travel in a LIST payload are skipped.
pub async fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut rd = tokio::fs::read_dir(root).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(raw) => {
                warn!(name = ?raw, "skipping non UTF-8 filename");
                continue;
            }
        };
        if let Err(e) = validate_filename(&name) {
            warn!(error = %e, "skipping unlistable filename");
            continue;
        }
        // Follows symlinks, but only those staying inside the root
        let Ok(path) = resolve_under_root(root, &name) else {
            continue;
        };
        if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// DOWNLOAD: SendingMetadata -> StreamingChunks.
///
/// Refusals (invalid name, missing file) are answered and keep the session
/// alive. Once FILE_INFO is out, any failure aborts the session: the client
/// is waiting for raw bytes and cannot parse an ERROR line.
async fn send_file<W>(wr: &mut W, name: &str, ctx: &SessionContext) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let path = match resolve_under_root(&ctx.root, name) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "rejected download");
            return write_response(wr, &Response::Error("Invalid filename".into()), ctx).await;
        }
    };
    let not_found = Response::FileNotFound(Some(format!("File '{}' not found.", name)));

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(file = name, error = %e, "open failed");
            return write_response(wr, &not_found, ctx).await;
        }
    };
    // The one and only size read for this exchange
    let md = match file.metadata().await {
        Ok(md) => md,
        Err(e) => {
            return write_response(wr, &Response::Error(format!("Error sending file: {e}")), ctx)
                .await;
        }
    };
    if !md.is_file() {
        return write_response(wr, &not_found, ctx).await;
    }

    let meta = FileMetadata::new(name, md.len(), CHUNK_SIZE);
    info!(
        file = name,
        size = meta.size_bytes,
        chunks = meta.chunk_count,
        "sending file"
    );
    write_response(wr, &Response::FileInfo(meta.clone()), ctx).await?;

    let write_timeout = ctx.config.write_timeout(CHUNK_SIZE);
    let mut src = file;
    stream_chunks(&mut src, wr, meta.size_bytes, CHUNK_SIZE, write_timeout)
        .await
        .with_context(|| format!("streaming {}", name))?;
    info!(file = name, bytes = meta.size_bytes, "file sent");
    Ok(())
}

/// Copy exactly `size` bytes from `src` to `dst`, one write per chunk.
///
/// Bytes beyond `size` are never read (the file may have grown). A source
/// that ends early is an error so the caller drops the connection.
pub(crate) async fn stream_chunks<R, W>(
    src: &mut R,
    dst: &mut W,
    size: u64,
    chunk_size: usize,
    write_timeout: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut src = src.take(size);
    let mut buf = vec![0u8; chunk_size.min(size as usize)];
    let mut sent = 0u64;
    for len in chunk_lengths(size, chunk_size) {
        let chunk = &mut buf[..len];
        src.read_exact(chunk)
            .await
            .with_context(|| format!("source ended after {} of {} bytes", sent, size))?;
        write_all_timed(dst, chunk, write_timeout).await?;
        sent += len as u64;
    }
    dst.flush().await?;
    Ok(sent)
}

async fn write_response<W>(wr: &mut W, resp: &Response, ctx: &SessionContext) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = resp.encode()?;
    write_all_timed(wr, &line, ctx.config.write_timeout(line.len())).await
}

#[inline]
async fn write_all_timed<W>(wr: &mut W, buf: &[u8], limit: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, wr.write_all(buf)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("write timeout ({} ms)", limit.as_millis()),
    }
}
