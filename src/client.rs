//! Transfer client: one `Connection` per TCP socket.
//!
//! A connection carries any number of LIST/DOWNLOAD exchanges before QUIT.
//! After a protocol or mid-stream failure the byte stream can no longer be
//! trusted, so the connection is marked broken and refuses further commands.
//! The socket is released when the `Connection` is dropped, whatever the exit
//! path.

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::{ClientConfig, Endpoint};
use crate::error::{Result, TransferError};
use crate::protocol::{timeouts, CHUNK_SIZE, MAX_LINE_LEN};
use crate::protocol_core::{
    chunk_count, chunk_lengths, decode, ensure_parent_exists, split_listing, validate_filename,
    Command, FileMetadata, Response,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Broken,
}

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    endpoint: Endpoint,
    read_timeout: Duration,
    state: State,
}

/// Open one TCP connection to the configured endpoint.
pub async fn connect(config: &ClientConfig) -> Result<Connection> {
    let addr = config.endpoint.address();
    let stream = match timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(TransferError::socket(&format!("connect {}", addr), e)),
        Err(_) => {
            return Err(TransferError::Connection(format!(
                "connect {} timed out after {} ms",
                addr, config.connect_timeout_ms
            )))
        }
    };
    let _ = stream.set_nodelay(true);
    debug!(endpoint = %addr, "connected");
    let (rd, wr) = stream.into_split();
    Ok(Connection {
        reader: BufReader::new(rd),
        writer: wr,
        endpoint: config.endpoint.clone(),
        read_timeout: config.read_timeout(),
        state: State::Open,
    })
}

impl Connection {
    /// False once a failure left the stream in an unknown state
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// LIST: names of the files the server offers. Empty is valid.
    pub async fn list_files(&mut self) -> Result<Vec<String>> {
        let resp = self.request(&Command::List).await?;
        match resp {
            Response::Ok(payload) => Ok(split_listing(&payload)),
            Response::Error(reason) => Err(TransferError::Remote(reason)),
            other => self.fail(TransferError::Protocol(format!(
                "unexpected response to LIST: {:?}",
                other
            ))),
        }
    }

    /// DOWNLOAD `filename` into `destination`.
    ///
    /// `on_progress(bytes_transferred, total_bytes)` is called once when the
    /// transfer starts and after every chunk. The destination is only created
    /// once the server has accepted the request; a failed transfer leaves
    /// whatever was written on disk. Returns the number of bytes written.
    pub async fn download_file<F>(
        &mut self,
        filename: &str,
        destination: &Path,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        validate_filename(filename)?;
        let resp = self
            .request(&Command::Download(Some(filename.to_string())))
            .await?;
        let meta = match resp {
            Response::FileInfo(meta) => meta,
            Response::FileNotFound(_) => {
                return Err(TransferError::FileNotFound(filename.to_string()))
            }
            Response::Error(reason) => return Err(TransferError::Remote(reason)),
            Response::Ok(payload) => {
                return self.fail(TransferError::Protocol(format!(
                    "expected FILE_INFO after DOWNLOAD, got OK {:?}",
                    payload
                )))
            }
        };
        if let Err(e) = check_metadata(&meta, filename) {
            return self.fail(e);
        }

        info!(
            file = filename,
            size = meta.size_bytes,
            chunks = meta.chunk_count,
            "downloading"
        );
        match self.receive_into(&meta, destination, &mut on_progress).await {
            Ok(n) => {
                info!(file = filename, bytes = n, dest = %destination.display(), "download complete");
                Ok(n)
            }
            // Unread payload may still be in flight whatever went wrong
            Err(e) => self.fail(e),
        }
    }

    /// Send QUIT if the session is still usable, then release the socket.
    pub async fn close(mut self) {
        if self.state == State::Open {
            if self.send(&Command::Quit).await.is_ok() {
                let ack = Duration::from_millis(timeouts::QUIT_ACK_MS);
                let _ = timeout(ack, self.read_response()).await;
            }
        }
        let _ = self.writer.shutdown().await;
        debug!(endpoint = %self.endpoint, "disconnected");
    }

    async fn request(&mut self, cmd: &Command) -> Result<Response> {
        self.send(cmd).await?;
        self.read_response().await
    }

    async fn send(&mut self, cmd: &Command) -> Result<()> {
        if self.state != State::Open {
            return Err(TransferError::Connection(
                "connection is no longer usable".into(),
            ));
        }
        let line = cmd.encode()?;
        match self.writer.write_all(&line).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(TransferError::socket("send command", e)),
        }
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut line = Vec::with_capacity(128);
        let read = {
            let mut limited = (&mut self.reader).take(MAX_LINE_LEN as u64);
            timeout(self.read_timeout, limited.read_until(b'\n', &mut line)).await
        };
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return self.fail(TransferError::socket("receive response", e)),
            Err(_) => {
                return self.fail(TransferError::Connection(format!(
                    "timed out waiting for response after {} ms",
                    self.read_timeout.as_millis()
                )))
            }
        };
        if n == 0 {
            return self.fail(TransferError::Connection(
                "server closed the connection".into(),
            ));
        }
        if line.last() != Some(&b'\n') {
            let e = if n == MAX_LINE_LEN {
                TransferError::Protocol(format!("response exceeds {} bytes", MAX_LINE_LEN))
            } else {
                TransferError::Connection("connection closed in the middle of a response".into())
            };
            return self.fail(e);
        }
        let parsed = decode(&line).and_then(|fields| Response::from_fields(&fields));
        match parsed {
            Ok(resp) => Ok(resp),
            Err(e) => self.fail(e),
        }
    }

    /// StreamingChunks: read exactly `meta.size_bytes` bytes, chunk by chunk,
    /// appending each to the destination in order.
    async fn receive_into<F>(
        &mut self,
        meta: &FileMetadata,
        destination: &Path,
        on_progress: &mut F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        ensure_parent_exists(destination)?;
        let mut file = tokio::fs::File::create(destination).await?;
        let total = meta.size_bytes;
        on_progress(0, total);

        let mut buf = vec![0u8; CHUNK_SIZE.min(total as usize)];
        let mut received = 0u64;
        for len in chunk_lengths(total, CHUNK_SIZE) {
            let chunk = &mut buf[..len];
            let mut filled = 0;
            while filled < len {
                let n = match timeout(self.read_timeout, self.reader.read(&mut chunk[filled..])).await
                {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        file.write_all(&chunk[..filled]).await?;
                        return Err(TransferError::socket("receive chunk", e));
                    }
                    Err(_) => {
                        file.write_all(&chunk[..filled]).await?;
                        return Err(TransferError::Connection(format!(
                            "timed out after {} of {} bytes",
                            received + filled as u64,
                            total
                        )));
                    }
                };
                if n == 0 {
                    file.write_all(&chunk[..filled]).await?;
                    file.flush().await?;
                    return Err(TransferError::Corrupted {
                        received: received + filled as u64,
                        expected: total,
                    });
                }
                filled += n;
            }
            file.write_all(chunk).await?;
            received += len as u64;
            on_progress(received, total);
        }
        file.flush().await?;
        Ok(received)
    }

    fn fail<T>(&mut self, err: TransferError) -> Result<T> {
        debug!(error = %err, "connection marked broken");
        self.state = State::Broken;
        Err(err)
    }
}

/// FILE_INFO must describe the requested file with this build's chunk size.
fn check_metadata(meta: &FileMetadata, requested: &str) -> Result<()> {
    if meta.name != requested {
        return Err(TransferError::Protocol(format!(
            "FILE_INFO names {:?}, requested {:?}",
            meta.name, requested
        )));
    }
    let expected = chunk_count(meta.size_bytes, CHUNK_SIZE);
    if meta.chunk_count != expected {
        return Err(TransferError::Protocol(format!(
            "FILE_INFO declares {} chunks for {} bytes, expected {} (chunk size mismatch)",
            meta.chunk_count, meta.size_bytes, expected
        )));
    }
    Ok(())
}
