#![allow(dead_code)]

use anyhow::Result;
use ferry::config::{ClientConfig, Endpoint, ServerConfig};
use ferry::server::Server;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use tokio::task::JoinHandle;

pub fn write_file(path: &Path, size: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::File::create(path)?;
    if size == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; 1024 * 64];
    let mut remaining = size;
    let mut val: u8 = 0;
    while remaining > 0 {
        for b in buf.iter_mut() {
            *b = val;
            val = val.wrapping_add(7);
        }
        let n = remaining.min(buf.len());
        f.write_all(&buf[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// Start a real server on an ephemeral loopback port
pub async fn start_server(root: &Path) -> Result<(SocketAddr, JoinHandle<()>)> {
    let cfg = ServerConfig::new(Endpoint::new("127.0.0.1", 0), root);
    let server = Server::bind(cfg).await?;
    let addr = server.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    Ok((addr, handle))
}

pub fn client_config(addr: SocketAddr) -> ClientConfig {
    let mut cfg = ClientConfig::new(Endpoint::new(addr.ip().to_string(), addr.port()));
    cfg.read_timeout_ms = 10_000;
    cfg
}

/// Root with the reference pair: a.txt (11 bytes) and b.bin (2,500,000 bytes)
pub fn reference_root() -> Result<tempfile::TempDir> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("a.txt"), b"hello ferry")?;
    write_file(&tmp.path().join("b.bin"), 2_500_000)?;
    Ok(tmp)
}
