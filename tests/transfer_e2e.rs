mod common;

use anyhow::Result;
use common::{client_config, reference_root, start_server, write_file};
use ferry::checksum::sha256_file;
use ferry::client;
use ferry::error::TransferError;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(r: &mut R) -> Result<String> {
    let mut line = Vec::new();
    r.read_until(b'\n', &mut line).await?;
    Ok(String::from_utf8(line)?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_scenario_list_download_quit() -> Result<()> {
    let root = reference_root()?;
    let (addr, server) = start_server(root.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);

    wr.write_all(b"LIST\n").await?;
    assert_eq!(read_line(&mut rd).await?, "OK<|>a.txt,b.bin\n");

    wr.write_all(b"DOWNLOAD<|>b.bin\n").await?;
    assert_eq!(read_line(&mut rd).await?, "FILE_INFO<|>b.bin<|>2500000<|>3\n");
    let mut body = vec![0u8; 2_500_000];
    rd.read_exact(&mut body).await?;
    assert_eq!(body, std::fs::read(root.path().join("b.bin"))?);

    // Session is back in AwaitCommand
    wr.write_all(b"DOWNLOAD<|>a.txt\n").await?;
    assert_eq!(read_line(&mut rd).await?, "FILE_INFO<|>a.txt<|>11<|>1\n");
    let mut small = [0u8; 11];
    rd.read_exact(&mut small).await?;
    assert_eq!(&small, b"hello ferry");

    wr.write_all(b"QUIT\n").await?;
    assert_eq!(read_line(&mut rd).await?, "OK<|>Goodbye!\n");
    let mut rest = Vec::new();
    rd.read_to_end(&mut rest).await?;
    assert!(rest.is_empty());

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_errors_keep_session_alive() -> Result<()> {
    let root = reference_root()?;
    let outside = tempfile::tempdir()?;
    std::fs::write(outside.path().join("secret"), b"x")?;
    let (addr, server) = start_server(root.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);

    wr.write_all(b"DELETE<|>a.txt\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Unknown command\n");

    wr.write_all(b"DOWNLOAD\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Filename not provided\n");

    wr.write_all(b"DOWNLOAD<|>../secret\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Invalid filename\n");

    wr.write_all(b"DOWNLOAD<|>missing.bin\n").await?;
    assert_eq!(
        read_line(&mut rd).await?,
        "FILE_NOT_FOUND<|>File 'missing.bin' not found.\n"
    );

    wr.write_all(b"LIST\n").await?;
    assert_eq!(read_line(&mut rd).await?, "OK<|>a.txt,b.bin\n");

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_extra_fields_are_malformed() -> Result<()> {
    let root = reference_root()?;
    let (addr, server) = start_server(root.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);

    // Must not be served as a request for a.txt
    wr.write_all(b"DOWNLOAD<|>a.txt<|>junk\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Malformed command\n");

    wr.write_all(b"LIST<|>extra\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Malformed command\n");

    wr.write_all(b"DOWNLOAD<|>a.txt\n").await?;
    assert_eq!(read_line(&mut rd).await?, "FILE_INFO<|>a.txt<|>11<|>1\n");
    let mut small = [0u8; 11];
    rd.read_exact(&mut small).await?;
    assert_eq!(&small, b"hello ferry");

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_invalid_utf8_keeps_session_alive() -> Result<()> {
    let root = reference_root()?;
    let (addr, server) = start_server(root.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);

    wr.write_all(b"DOWNLOAD<|>\xff\xfe.bin\n").await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Malformed command\n");

    wr.write_all(b"LIST\n").await?;
    assert_eq!(read_line(&mut rd).await?, "OK<|>a.txt,b.bin\n");

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_oversized_line_closes_session() -> Result<()> {
    let root = reference_root()?;
    let (addr, server) = start_server(root.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);

    // A full line budget with no terminator in sight
    let mut line = b"DOWNLOAD<|>".to_vec();
    line.resize(ferry::protocol::MAX_LINE_LEN, b'a');
    wr.write_all(&line).await?;
    assert_eq!(read_line(&mut rd).await?, "ERROR<|>Command too long\n");

    let mut rest = Vec::new();
    let n = tokio::time::timeout(std::time::Duration::from_secs(10), rd.read_to_end(&mut rest))
        .await??;
    assert_eq!(n, 0);

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wire_empty_file_has_zero_chunks() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("empty.dat"), b"")?;
    let (addr, server) = start_server(tmp.path()).await?;

    let stream = TcpStream::connect(addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    wr.write_all(b"DOWNLOAD<|>empty.dat\n").await?;
    assert_eq!(read_line(&mut rd).await?, "FILE_INFO<|>empty.dat<|>0<|>0\n");
    // Nothing follows: the next line answers the next command
    wr.write_all(b"LIST\n").await?;
    assert_eq!(read_line(&mut rd).await?, "OK<|>empty.dat\n");

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_reports_exactly_the_served_files() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let names: Vec<String> = (0..12).map(|i| format!("file_{i:02}.bin")).collect();
    for (i, n) in names.iter().enumerate() {
        write_file(&tmp.path().join(n), i * 100)?;
    }
    std::fs::create_dir(tmp.path().join("nested"))?;
    write_file(&tmp.path().join("nested/hidden.txt"), 10)?;
    let (addr, server) = start_server(tmp.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let mut listed = conn.list_files().await?;
    conn.close().await;

    listed.sort();
    let mut deduped = listed.clone();
    deduped.dedup();
    assert_eq!(listed, deduped);
    assert_eq!(listed, names);

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_empty_root() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(tmp.path()).await?;
    let mut conn = client::connect(&client_config(addr)).await?;
    assert!(conn.list_files().await?.is_empty());
    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_is_byte_identical_and_reports_progress() -> Result<()> {
    let root = reference_root()?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(root.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let mut seen = Vec::new();
    let n = conn
        .download_file("b.bin", &dest.path().join("b.bin"), |done, total| {
            seen.push((done, total))
        })
        .await?;
    assert_eq!(n, 2_500_000);
    assert_eq!(
        sha256_file(&dest.path().join("b.bin"))?,
        sha256_file(&root.path().join("b.bin"))?
    );
    // Start event plus one per chunk, monotone, ending at the total
    assert_eq!(seen.first(), Some(&(0, 2_500_000)));
    assert_eq!(seen.last(), Some(&(2_500_000, 2_500_000)));
    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));

    let n = conn
        .download_file("a.txt", &dest.path().join("sub/a.txt"), |_, _| {})
        .await?;
    assert_eq!(n, 11);
    assert_eq!(std::fs::read(dest.path().join("sub/a.txt"))?, b"hello ferry");

    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_file_creates_nothing() -> Result<()> {
    let root = reference_root()?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(root.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let target = dest.path().join("nope.txt");
    let err = conn.download_file("nope.txt", &target, |_, _| {}).await.unwrap_err();
    assert!(matches!(err, TransferError::FileNotFound(ref n) if n == "nope.txt"));
    assert!(!target.exists());

    // Not a connection failure: the session goes on
    assert!(conn.is_open());
    assert_eq!(conn.list_files().await?, vec!["a.txt", "b.bin"]);
    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_name_is_refused_locally() -> Result<()> {
    let root = reference_root()?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(root.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    for bad in ["../a.txt", "dir/a.txt", "a<|>b", ""] {
        let err = conn
            .download_file(bad, &dest.path().join("x"), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidFilename { .. }), "{bad:?}: {err}");
    }
    assert!(conn.is_open());
    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_file_download() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("empty.dat"), b"")?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(tmp.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let mut calls = Vec::new();
    let n = conn
        .download_file("empty.dat", &dest.path().join("empty.dat"), |d, t| calls.push((d, t)))
        .await?;
    assert_eq!(n, 0);
    assert_eq!(calls, vec![(0, 0)]);
    assert_eq!(std::fs::metadata(dest.path().join("empty.dat"))?.len(), 0);
    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_download_list_on_one_connection() -> Result<()> {
    let root = reference_root()?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(root.path()).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let before = conn.list_files().await?;
    conn.download_file("b.bin", &dest.path().join("b.bin"), |_, _| {}).await?;
    let after = conn.list_files().await?;
    assert_eq!(before, after);
    assert_eq!(after, vec!["a.txt", "b.bin"]);
    conn.close().await;
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_refused_is_connection_error() -> Result<()> {
    let port = {
        let sock = std::net::TcpListener::bind("127.0.0.1:0")?;
        sock.local_addr()?.port()
    };
    let cfg = ferry::ClientConfig::new(ferry::Endpoint::new("127.0.0.1", port));
    match client::connect(&cfg).await {
        Err(TransferError::Connection(_)) => {}
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("connected to a closed port"),
    }
    Ok(())
}

/// Fake server that answers one DOWNLOAD with `header` then `body`, then
/// closes.
async fn fake_server(header: &'static str, body: Vec<u8>) -> Result<std::net::SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let (rd, mut wr) = stream.into_split();
            let mut rd = BufReader::new(rd);
            let mut line = Vec::new();
            let _ = rd.read_until(b'\n', &mut line).await;
            let _ = wr.write_all(header.as_bytes()).await;
            let _ = wr.write_all(&body).await;
            let _ = wr.shutdown().await;
        }
    });
    Ok(addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_stream_is_corruption() -> Result<()> {
    let addr = fake_server("FILE_INFO<|>f.bin<|>100<|>1\n", vec![9u8; 40]).await?;
    let dest = tempfile::tempdir()?;
    let target = dest.path().join("f.bin");

    let mut conn = client::connect(&client_config(addr)).await?;
    let err = conn.download_file("f.bin", &target, |_, _| {}).await.unwrap_err();
    match err {
        TransferError::Corrupted { received, expected } => {
            assert_eq!(received, 40);
            assert_eq!(expected, 100);
        }
        other => panic!("expected corruption, got {other}"),
    }
    // Partial file stays on disk; the connection is finished
    assert_eq!(std::fs::read(&target)?, vec![9u8; 40]);
    assert!(!conn.is_open());
    assert!(conn.list_files().await.is_err());
    conn.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunk_count_mismatch_is_protocol_error() -> Result<()> {
    let addr = fake_server("FILE_INFO<|>f.bin<|>100<|>2\n", vec![0u8; 100]).await?;
    let dest = tempfile::tempdir()?;

    let mut conn = client::connect(&client_config(addr)).await?;
    let err = conn
        .download_file("f.bin", &dest.path().join("f.bin"), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Protocol(_)), "{err}");
    assert!(!dest.path().join("f.bin").exists());
    assert!(!conn.is_open());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_error_is_reported() -> Result<()> {
    let addr = fake_server("ERROR<|>disk on fire\n", Vec::new()).await?;
    let dest = tempfile::tempdir()?;
    let mut conn = client::connect(&client_config(addr)).await?;
    let err = conn
        .download_file("f.bin", &dest.path().join("f.bin"), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Remote(ref r) if r == "disk on fire"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_client_does_not_affect_server() -> Result<()> {
    let root = reference_root()?;
    let dest = tempfile::tempdir()?;
    let (addr, server) = start_server(root.path()).await?;

    // Request the big file, read a few bytes, vanish
    {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(b"DOWNLOAD<|>b.bin\n").await?;
        let mut some = [0u8; 64];
        stream.read_exact(&mut some).await?;
    }
    // A half-open session idling on the server must not block others
    let _idle = TcpStream::connect(addr).await?;

    let mut conn = client::connect(&client_config(addr)).await?;
    conn.download_file("b.bin", &dest.path().join("b.bin"), |_, _| {}).await?;
    conn.close().await;
    assert_eq!(
        sha256_file(&dest.path().join("b.bin"))?,
        sha256_file(&root.path().join("b.bin"))?
    );

    server.abort();
    Ok(())
}
