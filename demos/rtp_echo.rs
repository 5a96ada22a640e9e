use clap::Parser;
use clap_derive::Parser;
use std::time::Duration;
use anyhow::{anyhow, bail};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn, Level};
use rtp::connection_handle::ConnectionHandle;
use rtp::socket::Socket;

/// Echo server and client: without `--connect-ip`, every payload received on any connection is
///  sent back. With it, the messages are sent to the server and the echoes are printed.
#[derive(Parser)]
struct Args {
    ip: String,
    port: String,

    #[clap(long)]
    connect_ip: Option<String>,

    #[clap(long, default_value = "9810")]
    connect_port: String,

    #[clap(short, long)]
    message: Vec<String>,

    #[clap(long, default_value_t = 8)]
    window: u32,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut socket = Socket::bind(&args.ip, &args.port, args.window).await?;
    info!("listening on {:?}", socket.local_addr());

    let result = match &args.connect_ip {
        Some(connect_ip) => run_client(&socket, connect_ip, &args.connect_port, &args.message).await,
        None => run_server(&socket).await,
    };

    socket.close().await?;
    result
}

async fn run_server(socket: &Socket) -> anyhow::Result<()> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<ConnectionHandle>();
    socket.create_receiver(sender)?;

    while let Some(connection) = receiver.recv().await {
        info!("accepted connection from {}", connection.peer_key());
        tokio::spawn(async move {
            while let Some(data) = connection.recv().await {
                info!("{}: {}", connection.peer_key(), String::from_utf8_lossy(&data));
                if let Err(e) = connection.send(data) {
                    warn!("{}: {}", connection.peer_key(), e);
                    break;
                }
            }
            info!("connection from {} is closed", connection.peer_key());
        });
    }
    Ok(())
}

async fn run_client(socket: &Socket, ip: &str, port: &str, messages: &[String]) -> anyhow::Result<()> {
    let connection = socket.create_connection(ip, port).await?;

    for message in messages {
        connection.send(message.clone().into_bytes())?;
    }

    timeout(Duration::from_secs(10), connection.wait_established()).await
        .map_err(|_| anyhow!("no connection to {}", connection.peer_key()))??;
    info!("connected to {}", connection.peer_key());

    let expected_len = messages.iter().map(|m| m.len()).sum::<usize>();
    let mut echoed = Vec::new();
    while echoed.len() < expected_len {
        match timeout(Duration::from_secs(10), connection.recv()).await {
            Ok(Some(data)) => echoed.extend_from_slice(&data),
            Ok(None) => bail!("connection was closed by the server"),
            Err(_) => bail!("timeout waiting for echo"),
        }
    }
    println!("{}", String::from_utf8_lossy(&echoed));

    connection.close()
}
