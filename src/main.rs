use bytes::Bytes;
use clap::Parser;

use wiremux::{setup_local_tracing, AppResult, Dialer, Listener, TransportConfig};

#[derive(Parser)]
#[command(version, about = "wiremux transport demo")]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Accept conns and echo every payload back
    Listen {
        /// address to bind, e.g. 127.0.0.1:7070
        addr: String,
    },
    /// Open one conn, send each message, print the echoes
    Send {
        /// address to dial
        addr: String,
        messages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    setup_local_tracing()?;

    match CommandLine::parse().command {
        Command::Listen { addr } => {
            let listener = Listener::bind(addr.as_str(), TransportConfig::default()).await?;
            println!("listening on {}", listener.local_addr());
            loop {
                let conn = listener.accept().await?;
                tokio::spawn(async move {
                    while let Ok(payload) = conn.read().await {
                        if conn.write(payload).await.is_err() {
                            break;
                        }
                    }
                    conn.close().await;
                });
            }
        }
        Command::Send { addr, messages } => {
            let dialer = Dialer::new(TransportConfig::default());
            let link = dialer.dial(addr.as_str()).await?;
            let conn = link.open().await?;
            for message in messages {
                conn.write(Bytes::from(message)).await?;
                let echo = conn.read().await?;
                println!("{}", String::from_utf8_lossy(&echo));
            }
            conn.close().await;
            dialer.shutdown().await;
        }
    }
    Ok(())
}
