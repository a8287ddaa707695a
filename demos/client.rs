use clap::Parser;

use futures_util::{future, pin_mut, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use futures::SinkExt;
use futures_channel::mpsc;
use git_version::git_version;
use std::error::Error;
use std::time::Duration;
use tokio::time;
use url::Url;

const GIT_VERSION: &str = git_version!(fallback = "unknown");

/// Example: type `open`, `close`, `stop` or a position, one per line, and
/// watch the shutter's updates.
#[derive(Parser)]
#[clap(name = "Example Shutterman client", version = GIT_VERSION)]
struct Opts {
    /// e.g. ws://127.0.0.1:9000/shutters/kitchen
    pub url: Url,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();

    let (ws_stream, _) = connect_async(opts.url).await?;
    println!("websocket connected");

    let (stdin_tx, stdin_rx) = mpsc::unbounded();
    let (mut ws_tx, ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded::<Message>();

    tokio::spawn(read_stdin(stdin_tx));
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3));
        loop {
            tokio::select! {
                Some(m) = rx.next() => {
                    if ws_tx.send(m).await.is_err() {
                        break;
                    }
                    interval.reset();
                }
                _ = interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let stdin_to_ws = stdin_rx.map(Ok).forward(tx);
    let ws_to_stdout = {
        ws_rx.for_each(|message| async {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(_) => return,
                Err(e) => format!("websocket error: {}", e),
            };
            let mut stdout = tokio::io::stdout();
            let _ = stdout.write_all(text.as_bytes()).await;
            let _ = stdout.write_all(b"\n").await;
        })
    };

    pin_mut!(stdin_to_ws, ws_to_stdout);
    future::select(stdin_to_ws, ws_to_stdout).await;

    Ok(())
}

async fn read_stdin(tx: mpsc::UnboundedSender<Message>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.unbounded_send(Message::Text(line)).is_err() {
            break;
        }
    }
}
