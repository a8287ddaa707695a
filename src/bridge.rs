//! # Shutterman Webservice
//! Websocket based service that provides remote shutter control.
//!
//! `GET /shutters` lists every shutter with its state and position.
//! `/shutters/{name}` upgrades to a websocket that accepts `open`, `close`,
//! `stop`, a position, or `reset {position}`, and streams an update after every
//! change of that shutter.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warp::filters::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::api::{Command, Update};
use crate::shutter::ShutterController;

const UPDATE_BUFFER: usize = 256;

/// Fans each shutter's updates out to every connected client.
pub struct Bridge {
    shutters: HashMap<String, Remote>,
}

#[derive(Clone)]
struct Remote {
    shutter: ShutterController,
    updates: broadcast::Sender<Update>,
}

impl Remote {
    fn status(&self) -> Update {
        Update {
            name: self.shutter.name().to_string(),
            state: self.shutter.state(),
            position: self.shutter.position(),
        }
    }

    async fn apply(&self, command: Command, scope: &CancellationToken) -> crate::Result<()> {
        match command {
            Command::Open => self.shutter.open(scope).await,
            Command::Close => self.shutter.close(scope).await,
            Command::Stop => self.shutter.stop(scope).await,
            Command::SetPosition(position) => self.shutter.set_position(scope, position).await,
            Command::Reset(position) => {
                self.shutter.reset_position(position).await?;
                // resetting moves nothing, so the controller stays quiet about it
                let _ = self.updates.send(self.status());
                Ok(())
            }
        }
    }
}

impl Bridge {
    /// Takes over each shutter's update listener.
    pub fn new(shutters: impl IntoIterator<Item = ShutterController>) -> Arc<Self> {
        let shutters = shutters
            .into_iter()
            .map(|shutter| {
                let (updates, _) = broadcast::channel(UPDATE_BUFFER);

                let tx = updates.clone();
                let name = shutter.name().to_string();
                shutter.on_update(move |state, position| {
                    // no connected clients is fine
                    let _ = tx.send(Update {
                        name: name.clone(),
                        state,
                        position,
                    });
                });

                (shutter.name().to_string(), Remote { shutter, updates })
            })
            .collect();

        Arc::new(Self { shutters })
    }

    pub fn statuses(&self) -> Vec<Update> {
        let mut statuses: Vec<_> = self.shutters.values().map(Remote::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn remote(&self, name: &str) -> Option<Remote> {
        self.shutters.get(name).cloned()
    }
}

/// Commands issued through the bridge run under `scope`; canceling it stops
/// every move they started.
pub fn routes(
    bridge: Arc<Bridge>,
    scope: CancellationToken,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_bridge = warp::any().map(move || bridge.clone());
    let with_scope = warp::any().map(move || scope.clone());

    let list = warp::path!("shutters")
        .and(warp::get())
        .and(with_bridge.clone())
        .map(|bridge: Arc<Bridge>| warp::reply::json(&bridge.statuses()));

    let control = warp::path!("shutters" / String)
        .and(warp::ws())
        .and(with_bridge)
        .and(with_scope)
        .and_then(upgrade);

    list.or(control)
}

async fn upgrade(
    name: String,
    ws: warp::ws::Ws,
    bridge: Arc<Bridge>,
    scope: CancellationToken,
) -> Result<impl Reply, Rejection> {
    let remote = bridge.remote(&name).ok_or_else(warp::reject::not_found)?;
    Ok(ws.on_upgrade(move |websocket| connection(websocket, remote, scope)))
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

async fn connection(websocket: WebSocket, remote: Remote, scope: CancellationToken) {
    let name = remote.shutter.name().to_string();
    let (mut ws_tx, mut from_client) = websocket.split();
    let (to_client, rx) = mpsc::unbounded_channel();

    info!(shutter = %name, "client connected");

    let mut rx = UnboundedReceiverStream::new(rx);
    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            if let Err(e) = ws_tx.send(message).await {
                warn!("websocket send error: {}", e);
                break;
            }
        }
    });

    let mut updates = remote.updates.subscribe();
    let forward = to_client.clone();
    let forwarding = tokio::task::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if send_json(&forward, &update).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "client is lagging behind updates"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let _ = send_json(&to_client, &remote.status());

    while let Some(result) = from_client.next().await {
        match result {
            Ok(msg) if msg.is_text() => {
                let text = msg.to_str().unwrap_or_default();
                let outcome = match text.parse::<Command>() {
                    Ok(command) => {
                        debug!(shutter = %name, ?command, "command received");
                        remote.apply(command, &scope).await.map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e),
                };

                if let Err(error) = outcome {
                    warn!(shutter = %name, "{} command: {}", text.trim(), error);
                    let _ = send_json(&to_client, &ErrorReply { error });
                }
            }
            Ok(msg) if msg.is_close() => break,
            Ok(msg) if msg.is_ping() || msg.is_pong() => {}
            Ok(_) => debug!(shutter = %name, "unsupported message type"),
            Err(e) => {
                warn!(shutter = %name, "websocket receive error: {}", e);
                break;
            }
        }
    }

    forwarding.abort();
    info!(shutter = %name, "client disconnected");
}

fn send_json<T: Serialize>(to_client: &mpsc::UnboundedSender<Message>, value: &T) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|e| warn!("serialize reply: {}", e))?;
    to_client.send(Message::text(text)).map_err(|_| ())
}
