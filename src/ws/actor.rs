use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::protocol;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: dispatches incoming frames until the client closes, the
///   transport errors, or the liveness monitor signals termination
///
/// The mpsc channel allows any part of the system to send frames to this
/// client by cloning the sender. Frames share one transport, so writes for
/// this connection are delivered in call order.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: String,
    device_tag: Option<String>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection; a previous connection for the same identity
    // is superseded and told to close.
    let handle = state
        .gateway
        .register(identity.clone(), device_tag, tx.clone());
    let conn_id = handle.conn_id;

    tracing::info!(identity = %identity, conn_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc frames to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    loop {
        tokio::select! {
            // Liveness monitor, a superseding login, or process shutdown
            // asked this connection to go away.
            _ = handle.terminate.notified() => {
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Connection terminated".into(),
                })));
                tracing::info!(identity = %identity, conn_id, "Connection terminated by server");
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        protocol::handle_client_frame(text.as_str(), &tx, &identity);
                    }
                    Message::Pong(_) => {
                        // Liveness probe acknowledged
                        handle.alive.store(true, Ordering::Release);
                    }
                    Message::Ping(data) => {
                        // Respond to client pings with pong
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Binary(_) => {
                        tracing::debug!(
                            identity = %identity,
                            "Ignoring binary frame (protocol is JSON text)"
                        );
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            identity = %identity,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        identity = %identity,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    // Stream ended — client disconnected
                    tracing::info!(identity = %identity, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    writer_handle.abort();

    // Immediate removal keeps the invariant that a registry entry always has
    // an open transport. Guarded by conn_id so a superseded connection's
    // cleanup never evicts its replacement.
    state.gateway.unregister(&identity, conn_id);

    tracing::info!(identity = %identity, conn_id, "WebSocket actor stopped");
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
