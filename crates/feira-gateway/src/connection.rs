use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use feira_types::events::{ClientCommand, ServerEvent};

use crate::Gateway;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::identity;
use crate::session::Session;

/// Handle a connection whose token was already verified at upgrade time.
pub async fn handle_connection_authenticated(socket: WebSocket, gateway: Gateway, user_id: String) {
    let (sender, receiver) = socket.split();
    info!("{} connected to gateway (pre-authenticated)", user_id);
    run_session(gateway.clone(), sender, receiver, Session::new(gateway), user_id).await;
}

/// Handle a connection that must send `identify` within the grace period.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new(gateway.clone());

    let user_id = match wait_for_identify(&mut sender, &mut receiver, &gateway).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let _ = sender.send(Message::Close(None)).await;
            session.close().await;
            return;
        }
    };

    info!("{} connected to gateway", user_id);
    run_session(gateway, sender, receiver, session, user_id).await;
}

async fn run_session(
    gateway: Gateway,
    sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut session: Session,
    user_id: String,
) {
    let outbound = match session.authenticate(user_id.clone()).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!("{} could not start session: {}", user_id, e);
            return;
        }
    };

    let pong_received = Arc::new(AtomicBool::new(true));
    let config = gateway.config().clone();
    let mut send_task = tokio::spawn(write_loop(
        sender,
        outbound,
        config,
        pong_received.clone(),
        user_id.clone(),
    ));
    session.activate();

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = receiver.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => {
                            if let Err(e) = session.handle_command(cmd).await {
                                session.report(&e);
                            }
                        }
                        Err(e) => {
                            warn!(
                                "{} bad command: {} -- raw: {}",
                                user_id,
                                e,
                                truncate(&text, 200)
                            );
                            session.report(&GatewayError::malformed(&e.to_string()));
                        }
                    },
                    Message::Pong(_) => pong_received.store(true, Ordering::Release),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    session.close().await;
    send_task.abort();
    info!("{} disconnected from gateway", user_id);
}

/// Drain the outbound queue onto the socket and run the heartbeat.
///
/// Each write has a `push_timeout` deadline. A missed deadline ends the
/// connection: the frame may already sit half-written in the sink, so the
/// peer is treated as dead and the client recovers through re-fetch after
/// reconnecting.
async fn write_loop<S>(
    mut sender: S,
    mut outbound: mpsc::Receiver<ServerEvent>,
    config: GatewayConfig,
    pong_received: Arc<AtomicBool>,
    user_id: String,
) where
    S: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize {}: {}", event.kind(), e);
                        continue;
                    }
                };
                let push = sender.send(Message::Text(text.into()));
                match tokio::time::timeout(config.push_timeout, push).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        warn!(
                            "Push of {} to {} missed its {:?} deadline, dropping connection",
                            event.kind(),
                            user_id,
                            config.push_timeout
                        );
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!(
                            "{} heartbeat timeout (missed {} pongs), dropping connection",
                            user_id, missed_heartbeats
                        );
                        break;
                    }
                }
                let ping = sender.send(Message::Ping(vec![].into()));
                match tokio::time::timeout(config.push_timeout, ping).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}

/// Connecting state: only `identify` is accepted. Anything else gets an
/// `UNAUTHENTICATED` error. Gives up when the grace period runs out.
async fn wait_for_identify(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Gateway,
) -> Option<String> {
    let grace = gateway.config().identify_timeout;

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => return None,
                _ => continue,
            };

            if let Ok(ClientCommand::Identify { token }) =
                serde_json::from_str::<ClientCommand>(&text)
            {
                if let Some(user_id) = identity::verify_token(&token, gateway.jwt_secret()) {
                    return Some(user_id);
                }
                warn!("Identify with invalid token");
            }

            let reply = GatewayError::Unauthenticated.to_event();
            if let Ok(json) = serde_json::to_string(&reply) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    return None;
                }
            }
        }
        None
    };

    tokio::time::timeout(grace, identify).await.ok().flatten()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
