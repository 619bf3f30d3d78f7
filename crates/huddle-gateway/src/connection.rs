use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use huddle_types::events::{ClientEvent, ServerEvent};
use huddle_types::models::Identity;

use crate::engine::{Engine, Joined};
use crate::session::Delivery;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MISSED_PONGS_ALLOWED: u8 = 2;

type Sender = SplitSink<WebSocket, Message>;

/// Drive one WebSocket session from join to disconnect.
pub async fn handle_connection(socket: WebSocket, engine: Engine, identity: Identity, ip: Option<IpAddr>) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = identity.user_id.clone();
    let Joined {
        mut session,
        load_data,
        mut feed,
        mut direct_rx,
    } = match engine.join(identity, ip).await {
        Ok(joined) => joined,
        Err(e) => {
            error!("{} could not join: {:#}", user_id, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        "{} connected (session {}, {})",
        user_id,
        session.id,
        ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown ip".into())
    );

    if !send_event(&mut sender, &ServerEvent::RequestProfile).await
        || !send_event(&mut sender, &load_data).await
    {
        engine.leave(&mut session).await;
        return;
    }
    session.mark_joined();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let session_id = session.id;
    let live_engine = engine.clone();

    // Forward broadcasts + private replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = live_engine.next_live(&mut feed) => {
                    match result {
                        Ok(Delivery::Event(msg)) => {
                            if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(Delivery::Resync(load_data)) => {
                            if !send_event(&mut sender, &load_data).await {
                                break;
                            }
                        }
                        Ok(Delivery::Closed) => break,
                        Err(e) => {
                            error!("session {} could not resync: {}", session_id, e);
                            break;
                        }
                    }
                }
                result = direct_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MISSED_PONGS_ALLOWED {
                            warn!("session {} missed {} pongs, dropping connection", session_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read events from the client. Runs on this task so the session stays ours.
    let recv_loop = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => engine.dispatch(&mut session, event).await,
                    Err(e) => {
                        warn!(
                            "session {} bad frame: {} -- raw: {}",
                            session.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => pong_received.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        _ = recv_loop => {}
    }
    send_task.abort();

    engine.leave(&mut session).await;
    info!("{} disconnected (session {})", user_id, session_id);
}

/// Serialize and send one event. False once the socket is gone.
async fn send_event(sender: &mut Sender, event: &ServerEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {}: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
