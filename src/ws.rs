// src/ws.rs
use crate::types::{IncomingMessage, NfcCommand, OutgoingMessage};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::Filter;

pub async fn start_server(
    bind: SocketAddr,
    default_language: String,
    nfc_cmd_tx: Sender<NfcCommand>,
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // Forward NFC Events -> All WS Clients
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        loop {
            match nfc_event_rx.recv().await {
                Ok(msg) => {
                    let _ = ws_tx_clone.send(msg);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} NFC events, clients too slow", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let default_language = Arc::new(default_language);
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();
            let default_language = default_language.clone();
            ws.on_upgrade(move |socket| {
                handle_connection(socket, nfc_cmd_tx, ws_tx, default_language)
            })
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", bind);
    warp::serve(routes).run(bind).await;
}

/// Maps one client text frame to a command for the NFC thread.
pub fn parse_client_message(text: &str, default_language: &str) -> Option<NfcCommand> {
    match serde_json::from_str::<IncomingMessage>(text) {
        Ok(parsed) => Some(parsed.into_command(default_language)),
        Err(e) => {
            debug!("Ignoring client message {:?}: {}", text, e);
            None
        }
    }
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
    default_language: Arc<String>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();

    // Broadcasts -> Client
    tokio::spawn(async move {
        while let Ok(msg) = rx_broadcast.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Could not serialize {:?}: {}", msg, e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Client -> NFC thread
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };
        if let Some(cmd) = parse_client_message(text, &default_language) {
            debug!("Client command: {:?}", cmd);
            if nfc_cmd_tx.send(cmd).is_err() {
                warn!("NFC thread is gone, closing client");
                break;
            }
        }
    }
}
