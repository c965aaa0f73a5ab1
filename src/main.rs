use anyhow::Result;
use crossbeam_channel::unbounded;
use log::info;
use tokio::sync::broadcast;

use nfc_text_service::config::Config;
use nfc_text_service::types::{NfcCommand, OutgoingMessage};
use nfc_text_service::{nfc_service, ws};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load()?;
    info!("Starting NFC text service with {:?}", config);

    // Channel: WS -> NFC (Commands)
    // Crossbeam (Sync) because the NFC thread blocks on PC/SC
    let (cmd_tx, cmd_rx) = unbounded::<NfcCommand>();

    // Channel: NFC -> WS (Events), fanned out to clients by Tokio Broadcast
    let (event_tx, event_rx) = broadcast::channel::<OutgoingMessage>(100);

    // NFC thread -> bridge -> broadcast
    let (bridge_tx, bridge_rx) = unbounded::<OutgoingMessage>();
    let nfc_config = config.clone();
    std::thread::spawn(move || {
        nfc_service::run(bridge_tx, cmd_rx, nfc_config);
    });
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    ws::start_server(config.bind, config.language, cmd_tx, event_rx).await;
    Ok(())
}
