// src/nfc_service.rs
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode, State};
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::cards::TagKind;
use crate::config::Config;
use crate::session::NfcSession;
use crate::types::{NfcCommand, OutgoingMessage};

pub fn run(tx: Sender<OutgoingMessage>, rx: Receiver<NfcCommand>, config: Config) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::ReaderError {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut session = NfcSession::new(tx.clone(), config.dispatch_on_start);
    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();

    // Index 0 watches for readers being plugged in or removed
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(config.poll_interval(), &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. CHECK FOR COMMANDS
        let mut readers_changed = false;
        loop {
            match rx.try_recv() {
                Ok(NfcCommand::CheckReaderStatus) => readers_changed = true,
                Ok(cmd) => handle_command(&ctx, &mut session, &config, cmd),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    info!("Command channel closed, stopping NFC Service");
                    return;
                }
            }
        }

        // 3. PROCESS EVENTS
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        for i in 1..reader_states.len() {
            let rs = &reader_states[i];
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }
            let name = reader_names[i - 1].clone();
            let current = rs.event_state();
            let was_present = rs.current_state().intersects(State::PRESENT);

            if current.intersects(State::PRESENT) && !was_present {
                info!("Card Inserted on {:?}", name);
                handle_card_insertion(&ctx, &mut session, &name);
            }

            if current.intersects(State::EMPTY) && was_present {
                info!("Card Removed from {:?}", name);
                session.on_tag_removed(&name);
            }

            reader_states[i].sync_current_state();
        }

        // 4. REFRESH LIST
        if readers_changed {
            refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &tx);
            // Keep the PnP state (index 0), carry over the rest by name
            let carried = carry_reader_states(&reader_states[1..], &reader_names);
            reader_states.truncate(1);
            reader_states.extend(carried);

            // A tag on an unplugged reader is gone too
            let stale_reader = session
                .tag()
                .filter(|tag| !reader_names.contains(&tag.reader))
                .map(|tag| tag.reader.clone());
            if let Some(reader) = stale_reader {
                session.on_tag_removed(&reader);
            }
        }
    }
}

/// States for `names`, keeping what was already known about readers that are
/// still attached so a card sitting on one is not reported as a new insertion.
pub fn carry_reader_states(previous: &[ReaderState], names: &[CString]) -> Vec<ReaderState> {
    names
        .iter()
        .map(|name| {
            let known = previous
                .iter()
                .find(|rs| rs.name() == name.as_c_str())
                .map(|rs| {
                    let mut state = rs.current_state();
                    state.remove(State::CHANGED);
                    state
                })
                .unwrap_or(State::UNAWARE);
            ReaderState::new(name.clone(), known)
        })
        .collect()
}

fn refresh_readers(
    ctx: &Context,
    readers_buf: &mut [u8],
    reader_names: &mut Vec<CString>,
    tx: &Sender<OutgoingMessage>,
) {
    match ctx.list_readers(readers_buf) {
        Ok(iter) => {
            *reader_names = iter.map(CString::from).collect();
        }
        Err(err) => {
            warn!("Listing readers failed: {}", err);
            reader_names.clear();
        }
    }
    let _ = tx.send(OutgoingMessage::ReaderStatus {
        success: !reader_names.is_empty(),
    });
}

fn handle_command(
    ctx: &Context,
    session: &mut NfcSession<Sender<OutgoingMessage>>,
    config: &Config,
    cmd: NfcCommand,
) {
    match cmd {
        NfcCommand::WriteText { text, language } => {
            info!("Received Write Command ({} bytes, {})", text.len(), language);
            session.write_text(ctx, &text, &language);
        }
        NfcCommand::WriteTagId => {
            session.write_tag_id(ctx, &config.language);
        }
        NfcCommand::SetDispatch { enabled: true } => session.enable_dispatch(),
        NfcCommand::SetDispatch { enabled: false } => session.disable_dispatch(),
        // Handled by the reader refresh in the main loop
        NfcCommand::CheckReaderStatus => {}
    }
}

fn handle_card_insertion(
    ctx: &Context,
    session: &mut NfcSession<Sender<OutgoingMessage>>,
    reader_name: &CStr,
) {
    let card = match ctx.connect(reader_name, ShareMode::Shared, Protocols::ANY) {
        Ok(card) => card,
        Err(e) => {
            error!("Failed to connect to card: {}", e);
            return;
        }
    };

    let mut names_buf = [0u8; 128];
    let mut atr_buf = [0u8; 64];
    let kind = match card.status2(&mut names_buf, &mut atr_buf) {
        Ok(status) => TagKind::from_atr(status.atr()),
        Err(e) => {
            warn!("Card status unavailable ({}), assuming NTAG", e);
            TagKind::Ntag
        }
    };

    session.on_tag_discovered(reader_name.to_owned(), kind, &card);
}
