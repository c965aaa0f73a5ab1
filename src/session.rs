// src/session.rs
// Tag handle + dispatch flag for the reader, and the read/write flows on top of them
use std::ffi::{CStr, CString};

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use pcsc::{Context, Protocols, ShareMode};
use thiserror::Error;

use crate::apdu::{self, TagError, Transceive};
use crate::cards::{TagHandle, TagKind};
use crate::ndef::{self, NdefError};
use crate::text_record::TextRecordPayload;
use crate::types::{
    MSG_CARD_DETECTED, MSG_CARD_REMOVED, MSG_NO_TAG, MSG_NOT_FORMATABLE, MSG_WRITE_ERROR,
    MSG_WRITE_SUCCESS, OutgoingMessage,
};

/// Where user-facing notices go.
pub trait Notifier {
    fn notify(&self, msg: OutgoingMessage);
}

impl Notifier for Sender<OutgoingMessage> {
    fn notify(&self, msg: OutgoingMessage) {
        if self.send(msg).is_err() {
            debug!("Notice dropped, event channel closed");
        }
    }
}

/// Opens a connection to the tag behind a handle for the duration of `f`.
pub trait TagConnector {
    fn with_card<R>(
        &self,
        tag: &TagHandle,
        f: impl FnOnce(&dyn Transceive) -> R,
    ) -> Result<R, TagError>;
}

impl TagConnector for Context {
    fn with_card<R>(
        &self,
        tag: &TagHandle,
        f: impl FnOnce(&dyn Transceive) -> R,
    ) -> Result<R, TagError> {
        let card = self.connect(&tag.reader, ShareMode::Shared, Protocols::ANY)?;
        Ok(f(&card))
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("No NFC Tag Detected")]
    NoTag,

    #[error(transparent)]
    Ndef(#[from] NdefError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("Format failed: {0}")]
    NotFormatable(TagError),

    #[error("Tag UID unknown")]
    UidUnavailable,
}

pub struct NfcSession<N: Notifier> {
    notifier: N,
    tag: Option<TagHandle>,
    dispatch_enabled: bool,
}

impl<N: Notifier> NfcSession<N> {
    pub fn new(notifier: N, dispatch_enabled: bool) -> Self {
        NfcSession {
            notifier,
            tag: None,
            dispatch_enabled,
        }
    }

    pub fn tag(&self) -> Option<&TagHandle> {
        self.tag.as_ref()
    }

    pub fn dispatch_enabled(&self) -> bool {
        self.dispatch_enabled
    }

    pub fn enable_dispatch(&mut self) {
        self.set_dispatch(true);
    }

    pub fn disable_dispatch(&mut self) {
        self.set_dispatch(false);
    }

    fn set_dispatch(&mut self, enabled: bool) {
        self.dispatch_enabled = enabled;
        info!("Tag dispatch {}", if enabled { "enabled" } else { "disabled" });
        self.notifier
            .notify(OutgoingMessage::DispatchStatus { enabled });
    }

    /// Handles a tag arriving on `reader`. Returns false when dispatch is off
    /// and the tag was ignored.
    pub fn on_tag_discovered<T: Transceive + ?Sized>(
        &mut self,
        reader: CString,
        kind: TagKind,
        card: &T,
    ) -> bool {
        if !self.dispatch_enabled {
            debug!("Tag on {:?} ignored, dispatch disabled", reader);
            return false;
        }

        self.notifier.notify(OutgoingMessage::CardStatus {
            success: true,
            message: MSG_CARD_DETECTED.into(),
        });

        let uid = apdu::get_uid(card).unwrap_or_else(|e| {
            warn!("Could not read tag UID: {}", e);
            Vec::new()
        });
        let handle = TagHandle { reader, kind, uid };
        info!(
            "Tag {} ({:?}) on {:?}",
            handle.uid_hex(),
            handle.kind,
            handle.reader
        );
        self.tag = Some(handle);

        self.read_text(kind, card);
        true
    }

    /// Clears the handle when the tag it holds was on `reader`.
    pub fn on_tag_removed(&mut self, reader: &CStr) {
        let Some(tag) = self.tag.take_if(|tag| tag.reader.as_c_str() == reader) else {
            return;
        };
        info!("Tag {} removed from {:?}", tag.uid_hex(), tag.reader);
        self.notifier.notify(OutgoingMessage::CardStatus {
            success: false,
            message: MSG_CARD_REMOVED.into(),
        });
    }

    /// Reads the first text record and reports it.
    pub fn read_text<T: Transceive + ?Sized>(
        &self,
        kind: TagKind,
        card: &T,
    ) -> Option<TextRecordPayload> {
        let result = kind
            .read_ndef_area(card)
            .map_err(|e| e.to_string())
            .and_then(|area| ndef::first_text(&area).map_err(|e| e.to_string()));

        match result {
            Ok(record) => {
                info!("Read {:?} text ({})", record.encoding, record.language);
                self.notifier.notify(OutgoingMessage::TextRead {
                    text: record.text.clone(),
                    language: record.language.clone(),
                    encoding: record.encoding,
                });
                Some(record)
            }
            Err(e) => {
                warn!("Tag read failed: {}", e);
                self.notifier
                    .notify(OutgoingMessage::DataReadError { error: e });
                None
            }
        }
    }

    /// Writes `text` as a single text record to the current tag, formatting
    /// it first when it has no NDEF capability container yet.
    pub fn write_text<C: TagConnector>(&self, connector: &C, text: &str, language: &str) -> bool {
        info!("Trying to write");
        let result = self.try_write_text(connector, text, language);
        self.report_write(result)
    }

    /// Writes the current tag's UID as upper-case hex text.
    pub fn write_tag_id<C: TagConnector>(&self, connector: &C, language: &str) -> bool {
        let Some(tag) = &self.tag else {
            return self.report_write(Err(WriteError::NoTag));
        };
        if tag.uid.is_empty() {
            return self.report_write(Err(WriteError::UidUnavailable));
        }
        let uid = tag.uid_hex();
        info!("Writing tag id {}", uid);
        self.write_text(connector, &uid, language)
    }

    fn try_write_text<C: TagConnector>(
        &self,
        connector: &C,
        text: &str,
        language: &str,
    ) -> Result<(), WriteError> {
        let tag = self.tag.as_ref().ok_or(WriteError::NoTag)?;
        let tlv = ndef::encode_text_tlv(text, language)?;
        connector.with_card(tag, |card| write_tlv(tag.kind, card, &tlv))?
    }

    fn report_write(&self, result: Result<(), WriteError>) -> bool {
        match result {
            Ok(()) => {
                self.notifier.notify(OutgoingMessage::DataWriteSuccess {
                    message: MSG_WRITE_SUCCESS.into(),
                });
                true
            }
            Err(WriteError::NoTag) => {
                self.notifier.notify(OutgoingMessage::DataWriteError {
                    error: MSG_NO_TAG.into(),
                });
                false
            }
            Err(e) => {
                error!("Write failed: {}", e);
                let error = match &e {
                    WriteError::NotFormatable(cause) => {
                        format!("{} ({})", MSG_NOT_FORMATABLE, cause)
                    }
                    _ => format!("{} ({})", MSG_WRITE_ERROR, e),
                };
                self.notifier
                    .notify(OutgoingMessage::DataWriteError { error });
                false
            }
        }
    }
}

fn write_tlv(kind: TagKind, card: &dyn Transceive, tlv: &[u8]) -> Result<(), WriteError> {
    if !kind.is_formatted(card)? {
        info!("Tag has no NDEF container, formatting");
        kind.format(card).map_err(WriteError::NotFormatable)?;
    }
    kind.write_ndef_area(card, tlv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::cards::fake::FakeNtag;
    use crate::text_record::TextEncoding;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<OutgoingMessage>>);

    impl Notifier for &Recorder {
        fn notify(&self, msg: OutgoingMessage) {
            self.0.borrow_mut().push(msg);
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<OutgoingMessage> {
            self.0.borrow_mut().drain(..).collect()
        }
    }

    impl TagConnector for FakeNtag {
        fn with_card<R>(
            &self,
            _tag: &TagHandle,
            f: impl FnOnce(&dyn Transceive) -> R,
        ) -> Result<R, TagError> {
            Ok(f(self))
        }
    }

    fn reader() -> CString {
        CString::new("ACS ACR122U PICC Interface").unwrap()
    }

    #[test]
    fn write_without_tag_reports_no_tag() {
        let recorder = Recorder::default();
        let session = NfcSession::new(&recorder, true);
        let tag = FakeNtag::formatted(45);

        assert!(!session.write_text(&tag, "hello", "en"));
        assert_eq!(
            recorder.take(),
            vec![OutgoingMessage::DataWriteError {
                error: MSG_NO_TAG.into()
            }]
        );
    }

    #[test]
    fn discovered_blank_tag_is_formatted_on_write_and_read_back() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let tag = FakeNtag::blank(45);

        assert!(session.on_tag_discovered(reader(), TagKind::Ntag, &tag));
        let notices = recorder.take();
        assert_eq!(
            notices[0],
            OutgoingMessage::CardStatus {
                success: true,
                message: MSG_CARD_DETECTED.into()
            }
        );
        assert!(matches!(notices[1], OutgoingMessage::DataReadError { .. }));

        assert!(session.write_text(&tag, "Grüße", "de"));
        assert_eq!(
            recorder.take(),
            vec![OutgoingMessage::DataWriteSuccess {
                message: MSG_WRITE_SUCCESS.into()
            }]
        );

        let record = session.read_text(TagKind::Ntag, &tag).unwrap();
        assert_eq!(record.text, "Grüße");
        assert_eq!(record.language, "de");
        assert_eq!(record.encoding, TextEncoding::Utf8);
    }

    #[test]
    fn dispatch_disabled_ignores_tags() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        session.disable_dispatch();
        assert_eq!(
            recorder.take(),
            vec![OutgoingMessage::DispatchStatus { enabled: false }]
        );

        let tag = FakeNtag::formatted(45);
        assert!(!session.on_tag_discovered(reader(), TagKind::Ntag, &tag));
        assert!(session.tag().is_none());
        assert!(recorder.take().is_empty());

        session.enable_dispatch();
        assert!(session.on_tag_discovered(reader(), TagKind::Ntag, &tag));
        assert!(session.tag().is_some());
    }

    #[test]
    fn removal_clears_handle() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let tag = FakeNtag::formatted(45);
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);
        recorder.take();

        // Another reader emptying does not touch this tag
        let other = CString::new("Second Reader").unwrap();
        session.on_tag_removed(&other);
        assert!(session.tag().is_some());
        assert!(recorder.take().is_empty());

        session.on_tag_removed(&reader());
        assert!(session.tag().is_none());
        assert_eq!(
            recorder.take(),
            vec![OutgoingMessage::CardStatus {
                success: false,
                message: MSG_CARD_REMOVED.into()
            }]
        );

        // Second removal is silent
        session.on_tag_removed(&reader());
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn writes_uid_as_hex_text() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let tag = FakeNtag::formatted(45);
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);

        assert!(session.write_tag_id(&tag, "en"));
        let record = session.read_text(TagKind::Ntag, &tag).unwrap();
        assert_eq!(record.text, "04A1B2C3D4E580");
    }

    #[test]
    fn tag_id_write_needs_a_uid() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let mut tag = FakeNtag::formatted(45);
        tag.uid = Vec::new();
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);
        assert_eq!(session.tag().unwrap().uid, Vec::<u8>::new());
        recorder.take();

        assert!(!session.write_tag_id(&tag, "en"));
        match recorder.take().as_slice() {
            [OutgoingMessage::DataWriteError { error }] => {
                assert!(error.starts_with(MSG_WRITE_ERROR));
                assert!(error.contains("Tag UID unknown"));
            }
            other => panic!("unexpected notices: {:?}", other),
        }
        // Nothing was written over the empty NDEF area
        assert!(tag.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn failed_write_reports_error() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let mut tag = FakeNtag::formatted(45);
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);
        recorder.take();

        tag.fail_writes = true;
        assert!(!session.write_text(&tag, "hello", "en"));
        match recorder.take().as_slice() {
            [OutgoingMessage::DataWriteError { error }] => {
                assert!(error.starts_with(MSG_WRITE_ERROR))
            }
            other => panic!("unexpected notices: {:?}", other),
        }
    }

    #[test]
    fn blank_tag_that_rejects_format_is_not_formatable() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let mut tag = FakeNtag::blank(45);
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);
        recorder.take();

        tag.fail_writes = true;
        assert!(!session.write_text(&tag, "hello", "en"));
        match recorder.take().as_slice() {
            [OutgoingMessage::DataWriteError { error }] => {
                assert!(error.starts_with(MSG_NOT_FORMATABLE))
            }
            other => panic!("unexpected notices: {:?}", other),
        }
    }

    #[test]
    fn invalid_language_never_touches_tag() {
        let recorder = Recorder::default();
        let mut session = NfcSession::new(&recorder, true);
        let mut tag = FakeNtag::formatted(45);
        session.on_tag_discovered(reader(), TagKind::Ntag, &tag);
        recorder.take();

        tag.fail_writes = true;
        let long_language = "x".repeat(64);
        assert!(!session.write_text(&tag, "hello", &long_language));
        match recorder.take().as_slice() {
            [OutgoingMessage::DataWriteError { error }] => {
                assert!(error.contains("Invalid language tag"))
            }
            other => panic!("unexpected notices: {:?}", other),
        }
    }
}
