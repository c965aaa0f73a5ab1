// src/types.rs
use serde::{Deserialize, Serialize};

use crate::text_record::TextEncoding;

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingMessage {
    ReaderStatus {
        success: bool,
    },
    CardStatus {
        success: bool,
        message: String,
    },
    TextRead {
        text: String,
        language: String,
        encoding: TextEncoding,
    },
    DataReadError {
        error: String,
    },
    DataWriteSuccess {
        message: String,
    },
    DataWriteError {
        error: String,
    },
    ReaderError {
        error: String,
    },
    DispatchStatus {
        enabled: bool,
    },
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingMessage {
    GetReaderStatus,
    WriteText {
        text: String,
        #[serde(default)]
        language: Option<String>,
    },
    WriteTagId,
    EnableDispatch,
    DisableDispatch,
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug, PartialEq, Eq)]
pub enum NfcCommand {
    WriteText { text: String, language: String },
    WriteTagId,
    SetDispatch { enabled: bool },
    CheckReaderStatus,
}

impl IncomingMessage {
    /// Fills in the configured language where the client sent none.
    pub fn into_command(self, default_language: &str) -> NfcCommand {
        match self {
            IncomingMessage::GetReaderStatus => NfcCommand::CheckReaderStatus,
            IncomingMessage::WriteText { text, language } => NfcCommand::WriteText {
                text,
                language: language.unwrap_or_else(|| default_language.to_string()),
            },
            IncomingMessage::WriteTagId => NfcCommand::WriteTagId,
            IncomingMessage::EnableDispatch => NfcCommand::SetDispatch { enabled: true },
            IncomingMessage::DisableDispatch => NfcCommand::SetDispatch { enabled: false },
        }
    }
}

pub const ATR_MIFARE_1K: u8 = 0x6A; // MIFARE Classic 1K

// Data area written into the capability container when formatting a blank
// Type 2 tag (NTAG213, the smallest common part)
pub const NTAG_DEFAULT_DATA_AREA: usize = 144;

// User-facing notices
pub const MSG_NO_TAG: &str = "No NFC Tag Detected";
pub const MSG_WRITE_SUCCESS: &str = "Text Written Successfully";
pub const MSG_WRITE_ERROR: &str = "Error during writing, try again";
pub const MSG_NOT_FORMATABLE: &str = "NFC Tag is not NDEF format-able.";
pub const MSG_CARD_DETECTED: &str = "Card Detected";
pub const MSG_CARD_REMOVED: &str = "Card removed!";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_wire_shape() {
        let msg = OutgoingMessage::TextRead {
            text: "Hi".into(),
            language: "en".into(),
            encoding: TextEncoding::Utf8,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "type": "TEXT_READ",
                "text": "Hi",
                "language": "en",
                "encoding": "UTF8"
            })
        );
    }

    #[test]
    fn incoming_write_text_defaults_language() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"WRITE_TEXT","text":"hello"}"#).unwrap();
        assert_eq!(
            msg.into_command("de"),
            NfcCommand::WriteText {
                text: "hello".into(),
                language: "de".into()
            }
        );
    }

    #[test]
    fn incoming_unit_variants() {
        let msg: IncomingMessage = serde_json::from_str(r#"{"type":"DISABLE_DISPATCH"}"#).unwrap();
        assert_eq!(msg.into_command("en"), NfcCommand::SetDispatch { enabled: false });

        let msg: IncomingMessage = serde_json::from_str(r#"{"type":"WRITE_TAG_ID"}"#).unwrap();
        assert_eq!(msg, IncomingMessage::WriteTagId);
    }
}
