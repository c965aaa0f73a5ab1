pub mod apdu;
pub mod cards;
pub mod config;
pub mod ndef;
pub mod nfc_service;
pub mod session;
pub mod text_record;
pub mod types;
pub mod ws;

pub use text_record::{CodecError, TextEncoding, TextRecordPayload, decode, encode, encode_with};
