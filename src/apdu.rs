// src/apdu.rs
// PC/SC pseudo-APDUs understood by ACR122U-class readers
use log::debug;
use pcsc::Card;
use thiserror::Error;

pub const KEY_TYPE_A: u8 = 0x60;
pub const KEY_TYPE_B: u8 = 0x61;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Transmit Error: {0}")]
    Transmit(#[from] pcsc::Error),

    #[error("Card returned status {sw1:02X} {sw2:02X}")]
    Status { sw1: u8, sw2: u8 },

    #[error("Short response: {0:02X?}")]
    ShortResponse(Vec<u8>),

    #[error("Authentication failed for block {0}")]
    AuthFailed(u8),

    #[error("Tag is full: need {needed} bytes, capacity {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Tag is not NDEF formatted")]
    NotFormatted,

    #[error("No data could be read from the card")]
    NoData,
}

/// Anything that can carry an APDU to a tag and hand back the response data
/// with the status word checked and stripped.
pub trait Transceive {
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>, TagError>;
}

impl Transceive for Card {
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>, TagError> {
        let mut recv_buffer = [0u8; 258];
        let resp = Card::transmit(self, apdu, &mut recv_buffer)?;
        debug!("APDU {:02X?} -> {:02X?}", apdu, resp);
        check_status(resp)
    }
}

// 0x90 0x00 is Success
pub fn check_status(resp: &[u8]) -> Result<Vec<u8>, TagError> {
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        [.., sw1, sw2] => Err(TagError::Status {
            sw1: *sw1,
            sw2: *sw2,
        }),
        _ => Err(TagError::ShortResponse(resp.to_vec())),
    }
}

// Get Data: FF CA 00 00 00
pub fn get_uid<T: Transceive + ?Sized>(card: &T) -> Result<Vec<u8>, TagError> {
    let uid = card.transmit(&[0xFF, 0xCA, 0x00, 0x00, 0x00])?;
    if uid.is_empty() {
        return Err(TagError::ShortResponse(uid));
    }
    Ok(uid)
}

// Load Authentication Keys into Reader Memory (Location 0x00)
// FF 82 00 key_num 06 [KEY]
pub fn load_key<T: Transceive + ?Sized>(card: &T, key: &[u8; 6]) -> Result<(), TagError> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    card.transmit(&apdu).map(|_| ())
}

// FF 86 00 00 05 01 00 Block KeyType KeyNumber
pub fn authenticate<T: Transceive + ?Sized>(
    card: &T,
    block: u8,
    key_type: u8,
) -> Result<(), TagError> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    card.transmit(&apdu)
        .map(|_| ())
        .map_err(|_| TagError::AuthFailed(block))
}

// Read: FF B0 00 Block Len
pub fn read_binary<T: Transceive + ?Sized>(
    card: &T,
    block: u8,
    length: u8,
) -> Result<Vec<u8>, TagError> {
    let data = card.transmit(&[0xFF, 0xB0, 0x00, block, length])?;
    if data.len() < length as usize {
        return Err(TagError::ShortResponse(data));
    }
    Ok(data)
}

// Write: FF D6 00 Block Len [Data]
pub fn update_binary<T: Transceive + ?Sized>(
    card: &T,
    block: u8,
    data: &[u8],
) -> Result<(), TagError> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, data.len() as u8];
    apdu.extend_from_slice(data);
    card.transmit(&apdu).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_is_stripped() {
        assert_eq!(check_status(&[0x01, 0x02, 0x90, 0x00]).unwrap(), vec![0x01, 0x02]);
        assert!(check_status(&[0x90, 0x00]).unwrap().is_empty());
    }

    #[test]
    fn error_status_is_reported() {
        assert!(matches!(
            check_status(&[0x63, 0x00]),
            Err(TagError::Status {
                sw1: 0x63,
                sw2: 0x00
            })
        ));
        assert!(matches!(check_status(&[0x90]), Err(TagError::ShortResponse(_))));
    }
}
