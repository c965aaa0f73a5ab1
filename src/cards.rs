// src/cards.rs
use std::ffi::CString;

use log::{debug, warn};

use crate::apdu::{self, KEY_TYPE_A, KEY_TYPE_B, TagError, Transceive};
use crate::ndef;
use crate::types::{ATR_MIFARE_1K, NTAG_DEFAULT_DATA_AREA};

// Well-known MIFARE Classic keys tried in order
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

// Type 2 layout: page 3 is the capability container, NDEF data starts at page 4
const CC_PAGE: u8 = 3;
const FIRST_DATA_PAGE: u8 = 4;
const PAGE_SIZE: usize = 4;
const CC_MAGIC: u8 = 0xE1;
const CC_VERSION_1_0: u8 = 0x10;

const MIFARE_BLOCK_SIZE: usize = 16;
const MIFARE_FIRST_SECTOR: u8 = 1;
const MIFARE_SECTORS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Ntag,
    MifareClassic,
}

impl TagKind {
    /// Classifies a card by the last byte of its ATR.
    pub fn from_atr(atr: &[u8]) -> Self {
        match atr.last() {
            Some(&ATR_MIFARE_1K) => TagKind::MifareClassic,
            _ => TagKind::Ntag,
        }
    }

    pub fn read_ndef_area<T: Transceive + ?Sized>(self, card: &T) -> Result<Vec<u8>, TagError> {
        match self {
            TagKind::Ntag => read_ntag(card),
            TagKind::MifareClassic => read_mifare(card),
        }
    }

    pub fn write_ndef_area<T: Transceive + ?Sized>(
        self,
        card: &T,
        tlv: &[u8],
    ) -> Result<(), TagError> {
        match self {
            TagKind::Ntag => write_ntag(card, tlv),
            TagKind::MifareClassic => write_mifare(card, tlv),
        }
    }

    /// MIFARE sectors are used as-is; Type 2 tags need a capability container.
    pub fn is_formatted<T: Transceive + ?Sized>(self, card: &T) -> Result<bool, TagError> {
        match self {
            TagKind::Ntag => Ok(read_capability_container(card)?.is_some()),
            TagKind::MifareClassic => Ok(true),
        }
    }

    pub fn format<T: Transceive + ?Sized>(self, card: &T) -> Result<(), TagError> {
        match self {
            TagKind::Ntag => format_ntag(card, NTAG_DEFAULT_DATA_AREA),
            TagKind::MifareClassic => Ok(()),
        }
    }
}

/// The transient handle kept for the tag currently on the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHandle {
    pub reader: CString,
    pub kind: TagKind,
    pub uid: Vec<u8>,
}

impl TagHandle {
    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

/// Data area size in bytes, or None when page 3 holds no NDEF capability container.
pub fn read_capability_container<T: Transceive + ?Sized>(
    card: &T,
) -> Result<Option<usize>, TagError> {
    let cc = apdu::read_binary(card, CC_PAGE, PAGE_SIZE as u8)?;
    if cc[0] != CC_MAGIC {
        return Ok(None);
    }
    Ok(Some(cc[2] as usize * 8))
}

/// Writes a capability container and an empty NDEF TLV.
pub fn format_ntag<T: Transceive + ?Sized>(card: &T, data_area: usize) -> Result<(), TagError> {
    let size_byte = u8::try_from(data_area / 8).map_err(|_| TagError::CapacityExceeded {
        needed: data_area,
        capacity: u8::MAX as usize * 8,
    })?;
    apdu::update_binary(card, CC_PAGE, &[CC_MAGIC, CC_VERSION_1_0, size_byte, 0x00])?;
    apdu::update_binary(
        card,
        FIRST_DATA_PAGE,
        &[ndef::TLV_NDEF, 0x00, ndef::TLV_TERMINATOR, 0x00],
    )
}

pub fn read_ntag<T: Transceive + ?Sized>(card: &T) -> Result<Vec<u8>, TagError> {
    let capacity = read_capability_container(card)?.ok_or(TagError::NotFormatted)?;

    let mut full_data = Vec::new();
    let mut page = FIRST_DATA_PAGE as usize;
    // READ BINARY of 16 bytes returns four pages at once
    while full_data.len() < capacity {
        let Ok(block) = u8::try_from(page) else {
            break;
        };
        match apdu::read_binary(card, block, 16) {
            Ok(data) => full_data.extend_from_slice(&data),
            Err(e) => {
                debug!("NTAG read stopped at page {}: {}", page, e);
                break;
            }
        }
        if ndef::tlv_span(&full_data).is_some() {
            break;
        }
        page += 4;
    }

    if full_data.is_empty() {
        return Err(TagError::NoData);
    }
    full_data.truncate(capacity);
    Ok(full_data)
}

pub fn write_ntag<T: Transceive + ?Sized>(card: &T, data: &[u8]) -> Result<(), TagError> {
    let capacity = read_capability_container(card)?.ok_or(TagError::NotFormatted)?;
    if data.len() > capacity {
        return Err(TagError::CapacityExceeded {
            needed: data.len(),
            capacity,
        });
    }

    // NTAG writes 4 bytes (1 page) at a time
    for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
        let mut page_data = [0u8; PAGE_SIZE];
        page_data[..chunk.len()].copy_from_slice(chunk);
        let page = u8::try_from(FIRST_DATA_PAGE as usize + i).map_err(|_| {
            TagError::CapacityExceeded {
                needed: data.len(),
                capacity,
            }
        })?;
        apdu::update_binary(card, page, &page_data)?;
    }
    Ok(())
}

pub fn mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 holds manufacturer data, block 3 of each sector is the trailer
    for sector in MIFARE_FIRST_SECTOR..MIFARE_SECTORS {
        for block_in_sector in 0..3 {
            blocks.push(sector * 4 + block_in_sector);
        }
    }
    blocks
}

fn authenticate_sector<T: Transceive + ?Sized>(
    card: &T,
    block: u8,
    key_types: &[u8],
) -> Result<(), TagError> {
    for key in COMMON_KEYS.iter() {
        if apdu::load_key(card, key).is_err() {
            continue;
        }
        if key_types
            .iter()
            .any(|&key_type| apdu::authenticate(card, block, key_type).is_ok())
        {
            return Ok(());
        }
    }
    Err(TagError::AuthFailed(block))
}

pub fn read_mifare<T: Transceive + ?Sized>(card: &T) -> Result<Vec<u8>, TagError> {
    let mut full_data = Vec::new();

    for block in mifare_data_blocks() {
        // Authenticate at the start of every sector (blocks 4, 8, 12, ...)
        if block % 4 == 0 {
            if let Err(e) = authenticate_sector(card, block, &[KEY_TYPE_A, KEY_TYPE_B]) {
                warn!("{}; stopping read", e);
                break;
            }
        }

        match apdu::read_binary(card, block, MIFARE_BLOCK_SIZE as u8) {
            Ok(data) => {
                full_data.extend_from_slice(&data);
                if ndef::tlv_span(&full_data).is_some() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    if full_data.is_empty() {
        return Err(TagError::NoData);
    }
    Ok(full_data)
}

pub fn write_mifare<T: Transceive + ?Sized>(card: &T, data: &[u8]) -> Result<(), TagError> {
    let blocks = mifare_data_blocks();
    let capacity = blocks.len() * MIFARE_BLOCK_SIZE;
    if data.len() > capacity {
        return Err(TagError::CapacityExceeded {
            needed: data.len(),
            capacity,
        });
    }

    let mut authenticated_sector = None;
    for (chunk, &block) in data.chunks(MIFARE_BLOCK_SIZE).zip(blocks.iter()) {
        let sector = block / 4;
        if authenticated_sector != Some(sector) {
            authenticate_sector(card, sector * 4, &[KEY_TYPE_A])?;
            authenticated_sector = Some(sector);
        }

        let mut block_data = [0u8; MIFARE_BLOCK_SIZE];
        block_data[..chunk.len()].copy_from_slice(chunk);
        apdu::update_binary(card, block, &block_data)?;
    }
    Ok(())
}
