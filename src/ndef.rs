// src/ndef.rs
use thiserror::Error;

use crate::text_record::{self, CodecError, TextRecordPayload};

// Header flags
// Bit 7: MB, Bit 6: ME, Bit 5: CF, Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const RTD_TEXT: &[u8] = b"T";

// TLV tags used on Type 2 tags and MIFARE Classic NDEF sectors
pub const TLV_NULL: u8 = 0x00;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NdefError {
    #[error("Empty NDEF message")]
    Empty,

    #[error("Truncated NDEF data: {0}")]
    Truncated(&'static str),

    #[error("Chunked records are not supported")]
    ChunkedUnsupported,

    #[error("No NDEF TLV found")]
    NoNdefTlv,

    #[error("No text record in message")]
    NoTextRecord,

    #[error("Record too large: {0} bytes")]
    TooLarge(usize),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Type Name Format (how to interpret the record type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty,
    WellKnown,
    Mime,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl Tnf {
    pub fn from_bits(bits: u8) -> Self {
        match bits & TNF_MASK {
            0x00 => Tnf::Empty,
            0x01 => Tnf::WellKnown,
            0x02 => Tnf::Mime,
            0x03 => Tnf::AbsoluteUri,
            0x04 => Tnf::External,
            0x05 => Tnf::Unknown,
            0x06 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Tnf::Empty => 0x00,
            Tnf::WellKnown => 0x01,
            Tnf::Mime => 0x02,
            Tnf::AbsoluteUri => 0x03,
            Tnf::External => 0x04,
            Tnf::Unknown => 0x05,
            Tnf::Unchanged => 0x06,
            Tnf::Reserved => 0x07,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: Tnf,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    /// Well-known "T" record with an empty id.
    pub fn text(text: &str, language: &str) -> Result<Self, CodecError> {
        Ok(NdefRecord {
            tnf: Tnf::WellKnown,
            record_type: RTD_TEXT.to_vec(),
            id: Vec::new(),
            payload: text_record::encode(text, language)?,
        })
    }

    pub fn is_text(&self) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type == RTD_TEXT
    }

    /// Decodes the payload when this is a text record.
    pub fn as_text(&self) -> Option<Result<TextRecordPayload, CodecError>> {
        if self.is_text() {
            Some(text_record::decode(&self.payload))
        } else {
            None
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>, mb: bool, me: bool) -> Result<(), NdefError> {
        if self.record_type.len() > u8::MAX as usize {
            return Err(NdefError::TooLarge(self.record_type.len()));
        }
        if self.id.len() > u8::MAX as usize {
            return Err(NdefError::TooLarge(self.id.len()));
        }
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| NdefError::TooLarge(self.payload.len()))?;

        let short_record = self.payload.len() <= u8::MAX as usize;
        let has_id = !self.id.is_empty();

        let mut header = self.tnf.bits();
        if mb {
            header |= FLAG_MB;
        }
        if me {
            header |= FLAG_ME;
        }
        if short_record {
            header |= FLAG_SR;
        }
        if has_id {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(self.record_type.len() as u8);
        if short_record {
            out.push(payload_len as u8);
        } else {
            out.extend_from_slice(&payload_len.to_be_bytes());
        }
        if has_id {
            out.push(self.id.len() as u8);
        }
        out.extend_from_slice(&self.record_type);
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

pub fn encode_message(records: &[NdefRecord]) -> Result<Vec<u8>, NdefError> {
    if records.is_empty() {
        return Err(NdefError::Empty);
    }
    let mut message = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let mb = i == 0;
        let me = i == records.len() - 1;
        record.encode_into(&mut message, mb, me)?;
    }
    Ok(message)
}

/// Single text record message, wrapped in the TLV the card expects.
pub fn encode_text_tlv(text: &str, language: &str) -> Result<Vec<u8>, NdefError> {
    let message = encode_message(&[NdefRecord::text(text, language)?])?;
    wrap_tlv(&message)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], NdefError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(NdefError::Truncated(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, NdefError> {
        Ok(self.take(1, what)?[0])
    }

    fn remaining(&self) -> bool {
        self.pos < self.data.len()
    }
}

pub fn parse_message(data: &[u8]) -> Result<Vec<NdefRecord>, NdefError> {
    if data.is_empty() {
        return Err(NdefError::Empty);
    }

    let mut records = Vec::new();
    let mut cursor = Cursor { data, pos: 0 };

    while cursor.remaining() {
        let header = cursor.byte("header")?;
        if header & FLAG_CF != 0 {
            return Err(NdefError::ChunkedUnsupported);
        }
        let is_short_record = header & FLAG_SR != 0;
        let has_id = header & FLAG_IL != 0;
        let is_me = header & FLAG_ME != 0;

        let type_len = cursor.byte("type length")? as usize;

        // 1 byte for Short Record, 4 bytes otherwise
        let payload_len = if is_short_record {
            cursor.byte("payload length")? as usize
        } else {
            let raw = cursor.take(4, "payload length")?;
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
        };

        let id_len = if has_id {
            cursor.byte("id length")? as usize
        } else {
            0
        };

        let record_type = cursor.take(type_len, "type")?.to_vec();
        let id = cursor.take(id_len, "id")?.to_vec();
        let payload = cursor.take(payload_len, "payload")?.to_vec();

        records.push(NdefRecord {
            tnf: Tnf::from_bits(header),
            record_type,
            id,
            payload,
        });

        if is_me {
            break;
        }
    }

    Ok(records)
}

pub fn wrap_tlv(ndef_bytes: &[u8]) -> Result<Vec<u8>, NdefError> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    // L: one byte, or 0xFF followed by a 2-byte length
    if ndef_bytes.len() < 0xFF {
        tlv.push(ndef_bytes.len() as u8);
    } else if ndef_bytes.len() <= u16::MAX as usize {
        tlv.push(0xFF);
        tlv.extend_from_slice(&(ndef_bytes.len() as u16).to_be_bytes());
    } else {
        return Err(NdefError::TooLarge(ndef_bytes.len()));
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    Ok(tlv)
}

/// Length of a TLV block (tag + length + value), or None while the header
/// or value is still incomplete. Used to stop reading a card early.
pub fn tlv_span(buffer: &[u8]) -> Option<usize> {
    let mut pos = 0;
    loop {
        match *buffer.get(pos)? {
            TLV_NULL => pos += 1,
            TLV_TERMINATOR => return Some(pos + 1),
            _ => {
                let (len, header) = read_tlv_len(&buffer[pos + 1..])?;
                let end = pos + 1 + header + len;
                if buffer[pos] == TLV_NDEF {
                    return (end <= buffer.len()).then_some(end);
                }
                pos = end;
            }
        }
    }
}

fn read_tlv_len(buffer: &[u8]) -> Option<(usize, usize)> {
    match *buffer.first()? {
        0xFF => {
            let hi = *buffer.get(1)? as usize;
            let lo = *buffer.get(2)? as usize;
            Some(((hi << 8) | lo, 3))
        }
        len => Some((len as usize, 1)),
    }
}

/// Finds the NDEF message TLV in a tag's data area.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<&[u8], NdefError> {
    let mut pos = 0;
    while pos < buffer.len() {
        let tag = buffer[pos];
        match tag {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => break,
            _ => {}
        }

        let (len, header) =
            read_tlv_len(&buffer[pos + 1..]).ok_or(NdefError::Truncated("TLV length"))?;
        let start = pos + 1 + header;
        let end = start + len;
        if end > buffer.len() {
            return Err(NdefError::Truncated("TLV value"));
        }
        if tag == TLV_NDEF {
            return Ok(&buffer[start..end]);
        }
        // Lock control, memory control and proprietary TLVs are skipped
        pos = end;
    }
    Err(NdefError::NoNdefTlv)
}

/// Decodes the first text record stored in a tag's TLV area.
pub fn first_text(buffer: &[u8]) -> Result<TextRecordPayload, NdefError> {
    let message = unwrap_tlv(buffer)?;
    let records = parse_message(message)?;
    let record = records
        .iter()
        .find(|r| r.is_text())
        .ok_or(NdefError::NoTextRecord)?;
    Ok(text_record::decode(&record.payload)?)
}
