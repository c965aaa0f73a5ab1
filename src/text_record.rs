// src/text_record.rs
// NFC Forum Text Record payload: [Status Byte] + [Lang Code] + [Text]
use std::str;

use serde::Serialize;
use thiserror::Error;

// Status byte: Bit 7 = encoding, Bit 6 = reserved, Bits 5-0 = lang length
pub const ENCODING_UTF16_BIT: u8 = 0x80;
pub const LANGUAGE_LENGTH_MASK: u8 = 0x3F;
pub const MAX_LANGUAGE_LEN: usize = LANGUAGE_LENGTH_MASK as usize;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid language tag: {0}")]
    InvalidLanguageTag(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextEncoding {
    Utf8,
    Utf16,
}

impl TextEncoding {
    fn from_status(status_byte: u8) -> Self {
        if status_byte & ENCODING_UTF16_BIT != 0 {
            TextEncoding::Utf16
        } else {
            TextEncoding::Utf8
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecordPayload {
    pub language: String,
    pub encoding: TextEncoding,
    pub text: String,
}

/// Checks a language tag against the 6-bit length field.
pub fn validate_language(language: &str) -> Result<(), CodecError> {
    if language.len() > MAX_LANGUAGE_LEN {
        return Err(CodecError::InvalidLanguageTag(format!(
            "{} bytes exceeds the {} byte limit",
            language.len(),
            MAX_LANGUAGE_LEN
        )));
    }
    if !language.is_ascii() {
        return Err(CodecError::InvalidLanguageTag(format!(
            "{:?} is not ASCII",
            language
        )));
    }
    Ok(())
}

/// Builds a text payload. Writes always mark UTF-8.
pub fn encode(text: &str, language: &str) -> Result<Vec<u8>, CodecError> {
    encode_with(text, language, TextEncoding::Utf8)
}

/// Builds a text payload in the requested encoding.
///
/// UTF-16 text is written big-endian without a byte order mark, which is
/// what readers assume when no BOM is present.
pub fn encode_with(
    text: &str,
    language: &str,
    encoding: TextEncoding,
) -> Result<Vec<u8>, CodecError> {
    validate_language(language)?;

    let mut status_byte = language.len() as u8;
    if encoding == TextEncoding::Utf16 {
        status_byte |= ENCODING_UTF16_BIT;
    }

    let mut payload = Vec::with_capacity(1 + language.len() + text.len());
    payload.push(status_byte);
    payload.extend_from_slice(language.as_bytes());
    match encoding {
        TextEncoding::Utf8 => payload.extend_from_slice(text.as_bytes()),
        TextEncoding::Utf16 => {
            for unit in text.encode_utf16() {
                payload.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }
    Ok(payload)
}

pub fn decode(payload: &[u8]) -> Result<TextRecordPayload, CodecError> {
    let (&status_byte, rest) = payload
        .split_first()
        .ok_or_else(|| CodecError::MalformedPayload("empty payload".into()))?;

    let encoding = TextEncoding::from_status(status_byte);
    let lang_len = (status_byte & LANGUAGE_LENGTH_MASK) as usize;

    if rest.len() < lang_len {
        return Err(CodecError::MalformedPayload(format!(
            "language code needs {} bytes, only {} present",
            lang_len,
            rest.len()
        )));
    }
    let (lang_bytes, text_bytes) = rest.split_at(lang_len);

    if !lang_bytes.is_ascii() {
        return Err(CodecError::MalformedPayload(
            "language code is not ASCII".into(),
        ));
    }
    let language: String = lang_bytes.iter().map(|&b| b as char).collect();

    let text = match encoding {
        TextEncoding::Utf8 => str::from_utf8(text_bytes)
            .map(|s| s.to_string())
            .map_err(|e| CodecError::UnsupportedEncoding(format!("UTF-8: {}", e)))?,
        TextEncoding::Utf16 => decode_utf16(text_bytes)?,
    };

    Ok(TextRecordPayload {
        language,
        encoding,
        text,
    })
}

fn decode_utf16(bytes: &[u8]) -> Result<String, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::UnsupportedEncoding(format!(
            "UTF-16: odd byte count {}",
            bytes.len()
        )));
    }

    let (big_endian, body) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (true, rest),
        [0xFF, 0xFE, rest @ ..] => (false, rest),
        _ => (true, bytes),
    };

    let units = body.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });

    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| CodecError::UnsupportedEncoding(format!("UTF-16: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_hello_en() {
        let bytes = encode("Hello", "en").unwrap();
        assert_eq!(bytes, [0x02, 0x65, 0x6E, 0x48, 0x65, 0x6C, 0x6C, 0x6F]);
    }

    #[test]
    fn decodes_hi_en() {
        let record = decode(&[0x02, 0x65, 0x6E, 0x48, 0x69]).unwrap();
        assert_eq!(record.language, "en");
        assert_eq!(record.encoding, TextEncoding::Utf8);
        assert_eq!(record.text, "Hi");
    }

    #[test]
    fn language_mask_is_six_bits() {
        // 0o63 (0x33) would clear bits 2 and 3 of the length.
        assert_eq!(LANGUAGE_LENGTH_MASK, 0x3F);

        let lang = "abcde-fghijklmnopqrstu"; // 22 bytes, 0x16
        let bytes = encode("x", lang).unwrap();
        assert_eq!(bytes[0], 0x16);
        assert_eq!(decode(&bytes).unwrap().language, lang);
    }

    #[test]
    fn reserved_bit_is_ignored() {
        let record = decode(&[0x42, b'e', b'n', b'o', b'k']).unwrap();
        assert_eq!(record.language, "en");
        assert_eq!(record.text, "ok");
    }

    #[test]
    fn rejects_long_language() {
        let lang = "a".repeat(64);
        assert!(matches!(
            encode("text", &lang),
            Err(CodecError::InvalidLanguageTag(_))
        ));
        assert!(encode("text", &"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_non_ascii_language() {
        assert!(matches!(
            encode("text", "für"),
            Err(CodecError::InvalidLanguageTag(_))
        ));
        assert!(matches!(
            decode(&[0x01, 0xC3, b'x']),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn empty_payload_is_malformed() {
        assert!(matches!(decode(&[]), Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn short_payload_is_malformed() {
        assert!(matches!(
            decode(&[0x05, b'e', b'n']),
            Err(CodecError::MalformedPayload(_))
        ));
        // Exactly status + language with no text is fine
        let record = decode(&[0x02, b'e', b'n']).unwrap();
        assert_eq!(record.text, "");
    }

    #[test]
    fn invalid_utf8_text() {
        assert!(matches!(
            decode(&[0x02, b'e', b'n', 0xC3, 0x28]),
            Err(CodecError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn decodes_utf16_without_bom() {
        let record = decode(&[0x82, 0x65, 0x6E, 0x00, 0x48, 0x00, 0x69]).unwrap();
        assert_eq!(record.encoding, TextEncoding::Utf16);
        assert_eq!(record.text, "Hi");
    }

    #[test]
    fn decodes_utf16_little_endian_bom() {
        let record = decode(&[0x82, b'e', b'n', 0xFF, 0xFE, 0x48, 0x00, 0x69, 0x00]).unwrap();
        assert_eq!(record.text, "Hi");
    }

    #[test]
    fn rejects_odd_utf16() {
        assert!(matches!(
            decode(&[0x82, b'e', b'n', 0x00, 0x48, 0x00]),
            Err(CodecError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn rejects_lone_surrogate() {
        assert!(matches!(
            decode(&[0x80, 0xD8, 0x00]),
            Err(CodecError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn utf16_write_sets_encoding_bit() {
        let bytes = encode_with("Hé", "fr", TextEncoding::Utf16).unwrap();
        assert_eq!(bytes, [0x82, b'f', b'r', 0x00, 0x48, 0x00, 0xE9]);

        let record = decode(&bytes).unwrap();
        assert_eq!(record.encoding, TextEncoding::Utf16);
        assert_eq!(record.text, "Hé");
    }
}
