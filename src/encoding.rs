//! String encodings used within NTLM messages.
//!
//! NTLM strings are either "wide" (UTF-16 in little-endian byte order, without a Byte Order Mark)
//! or encoded using the 8-bit OEM character set. No code page is negotiated, so OEM strings are
//! treated as ISO 8859-1, which maps every byte onto exactly one character and back.


use crate::error::{ParsingError, StoringError};


/// Encodes a string as UTF-16 in little-endian byte order.
pub(crate) fn string_to_utf16_le_bytes(string: &str) -> Vec<u8> {
    string.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Converts UTF-16 values stored as bytes in little-endian format into a string.
pub(crate) fn utf16_le_bytes_to_string(bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.len() % 2 != 0 {
        return Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: bytes.len() });
    }
    let u16s: Vec<u16> = bytes.chunks_exact(2)
        .map(|chk| u16::from_le_bytes([chk[0], chk[1]]))
        .collect();
    String::from_utf16(&u16s)
        .or(Err(ParsingError::InvalidUtf16 { value: u16s }))
}

/// Converts an OEM string into a Rust string.
pub(crate) fn oem_bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|&b| char::from(b))
        .collect()
}

/// Converts a Rust string into an OEM string, failing if a character has no 8-bit representation.
pub(crate) fn string_to_oem_bytes(string: &str) -> Result<Vec<u8>, StoringError> {
    string.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| StoringError::NonOemEncodable { string: string.to_owned() })
}

/// Encodes a string either wide or as OEM.
pub(crate) fn encode_string(string: &str, wide: bool) -> Result<Vec<u8>, StoringError> {
    if wide {
        Ok(string_to_utf16_le_bytes(string))
    } else {
        string_to_oem_bytes(string)
    }
}

/// Decodes a string either wide or as OEM.
pub(crate) fn decode_string(bytes: &[u8], wide: bool) -> Result<String, ParsingError> {
    if wide {
        utf16_le_bytes_to_string(bytes)
    } else {
        Ok(oem_bytes_to_string(bytes))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_strings() {
        assert_eq!(string_to_utf16_le_bytes("DOMAIN"), b"D\0O\0M\0A\0I\0N\0");
        assert_eq!(utf16_le_bytes_to_string(b"u\0s\0e\0r\0").unwrap(), "user");
        assert_eq!(
            utf16_le_bytes_to_string(b"u\0s"),
            Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: 3 }),
        );
        // lone high surrogate
        assert!(matches!(
            utf16_le_bytes_to_string(&[0x00, 0xD8]),
            Err(ParsingError::InvalidUtf16 { .. }),
        ));
    }

    #[test]
    fn test_oem_strings() {
        assert_eq!(string_to_oem_bytes("Gr\u{fc}\u{df}e").unwrap(), vec![b'G', b'r', 0xFC, 0xDF, b'e']);
        assert_eq!(oem_bytes_to_string(&[b'G', b'r', 0xFC, 0xDF, b'e']), "Gr\u{fc}\u{df}e");
        assert_eq!(
            string_to_oem_bytes("\u{20ac}"),
            Err(StoringError::NonOemEncodable { string: "\u{20ac}".to_owned() }),
        );
    }
}
