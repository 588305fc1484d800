//! Identity payload for the Wave characteristic
//!
//! The characteristic value is the UTF-8 session id, nothing more. The only
//! constraints are the ones the attribute protocol imposes: a value must fit in
//! a single attribute, and an empty identity is never broadcast.

use thiserror::Error;

/// Maximum attribute value size (ATT protocol limitation)
pub const MAX_ATTRIBUTE_SIZE: usize = 512;

/// Errors for payload encoding and decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Identity is empty")]
    Empty,
    #[error("Identity too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a session identity into the characteristic value
pub fn encode_identity(identity: &str) -> Result<Vec<u8>, PayloadError> {
    if identity.is_empty() {
        return Err(PayloadError::Empty);
    }
    check_len(identity.len())?;
    Ok(identity.as_bytes().to_vec())
}

/// Decode a characteristic value read from a peer
pub fn decode_identity(bytes: &[u8]) -> Result<String, PayloadError> {
    if bytes.is_empty() {
        return Err(PayloadError::Empty);
    }
    check_len(bytes.len())?;
    String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::InvalidUtf8)
}

fn check_len(len: usize) -> Result<(), PayloadError> {
    if len > MAX_ATTRIBUTE_SIZE {
        return Err(PayloadError::TooLarge {
            len,
            max: MAX_ATTRIBUTE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_empty_rejected() {
        assert_eq!(encode_identity(""), Err(PayloadError::Empty));
    }

    #[test]
    fn test_encode_at_limit() {
        let identity = "a".repeat(MAX_ATTRIBUTE_SIZE);
        let bytes = encode_identity(&identity).expect("Identity at limit");
        assert_eq!(bytes.len(), MAX_ATTRIBUTE_SIZE);
    }

    #[test]
    fn test_encode_over_limit() {
        let identity = "a".repeat(MAX_ATTRIBUTE_SIZE + 1);
        assert_eq!(
            encode_identity(&identity),
            Err(PayloadError::TooLarge {
                len: MAX_ATTRIBUTE_SIZE + 1,
                max: MAX_ATTRIBUTE_SIZE
            })
        );
    }

    #[test]
    fn test_decode_malformed_utf8() {
        assert_eq!(
            decode_identity(&[0xC3, 0x28]),
            Err(PayloadError::InvalidUtf8)
        );
        assert_eq!(decode_identity(&[0xFF, 0xFE, 0xFD]), Err(PayloadError::InvalidUtf8));
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode_identity(&[]), Err(PayloadError::Empty));
    }

    #[test]
    fn test_multibyte_identity() {
        let identity = "웨이브-세션-🌊";
        let bytes = encode_identity(identity).unwrap();
        assert_eq!(decode_identity(&bytes).unwrap(), identity);
    }

    proptest! {
        #[test]
        fn prop_identity_survives_characteristic(identity in "\\PC{1,128}") {
            prop_assume!(identity.len() <= MAX_ATTRIBUTE_SIZE);
            let bytes = encode_identity(&identity).unwrap();
            prop_assert_eq!(decode_identity(&bytes).unwrap(), identity);
        }
    }
}
