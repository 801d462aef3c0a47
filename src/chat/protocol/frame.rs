//! Chat frame format.
//!
//! ```text
//! [checksum: u32 BE][DES-ECB ciphertext: multiple of 8 bytes]
//! ```
//!
//! The checksum is the wrapping sum of the ciphertext bytes. It detects
//! accidental corruption only and offers no authenticity.

use crate::chat::config::CHECKSUM_SIZE;
use crate::chat::error::ChatError;
use crate::chat::protocol::handshake::SessionKey;
use crate::crypto::des::{self, BLOCK_SIZE};

/// Frames of this length or shorter are discarded as malformed.
///
/// This covers the checksum plus a single block, so a message of 8 bytes or
/// fewer never reaches the peer.
pub const MALFORMED_FRAME_LEN: usize = CHECKSUM_SIZE + BLOCK_SIZE;

/// Wrapping 32-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// One encrypted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Checksum carried on the wire.
    pub checksum: u32,
    /// DES ciphertext.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encrypts `plaintext` under the session key.
    pub fn seal(plaintext: &[u8], key: &SessionKey) -> Self {
        let payload = des::encrypt(plaintext, key.des_key());
        Self {
            checksum: checksum(&payload),
            payload,
        }
    }

    /// Builds the frame for one typed line.
    ///
    /// Returns `Ok(None)` for an empty line, which is never transmitted.
    pub fn seal_line(
        line: &str,
        key: &SessionKey,
        max_message_size: usize,
    ) -> Result<Option<Self>, ChatError> {
        if line.is_empty() {
            return Ok(None);
        }
        if line.len() > max_message_size {
            return Err(ChatError::MessageTooLong {
                len: line.len(),
                max: max_message_size,
            });
        }
        Ok(Some(Self::seal(line.as_bytes(), key)))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CHECKSUM_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Splits a received frame. Does not verify the checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        if bytes.len() <= MALFORMED_FRAME_LEN {
            return Err(ChatError::MalformedFrame { len: bytes.len() });
        }
        let (head, payload) = bytes.split_at(CHECKSUM_SIZE);
        Ok(Self {
            checksum: u32::from_be_bytes([head[0], head[1], head[2], head[3]]),
            payload: payload.to_vec(),
        })
    }

    /// Recomputes the checksum over the payload.
    pub fn verify(&self) -> Result<(), ChatError> {
        let computed = checksum(&self.payload);
        if computed != self.checksum {
            return Err(ChatError::ChecksumMismatch {
                expected: self.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Verifies the checksum and decrypts the payload.
    pub fn open(&self, key: &SessionKey) -> Result<Vec<u8>, ChatError> {
        self.verify()?;
        self.decrypt(key)
    }

    /// Decrypts the payload without checking the checksum.
    pub fn decrypt(&self, key: &SessionKey) -> Result<Vec<u8>, ChatError> {
        Ok(des::decrypt(&self.payload, key.des_key())?)
    }

    /// Decrypts the payload with the byte-reversed session key.
    ///
    /// Diagnostic only. The result must never be shown as a message.
    pub fn probe_reversed_key(&self, key: &SessionKey) -> Result<Vec<u8>, ChatError> {
        Ok(des::decrypt(&self.payload, &key.des_key().reversed())?)
    }

    /// Leading payload bytes as hex, for traces.
    pub fn preview_hex(&self, max_bytes: usize) -> String {
        let end = self.payload.len().min(max_bytes);
        hex::encode(&self.payload[..end])
    }
}

/// Renders decrypted bytes as text: the zero fill is dropped and invalid
/// UTF-8 is replaced.
pub fn display_text(plaintext: &[u8]) -> String {
    let end = plaintext
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&plaintext[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DesKey;

    fn key() -> SessionKey {
        SessionKey::new(DesKey::new(*b"benbemmi")).unwrap()
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[0xFF; 4]), 0x3FC);
        assert_eq!(checksum(&vec![0xFF; 16_843_010]), 0xFFFF_FFFF_u32.wrapping_add(0xFF));
    }

    #[test]
    fn test_hello_frame_layout() {
        let frame = Frame::seal_line("HELLO", &key(), 1024).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 8);

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &checksum(&frame.payload).to_be_bytes());

        let plaintext = frame.open(&key()).unwrap();
        assert_eq!(plaintext, b"HELLO\0\0\0");
        assert_eq!(display_text(&plaintext), "HELLO");

        // A single-block frame is too short to be accepted
        let err = Frame::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ChatError::MalformedFrame { len: 12 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_two_block_frame_roundtrip() {
        let frame = Frame::seal_line("HELLO WORLD", &key(), 1024).unwrap().unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 20);

        let received = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(received, frame);
        assert_eq!(display_text(&received.open(&key()).unwrap()), "HELLO WORLD");
    }

    #[test]
    fn test_payload_is_padded_to_blocks() {
        let frame = Frame::seal(b"twelve bytes", &key());
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn test_empty_line_is_not_sent() {
        assert!(Frame::seal_line("", &key(), 1024).unwrap().is_none());
    }

    #[test]
    fn test_long_line_rejected() {
        let line = "x".repeat(1025);
        let err = Frame::seal_line(&line, &key(), 1024).unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong { len: 1025, max: 1024 }));
        assert!(!err.is_fatal());

        let line = "x".repeat(1024);
        let frame = Frame::seal_line(&line, &key(), 1024).unwrap().unwrap();
        assert_eq!(frame.to_bytes().len(), 1028);
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut bytes = Frame::seal(b"HELLO WORLD", &key()).to_bytes();
        bytes[4] ^= 0x01;

        let frame = Frame::from_bytes(&bytes).unwrap();
        let err = frame.open(&key()).unwrap_err();
        assert!(matches!(err, ChatError::ChecksumMismatch { .. }));
        assert!(!err.is_fatal());

        // Decryption alone does not look at the checksum
        assert_eq!(frame.decrypt(&key()).unwrap().len(), 16);
    }

    #[test]
    fn test_short_frames_are_malformed() {
        for len in [0, 4, 11, 12] {
            let err = Frame::from_bytes(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, ChatError::MalformedFrame { len: l } if l == len));
        }
    }

    #[test]
    fn test_partial_block_fails_decryption() {
        let payload = vec![1u8; 9];
        let mut bytes = checksum(&payload).to_be_bytes().to_vec();
        bytes.extend_from_slice(&payload);

        let frame = Frame::from_bytes(&bytes).unwrap();
        let err = frame.open(&key()).unwrap_err();
        assert!(matches!(err, ChatError::CryptoUsage(_)));
        assert!(!err.is_fatal());
        assert!(frame.probe_reversed_key(&key()).is_err());
    }

    #[test]
    fn test_reversed_key_probe_differs() {
        let frame = Frame::seal(b"HELLO", &key());
        let probed = frame.probe_reversed_key(&key()).unwrap();
        assert_ne!(probed, b"HELLO\0\0\0");
    }

    #[test]
    fn test_wrong_key_gives_garbage() {
        let frame = Frame::seal(b"HELLO", &key());
        let other = SessionKey::new(DesKey::new(*b"imbebneb")).unwrap();
        assert_ne!(frame.open(&other).unwrap(), b"HELLO\0\0\0");
    }

    #[test]
    fn test_display_text() {
        assert_eq!(display_text(b"hi\0\0\0\0\0\0"), "hi");
        assert_eq!(display_text(b"a\0b\0\0\0\0\0"), "a\0b");
        assert_eq!(display_text(&[0; 8]), "");
        assert_eq!(display_text(&[0xFF, b'a']), "\u{FFFD}a");
    }

    #[test]
    fn test_preview_hex() {
        let frame = Frame {
            checksum: 0,
            payload: (0u8..20).collect(),
        };
        assert_eq!(frame.preview_hex(4), "00010203");
        assert_eq!(frame.preview_hex(100).len(), 40);
    }
}
