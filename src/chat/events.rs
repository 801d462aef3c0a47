//! Diagnostic events raised during a connection.
//!
//! Workers never log directly; they report [`ChatEvent`]s to a
//! [`DiagnosticSink`] handed to them by the caller. [`TracingSink`] is the
//! production sink, [`MemorySink`] records events for inspection.

use std::sync::Mutex;

use crate::chat::protocol::Role;

/// Something worth telling the user or the log about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Responder generated its RSA key material.
    KeyMaterialGenerated {
        p: u64,
        q: u64,
        n: u64,
        phi: u64,
        e: u64,
        d: u64,
    },
    /// Generated key material failed an encrypt/decrypt round trip.
    KeyMaterialSelfCheckFailed { n: u64 },
    PublicKeySent { e: u64, n: u64 },
    PublicKeyReceived { e: u64, n: u64 },
    /// A session key word or ciphertext was not below n and was reduced.
    KeyWordClamped { index: usize, value: u64, modulus: u64 },
    SessionKeySent { ciphertexts: [u64; 4] },
    SessionKeyReceived { ciphertexts: [u64; 4] },
    SessionEstablished { role: Role, key_hex: String },
    HandshakeFailed { role: Role, reason: String },

    /// An empty line was typed and nothing was sent.
    EmptyLineSkipped,
    /// A typed line was too long to send.
    MessageRejected { len: usize, max: usize },
    FrameSent {
        checksum: u32,
        preview_hex: String,
        len: usize,
    },
    FrameReceived {
        checksum: u32,
        preview_hex: String,
        len: usize,
    },
    MalformedFrame { len: usize },
    ChecksumMismatch { expected: u32, computed: u32 },
    DecryptFailed { len: usize, reason: String },
    /// Outcome of retrying a failed decryption with the byte-reversed key.
    ReversedKeyProbe { succeeded: bool },
    /// A decrypted message for display.
    MessageDelivered { peer: String, text: String },
    SendFailed { reason: String },
    ReceiveFailed { reason: String },
    PeerClosed,
}

/// Receiver of diagnostic events. Shared between the send and receive
/// workers.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, event: ChatEvent);
}

/// Writes events to `tracing` and delivered messages to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, event: ChatEvent) {
        match event {
            ChatEvent::KeyMaterialGenerated { p, q, n, phi, e, d } => {
                tracing::debug!(p, q, n, phi, e, d, "Generated RSA key material");
            }
            ChatEvent::KeyMaterialSelfCheckFailed { n } => {
                tracing::warn!(n, "RSA key material failed its self-check");
            }
            ChatEvent::PublicKeySent { e, n } => {
                tracing::debug!(e, n, "Sent public key");
            }
            ChatEvent::PublicKeyReceived { e, n } => {
                tracing::debug!(e, n, "Received public key");
            }
            ChatEvent::KeyWordClamped {
                index,
                value,
                modulus,
            } => {
                tracing::warn!(index, value, modulus, "Session key word reduced modulo n");
            }
            ChatEvent::SessionKeySent { ciphertexts } => {
                tracing::debug!(?ciphertexts, "Sent encrypted session key");
            }
            ChatEvent::SessionKeyReceived { ciphertexts } => {
                tracing::debug!(?ciphertexts, "Received encrypted session key");
            }
            ChatEvent::SessionEstablished { role, key_hex } => {
                tracing::info!(?role, "Secure session established");
                tracing::debug!(key = %key_hex, "Session key");
            }
            ChatEvent::HandshakeFailed { role, reason } => {
                tracing::error!(?role, %reason, "Handshake failed");
            }
            ChatEvent::EmptyLineSkipped => {
                tracing::warn!("Empty message, nothing sent");
            }
            ChatEvent::MessageRejected { len, max } => {
                tracing::warn!(len, max, "Message too long, not sent");
            }
            ChatEvent::FrameSent {
                checksum,
                preview_hex,
                len,
            } => {
                tracing::trace!(
                    checksum = format_args!("{:#010x}", checksum),
                    preview = %preview_hex,
                    len,
                    "Sent frame"
                );
            }
            ChatEvent::FrameReceived {
                checksum,
                preview_hex,
                len,
            } => {
                tracing::trace!(
                    checksum = format_args!("{:#010x}", checksum),
                    preview = %preview_hex,
                    len,
                    "Received frame"
                );
            }
            ChatEvent::MalformedFrame { len } => {
                tracing::warn!(len, "Discarded malformed frame");
            }
            ChatEvent::ChecksumMismatch { expected, computed } => {
                tracing::warn!(
                    expected = format_args!("{:#010x}", expected),
                    computed = format_args!("{:#010x}", computed),
                    "Checksum mismatch, frame discarded"
                );
            }
            ChatEvent::DecryptFailed { len, reason } => {
                tracing::warn!(len, %reason, "Failed to decrypt frame");
            }
            ChatEvent::ReversedKeyProbe { succeeded } => {
                tracing::debug!(succeeded, "Retried decryption with reversed key");
            }
            ChatEvent::MessageDelivered { peer, text } => {
                println!("Receive message from <{}>: {}", peer, text);
            }
            ChatEvent::SendFailed { reason } => {
                tracing::error!(%reason, "Failed to send");
            }
            ChatEvent::ReceiveFailed { reason } => {
                tracing::error!(%reason, "Failed to receive");
            }
            ChatEvent::PeerClosed => {
                tracing::info!("Peer closed the connection");
            }
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ChatEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events reported so far.
    pub fn events(&self) -> Vec<ChatEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Texts of delivered messages, in order.
    pub fn delivered(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::MessageDelivered { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, event: ChatEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.report(ChatEvent::EmptyLineSkipped);
        sink.report(ChatEvent::MessageDelivered {
            peer: "127.0.0.1:8888".into(),
            text: "hi".into(),
        });
        sink.report(ChatEvent::PeerClosed);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ChatEvent::EmptyLineSkipped);
        assert_eq!(events[2], ChatEvent::PeerClosed);
        assert_eq!(sink.delivered(), vec!["hi".to_string()]);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        sink.report(ChatEvent::ChecksumMismatch {
            expected: 1,
            computed: 2,
        });
        sink.report(ChatEvent::SessionEstablished {
            role: Role::Initiator,
            key_hex: "6265".into(),
        });
    }
}
