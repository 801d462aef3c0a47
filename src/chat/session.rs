//! Session establishment and the duplex chat workers.
//!
//! After the handshake the connection is split: a spawned send worker turns
//! typed lines into frames while the calling task runs the receive worker.
//! The session ends when the receive worker ends; the send worker is then
//! cancelled.

use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::config::ChatConfig;
use crate::chat::error::ChatError;
use crate::chat::events::{ChatEvent, DiagnosticSink};
use crate::chat::protocol::{
    display_text, Frame, Initiator, PublicKeyMessage, Responder, Role, SessionKey,
    SessionKeyMessage, PUBLIC_KEY_MESSAGE_LEN, SESSION_KEY_MESSAGE_LEN,
};
use crate::chat::transport::{FrameSink, FrameSource};

/// Typed line that ends the send worker.
pub const QUIT_COMMAND: &str = "quit";

/// Plaintext encrypted and decrypted once after key generation.
const SELF_CHECK_VALUE: u64 = 42;

/// Ciphertext bytes shown in frame traces.
const PREVIEW_BYTES: usize = 16;

/// Runs the responder side of the handshake.
pub async fn establish_as_responder<R, W, G>(
    source: &mut R,
    sink: &mut W,
    config: &ChatConfig,
    rng: &mut G,
    diag: &dyn DiagnosticSink,
) -> Result<SessionKey, ChatError>
where
    R: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
    G: Rng + ?Sized,
{
    let result = respond(source, sink, config.prime_bits, rng, diag).await;
    report_outcome(Role::Responder, &result, diag);
    result
}

/// Runs the initiator side of the handshake.
pub async fn establish_as_initiator<R, W, G>(
    source: &mut R,
    sink: &mut W,
    rng: &mut G,
    diag: &dyn DiagnosticSink,
) -> Result<SessionKey, ChatError>
where
    R: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
    G: Rng + ?Sized,
{
    let result = initiate(source, sink, rng, diag).await;
    report_outcome(Role::Initiator, &result, diag);
    result
}

async fn respond<R, W, G>(
    source: &mut R,
    sink: &mut W,
    prime_bits: u32,
    rng: &mut G,
    diag: &dyn DiagnosticSink,
) -> Result<SessionKey, ChatError>
where
    R: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
    G: Rng + ?Sized,
{
    let mut responder = Responder::new();
    let public = responder.start(prime_bits, rng)?;

    if let Some(material) = responder.material() {
        diag.report(ChatEvent::KeyMaterialGenerated {
            p: material.p,
            q: material.q,
            n: material.n,
            phi: material.phi,
            e: material.e,
            d: material.d,
        });
        if !material.self_check(SELF_CHECK_VALUE) {
            diag.report(ChatEvent::KeyMaterialSelfCheckFailed { n: material.n });
        }
    }

    sink.send(&public.to_bytes()).await?;
    diag.report(ChatEvent::PublicKeySent {
        e: public.e,
        n: public.n,
    });

    let bytes = receive_handshake(source, SESSION_KEY_MESSAGE_LEN).await?;
    let message = SessionKeyMessage::from_bytes(&bytes)?;
    diag.report(ChatEvent::SessionKeyReceived {
        ciphertexts: message.ciphertexts,
    });

    let (key, clamped) = responder.finish(&message)?;
    for word in clamped {
        diag.report(ChatEvent::KeyWordClamped {
            index: word.index,
            value: word.value,
            modulus: word.modulus,
        });
    }
    Ok(key)
}

async fn initiate<R, W, G>(
    source: &mut R,
    sink: &mut W,
    rng: &mut G,
    diag: &dyn DiagnosticSink,
) -> Result<SessionKey, ChatError>
where
    R: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
    G: Rng + ?Sized,
{
    let mut initiator = Initiator::new();
    initiator.await_keys()?;

    let bytes = receive_handshake(source, PUBLIC_KEY_MESSAGE_LEN).await?;
    let public = PublicKeyMessage::from_bytes(&bytes)?;
    diag.report(ChatEvent::PublicKeyReceived {
        e: public.e,
        n: public.n,
    });

    let (message, clamped) = initiator.receive_public_key(&public, rng)?;
    for word in clamped {
        diag.report(ChatEvent::KeyWordClamped {
            index: word.index,
            value: word.value,
            modulus: word.modulus,
        });
    }

    sink.send(&message.to_bytes()).await?;
    diag.report(ChatEvent::SessionKeySent {
        ciphertexts: message.ciphertexts,
    });

    initiator.establish()
}

async fn receive_handshake<R: FrameSource + ?Sized>(
    source: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, ChatError> {
    source
        .receive(max_len)
        .await?
        .ok_or_else(|| ChatError::Protocol("Connection closed during handshake".to_string()))
}

fn report_outcome(role: Role, result: &Result<SessionKey, ChatError>, diag: &dyn DiagnosticSink) {
    match result {
        Ok(key) => diag.report(ChatEvent::SessionEstablished {
            role,
            key_hex: key.to_hex(),
        }),
        Err(e) => diag.report(ChatEvent::HandshakeFailed {
            role,
            reason: e.to_string(),
        }),
    }
}

/// Reads lines from `input` and sends each as a frame until end of input or
/// [`QUIT_COMMAND`], then closes `sink`.
///
/// Empty and overlong lines are reported and skipped. Returns the number of
/// frames sent.
pub async fn send_loop<W, L>(
    sink: &mut W,
    input: L,
    key: SessionKey,
    max_message_size: usize,
    diag: &dyn DiagnosticSink,
) -> Result<usize, ChatError>
where
    W: FrameSink + ?Sized,
    L: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut sent = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line == QUIT_COMMAND {
            break;
        }

        let frame = match Frame::seal_line(line, &key, max_message_size) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                diag.report(ChatEvent::EmptyLineSkipped);
                continue;
            }
            Err(ChatError::MessageTooLong { len, max }) => {
                diag.report(ChatEvent::MessageRejected { len, max });
                continue;
            }
            Err(e) => return Err(e),
        };

        let bytes = frame.to_bytes();
        if let Err(e) = sink.send(&bytes).await {
            diag.report(ChatEvent::SendFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }
        diag.report(ChatEvent::FrameSent {
            checksum: frame.checksum,
            preview_hex: frame.preview_hex(PREVIEW_BYTES),
            len: bytes.len(),
        });
        sent += 1;
    }

    if let Err(e) = sink.close().await {
        diag.report(ChatEvent::SendFailed {
            reason: e.to_string(),
        });
        return Err(e);
    }
    Ok(sent)
}

/// Receives frames until the peer closes or the transport fails, delivering
/// each decrypted message to `diag`.
///
/// Bad frames are reported and dropped. Returns the number of messages
/// delivered.
pub async fn receive_loop<R>(
    source: &mut R,
    key: &SessionKey,
    config: &ChatConfig,
    peer: &str,
    diag: &dyn DiagnosticSink,
) -> Result<usize, ChatError>
where
    R: FrameSource + ?Sized,
{
    let max_frame_len = config.max_frame_len();
    let mut delivered = 0;

    loop {
        let data = match source.receive(max_frame_len).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                diag.report(ChatEvent::PeerClosed);
                return Ok(delivered);
            }
            Err(e) => {
                diag.report(ChatEvent::ReceiveFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if let Some(text) = open_frame(&data, key, config.probe_reversed_key, diag) {
            diag.report(ChatEvent::MessageDelivered {
                peer: peer.to_string(),
                text,
            });
            delivered += 1;
        }
    }
}

fn open_frame(
    data: &[u8],
    key: &SessionKey,
    probe_reversed_key: bool,
    diag: &dyn DiagnosticSink,
) -> Option<String> {
    let Ok(frame) = Frame::from_bytes(data) else {
        diag.report(ChatEvent::MalformedFrame { len: data.len() });
        return None;
    };

    match frame.verify() {
        Ok(()) => {}
        Err(ChatError::ChecksumMismatch { expected, computed }) => {
            diag.report(ChatEvent::ChecksumMismatch { expected, computed });
            return None;
        }
        Err(e) => {
            diag.report(ChatEvent::DecryptFailed {
                len: frame.payload.len(),
                reason: e.to_string(),
            });
            return None;
        }
    }

    diag.report(ChatEvent::FrameReceived {
        checksum: frame.checksum,
        preview_hex: frame.preview_hex(PREVIEW_BYTES),
        len: data.len(),
    });

    match frame.decrypt(key) {
        Ok(plaintext) => Some(display_text(&plaintext)),
        Err(e) => {
            diag.report(ChatEvent::DecryptFailed {
                len: frame.payload.len(),
                reason: e.to_string(),
            });
            if probe_reversed_key {
                diag.report(ChatEvent::ReversedKeyProbe {
                    succeeded: frame.probe_reversed_key(key).is_ok(),
                });
            }
            None
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Frames sent, if the send worker finished before it was cancelled.
    pub frames_sent: Option<usize>,
    pub messages_delivered: usize,
}

/// An established chat session.
pub struct ChatSession {
    key: SessionKey,
    role: Role,
    peer: String,
    config: ChatConfig,
    diag: Arc<dyn DiagnosticSink>,
}

impl ChatSession {
    pub fn new(
        key: SessionKey,
        role: Role,
        peer: impl Into<String>,
        config: ChatConfig,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            key,
            role,
            peer: peer.into(),
            config,
            diag,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Runs the send worker on a spawned task and the receive worker on this
    /// one until the receive worker ends.
    pub async fn run<R, W, L>(
        self,
        mut source: R,
        sink: W,
        input: L,
    ) -> Result<SessionSummary, ChatError>
    where
        R: FrameSource,
        W: FrameSink + 'static,
        L: AsyncBufRead + Unpin + Send + 'static,
    {
        let Self {
            key,
            peer,
            config,
            diag,
            ..
        } = self;

        let max_message_size = config.max_message_size;
        let send_diag = Arc::clone(&diag);
        let sender = tokio::spawn(async move {
            let mut sink = sink;
            send_loop(&mut sink, input, key, max_message_size, send_diag.as_ref()).await
        });

        let received = receive_loop(&mut source, &key, &config, &peer, diag.as_ref()).await;

        sender.abort();
        let frames_sent = match sender.await {
            Ok(Ok(sent)) => Some(sent),
            _ => None,
        };

        Ok(SessionSummary {
            frames_sent,
            messages_delivered: received?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::events::MemorySink;
    use crate::chat::protocol::checksum;
    use crate::chat::transport::split_stream;
    use crate::crypto::DesKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn key() -> SessionKey {
        SessionKey::new(DesKey::new(*b"benbemmi")).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);

        let responder = tokio::spawn(async move {
            let (mut source, mut sink) = split_stream(right);
            let diag = MemorySink::new();
            let mut rng = StdRng::seed_from_u64(1);
            let key = establish_as_responder(
                &mut source,
                &mut sink,
                &ChatConfig::default(),
                &mut rng,
                &diag,
            )
            .await
            .unwrap();
            (key, diag.events())
        });

        let (mut source, mut sink) = split_stream(left);
        let diag = MemorySink::new();
        let mut rng = StdRng::seed_from_u64(2);
        let initiator_key = establish_as_initiator(&mut source, &mut sink, &mut rng, &diag)
            .await
            .unwrap();

        let (responder_key, responder_events) = responder.await.unwrap();
        assert_eq!(initiator_key, responder_key);

        assert!(responder_events
            .iter()
            .any(|e| matches!(e, ChatEvent::KeyMaterialGenerated { .. })));
        assert!(matches!(
            responder_events.last(),
            Some(ChatEvent::SessionEstablished {
                role: Role::Responder,
                ..
            })
        ));
        assert!(matches!(
            diag.events().last(),
            Some(ChatEvent::SessionEstablished {
                role: Role::Initiator,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_initiator_aborts_on_zero_exponent() {
        let (left, right) = tokio::io::duplex(1024);
        let (_peer_source, mut peer_sink) = split_stream(right);
        peer_sink
            .send(&PublicKeyMessage { e: 0, n: 3233 }.to_bytes())
            .await
            .unwrap();

        let (mut source, mut sink) = split_stream(left);
        let diag = MemorySink::new();
        let err = establish_as_initiator(
            &mut source,
            &mut sink,
            &mut StdRng::seed_from_u64(3),
            &diag,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChatError::Protocol(_)));
        let events = diag.events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChatEvent::SessionKeySent { .. })));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::HandshakeFailed {
                role: Role::Initiator,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_handshake_rejects_closed_connection() {
        let (left, right) = tokio::io::duplex(1024);
        drop(right);

        let (mut source, mut sink) = split_stream(left);
        let diag = MemorySink::new();
        let err = establish_as_initiator(
            &mut source,
            &mut sink,
            &mut StdRng::seed_from_u64(4),
            &diag,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_message_size() {
        let (left, right) = tokio::io::duplex(1024);
        let (_peer_source, mut peer_sink) = split_stream(right);
        peer_sink.send(&[1u8; 8]).await.unwrap();

        let (mut source, mut sink) = split_stream(left);
        let err = establish_as_initiator(
            &mut source,
            &mut sink,
            &mut StdRng::seed_from_u64(5),
            &MemorySink::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_send_loop_skips_empty_and_stops_at_quit() {
        let (left, right) = tokio::io::duplex(4096);
        let (_source, mut sink) = split_stream(left);
        let (mut peer, _peer_sink) = split_stream(right);

        let diag = MemorySink::new();
        let input =
            Cursor::new(b"hello there\n\nhi\r\nwide world\r\nquit\nnever sent\n".to_vec());
        let sent = send_loop(&mut sink, input, key(), 1024, &diag).await.unwrap();
        assert_eq!(sent, 3);
        assert!(diag.events().contains(&ChatEvent::EmptyLineSkipped));

        let receiver = MemorySink::new();
        let config = ChatConfig::default();
        let delivered = receive_loop(&mut peer, &key(), &config, "alice", &receiver)
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(receiver.delivered(), vec!["hello there", "wide world"]);

        // "hi" fits in one block, so its frame is discarded on arrival
        let events = receiver.events();
        assert!(events.contains(&ChatEvent::MalformedFrame { len: 12 }));
        assert_eq!(events.last(), Some(&ChatEvent::PeerClosed));
    }

    #[tokio::test]
    async fn test_send_loop_rejects_long_line_and_continues() {
        let (left, right) = tokio::io::duplex(4096);
        let (_source, mut sink) = split_stream(left);
        let (mut peer, _peer_sink) = split_stream(right);

        let config = ChatConfig {
            max_message_size: 16,
            ..Default::default()
        };
        let diag = MemorySink::new();
        let input = Cursor::new(format!("{}\nshort message\n", "x".repeat(17)).into_bytes());
        let sent = send_loop(&mut sink, input, key(), config.max_message_size, &diag)
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert!(diag
            .events()
            .contains(&ChatEvent::MessageRejected { len: 17, max: 16 }));

        let receiver = MemorySink::new();
        receive_loop(&mut peer, &key(), &config, "alice", &receiver)
            .await
            .unwrap();
        assert_eq!(receiver.delivered(), vec!["short message"]);
    }

    #[tokio::test]
    async fn test_receive_loop_drops_bad_frames() {
        let (left, right) = tokio::io::duplex(4096);
        let (_source, mut sink) = split_stream(left);
        let (mut peer, _peer_sink) = split_stream(right);

        let mut corrupted = Frame::seal(b"HELLO WORLD", &key()).to_bytes();
        corrupted[5] ^= 0x40;

        let partial = vec![7u8; 9];
        let mut partial_frame = checksum(&partial).to_be_bytes().to_vec();
        partial_frame.extend_from_slice(&partial);

        sink.send(&[0u8; 8]).await.unwrap();
        sink.send(&Frame::seal(b"HELLO", &key()).to_bytes()).await.unwrap();
        sink.send(&corrupted).await.unwrap();
        sink.send(&partial_frame).await.unwrap();
        sink.send(&Frame::seal(b"HELLO WORLD", &key()).to_bytes())
            .await
            .unwrap();
        sink.close().await.unwrap();

        let diag = MemorySink::new();
        let delivered = receive_loop(&mut peer, &key(), &ChatConfig::default(), "bob", &diag)
            .await
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(diag.delivered(), vec!["HELLO WORLD"]);

        let events = diag.events();
        assert!(events.contains(&ChatEvent::MalformedFrame { len: 8 }));
        assert!(events.contains(&ChatEvent::MalformedFrame { len: 12 }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ChatEvent::ChecksumMismatch { .. }))
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ChatEvent::FrameReceived { .. }))
                .count(),
            2
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::ChecksumMismatch { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::DecryptFailed { len: 9, .. })));
        assert!(events.contains(&ChatEvent::ReversedKeyProbe { succeeded: false }));
        assert!(events.contains(&ChatEvent::MessageDelivered {
            peer: "bob".into(),
            text: "HELLO WORLD".into(),
        }));
    }

    #[tokio::test]
    async fn test_reversed_key_probe_can_be_disabled() {
        let (left, right) = tokio::io::duplex(1024);
        let (_source, mut sink) = split_stream(left);
        let (mut peer, _peer_sink) = split_stream(right);

        let partial = vec![7u8; 9];
        let mut frame = checksum(&partial).to_be_bytes().to_vec();
        frame.extend_from_slice(&partial);
        sink.send(&frame).await.unwrap();
        sink.close().await.unwrap();

        let config = ChatConfig {
            probe_reversed_key: false,
            ..Default::default()
        };
        let diag = MemorySink::new();
        receive_loop(&mut peer, &key(), &config, "bob", &diag)
            .await
            .unwrap();
        assert!(!diag
            .events()
            .iter()
            .any(|e| matches!(e, ChatEvent::ReversedKeyProbe { .. })));
    }

    #[tokio::test]
    async fn test_receive_loop_fails_on_oversized_frame() {
        let (left, right) = tokio::io::duplex(8192);
        let (_source, mut sink) = split_stream(left);
        let (mut peer, _peer_sink) = split_stream(right);

        sink.send(&vec![0u8; 2000]).await.unwrap();

        let diag = MemorySink::new();
        let err = receive_loop(&mut peer, &key(), &ChatConfig::default(), "bob", &diag)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(matches!(
            diag.events().last(),
            Some(ChatEvent::ReceiveFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_run_exchanges_messages() {
        let (left, right) = tokio::io::duplex(4096);
        let (alice_source, alice_sink) = split_stream(left);
        let (bob_source, bob_sink) = split_stream(right);

        let alice_diag = Arc::new(MemorySink::new());
        let bob_diag = Arc::new(MemorySink::new());

        let alice = ChatSession::new(
            key(),
            Role::Initiator,
            "bob",
            ChatConfig::default(),
            alice_diag.clone(),
        );
        let bob = ChatSession::new(
            key(),
            Role::Responder,
            "alice",
            ChatConfig::default(),
            bob_diag.clone(),
        );
        assert_eq!(alice.role(), Role::Initiator);
        assert_eq!(bob.peer(), "alice");

        // Bob never types; his input stays open until the test ends.
        let (bob_input, _bob_keyboard) = tokio::io::duplex(64);
        let alice_input = Cursor::new(b"hello bob\n\nhow are you\nquit\n".to_vec());

        let (alice_summary, bob_summary) = tokio::join!(
            alice.run(alice_source, alice_sink, alice_input),
            bob.run(bob_source, bob_sink, tokio::io::BufReader::new(bob_input)),
        );

        let alice_summary = alice_summary.unwrap();
        let bob_summary = bob_summary.unwrap();
        assert_eq!(alice_summary.frames_sent, Some(2));
        assert_eq!(bob_summary.messages_delivered, 2);
        assert_eq!(bob_summary.frames_sent, None);
        assert_eq!(bob_diag.delivered(), vec!["hello bob", "how are you"]);
        assert!(alice_diag.events().contains(&ChatEvent::EmptyLineSkipped));
    }
}
